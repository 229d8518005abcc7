use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Link counters, shared between the receive thread and submitters.
///
/// Counters only grow. Use [`snapshot`](Self::snapshot) for a consistent copy
/// to report.
#[derive(Debug, Default)]
pub struct Statistics {
    frames_tx: AtomicU64,
    frames_rx: AtomicU64,
    acks_sent: AtomicU64,
    acks_received: AtomicU64,
    nacks_received: AtomicU64,
    crc_errors: AtomicU64,
    framing_errors: AtomicU64,
    timeouts: AtomicU64,
    retries: AtomicU64,
    duplicates: AtomicU64,
    unhandled_commands: AtomicU64,
}

/// Point-in-time copy of [`Statistics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatisticsSnapshot {
    /// Frames written to the transport, retransmissions and ACKs included.
    pub frames_tx: u64,
    /// Frames that passed checksum verification.
    pub frames_rx: u64,
    pub acks_sent: u64,
    pub acks_received: u64,
    pub nacks_received: u64,
    pub crc_errors: u64,
    /// Resynchronizer overflows.
    pub framing_errors: u64,
    /// DATA frames given up after their last ACK timeout.
    pub timeouts: u64,
    /// Retransmissions, whether timeout- or NACK-driven.
    pub retries: u64,
    /// DATA frames acknowledged but not delivered.
    pub duplicates: u64,
    /// Frames whose command has no handler.
    pub unhandled_commands: u64,
}

fn bump(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_frame_tx(&self) {
        bump(&self.frames_tx, 1);
    }

    pub fn record_frame_rx(&self) {
        bump(&self.frames_rx, 1);
    }

    /// An ACK write; also counts as a transmitted frame.
    pub fn record_ack_sent(&self) {
        bump(&self.acks_sent, 1);
        bump(&self.frames_tx, 1);
    }

    pub fn record_ack_received(&self) {
        bump(&self.acks_received, 1);
    }

    pub fn record_nack_received(&self) {
        bump(&self.nacks_received, 1);
    }

    pub fn record_crc_errors(&self, n: u64) {
        bump(&self.crc_errors, n);
    }

    pub fn record_framing_errors(&self, n: u64) {
        bump(&self.framing_errors, n);
    }

    pub fn record_timeout(&self) {
        bump(&self.timeouts, 1);
    }

    pub fn record_retry(&self) {
        bump(&self.retries, 1);
    }

    pub fn record_duplicate(&self) {
        bump(&self.duplicates, 1);
    }

    pub fn record_unhandled_command(&self) {
        bump(&self.unhandled_commands, 1);
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        StatisticsSnapshot {
            frames_tx: load(&self.frames_tx),
            frames_rx: load(&self.frames_rx),
            acks_sent: load(&self.acks_sent),
            acks_received: load(&self.acks_received),
            nacks_received: load(&self.nacks_received),
            crc_errors: load(&self.crc_errors),
            framing_errors: load(&self.framing_errors),
            timeouts: load(&self.timeouts),
            retries: load(&self.retries),
            duplicates: load(&self.duplicates),
            unhandled_commands: load(&self.unhandled_commands),
        }
    }
}

impl StatisticsSnapshot {
    /// Counter names and values in display order.
    pub fn fields(&self) -> [(&'static str, u64); 11] {
        [
            ("frames_tx", self.frames_tx),
            ("frames_rx", self.frames_rx),
            ("acks_sent", self.acks_sent),
            ("acks_received", self.acks_received),
            ("nacks_received", self.nacks_received),
            ("crc_errors", self.crc_errors),
            ("framing_errors", self.framing_errors),
            ("timeouts", self.timeouts),
            ("retries", self.retries),
            ("duplicates", self.duplicates),
            ("unhandled_commands", self.unhandled_commands),
        ]
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn counters_start_at_zero() {
        assert_eq!(Statistics::new().snapshot(), StatisticsSnapshot::default());
    }

    #[test]
    fn ack_sent_counts_as_frame_tx() {
        let stats = Statistics::new();
        stats.record_frame_tx();
        stats.record_ack_sent();

        let snap = stats.snapshot();
        assert_eq!(snap.frames_tx, 2);
        assert_eq!(snap.acks_sent, 1);
    }

    #[test]
    fn batch_counters_add() {
        let stats = Statistics::new();
        stats.record_crc_errors(3);
        stats.record_crc_errors(0);
        stats.record_framing_errors(1);

        let snap = stats.snapshot();
        assert_eq!(snap.crc_errors, 3);
        assert_eq!(snap.framing_errors, 1);
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let stats = Arc::new(Statistics::new());
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let stats = Arc::clone(&stats);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.record_frame_rx();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().expect("worker should finish");
        }
        assert_eq!(stats.snapshot().frames_rx, 4000);
    }

    #[test]
    fn snapshot_serializes_field_names() {
        let stats = Statistics::new();
        stats.record_duplicate();
        let json = serde_json::to_value(stats.snapshot()).expect("snapshot should serialize");
        assert_eq!(json["duplicates"], 1);
        assert_eq!(json["frames_tx"], 0);

        let names: Vec<&str> = stats.snapshot().fields().iter().map(|(n, _)| *n).collect();
        for name in names {
            assert!(json.get(name).is_some(), "missing {name}");
        }
    }
}
