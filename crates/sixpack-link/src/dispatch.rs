//! Routing of verified inbound frames.
//!
//! Dispatch runs with the engine state locked and only records what must
//! happen: wire writes and application events. The receive loop performs
//! them after the lock is released, so handlers may call back into the link.

use std::time::Instant;

use bytes::Bytes;
use sixpack_frame::{Command, Frame};
use tracing::debug;

use crate::reliability::{NackOutcome, PendingKey, ReliabilityManager};
use crate::sequencer::{ChannelSequencer, RxOutcome};
use crate::stats::Statistics;
use crate::status::TelemetryStatus;

/// A write the receive loop must perform, ahead of the transmit queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedWrite {
    Ack(Frame),
    Retransmit { key: PendingKey, bytes: Bytes },
}

/// Something the application is told about.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Data { channel: u8, payload: Bytes },
    Status { channel: u8, status: TelemetryStatus },
    Failure { channel: u8, sequence: u8 },
}

/// Writes and events produced by one or more dispatched frames, in order.
#[derive(Debug, Default)]
pub struct DispatchPlan {
    pub writes: Vec<PlannedWrite>,
    pub events: Vec<LinkEvent>,
}

impl DispatchPlan {
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.events.is_empty()
    }
}

/// Route one verified frame.
pub fn dispatch(
    frame: Frame,
    sequencer: &mut ChannelSequencer,
    reliability: &mut ReliabilityManager,
    stats: &Statistics,
    now: Instant,
    plan: &mut DispatchPlan,
) {
    let Frame {
        command,
        channel,
        sequence,
        payload,
        ..
    } = frame;

    match command {
        Command::Data => {
            // Duplicates are ACKed as well.
            plan.writes.push(PlannedWrite::Ack(Frame::ack(channel, sequence)));
            match sequencer.accept_rx(channel, sequence) {
                RxOutcome::Accept => {
                    debug!(channel, sequence, len = payload.len(), "DATA accepted");
                    plan.events.push(LinkEvent::Data { channel, payload });
                }
                RxOutcome::DuplicateOrOutOfOrder { expected } => {
                    debug!(channel, sequence, expected, "DATA not in order, not delivered");
                    stats.record_duplicate();
                }
            }
        }
        Command::Ack => {
            stats.record_ack_received();
            if !reliability.on_ack(channel, sequence) {
                debug!(channel, sequence, "ACK for unknown frame");
            }
        }
        Command::Nack => {
            stats.record_nack_received();
            match reliability.on_nack(channel, sequence, now) {
                NackOutcome::Retransmit(bytes) => {
                    plan.writes.push(PlannedWrite::Retransmit {
                        key: PendingKey::new(channel, sequence),
                        bytes,
                    });
                }
                NackOutcome::Exhausted(key) => {
                    plan.events.push(LinkEvent::Failure {
                        channel: key.channel,
                        sequence: key.sequence,
                    });
                }
                NackOutcome::Unknown => {
                    debug!(channel, sequence, "NACK for unknown frame");
                }
            }
        }
        Command::Status => {
            let status = TelemetryStatus::parse(&payload);
            plan.events.push(LinkEvent::Status { channel, status });
        }
        other => {
            debug!(channel, sequence, command = %other, "no handler for command");
            stats.record_unhandled_command();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use sixpack_frame::Priority;

    use super::*;

    struct Fixture {
        sequencer: ChannelSequencer,
        reliability: ReliabilityManager,
        stats: Statistics,
        plan: DispatchPlan,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                sequencer: ChannelSequencer::new(),
                reliability: ReliabilityManager::new(
                    Duration::from_secs(5),
                    1,
                    sixpack_frame::DEFAULT_MAX_PAYLOAD,
                ),
                stats: Statistics::new(),
                plan: DispatchPlan::default(),
            }
        }

        fn dispatch(&mut self, frame: Frame) {
            dispatch(
                frame,
                &mut self.sequencer,
                &mut self.reliability,
                &self.stats,
                Instant::now(),
                &mut self.plan,
            );
        }

        fn submit(&mut self, channel: u8) -> Bytes {
            let outbound = self
                .reliability
                .submit(
                    &mut self.sequencer,
                    channel,
                    Bytes::from_static(b"out"),
                    Priority::Normal,
                )
                .expect("submit should succeed");
            self.reliability.mark_transmitted(
                PendingKey::new(channel, outbound.frame.sequence),
                Instant::now(),
            );
            outbound.encoded
        }
    }

    fn data(channel: u8, sequence: u8, payload: &'static [u8]) -> Frame {
        Frame::data(channel, Priority::Normal, sequence, Bytes::from_static(payload))
    }

    #[test]
    fn in_order_data_is_acked_and_delivered() {
        let mut fx = Fixture::new();
        fx.dispatch(data(2, 0, b"a"));
        fx.dispatch(data(2, 1, b"b"));

        assert_eq!(
            fx.plan.writes,
            vec![
                PlannedWrite::Ack(Frame::ack(2, 0)),
                PlannedWrite::Ack(Frame::ack(2, 1))
            ]
        );
        assert_eq!(
            fx.plan.events,
            vec![
                LinkEvent::Data {
                    channel: 2,
                    payload: Bytes::from_static(b"a")
                },
                LinkEvent::Data {
                    channel: 2,
                    payload: Bytes::from_static(b"b")
                },
            ]
        );
    }

    #[test]
    fn duplicate_data_is_acked_not_delivered() {
        let mut fx = Fixture::new();
        fx.dispatch(data(0, 0, b"once"));
        fx.dispatch(data(0, 0, b"once"));

        assert_eq!(fx.plan.writes.len(), 2);
        assert_eq!(fx.plan.events.len(), 1);
        assert_eq!(fx.stats.snapshot().duplicates, 1);
    }

    #[test]
    fn out_of_order_data_is_acked_not_delivered() {
        let mut fx = Fixture::new();
        fx.dispatch(data(0, 3, b"early"));

        assert_eq!(fx.plan.writes, vec![PlannedWrite::Ack(Frame::ack(0, 3))]);
        assert!(fx.plan.events.is_empty());
        assert_eq!(fx.stats.snapshot().duplicates, 1);
    }

    #[test]
    fn ack_clears_pending() {
        let mut fx = Fixture::new();
        fx.submit(4);
        fx.dispatch(Frame::ack(4, 0));
        fx.dispatch(Frame::ack(4, 0));

        assert!(fx.reliability.is_empty());
        assert!(fx.plan.is_empty());
        assert_eq!(fx.stats.snapshot().acks_received, 2);
    }

    #[test]
    fn nack_retransmits_then_fails() {
        let mut fx = Fixture::new();
        let encoded = fx.submit(1);

        fx.dispatch(Frame::nack(1, 0));
        assert_eq!(
            fx.plan.writes,
            vec![PlannedWrite::Retransmit {
                key: PendingKey::new(1, 0),
                bytes: encoded
            }]
        );

        fx.dispatch(Frame::nack(1, 0));
        assert_eq!(
            fx.plan.events,
            vec![LinkEvent::Failure {
                channel: 1,
                sequence: 0
            }]
        );
        assert!(fx.reliability.is_empty());

        fx.dispatch(Frame::nack(1, 0));
        assert_eq!(fx.plan.events.len(), 1);
        assert_eq!(fx.stats.snapshot().nacks_received, 3);
    }

    #[test]
    fn status_is_parsed_and_delivered() {
        let mut fx = Fixture::new();
        let status = TelemetryStatus {
            frequency: 868.1,
            ..TelemetryStatus::default()
        };
        fx.dispatch(Frame::status(6, Priority::Urgent, status.to_bytes()));
        fx.dispatch(Frame::status(6, Priority::Urgent, Bytes::new()));

        assert_eq!(
            fx.plan.events,
            vec![
                LinkEvent::Status { channel: 6, status },
                LinkEvent::Status {
                    channel: 6,
                    status: TelemetryStatus::default()
                },
            ]
        );
        assert!(fx.plan.writes.is_empty());
    }

    #[test]
    fn other_commands_are_counted_and_ignored() {
        let mut fx = Fixture::new();
        fx.dispatch(Frame::new(
            Command::Unrecognized(0x09),
            0,
            Priority::Low,
            0,
            Bytes::new(),
        ));
        fx.dispatch(Frame::new(Command::Beacon, 0, Priority::Low, 0, Bytes::new()));

        assert!(fx.plan.is_empty());
        assert_eq!(fx.stats.snapshot().unhandled_commands, 2);
    }
}
