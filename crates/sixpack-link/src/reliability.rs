//! Acknowledgment tracking and bounded retransmission.
//!
//! Every submitted DATA frame owns one [`PendingAck`] until the peer ACKs it
//! or its retries run out. All time is passed in by the caller, so the
//! manager itself never reads the clock.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::Serialize;
use sixpack_frame::{Frame, FrameError, Priority, MAX_CHANNELS};
use tracing::{debug, warn};

use crate::config::{DEFAULT_ACK_TIMEOUT, DEFAULT_MAX_RETRIES};
use crate::error::{LinkError, Result};
use crate::queue::Outbound;
use crate::sequencer::ChannelSequencer;

/// Identity of an in-flight DATA frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct PendingKey {
    pub channel: u8,
    pub sequence: u8,
}

impl PendingKey {
    pub fn new(channel: u8, sequence: u8) -> Self {
        Self { channel, sequence }
    }
}

/// A DATA frame awaiting acknowledgment.
#[derive(Debug, Clone)]
pub struct PendingAck {
    pub frame: Frame,
    /// Wire bytes, reused verbatim for every retransmission.
    pub encoded: Bytes,
    /// Instant of the last (re)transmission. `None` while still queued.
    pub sent_at: Option<Instant>,
    /// Retransmissions performed so far.
    pub retries: u32,
}

/// What to do about a NACK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NackOutcome {
    /// Write these bytes now, ahead of the queue.
    Retransmit(Bytes),
    /// Retries are used up; the entry is gone.
    Exhausted(PendingKey),
    /// No such frame is pending.
    Unknown,
}

/// One timed-out entry found by [`ReliabilityManager::sweep`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepAction {
    Retransmit {
        key: PendingKey,
        bytes: Bytes,
        attempt: u32,
    },
    GiveUp(PendingKey),
}

#[derive(Debug)]
pub struct ReliabilityManager {
    pending: BTreeMap<PendingKey, PendingAck>,
    ack_timeout: Duration,
    max_retries: u32,
    max_payload_size: usize,
}

impl ReliabilityManager {
    pub fn new(ack_timeout: Duration, max_retries: u32, max_payload_size: usize) -> Self {
        Self {
            pending: BTreeMap::new(),
            ack_timeout,
            max_retries,
            max_payload_size,
        }
    }

    /// Sequence a DATA frame on `channel` and start tracking it.
    ///
    /// The payload and channel are checked before a sequence number is
    /// taken, so a rejected submit leaves the channel untouched. The ACK
    /// timer starts at [`mark_transmitted`](Self::mark_transmitted).
    pub fn submit(
        &mut self,
        sequencer: &mut ChannelSequencer,
        channel: u8,
        payload: Bytes,
        priority: Priority,
    ) -> Result<Outbound> {
        if channel >= MAX_CHANNELS {
            return Err(LinkError::InvalidChannel(channel));
        }
        if payload.len() > self.max_payload_size {
            return Err(LinkError::Frame(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_payload_size,
            }));
        }

        let sequence = sequencer.next_tx_sequence(channel);
        let key = PendingKey::new(channel, sequence);
        if self.pending.contains_key(&key) {
            sequencer.rollback_tx_sequence(channel);
            return Err(LinkError::SequenceInFlight(key));
        }

        let frame = Frame::data(channel, priority, sequence, payload);
        let encoded = match frame.encode(self.max_payload_size) {
            Ok(encoded) => encoded,
            Err(err) => {
                sequencer.rollback_tx_sequence(channel);
                return Err(err.into());
            }
        };

        self.pending.insert(
            key,
            PendingAck {
                frame: frame.clone(),
                encoded: encoded.clone(),
                sent_at: None,
                retries: 0,
            },
        );
        Ok(Outbound { frame, encoded })
    }

    /// Start the ACK timer for `key` when its frame actually hits the wire.
    pub fn mark_transmitted(&mut self, key: PendingKey, now: Instant) {
        if let Some(entry) = self.pending.get_mut(&key) {
            entry.sent_at = Some(now);
        }
    }

    /// Clear a pending entry. Returns `false` for an unknown key.
    pub fn on_ack(&mut self, channel: u8, sequence: u8) -> bool {
        self.pending
            .remove(&PendingKey::new(channel, sequence))
            .is_some()
    }

    pub fn on_nack(&mut self, channel: u8, sequence: u8, now: Instant) -> NackOutcome {
        let key = PendingKey::new(channel, sequence);
        let Some(entry) = self.pending.get_mut(&key) else {
            return NackOutcome::Unknown;
        };

        if entry.retries < self.max_retries {
            entry.retries += 1;
            entry.sent_at = Some(now);
            debug!(channel, sequence, retries = entry.retries, "retransmitting on NACK");
            NackOutcome::Retransmit(entry.encoded.clone())
        } else {
            self.pending.remove(&key);
            warn!(channel, sequence, "retries exhausted after NACK");
            NackOutcome::Exhausted(key)
        }
    }

    /// Retransmit or give up every entry older than the ACK timeout.
    ///
    /// Entries still waiting in the transmit queue are skipped. Actions come
    /// out in key order.
    pub fn sweep(&mut self, now: Instant) -> Vec<SweepAction> {
        let mut actions = Vec::new();
        let mut expired = Vec::new();

        for (key, entry) in self.pending.iter_mut() {
            let Some(sent_at) = entry.sent_at else {
                continue;
            };
            if now.saturating_duration_since(sent_at) <= self.ack_timeout {
                continue;
            }
            if entry.retries < self.max_retries {
                entry.retries += 1;
                entry.sent_at = Some(now);
                debug!(
                    channel = key.channel,
                    sequence = key.sequence,
                    retries = entry.retries,
                    "ACK timeout, retransmitting"
                );
                actions.push(SweepAction::Retransmit {
                    key: *key,
                    bytes: entry.encoded.clone(),
                    attempt: entry.retries,
                });
            } else {
                warn!(
                    channel = key.channel,
                    sequence = key.sequence,
                    retries = entry.retries,
                    "ACK timeout, giving up"
                );
                expired.push(*key);
                actions.push(SweepAction::GiveUp(*key));
            }
        }

        for key in expired {
            self.pending.remove(&key);
        }
        actions
    }

    /// Remove every entry, returning their keys in order.
    pub fn drain(&mut self) -> Vec<PendingKey> {
        std::mem::take(&mut self.pending).into_keys().collect()
    }

    pub fn get(&self, key: PendingKey) -> Option<&PendingAck> {
        self.pending.get(&key)
    }

    pub fn contains(&self, key: PendingKey) -> bool {
        self.pending.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Default for ReliabilityManager {
    fn default() -> Self {
        Self::new(
            DEFAULT_ACK_TIMEOUT,
            DEFAULT_MAX_RETRIES,
            sixpack_frame::DEFAULT_MAX_PAYLOAD,
        )
    }
}
