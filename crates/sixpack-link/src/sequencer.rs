//! Per-channel modulo-256 sequence counters.

use sixpack_frame::MAX_CHANNELS;

/// Result of checking an inbound DATA sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxOutcome {
    /// The expected sequence; the receive counter advanced.
    Accept,
    /// A repeat or out-of-order frame; nothing changed.
    DuplicateOrOutOfOrder { expected: u8 },
}

#[derive(Debug, Clone, Copy, Default)]
struct ChannelState {
    tx_sequence: u8,
    rx_sequence: u8,
}

/// Sequence state for all 16 channels.
///
/// Channel ids are validated by the caller; an out-of-range id here is a
/// programming error and is masked into range.
#[derive(Debug, Clone)]
pub struct ChannelSequencer {
    channels: [ChannelState; MAX_CHANNELS as usize],
}

impl ChannelSequencer {
    pub fn new() -> Self {
        Self {
            channels: [ChannelState::default(); MAX_CHANNELS as usize],
        }
    }

    fn state(&mut self, channel: u8) -> &mut ChannelState {
        &mut self.channels[usize::from(channel & 0x0F)]
    }

    /// Take the next transmit sequence number for `channel`.
    pub fn next_tx_sequence(&mut self, channel: u8) -> u8 {
        let state = self.state(channel);
        let sequence = state.tx_sequence;
        state.tx_sequence = sequence.wrapping_add(1);
        sequence
    }

    /// Undo the last [`next_tx_sequence`](Self::next_tx_sequence) on `channel`.
    pub fn rollback_tx_sequence(&mut self, channel: u8) {
        let state = self.state(channel);
        state.tx_sequence = state.tx_sequence.wrapping_sub(1);
    }

    /// Peek at the sequence the next submit on `channel` will use.
    pub fn peek_tx_sequence(&self, channel: u8) -> u8 {
        self.channels[usize::from(channel & 0x0F)].tx_sequence
    }

    /// Accept `sequence` iff it is the next expected one on `channel`.
    pub fn accept_rx(&mut self, channel: u8, sequence: u8) -> RxOutcome {
        let state = self.state(channel);
        if sequence == state.rx_sequence {
            state.rx_sequence = sequence.wrapping_add(1);
            RxOutcome::Accept
        } else {
            RxOutcome::DuplicateOrOutOfOrder {
                expected: state.rx_sequence,
            }
        }
    }
}

impl Default for ChannelSequencer {
    fn default() -> Self {
        Self::new()
    }
}
