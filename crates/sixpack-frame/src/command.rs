//! Command and priority codes carried in the packed header byte.
//!
//! Packed byte layout: `channel << 4 | priority << 2 | command`.
//! Only two bits are available for the command, so of the eight logical
//! commands only DATA, ACK, NACK and STATUS can be told apart on the wire.
//! The remaining commands are representable for routing and diagnostics but
//! the encoder refuses them instead of letting them alias a wire command.

use std::fmt;

/// Frame start marker.
pub const SYNC: u8 = 0x00;

/// Number of virtual channels (channel ids 0-15).
pub const MAX_CHANNELS: u8 = 16;

const COMMAND_MASK: u8 = 0x03;
const PRIORITY_MASK: u8 = 0x03;

/// Frame command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Sequenced payload that must be acknowledged.
    Data,
    /// Positive acknowledgment of a DATA frame.
    Ack,
    /// Negative acknowledgment, requests immediate retransmission.
    Nack,
    /// Telemetry request (empty payload) or response.
    Status,
    Config,
    Reset,
    Test,
    Beacon,
    /// A code no known command maps to.
    Unrecognized(u8),
}

impl Command {
    /// Logical command code (0-7).
    pub fn code(self) -> u8 {
        match self {
            Command::Data => 0x00,
            Command::Ack => 0x01,
            Command::Nack => 0x02,
            Command::Status => 0x03,
            Command::Config => 0x04,
            Command::Reset => 0x05,
            Command::Test => 0x06,
            Command::Beacon => 0x07,
            Command::Unrecognized(code) => code,
        }
    }

    /// Map a logical command code to a command.
    pub fn from_code(code: u8) -> Self {
        match code {
            0x00 => Command::Data,
            0x01 => Command::Ack,
            0x02 => Command::Nack,
            0x03 => Command::Status,
            0x04 => Command::Config,
            0x05 => Command::Reset,
            0x06 => Command::Test,
            0x07 => Command::Beacon,
            other => Command::Unrecognized(other),
        }
    }

    /// Two-bit wire code, or `None` when the command cannot be encoded.
    pub fn wire_code(self) -> Option<u8> {
        match self {
            Command::Data | Command::Ack | Command::Nack | Command::Status => Some(self.code()),
            _ => None,
        }
    }

    /// Decode the command bits of a packed header byte.
    pub fn from_packed(packed: u8) -> Self {
        Self::from_code(packed & COMMAND_MASK)
    }

    pub fn name(self) -> &'static str {
        match self {
            Command::Data => "DATA",
            Command::Ack => "ACK",
            Command::Nack => "NACK",
            Command::Status => "STATUS",
            Command::Config => "CONFIG",
            Command::Reset => "RESET",
            Command::Test => "TEST",
            Command::Beacon => "BEACON",
            Command::Unrecognized(_) => "UNRECOGNIZED",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Unrecognized(code) => write!(f, "UNRECOGNIZED(0x{code:02x})"),
            other => f.write_str(other.name()),
        }
    }
}

/// Transmit priority. Higher values drain first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Urgent = 3,
}

impl Priority {
    pub const ALL: [Priority; 4] = [
        Priority::Low,
        Priority::Normal,
        Priority::High,
        Priority::Urgent,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Decode the priority bits of a packed header byte. Every value is valid.
    pub fn from_packed(packed: u8) -> Self {
        match (packed >> 2) & PRIORITY_MASK {
            0 => Priority::Low,
            1 => Priority::Normal,
            2 => Priority::High,
            _ => Priority::Urgent,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Priority::Low => "LOW",
            Priority::Normal => "NORMAL",
            Priority::High => "HIGH",
            Priority::Urgent => "URGENT",
        }
    }
}

impl TryFrom<u8> for Priority {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, u8> {
        Priority::ALL.get(value as usize).copied().ok_or(value)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Channel id carried in the upper nibble of a packed header byte.
pub fn channel_from_packed(packed: u8) -> u8 {
    packed >> 4
}
