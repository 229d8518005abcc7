//! Telemetry carried in STATUS frames.
//!
//! Payload layout (big-endian), 15 bytes:
//!
//! ```text
//! frequency f32 | tx_power i8 | tx_packet_count u32 | rx_packet_count u32 | crc_error_count u16
//! ```
//!
//! Short payloads are accepted: each field is read only when all of its
//! bytes are present, and missing fields keep their defaults.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;

/// Encoded size of a complete status payload.
pub const STATUS_PAYLOAD_SIZE: usize = 15;

pub const DEFAULT_FREQUENCY_MHZ: f32 = 915.0;
pub const DEFAULT_TX_POWER_DBM: i8 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TelemetryStatus {
    /// Carrier frequency in MHz.
    pub frequency: f32,
    /// Transmit power in dBm.
    pub tx_power: i8,
    pub tx_packet_count: u32,
    pub rx_packet_count: u32,
    pub crc_error_count: u16,
}

impl Default for TelemetryStatus {
    fn default() -> Self {
        Self {
            frequency: DEFAULT_FREQUENCY_MHZ,
            tx_power: DEFAULT_TX_POWER_DBM,
            tx_packet_count: 0,
            rx_packet_count: 0,
            crc_error_count: 0,
        }
    }
}

impl TelemetryStatus {
    /// Parse a STATUS payload. Never fails; trailing bytes are ignored.
    pub fn parse(payload: &[u8]) -> Self {
        let mut status = Self::default();
        let mut fields = FieldCursor { bytes: payload };

        if let Some(b) = fields.take::<4>() {
            status.frequency = f32::from_be_bytes(b);
        }
        if let Some(b) = fields.take::<1>() {
            status.tx_power = i8::from_be_bytes(b);
        }
        if let Some(b) = fields.take::<4>() {
            status.tx_packet_count = u32::from_be_bytes(b);
        }
        if let Some(b) = fields.take::<4>() {
            status.rx_packet_count = u32::from_be_bytes(b);
        }
        if let Some(b) = fields.take::<2>() {
            status.crc_error_count = u16::from_be_bytes(b);
        }
        status
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(STATUS_PAYLOAD_SIZE);
        buf.put_f32(self.frequency);
        buf.put_i8(self.tx_power);
        buf.put_u32(self.tx_packet_count);
        buf.put_u32(self.rx_packet_count);
        buf.put_u16(self.crc_error_count);
        buf.freeze()
    }
}

struct FieldCursor<'a> {
    bytes: &'a [u8],
}

impl FieldCursor<'_> {
    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        let (head, rest) = self.bytes.split_first_chunk::<N>()?;
        self.bytes = rest;
        Some(*head)
    }
}
