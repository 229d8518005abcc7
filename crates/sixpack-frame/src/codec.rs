use bytes::{BufMut, Bytes, BytesMut};

use crate::command::{channel_from_packed, Command, Priority, MAX_CHANNELS, SYNC};
use crate::crc::crc16_ccitt;
use crate::error::{FrameError, Result};

/// Frame header: sync (1) + packed channel/priority/command (1) + sequence (1).
pub const HEADER_SIZE: usize = 3;

/// Trailing big-endian CRC-16.
pub const CRC_SIZE: usize = 2;

/// Smallest valid frame: header plus checksum, empty payload.
pub const MIN_FRAME_SIZE: usize = HEADER_SIZE + CRC_SIZE;

/// Largest frame the resynchronizer will hold while looking for a boundary.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 256;

/// Default maximum payload size: the largest that fits a default-size frame.
pub const DEFAULT_MAX_PAYLOAD: usize = DEFAULT_MAX_FRAME_SIZE - MIN_FRAME_SIZE;

/// A checksum-verified frame.
///
/// Sync marker and checksum exist only on the wire; a `Frame` value is
/// always one that passed (or will produce) a valid checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    /// Virtual channel (0-15).
    pub channel: u8,
    pub priority: Priority,
    /// Per-channel sequence number, modulo 256.
    pub sequence: u8,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(
        command: Command,
        channel: u8,
        priority: Priority,
        sequence: u8,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            command,
            channel,
            priority,
            sequence,
            payload: payload.into(),
        }
    }

    /// A sequenced DATA frame.
    pub fn data(channel: u8, priority: Priority, sequence: u8, payload: impl Into<Bytes>) -> Self {
        Self::new(Command::Data, channel, priority, sequence, payload)
    }

    /// An ACK for `(channel, sequence)`.
    pub fn ack(channel: u8, sequence: u8) -> Self {
        Self::new(Command::Ack, channel, Priority::Low, sequence, Bytes::new())
    }

    /// A NACK for `(channel, sequence)`.
    pub fn nack(channel: u8, sequence: u8) -> Self {
        Self::new(Command::Nack, channel, Priority::Low, sequence, Bytes::new())
    }

    /// A STATUS frame. An empty payload is a status request.
    pub fn status(channel: u8, priority: Priority, payload: impl Into<Bytes>) -> Self {
        Self::new(Command::Status, channel, priority, 0, payload)
    }

    /// The total wire size of this frame (header + payload + checksum).
    pub fn wire_size(&self) -> usize {
        MIN_FRAME_SIZE + self.payload.len()
    }

    /// Encode into a fresh buffer.
    pub fn encode(&self, max_payload: usize) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.wire_size());
        encode_frame(self, max_payload, &mut buf)?;
        Ok(buf.freeze())
    }

    fn packed_byte(&self) -> Result<u8> {
        if self.channel >= MAX_CHANNELS {
            return Err(FrameError::InvalidChannel(self.channel));
        }
        let command = self
            .command
            .wire_code()
            .ok_or(FrameError::CommandNotEncodable(self.command))?;
        Ok((self.channel << 4) | (self.priority.code() << 2) | command)
    }
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────┬───────────────────────────┬──────────┬───────────┬─────────────┐
/// │ Sync │ Packed                    │ Sequence │ Payload   │ CRC-16      │
/// │ 0x00 │ chan<<4 | prio<<2 | cmd   │ (1B)     │ (N bytes) │ (2B BE)     │
/// └──────┴───────────────────────────┴──────────┴───────────┴─────────────┘
/// ```
///
/// The checksum covers sync, packed byte, sequence and payload.
pub fn encode_frame(frame: &Frame, max_payload: usize, dst: &mut BytesMut) -> Result<()> {
    if frame.payload.len() > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: frame.payload.len(),
            max: max_payload,
        });
    }
    let packed = frame.packed_byte()?;

    let start = dst.len();
    dst.reserve(frame.wire_size());
    dst.put_u8(SYNC);
    dst.put_u8(packed);
    dst.put_u8(frame.sequence);
    dst.put_slice(&frame.payload);
    let crc = crc16_ccitt(&dst[start..]);
    dst.put_u16(crc);
    Ok(())
}

/// Why a candidate byte run is not a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CorruptFrame {
    /// Fewer than header + checksum bytes.
    #[error("candidate too short ({len} bytes)")]
    TooShort { len: usize },

    /// First byte is not the sync marker.
    #[error("missing sync byte (found 0x{0:02x})")]
    BadSync(u8),

    /// Transmitted checksum does not match the recomputed one.
    #[error("checksum mismatch (frame 0x{expected:04x}, computed 0x{actual:04x})")]
    ChecksumMismatch { expected: u16, actual: u16 },
}

/// Decode one candidate frame spanning exactly `bytes`.
///
/// Never fails with an error; a candidate that is not a valid frame is
/// reported as [`CorruptFrame`].
pub fn decode_frame(bytes: &[u8]) -> std::result::Result<Frame, CorruptFrame> {
    if bytes.len() < MIN_FRAME_SIZE {
        return Err(CorruptFrame::TooShort { len: bytes.len() });
    }
    if bytes[0] != SYNC {
        return Err(CorruptFrame::BadSync(bytes[0]));
    }

    let split = bytes.len() - CRC_SIZE;
    let expected = u16::from_be_bytes([bytes[split], bytes[split + 1]]);
    let actual = crc16_ccitt(&bytes[..split]);
    if expected != actual {
        return Err(CorruptFrame::ChecksumMismatch { expected, actual });
    }

    let packed = bytes[1];
    Ok(Frame {
        command: Command::from_packed(packed),
        channel: channel_from_packed(packed),
        priority: Priority::from_packed(packed),
        sequence: bytes[2],
        payload: Bytes::copy_from_slice(&bytes[HEADER_SIZE..split]),
    })
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 251.
    pub max_payload_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl FrameConfig {
    /// Largest frame the configuration admits.
    pub fn max_frame_size(&self) -> usize {
        self.max_payload_size + MIN_FRAME_SIZE
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_layout() {
        let frame = Frame::data(0x03, Priority::High, 0x2A, Bytes::from_static(b"hi"));
        let wire = frame.encode(DEFAULT_MAX_PAYLOAD).unwrap();

        assert_eq!(wire.len(), MIN_FRAME_SIZE + 2);
        assert_eq!(wire[0], SYNC);
        assert_eq!(wire[1], 0x38);
        assert_eq!(wire[2], 0x2A);
        assert_eq!(&wire[3..5], b"hi");
        let crc = crc16_ccitt(&wire[..5]);
        assert_eq!(&wire[5..], &crc.to_be_bytes());
    }

    #[test]
    fn roundtrip_fields_across_header_space() {
        let payloads: [&[u8]; 3] = [b"", b"x", &[0xA5; DEFAULT_MAX_PAYLOAD]];
        for channel in 0..MAX_CHANNELS {
            for priority in Priority::ALL {
                for sequence in [0u8, 1, 127, 254, 255] {
                    for payload in payloads {
                        let frame = Frame::data(channel, priority, sequence, payload.to_vec());
                        let wire = frame.encode(DEFAULT_MAX_PAYLOAD).unwrap();
                        assert_eq!(decode_frame(&wire), Ok(frame));
                    }
                }
            }
        }
    }

    #[test]
    fn roundtrip_every_wire_command() {
        for command in [Command::Data, Command::Ack, Command::Nack, Command::Status] {
            let frame = Frame::new(command, 9, Priority::Normal, 77, Bytes::from_static(b"c"));
            let wire = frame.encode(DEFAULT_MAX_PAYLOAD).unwrap();
            assert_eq!(decode_frame(&wire).unwrap().command, command);
        }
    }

    #[test]
    fn single_bit_flip_is_detected() {
        let frame = Frame::data(5, Priority::Urgent, 200, Bytes::from_static(b"integrity"));
        let wire = frame.encode(DEFAULT_MAX_PAYLOAD).unwrap();
        let covered = wire.len() - CRC_SIZE;

        for index in 0..covered {
            for bit in 0..8 {
                let mut damaged = wire.to_vec();
                damaged[index] ^= 1 << bit;
                assert!(
                    decode_frame(&damaged).is_err(),
                    "flip of byte {index} bit {bit} went undetected"
                );
            }
        }
    }

    #[test]
    fn short_candidate_is_corrupt() {
        assert_eq!(
            decode_frame(&[0x00, 0x01, 0x02, 0x03]),
            Err(CorruptFrame::TooShort { len: 4 })
        );
        assert_eq!(decode_frame(&[]), Err(CorruptFrame::TooShort { len: 0 }));
    }

    #[test]
    fn missing_sync_is_corrupt() {
        let mut wire = Frame::ack(1, 1).encode(DEFAULT_MAX_PAYLOAD).unwrap().to_vec();
        wire[0] = 0x7E;
        assert_eq!(decode_frame(&wire), Err(CorruptFrame::BadSync(0x7E)));
    }

    #[test]
    fn payload_too_large_rejected() {
        let frame = Frame::data(0, Priority::Low, 0, vec![0u8; 9]);
        let err = frame.encode(8).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 9, max: 8 }));
    }

    #[test]
    fn channel_out_of_range_rejected() {
        let frame = Frame::data(16, Priority::Low, 0, Bytes::new());
        let err = frame.encode(DEFAULT_MAX_PAYLOAD).unwrap_err();
        assert!(matches!(err, FrameError::InvalidChannel(16)));
    }

    #[test]
    fn non_wire_command_not_aliased() {
        for command in [Command::Config, Command::Reset, Command::Test, Command::Beacon] {
            let frame = Frame::new(command, 0, Priority::Low, 0, Bytes::new());
            let err = frame.encode(DEFAULT_MAX_PAYLOAD).unwrap_err();
            assert!(matches!(err, FrameError::CommandNotEncodable(c) if c == command));
        }
    }

    #[test]
    fn encode_appends_to_existing_buffer() {
        let mut buf = BytesMut::new();
        encode_frame(&Frame::ack(2, 3), DEFAULT_MAX_PAYLOAD, &mut buf).unwrap();
        encode_frame(&Frame::ack(4, 5), DEFAULT_MAX_PAYLOAD, &mut buf).unwrap();

        assert_eq!(buf.len(), 2 * MIN_FRAME_SIZE);
        assert_eq!(decode_frame(&buf[..MIN_FRAME_SIZE]), Ok(Frame::ack(2, 3)));
        assert_eq!(decode_frame(&buf[MIN_FRAME_SIZE..]), Ok(Frame::ack(4, 5)));
    }

    #[test]
    fn frame_wire_size() {
        let frame = Frame::status(0, Priority::Urgent, Bytes::from_static(b"test"));
        assert_eq!(frame.wire_size(), MIN_FRAME_SIZE + 4);
        assert_eq!(FrameConfig::default().max_frame_size(), DEFAULT_MAX_FRAME_SIZE);
    }
}
