//! 6PACK frame codec for byte-oriented radio links.
//!
//! Every frame on the wire is:
//! - a sync byte (`0x00`)
//! - a packed byte carrying channel, priority and command
//! - a modulo-256 sequence number
//! - the payload
//! - a big-endian CRC-16/CCITT over everything before it
//!
//! There is no length field. Frame boundaries are recovered positionally by
//! the [`Resynchronizer`], which only ever yields checksum-verified frames.

pub mod codec;
pub mod command;
pub mod crc;
pub mod error;
pub mod reader;
pub mod resync;
pub mod writer;

#[cfg(feature = "async")]
pub mod async_codec;

pub use codec::{
    decode_frame, encode_frame, CorruptFrame, Frame, FrameConfig, DEFAULT_MAX_FRAME_SIZE,
    DEFAULT_MAX_PAYLOAD, HEADER_SIZE, MIN_FRAME_SIZE,
};
pub use command::{Command, Priority, MAX_CHANNELS, SYNC};
pub use crc::{crc16_ccitt, Crc16};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use resync::{FeedOutcome, Resynchronizer};
pub use writer::FrameWriter;

#[cfg(feature = "async")]
pub use async_codec::SixpackCodec;
