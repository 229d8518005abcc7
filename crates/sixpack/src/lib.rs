//! Reliable multiplexed packet transport over 6PACK serial links.
//!
//! Up to 16 logical channels share one byte stream to a TNC or radio
//! bridge. Each DATA frame is sequenced per channel, acknowledged by the
//! peer and retransmitted on timeout or NACK.
//!
//! # Crate Structure
//!
//! - [`transport`]: byte-stream seam (Unix sockets, character devices)
//! - [`frame`]: wire codec, CRC-16/CCITT and sync-byte resynchronization
//! - [`link`]: the reliable link engine and its application API

/// Re-export transport types.
pub mod transport {
    pub use sixpack_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use sixpack_frame::*;
}

/// Re-export link engine types.
pub mod link {
    pub use sixpack_link::*;
}
