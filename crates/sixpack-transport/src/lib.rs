//! Duplex byte-stream transports for 6PACK links.
//!
//! The link engine only needs something it can read from with a bounded
//! wait and write to synchronously. This crate provides that seam:
//! - the [`Transport`] trait the engine is generic over
//! - [`LinkStream`], backed by a Unix domain socket or a character device
//!   (an already-configured serial TTY, a PTY, a FIFO)
//!
//! How a serial port is discovered or configured (baud rate, line
//! discipline) is outside this crate.

pub mod error;
pub mod traits;

#[cfg(unix)]
pub mod device;
#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use traits::{LinkStream, Transport};

#[cfg(unix)]
pub use uds::UnixLink;
