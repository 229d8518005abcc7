use crate::command::Command;

/// Errors that can occur while encoding frames or moving them over a stream.
///
/// Checksum failures are not errors: decoding yields a
/// [`CorruptFrame`](crate::codec::CorruptFrame) value the caller branches on.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The channel id does not fit the 4-bit channel field.
    #[error("channel {0} out of range (0-15)")]
    InvalidChannel(u8),

    /// The command has no code in the 2-bit wire field.
    #[error("command {0} cannot be encoded in the 2-bit wire field")]
    CommandNotEncodable(Command),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream reached end-of-file.
    #[error("connection closed")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;

pub(crate) fn transport_to_frame_error(err: sixpack_transport::TransportError) -> FrameError {
    use sixpack_transport::TransportError;

    match err {
        TransportError::Io(io) | TransportError::Accept(io) => FrameError::Io(io),
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Open { source, .. } => FrameError::Io(source),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}
