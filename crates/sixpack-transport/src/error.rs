use std::path::PathBuf;

/// Errors that can occur while opening or driving a link transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind a listening socket.
    #[error("failed to bind to {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to connect to a listening socket.
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// Failed to open a character device.
    #[error("failed to open device {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    /// An I/O error occurred on the byte stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// The transport has been shut down.
    #[error("transport shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, TransportError>;
