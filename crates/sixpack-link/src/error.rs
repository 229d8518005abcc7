use crate::link::ShutdownReport;
use crate::reliability::PendingKey;

/// Errors that can occur in link operations.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] sixpack_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] sixpack_frame::FrameError),

    /// The channel id is outside 0-15.
    #[error("channel {0} out of range (0-15)")]
    InvalidChannel(u8),

    /// The transmit queue is at capacity.
    #[error("transmit queue full ({capacity} frames)")]
    QueueFull { capacity: usize },

    /// The next sequence number on this channel still awaits an ACK.
    #[error("sequence {} on channel {} still awaiting acknowledgment", .0.sequence, .0.channel)]
    SequenceInFlight(PendingKey),

    /// The link configuration is unusable.
    #[error("invalid link configuration: {0}")]
    InvalidConfig(String),

    /// `start` was called on a running link.
    #[error("link already started")]
    AlreadyStarted,

    /// The operation needs a running link.
    #[error("link not running")]
    NotRunning,

    /// The receive thread panicked.
    #[error("receive thread panicked")]
    ThreadPanicked,

    /// The receive loop failed; `report` holds what was still outstanding.
    #[error("link stopped: {source}")]
    Stopped {
        source: Box<LinkError>,
        report: ShutdownReport,
    },
}

impl LinkError {
    /// The underlying failure, looking through [`LinkError::Stopped`].
    pub fn root(&self) -> &LinkError {
        match self {
            LinkError::Stopped { source, .. } => source.root(),
            other => other,
        }
    }

    /// The shutdown report carried by a failed stop.
    pub fn report(&self) -> Option<&ShutdownReport> {
        match self {
            LinkError::Stopped { report, .. } => Some(report),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, LinkError>;
