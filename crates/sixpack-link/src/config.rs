use std::time::Duration;

use sixpack_frame::{FrameConfig, DEFAULT_MAX_FRAME_SIZE, DEFAULT_MAX_PAYLOAD, MIN_FRAME_SIZE};

use crate::error::{LinkError, Result};

/// Default time a DATA frame may stay unacknowledged before it is resent.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of retransmissions before a frame is given up.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default bound on one receive-loop iteration.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Default bound on one blocked transport write.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Default transmit queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Link engine configuration.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Time without ACK before a DATA frame is retransmitted. Default: 5 s.
    pub ack_timeout: Duration,
    /// Retransmissions before the failure handler fires. Default: 3.
    pub max_retries: u32,
    /// Read timeout per receive-loop iteration; also the sweep cadence.
    pub poll_interval: Duration,
    /// Longest a frame write may stay blocked before the link stops with a
    /// timeout. `None` waits indefinitely. Default: 1 s.
    pub write_timeout: Option<Duration>,
    /// Frames that may wait in the transmit queue. Default: 64.
    pub queue_capacity: usize,
    /// Resynchronizer window, which is also the largest receivable frame.
    pub resync_buffer_limit: usize,
    /// Largest DATA/STATUS payload accepted for sending. Default: 251.
    pub max_payload_size: usize,
    /// Bytes requested per transport read.
    pub read_chunk_size: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            poll_interval: DEFAULT_POLL_INTERVAL,
            write_timeout: Some(DEFAULT_WRITE_TIMEOUT),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            resync_buffer_limit: DEFAULT_MAX_FRAME_SIZE,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_chunk_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl LinkConfig {
    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(LinkError::InvalidConfig(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(LinkError::InvalidConfig(
                "poll_interval must be non-zero".to_string(),
            ));
        }
        if self.write_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(LinkError::InvalidConfig(
                "write_timeout must be non-zero".to_string(),
            ));
        }
        if self.read_chunk_size == 0 {
            return Err(LinkError::InvalidConfig(
                "read_chunk_size must be at least 1".to_string(),
            ));
        }
        if self.max_payload_size + MIN_FRAME_SIZE > self.resync_buffer_limit {
            return Err(LinkError::InvalidConfig(format!(
                "max_payload_size {} does not fit a {}-byte resync window",
                self.max_payload_size, self.resync_buffer_limit
            )));
        }
        Ok(())
    }

    /// Frame codec settings derived from this configuration.
    pub fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            max_payload_size: self.max_payload_size,
            read_timeout: Some(self.poll_interval),
            write_timeout: self.write_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = LinkConfig::default();
        assert_eq!(config.ack_timeout, Duration::from_secs(5));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.poll_interval, Duration::from_millis(10));
        assert_eq!(config.write_timeout, Some(Duration::from_secs(1)));
        assert_eq!(config.queue_capacity, 64);
        assert_eq!(config.resync_buffer_limit, 256);
        assert_eq!(config.max_payload_size, 251);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_capacity_rejected() {
        let config = LinkConfig {
            queue_capacity: 0,
            ..LinkConfig::default()
        };
        assert!(matches!(config.validate(), Err(LinkError::InvalidConfig(_))));
    }

    #[test]
    fn zero_poll_interval_rejected() {
        let config = LinkConfig {
            poll_interval: Duration::ZERO,
            ..LinkConfig::default()
        };
        assert!(matches!(config.validate(), Err(LinkError::InvalidConfig(_))));
    }

    #[test]
    fn zero_write_timeout_rejected() {
        let config = LinkConfig {
            write_timeout: Some(Duration::ZERO),
            ..LinkConfig::default()
        };
        assert!(matches!(config.validate(), Err(LinkError::InvalidConfig(_))));

        let unbounded = LinkConfig {
            write_timeout: None,
            ..LinkConfig::default()
        };
        assert!(unbounded.validate().is_ok());
    }

    #[test]
    fn payload_must_fit_resync_window() {
        let config = LinkConfig {
            max_payload_size: 252,
            ..LinkConfig::default()
        };
        assert!(matches!(config.validate(), Err(LinkError::InvalidConfig(_))));

        let widened = LinkConfig {
            max_payload_size: 252,
            resync_buffer_limit: 257,
            ..LinkConfig::default()
        };
        assert!(widened.validate().is_ok());
    }

    #[test]
    fn frame_config_uses_poll_interval_as_read_timeout() {
        let config = LinkConfig::default();
        let frame = config.frame_config();
        assert_eq!(frame.read_timeout, Some(config.poll_interval));
        assert_eq!(frame.write_timeout, config.write_timeout);
        assert_eq!(frame.max_payload_size, config.max_payload_size);
    }
}
