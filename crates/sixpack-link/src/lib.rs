//! Reliable multiplexed 6PACK link engine.
//!
//! Sits on top of [`sixpack_frame`] and any [`sixpack_transport::Transport`]:
//! - per-channel sequencing of DATA frames (16 channels, modulo 256)
//! - immediate ACKs, NACK-driven and timeout-driven retransmission with a
//!   bounded retry count
//! - a bounded priority transmit queue
//! - telemetry STATUS requests and responses
//! - live statistics
//!
//! Start with [`Link::builder`].

pub mod config;
pub mod dispatch;
pub mod error;
pub mod link;
pub mod queue;
pub mod reliability;
pub mod sequencer;
pub mod stats;
pub mod status;

pub use config::LinkConfig;
pub use dispatch::{DispatchPlan, LinkEvent, PlannedWrite};
pub use error::{LinkError, Result};
pub use link::{Link, LinkBuilder, LinkHandle, ShutdownReport};
pub use queue::{Outbound, TransmitQueue};
pub use reliability::{NackOutcome, PendingAck, PendingKey, ReliabilityManager, SweepAction};
pub use sequencer::{ChannelSequencer, RxOutcome};
pub use stats::{Statistics, StatisticsSnapshot};
pub use status::TelemetryStatus;
