//! The link engine.
//!
//! One background thread owns the transport and does all I/O: read with a
//! bounded wait, resynchronize, dispatch, write ACKs and retransmissions,
//! drain the transmit queue, sweep for ACK timeouts. Every other thread
//! interacts through the shared state lock (submit, status) or the atomic
//! statistics.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Instant;

use bytes::Bytes;
use serde::Serialize;
use sixpack_frame::{
    Command, Frame, FrameError, FrameReader, FrameWriter, Priority, MAX_CHANNELS,
};
use sixpack_transport::{Transport, TransportError};
use tracing::{debug, info, warn};

use crate::config::LinkConfig;
use crate::dispatch::{dispatch, DispatchPlan, LinkEvent, PlannedWrite};
use crate::error::{LinkError, Result};
use crate::queue::{Outbound, TransmitQueue};
use crate::reliability::{PendingKey, ReliabilityManager, SweepAction};
use crate::sequencer::ChannelSequencer;
use crate::stats::{Statistics, StatisticsSnapshot};
use crate::status::TelemetryStatus;

const RX_THREAD_NAME: &str = "sixpack-link-rx";

type DataHandler = Arc<dyn Fn(u8, Bytes) + Send + Sync>;
type StatusHandler = Arc<dyn Fn(u8, TelemetryStatus) + Send + Sync>;
type FailureHandler = Arc<dyn Fn(u8, u8) + Send + Sync>;

#[derive(Clone, Default)]
struct Handlers {
    data: Vec<DataHandler>,
    status: Vec<StatusHandler>,
    failure: Vec<FailureHandler>,
}

impl Handlers {
    fn deliver(&self, event: LinkEvent) {
        match event {
            LinkEvent::Data { channel, payload } => {
                for handler in &self.data {
                    handler(channel, payload.clone());
                }
            }
            LinkEvent::Status { channel, status } => {
                for handler in &self.status {
                    handler(channel, status);
                }
            }
            LinkEvent::Failure { channel, sequence } => {
                for handler in &self.failure {
                    handler(channel, sequence);
                }
            }
        }
    }
}

/// What was still outstanding when the link stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// DATA frames written but never acknowledged.
    pub unacknowledged: Vec<PendingKey>,
    /// Queued frames that could not be written.
    pub unsent: usize,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.unacknowledged.is_empty() && self.unsent == 0
    }
}

struct LinkState {
    sequencer: ChannelSequencer,
    reliability: ReliabilityManager,
    queue: TransmitQueue,
    closed: bool,
}

struct Shared {
    state: Mutex<LinkState>,
    stats: Statistics,
    config: LinkConfig,
    stop: AtomicBool,
    running: AtomicBool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_submit(&self, channel: u8, payload: Bytes, priority: Priority) -> Result<u8> {
        if channel >= MAX_CHANNELS {
            return Err(LinkError::InvalidChannel(channel));
        }

        let mut guard = self.lock();
        let state = &mut *guard;
        if state.closed {
            return Err(LinkError::NotRunning);
        }
        if state.queue.is_full() {
            return Err(LinkError::QueueFull {
                capacity: state.queue.capacity(),
            });
        }

        let outbound = state
            .reliability
            .submit(&mut state.sequencer, channel, payload, priority)?;
        let sequence = outbound.frame.sequence;
        state.queue.push(outbound)?;
        debug!(channel, sequence, priority = %priority, "DATA queued");
        Ok(sequence)
    }

    fn enqueue_status(&self, frame: Frame) -> Result<()> {
        if frame.channel >= MAX_CHANNELS {
            return Err(LinkError::InvalidChannel(frame.channel));
        }
        let encoded = frame.encode(self.config.max_payload_size)?;

        let mut state = self.lock();
        if state.closed {
            return Err(LinkError::NotRunning);
        }
        state.queue.push(Outbound { frame, encoded })
    }

    fn request_status(&self, channel: u8) -> Result<()> {
        self.enqueue_status(Frame::status(channel, Priority::Urgent, Bytes::new()))
    }

    fn send_status(&self, channel: u8, status: &TelemetryStatus) -> Result<()> {
        self.enqueue_status(Frame::status(channel, Priority::Normal, status.to_bytes()))
    }

    fn submit(&self, channel: u8, payload: Bytes, priority: Priority) -> bool {
        match self.try_submit(channel, payload, priority) {
            Ok(_) => true,
            Err(err) => {
                warn!(channel, error = %err, "submit rejected");
                false
            }
        }
    }
}

/// Configures handlers and settings before a [`Link`] exists.
pub struct LinkBuilder<T> {
    transport: T,
    config: LinkConfig,
    handlers: Handlers,
}

impl<T: Transport + 'static> LinkBuilder<T> {
    pub fn with_config(mut self, config: LinkConfig) -> Self {
        self.config = config;
        self
    }

    /// Called once per delivered DATA payload, in sequence order per channel.
    pub fn register_data_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(u8, Bytes) + Send + Sync + 'static,
    {
        self.handlers.data.push(Arc::new(handler));
        self
    }

    /// Called for every STATUS frame received.
    pub fn register_status_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(u8, TelemetryStatus) + Send + Sync + 'static,
    {
        self.handlers.status.push(Arc::new(handler));
        self
    }

    /// Called with `(channel, sequence)` once a DATA frame is given up.
    pub fn register_failure_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(u8, u8) + Send + Sync + 'static,
    {
        self.handlers.failure.push(Arc::new(handler));
        self
    }

    pub fn build(self) -> Result<Link<T>> {
        self.config.validate()?;
        let state = LinkState {
            sequencer: ChannelSequencer::new(),
            reliability: ReliabilityManager::new(
                self.config.ack_timeout,
                self.config.max_retries,
                self.config.max_payload_size,
            ),
            queue: TransmitQueue::new(self.config.queue_capacity),
            closed: false,
        };

        Ok(Link {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                stats: Statistics::new(),
                config: self.config,
                stop: AtomicBool::new(false),
                running: AtomicBool::new(false),
            }),
            transport: Some(self.transport),
            handlers: self.handlers,
            thread: None,
        })
    }
}

/// Cloneable handle for submitting and observing from other threads.
#[derive(Clone)]
pub struct LinkHandle {
    shared: Arc<Shared>,
}

impl LinkHandle {
    pub fn submit(&self, channel: u8, payload: impl Into<Bytes>, priority: Priority) -> bool {
        self.shared.submit(channel, payload.into(), priority)
    }

    pub fn try_submit(
        &self,
        channel: u8,
        payload: impl Into<Bytes>,
        priority: Priority,
    ) -> Result<u8> {
        self.shared.try_submit(channel, payload.into(), priority)
    }

    pub fn request_status(&self, channel: u8) -> Result<()> {
        self.shared.request_status(channel)
    }

    pub fn send_status(&self, channel: u8, status: &TelemetryStatus) -> Result<()> {
        self.shared.send_status(channel, status)
    }

    pub fn get_statistics(&self) -> StatisticsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn pending_count(&self) -> usize {
        self.shared.lock().reliability.len()
    }

    pub fn queued_count(&self) -> usize {
        self.shared.lock().queue.len()
    }

    pub fn is_pending(&self, channel: u8, sequence: u8) -> bool {
        self.shared
            .lock()
            .reliability
            .contains(PendingKey::new(channel, sequence))
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for LinkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkHandle")
            .field("running", &self.is_running())
            .finish()
    }
}

struct LoopExit {
    result: Result<()>,
    unsent: usize,
}

/// A reliable multiplexed 6PACK link over one transport.
///
/// Frames may be submitted before [`start`](Self::start); they wait in the
/// transmit queue. A link runs once: after [`stop`](Self::stop) the
/// transport is gone.
pub struct Link<T: Transport + 'static> {
    shared: Arc<Shared>,
    transport: Option<T>,
    handlers: Handlers,
    thread: Option<JoinHandle<LoopExit>>,
}

impl<T: Transport + 'static> Link<T> {
    pub fn builder(transport: T) -> LinkBuilder<T> {
        LinkBuilder {
            transport,
            config: LinkConfig::default(),
            handlers: Handlers::default(),
        }
    }

    /// A link with default configuration and no handlers.
    pub fn new(transport: T) -> Result<Self> {
        Self::builder(transport).build()
    }

    /// Spawn the receive thread.
    pub fn start(&mut self) -> Result<()> {
        if self.thread.is_some() {
            return Err(LinkError::AlreadyStarted);
        }
        let transport = self.transport.take().ok_or(LinkError::AlreadyStarted)?;
        let config = &self.shared.config;

        if let Err(err) = transport.set_write_timeout(config.write_timeout) {
            self.transport = Some(transport);
            return Err(err.into());
        }
        let read_half = match transport.try_clone() {
            Ok(read_half) => read_half,
            Err(err) => {
                self.transport = Some(transport);
                return Err(err.into());
            }
        };
        let mut reader = match FrameReader::with_config_transport(read_half, config.frame_config())
        {
            Ok(reader) => reader,
            Err(err) => {
                self.transport = Some(transport);
                return Err(err.into());
            }
        };
        reader.set_resync_window(config.resync_buffer_limit);
        reader.set_read_chunk_size(config.read_chunk_size);
        let writer = FrameWriter::with_config(transport, config.frame_config());

        info!(
            transport = writer.get_ref().transport_name(),
            ack_timeout = ?config.ack_timeout,
            write_timeout = ?config.write_timeout,
            max_retries = config.max_retries,
            "link starting"
        );

        let shared = Arc::clone(&self.shared);
        let handlers = self.handlers.clone();
        self.shared.running.store(true, Ordering::Release);
        let spawned = std::thread::Builder::new()
            .name(RX_THREAD_NAME.to_string())
            .spawn(move || receive_loop(shared, reader, writer, handlers));

        match spawned {
            Ok(thread) => {
                self.thread = Some(thread);
                Ok(())
            }
            Err(err) => {
                self.shared.running.store(false, Ordering::Release);
                Err(LinkError::Transport(TransportError::Io(err)))
            }
        }
    }

    /// Stop the receive thread, write out queued frames and release the transport.
    ///
    /// If the receive loop had already failed, its error comes back as
    /// [`LinkError::Stopped`] together with the report.
    pub fn stop(&mut self) -> Result<ShutdownReport> {
        self.shared.stop.store(true, Ordering::Release);
        self.finish()
    }

    /// Block until the receive loop ends on its own (EOF or error).
    pub fn wait(&mut self) -> Result<ShutdownReport> {
        self.finish()
    }

    fn finish(&mut self) -> Result<ShutdownReport> {
        let exit = match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| LinkError::ThreadPanicked)?,
            None => {
                // Never started: nothing was written, the transport just goes.
                if self.transport.take().is_none() {
                    return Err(LinkError::NotRunning);
                }
                let mut state = self.shared.lock();
                state.closed = true;
                LoopExit {
                    result: Ok(()),
                    unsent: state.queue.drain_ordered().len(),
                }
            }
        };
        self.shared.running.store(false, Ordering::Release);

        let report = ShutdownReport {
            unacknowledged: self.shared.lock().reliability.drain(),
            unsent: exit.unsent,
        };
        if report.is_clean() {
            info!("link stopped");
        } else {
            warn!(
                unacknowledged = report.unacknowledged.len(),
                unsent = report.unsent,
                "link stopped with undelivered frames"
            );
        }
        match exit.result {
            Ok(()) => Ok(report),
            Err(source) => Err(LinkError::Stopped {
                source: Box::new(source),
                report,
            }),
        }
    }

    pub fn handle(&self) -> LinkHandle {
        LinkHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn submit(&self, channel: u8, payload: impl Into<Bytes>, priority: Priority) -> bool {
        self.shared.submit(channel, payload.into(), priority)
    }

    /// Queue a DATA frame, returning its sequence number.
    pub fn try_submit(
        &self,
        channel: u8,
        payload: impl Into<Bytes>,
        priority: Priority,
    ) -> Result<u8> {
        self.shared.try_submit(channel, payload.into(), priority)
    }

    /// Queue an empty STATUS frame at urgent priority.
    pub fn request_status(&self, channel: u8) -> Result<()> {
        self.shared.request_status(channel)
    }

    /// Queue a STATUS frame carrying `status`.
    pub fn send_status(&self, channel: u8, status: &TelemetryStatus) -> Result<()> {
        self.shared.send_status(channel, status)
    }

    pub fn get_statistics(&self) -> StatisticsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn pending_count(&self) -> usize {
        self.shared.lock().reliability.len()
    }

    pub fn queued_count(&self) -> usize {
        self.shared.lock().queue.len()
    }

    pub fn config(&self) -> &LinkConfig {
        &self.shared.config
    }
}

impl<T: Transport + 'static> Drop for Link<T> {
    fn drop(&mut self) {
        if self.thread.is_some() {
            if let Err(err) = self.stop() {
                warn!(error = %err, "link stopped with error during drop");
            }
        }
    }
}

fn receive_loop<T: Transport>(
    shared: Arc<Shared>,
    mut reader: FrameReader<T>,
    mut writer: FrameWriter<T>,
    handlers: Handlers,
) -> LoopExit {
    let result = run_until_stopped(&shared, &mut reader, &mut writer, &handlers);
    if let Err(err) = &result {
        warn!(error = %err, "receive loop failed");
    }

    let remaining = {
        let mut state = shared.lock();
        state.closed = true;
        state.queue.drain_ordered()
    };
    shared.running.store(false, Ordering::Release);

    let mut unsent = remaining.len();
    if result.is_ok() {
        for outbound in &remaining {
            if let Err(err) = writer.write_encoded(&outbound.encoded) {
                warn!(error = %err, "failed to flush queue on shutdown");
                break;
            }
            shared.stats.record_frame_tx();
            unsent -= 1;
        }
    }

    LoopExit { result, unsent }
}

fn run_until_stopped<T: Transport>(
    shared: &Shared,
    reader: &mut FrameReader<T>,
    writer: &mut FrameWriter<T>,
    handlers: &Handlers,
) -> Result<()> {
    let stats = &shared.stats;

    while !shared.stop.load(Ordering::Acquire) {
        let outcome = match reader.poll() {
            Ok(outcome) => outcome,
            Err(FrameError::ConnectionClosed) => {
                info!("transport closed by peer");
                return Err(LinkError::Frame(FrameError::ConnectionClosed));
            }
            Err(err) => return Err(err.into()),
        };
        stats.record_crc_errors(outcome.corrupt);
        stats.record_framing_errors(outcome.framing_errors);

        let now = Instant::now();
        let mut plan = DispatchPlan::default();
        let outbound = {
            let mut guard = shared.lock();
            let state = &mut *guard;
            for frame in outcome.frames {
                stats.record_frame_rx();
                dispatch(
                    frame,
                    &mut state.sequencer,
                    &mut state.reliability,
                    stats,
                    now,
                    &mut plan,
                );
            }
            for action in state.reliability.sweep(now) {
                match action {
                    SweepAction::Retransmit { key, bytes, .. } => {
                        plan.writes.push(PlannedWrite::Retransmit { key, bytes });
                    }
                    SweepAction::GiveUp(key) => {
                        stats.record_timeout();
                        plan.events.push(LinkEvent::Failure {
                            channel: key.channel,
                            sequence: key.sequence,
                        });
                    }
                }
            }
            state.queue.drain_ordered()
        };

        for write in plan.writes {
            match write {
                PlannedWrite::Ack(ack) => {
                    writer.write_frame(&ack)?;
                    stats.record_ack_sent();
                }
                PlannedWrite::Retransmit { key, bytes } => {
                    writer.write_encoded(&bytes)?;
                    stats.record_frame_tx();
                    stats.record_retry();
                    debug!(channel = key.channel, sequence = key.sequence, "retransmitted");
                }
            }
        }

        if !outbound.is_empty() {
            let mut written = Vec::with_capacity(outbound.len());
            let mut failure = None;
            for item in &outbound {
                if let Err(err) = writer.write_encoded(&item.encoded) {
                    failure = Some(err);
                    break;
                }
                stats.record_frame_tx();
                if item.frame.command == Command::Data {
                    written.push(PendingKey::new(item.frame.channel, item.frame.sequence));
                }
            }

            let sent_at = Instant::now();
            let mut state = shared.lock();
            for key in written {
                state.reliability.mark_transmitted(key, sent_at);
            }
            if let Some(err) = failure {
                return Err(err.into());
            }
        }

        for event in plan.events {
            handlers.deliver(event);
        }
    }

    Ok(())
}
