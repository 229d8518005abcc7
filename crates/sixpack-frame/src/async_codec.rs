use std::collections::VecDeque;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{encode_frame, Frame, FrameConfig};
use crate::error::FrameError;
use crate::resync::{FeedOutcome, Resynchronizer};

/// `tokio_util` codec for 6PACK frames.
///
/// Decoding consumes everything handed to it; partial frames are held by
/// the inner [`Resynchronizer`]. A trailing frame is released by the next
/// sync byte, by end of stream, or by [`flush_idle`](Self::flush_idle).
/// Corrupt candidates are counted, never returned as errors.
#[derive(Debug)]
pub struct SixpackCodec {
    resync: Resynchronizer,
    ready: VecDeque<Frame>,
    max_payload_size: usize,
    corrupt: u64,
    framing_errors: u64,
}

impl SixpackCodec {
    pub fn new() -> Self {
        Self::with_config(&FrameConfig::default())
    }

    pub fn with_config(config: &FrameConfig) -> Self {
        Self {
            resync: Resynchronizer::with_max_buffer(config.max_frame_size()),
            ready: VecDeque::new(),
            max_payload_size: config.max_payload_size,
            corrupt: 0,
            framing_errors: 0,
        }
    }

    pub fn corrupt_frames(&self) -> u64 {
        self.corrupt
    }

    pub fn framing_errors(&self) -> u64 {
        self.framing_errors
    }

    /// Release frames held at the end of the buffer after the line went quiet.
    ///
    /// Returns the first recovered frame; any others are returned by the
    /// following `decode` calls.
    pub fn flush_idle(&mut self) -> Option<Frame> {
        let outcome = self.resync.flush_idle();
        self.absorb(outcome);
        self.ready.pop_front()
    }

    fn absorb(&mut self, outcome: FeedOutcome) {
        self.corrupt += outcome.corrupt;
        self.framing_errors += outcome.framing_errors;
        self.ready.extend(outcome.frames);
    }
}

impl Default for SixpackCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for SixpackCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        if self.ready.is_empty() && !src.is_empty() {
            let data = src.split();
            let outcome = self.resync.feed(&data);
            self.absorb(outcome);
        }
        Ok(self.ready.pop_front())
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        Ok(self.flush_idle())
    }
}

impl Encoder<Frame> for SixpackCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        encode_frame(&item, self.max_payload_size, dst)
    }
}
