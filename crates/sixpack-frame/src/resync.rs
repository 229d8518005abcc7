//! Recovery of frame boundaries from an unframed byte stream.
//!
//! The wire format has no length field and the sync byte (`0x00`) is not
//! escaped, so zeros also occur inside valid frames. Boundaries are found by
//! trial: from each sync byte, candidate ends are checked against the
//! trailing checksum. While bytes are still arriving, only ends followed by
//! another sync byte are candidates. Any other end is tried once the bytes
//! before it are settled: the line went idle, the window filled, or a later
//! start already holds a verified frame. Only checksum-verified frames leave
//! this module.

use bytes::{Buf, BytesMut};
use tracing::{debug, trace};

use crate::codec::{decode_frame, Frame, CRC_SIZE, DEFAULT_MAX_FRAME_SIZE, MIN_FRAME_SIZE};
use crate::command::SYNC;
use crate::crc::{crc16_ccitt, Crc16};

/// Result of one [`Resynchronizer::feed`] call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FeedOutcome {
    /// Verified frames in stream order.
    pub frames: Vec<Frame>,
    /// Candidate starts abandoned because no checksum matched.
    pub corrupt: u64,
    /// Buffer overflows with no further sync byte to resume from.
    pub framing_errors: u64,
}

impl FeedOutcome {
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty() && self.corrupt == 0 && self.framing_errors == 0
    }

    /// Fold another outcome into this one, preserving frame order.
    pub fn merge(&mut self, other: FeedOutcome) {
        self.frames.extend(other.frames);
        self.corrupt += other.corrupt;
        self.framing_errors += other.framing_errors;
    }
}

/// Stateful stream resynchronizer.
///
/// Memory is bounded: fewer than `max_buffer` bytes are retained between
/// calls to [`feed`](Self::feed).
#[derive(Debug)]
pub struct Resynchronizer {
    buf: BytesMut,
    max_buffer: usize,
    prefix: Vec<u16>,
}

impl Resynchronizer {
    pub fn new() -> Self {
        Self::with_max_buffer(DEFAULT_MAX_FRAME_SIZE)
    }

    /// `max_buffer` is also the largest frame that can be recovered. Values
    /// below the minimum frame size are raised to it.
    pub fn with_max_buffer(max_buffer: usize) -> Self {
        let max_buffer = max_buffer.max(MIN_FRAME_SIZE);
        Self {
            buf: BytesMut::with_capacity(max_buffer * 2),
            max_buffer,
            prefix: Vec::with_capacity(max_buffer),
        }
    }

    pub fn max_buffer(&self) -> usize {
        self.max_buffer
    }

    /// Bytes held while waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Append `data` and extract every frame that can be recovered so far.
    ///
    /// A frame at the very end of the buffer is held until a sync byte
    /// follows it or [`flush_idle`](Self::flush_idle) is called.
    pub fn feed(&mut self, data: &[u8]) -> FeedOutcome {
        self.buf.extend_from_slice(data);
        self.extract(false)
    }

    /// Treat the buffered bytes as settled because a read came back empty.
    ///
    /// Recovers a trailing frame, or one followed by bytes that are not a
    /// sync byte. A start that still fails is kept, since the rest of its
    /// frame may arrive later.
    pub fn flush_idle(&mut self) -> FeedOutcome {
        self.extract(true)
    }

    fn extract(&mut self, idle: bool) -> FeedOutcome {
        let mut out = FeedOutcome::default();
        // Offset of a later start known to hold a verified frame.
        let mut anchor = None;

        loop {
            match self.buf.iter().position(|&b| b == SYNC) {
                Some(0) => {}
                Some(skip) => {
                    trace!(skipped = skip, "skipping bytes before sync");
                    self.consume(skip, &mut anchor);
                }
                None => {
                    if !self.buf.is_empty() {
                        trace!(skipped = self.buf.len(), "no sync byte in buffer");
                    }
                    self.buf.clear();
                    break;
                }
            }

            let overflow = self.buf.len() >= self.max_buffer;
            let settled = match anchor {
                Some(at) => at,
                None if overflow => self.max_buffer,
                None if idle => self.buf.len(),
                None => 0,
            };
            if let Some((len, frame)) = self.decode_at(0, settled) {
                self.consume(len, &mut anchor);
                out.frames.push(frame);
                continue;
            }

            if anchor.is_some() || overflow {
                // Every end within reach failed; this start can never complete.
                match self.buf[1..].iter().position(|&b| b == SYNC) {
                    Some(next) => {
                        self.consume(next + 1, &mut anchor);
                        out.corrupt += 1;
                    }
                    None => {
                        debug!(
                            buffered = self.buf.len(),
                            "resync buffer overflow, discarding"
                        );
                        self.buf.clear();
                        out.framing_errors += 1;
                        break;
                    }
                }
                continue;
            }

            // The first start may still be arriving. Give it up only when a
            // later start already holds a verified frame.
            let settled = if idle { self.buf.len() } else { 0 };
            for start in 1..self.buf.len() {
                if self.buf[start] == SYNC && self.decode_at(start, settled).is_some() {
                    anchor = Some(start);
                    break;
                }
            }
            match anchor {
                Some(at) => debug!(at, "resynchronizing on a later sync byte"),
                None => break,
            }
        }

        out
    }

    fn consume(&mut self, len: usize, anchor: &mut Option<usize>) {
        self.buf.advance(len);
        *anchor = anchor
            .and_then(|at| at.checked_sub(len))
            .filter(|&at| at > 0);
    }

    /// Try to decode a frame beginning at `start`. Returns the frame length.
    fn decode_at(&mut self, start: usize, settled: usize) -> Option<(usize, Frame)> {
        let window = &self.buf[start..];
        let settled = settled.saturating_sub(start);
        let mut end = find_end(window, self.max_buffer, settled, &mut self.prefix)?;
        if window.get(end) == Some(&SYNC) {
            end = resolve_trailing_zero(window, self.max_buffer, end, settled, &mut self.prefix)?;
        }
        decode_frame(&window[..end]).ok().map(|frame| (end, frame))
    }
}

/// Find the first checksum-valid end of a frame starting at `window[0]`.
///
/// Ends followed by a sync byte are always candidates, shortest first. Other
/// ends are candidates only up to `settled`, the offset before which no
/// further bytes can arrive for this start.
fn find_end(
    window: &[u8],
    max_buffer: usize,
    settled: usize,
    prefix: &mut Vec<u16>,
) -> Option<usize> {
    let limit = window.len().min(max_buffer);
    if limit < MIN_FRAME_SIZE {
        return None;
    }
    let settled = settled.min(limit);

    // prefix[i] is the checksum over window[..i].
    prefix.clear();
    let mut crc = Crc16::new();
    prefix.push(crc.value());
    for &byte in &window[..limit - CRC_SIZE] {
        crc.update_byte(byte);
        prefix.push(crc.value());
    }

    let prefix = &*prefix;
    let matches = |end: usize| {
        let split = end - CRC_SIZE;
        u16::from_be_bytes([window[split], window[split + 1]]) == prefix[split]
    };
    let followed_by_sync = |end: usize| end < window.len() && window[end] == SYNC;

    (MIN_FRAME_SIZE..=limit)
        .find(|&end| followed_by_sync(end) && matches(end))
        .or_else(|| (settled >= MIN_FRAME_SIZE && matches(settled)).then_some(settled))
        .or_else(|| (MIN_FRAME_SIZE..settled).find(|&end| !followed_by_sync(end) && matches(end)))
}

/// Choose between `short` and `short + 1` when `window[short]` is a sync byte.
///
/// A checksum whose low byte is `0x00` always also verifies one byte early,
/// with that zero read as the next sync byte. The reading whose successor
/// verifies wins. `None` means the bytes that decide it have not arrived.
fn resolve_trailing_zero(
    window: &[u8],
    max_buffer: usize,
    short: usize,
    settled: usize,
    prefix: &mut Vec<u16>,
) -> Option<usize> {
    let long = short + 1;
    if long > window.len().min(max_buffer) || !checksum_matches(&window[..long]) {
        return Some(short);
    }
    match window.get(long) {
        // A header byte follows the short reading's sync byte.
        Some(&byte) if byte != SYNC => return Some(short),
        None => return (settled >= long).then_some(long),
        Some(_) => {}
    }

    let after_long = find_end(
        &window[long..],
        max_buffer,
        settled.saturating_sub(long),
        prefix,
    )
    .is_some();
    let after_short = find_end(
        &window[short..],
        max_buffer,
        settled.saturating_sub(short),
        prefix,
    )
    .is_some();
    match (after_long, after_short) {
        (_, true) => Some(short),
        (true, false) => Some(long),
        (false, false) => (settled >= long).then_some(long),
    }
}

fn checksum_matches(candidate: &[u8]) -> bool {
    let split = candidate.len() - CRC_SIZE;
    u16::from_be_bytes([candidate[split], candidate[split + 1]]) == crc16_ccitt(&candidate[..split])
}

impl Default for Resynchronizer {
    fn default() -> Self {
        Self::new()
    }
}
