use std::collections::VecDeque;
use std::io::{ErrorKind, Read};

use sixpack_transport::Transport;
use tracing::trace;

use crate::codec::{Frame, FrameConfig};
use crate::error::{transport_to_frame_error, FrameError, Result};
use crate::resync::{FeedOutcome, Resynchronizer};

const DEFAULT_READ_CHUNK_SIZE: usize = 256;

/// Reads verified frames from any `Read` stream.
///
/// Bytes pass through a [`Resynchronizer`], so callers only ever see frames
/// whose checksum matched. Corrupt candidates and overflows are counted.
pub struct FrameReader<T> {
    inner: T,
    resync: Resynchronizer,
    ready: VecDeque<Frame>,
    chunk: Vec<u8>,
    corrupt: u64,
    framing_errors: u64,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            resync: Resynchronizer::with_max_buffer(config.max_frame_size()),
            ready: VecDeque::new(),
            chunk: vec![0u8; DEFAULT_READ_CHUNK_SIZE],
            corrupt: 0,
            framing_errors: 0,
            config,
        }
    }

    /// Read the next verified frame (blocking).
    ///
    /// A frame at the end of the received bytes is released once a sync
    /// byte follows it, the read timeout expires, or the stream ends. Set
    /// the read timeout to the idle gap expected between frames. Returns
    /// `Err(FrameError::ConnectionClosed)` at EOF once nothing more can be
    /// recovered. An expired read timeout with no frame surfaces as
    /// `FrameError::Io`.
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.ready.pop_front() {
                return Ok(frame);
            }

            let read = match self.inner.read(&mut self.chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if is_idle(&err) => {
                    let outcome = self.flush_idle();
                    self.ready.extend(outcome.frames);
                    match self.ready.pop_front() {
                        Some(frame) => return Ok(frame),
                        None => return Err(FrameError::Io(err)),
                    }
                }
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                let outcome = self.flush_idle();
                self.ready.extend(outcome.frames);
                return self.ready.pop_front().ok_or(FrameError::ConnectionClosed);
            }

            let outcome = self.ingest(read);
            self.ready.extend(outcome.frames);
        }
    }

    /// Perform at most one read and return what it produced.
    ///
    /// An expired read timeout is not an error: it flushes the
    /// resynchronizer and yields whatever that recovered. EOF flushes too,
    /// and reports `ConnectionClosed` only when nothing was recovered.
    /// Frames already buffered by [`read_frame`](Self::read_frame) are
    /// returned first without reading.
    pub fn poll(&mut self) -> Result<FeedOutcome> {
        if !self.ready.is_empty() {
            return Ok(FeedOutcome {
                frames: self.ready.drain(..).collect(),
                ..FeedOutcome::default()
            });
        }

        let read = match self.inner.read(&mut self.chunk) {
            Ok(0) => {
                let outcome = self.flush_idle();
                if outcome.frames.is_empty() {
                    return Err(FrameError::ConnectionClosed);
                }
                return Ok(outcome);
            }
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => return Ok(FeedOutcome::default()),
            Err(err) if is_idle(&err) => return Ok(self.flush_idle()),
            Err(err) => return Err(FrameError::Io(err)),
        };

        Ok(self.ingest(read))
    }

    fn ingest(&mut self, read: usize) -> FeedOutcome {
        let outcome = self.resync.feed(&self.chunk[..read]);
        self.account(outcome)
    }

    fn flush_idle(&mut self) -> FeedOutcome {
        if self.resync.buffered() == 0 {
            return FeedOutcome::default();
        }
        let outcome = self.resync.flush_idle();
        self.account(outcome)
    }

    fn account(&mut self, outcome: FeedOutcome) -> FeedOutcome {
        if outcome.corrupt > 0 || outcome.framing_errors > 0 {
            trace!(
                corrupt = outcome.corrupt,
                framing_errors = outcome.framing_errors,
                "discarded unverifiable bytes"
            );
        }
        self.corrupt += outcome.corrupt;
        self.framing_errors += outcome.framing_errors;
        outcome
    }

    /// Corrupt candidates discarded so far.
    pub fn corrupt_frames(&self) -> u64 {
        self.corrupt
    }

    /// Buffer overflows so far.
    pub fn framing_errors(&self) -> u64 {
        self.framing_errors
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.resync.buffered()
    }

    /// Replace the resynchronizer window. Buffered bytes are dropped.
    pub fn set_resync_window(&mut self, max_buffer: usize) {
        self.resync = Resynchronizer::with_max_buffer(max_buffer);
    }

    /// Set how many bytes a single read requests.
    pub fn set_read_chunk_size(&mut self, size: usize) {
        self.chunk.resize(size.max(1), 0);
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

fn is_idle(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

impl<T: Transport> FrameReader<T> {
    /// Create a frame reader for a transport and apply the read timeout from config.
    pub fn with_config_transport(inner: T, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::time::Duration;

    use bytes::Bytes;
    use sixpack_transport::LinkStream;

    use super::*;
    use crate::codec::DEFAULT_MAX_PAYLOAD;
    use crate::command::Priority;

    fn wire(frames: &[Frame]) -> Vec<u8> {
        frames
            .iter()
            .flat_map(|f| f.encode(DEFAULT_MAX_PAYLOAD).unwrap().to_vec())
            .collect()
    }

    fn hello() -> Frame {
        Frame::data(1, Priority::Normal, 0, Bytes::from_static(b"hello"))
    }

    #[test]
    fn read_single_frame() {
        let mut reader = FrameReader::new(Cursor::new(wire(&[hello()])));
        assert_eq!(reader.read_frame().unwrap(), hello());
    }

    #[test]
    fn read_multiple_frames() {
        let frames = vec![
            Frame::data(1, Priority::Low, 0, Bytes::from_static(b"one")),
            Frame::ack(2, 9),
            Frame::data(3, Priority::Urgent, 1, Bytes::from_static(b"three")),
        ];
        let mut reader = FrameReader::new(Cursor::new(wire(&frames)));

        for expected in frames {
            assert_eq!(reader.read_frame().unwrap(), expected);
        }
        assert!(matches!(
            reader.read_frame().unwrap_err(),
            FrameError::ConnectionClosed
        ));
    }

    #[test]
    fn partial_read_handling() {
        let byte_reader = ByteByByteReader {
            bytes: wire(&[hello()]),
            pos: 0,
        };
        let mut reader = FrameReader::new(byte_reader);
        assert_eq!(reader.read_frame().unwrap(), hello());
    }

    #[test]
    fn connection_closed_cleanly() {
        let mut reader = FrameReader::new(Cursor::new(Vec::<u8>::new()));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn connection_closed_mid_frame() {
        let bytes = wire(&[hello()]);
        let mut reader = FrameReader::new(Cursor::new(bytes[..6].to_vec()));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
        assert_eq!(reader.buffered(), 6);
    }

    #[test]
    fn corrupt_frame_is_skipped_and_counted() {
        let good = Frame::data(2, Priority::High, 6, Bytes::from_static(b"beta"));
        let mut bytes = wire(&[Frame::data(1, Priority::Normal, 5, Bytes::from_static(b"alpha"))]);
        bytes[4] ^= 0x01;
        bytes.extend(wire(&[good.clone()]));

        let mut reader = FrameReader::new(Cursor::new(bytes));
        assert_eq!(reader.read_frame().unwrap(), good);
        assert_eq!(reader.corrupt_frames(), 1);
        assert_eq!(reader.framing_errors(), 0);
    }

    #[test]
    fn read_would_block_propagates_io_error() {
        let reader = WouldBlockThenData {
            state: 0,
            bytes: wire(&[hello()]),
            pos: 0,
        };
        let mut framed = FrameReader::new(reader);
        let err = framed.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::WouldBlock));
        assert_eq!(framed.read_frame().unwrap(), hello());
    }

    #[test]
    fn poll_flushes_trailing_frame_when_idle() {
        let mut framed = FrameReader::new(ScriptedReader::new(vec![
            Step::Idle,
            Step::Data(wire(&[hello()])),
            Step::Idle,
        ]));

        assert!(framed.poll().unwrap().is_empty());
        assert!(framed.poll().unwrap().is_empty());
        assert_eq!(framed.buffered(), 10);
        assert_eq!(framed.poll().unwrap().frames, vec![hello()]);
        assert!(matches!(
            framed.poll().unwrap_err(),
            FrameError::ConnectionClosed
        ));
    }

    #[test]
    fn poll_flushes_at_eof_before_reporting_close() {
        let mut framed = FrameReader::new(ScriptedReader::new(vec![Step::Data(wire(&[hello()]))]));

        assert!(framed.poll().unwrap().is_empty());
        assert_eq!(framed.poll().unwrap().frames, vec![hello()]);
        assert!(matches!(
            framed.poll().unwrap_err(),
            FrameError::ConnectionClosed
        ));
    }

    #[test]
    fn read_frame_releases_trailing_frame_on_timeout() {
        let mut framed = FrameReader::new(ScriptedReader::new(vec![
            Step::Data(wire(&[hello()])),
            Step::Idle,
            Step::Idle,
        ]));

        assert_eq!(framed.read_frame().unwrap(), hello());
        let err = framed.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::WouldBlock));
    }

    #[test]
    fn interrupted_read_retries() {
        let reader = InterruptedThenData {
            state: 0,
            bytes: wire(&[hello()]),
            pos: 0,
        };
        let mut framed = FrameReader::new(reader);
        assert_eq!(framed.read_frame().unwrap(), hello());
    }

    #[test]
    fn small_read_chunks() {
        let frames = vec![hello(), Frame::ack(0, 0)];
        let mut reader = FrameReader::new(Cursor::new(wire(&frames)));
        reader.set_read_chunk_size(3);

        assert_eq!(reader.read_frame().unwrap(), frames[0]);
        assert_eq!(reader.read_frame().unwrap(), frames[1]);
    }

    #[test]
    fn accessors_and_into_inner() {
        let cursor = Cursor::new(Vec::<u8>::new());
        let mut reader = FrameReader::new(cursor);

        let _ = reader.get_ref();
        let _ = reader.get_mut();
        assert_eq!(reader.config().max_payload_size, DEFAULT_MAX_PAYLOAD);
        let _inner = reader.into_inner();
    }

    #[test]
    fn roundtrip_over_link_pair() {
        let (left, right) = LinkStream::pair().unwrap();
        let mut writer = crate::writer::FrameWriter::new(left);
        let cfg = FrameConfig {
            read_timeout: Some(Duration::from_millis(50)),
            ..FrameConfig::default()
        };
        let mut reader = FrameReader::with_config_transport(right, cfg).unwrap();

        writer.write_frame(&hello()).unwrap();
        writer.write_frame(&Frame::nack(1, 0)).unwrap();

        assert_eq!(reader.read_frame().unwrap(), hello());
        assert_eq!(reader.read_frame().unwrap(), Frame::nack(1, 0));
    }

    #[test]
    fn applies_read_timeout_for_transport() {
        let (_left, right) = LinkStream::pair().unwrap();
        let cfg = FrameConfig {
            read_timeout: Some(Duration::from_millis(10)),
            ..FrameConfig::default()
        };

        let mut reader = FrameReader::with_config_transport(right, cfg).unwrap();
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(
            err,
            FrameError::Io(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
        ));
        assert!(reader.poll().unwrap().is_empty());
    }

    #[derive(Debug)]
    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }

            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    struct WouldBlockThenData {
        state: u8,
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for WouldBlockThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.state == 0 {
                self.state = 1;
                return Err(std::io::Error::from(ErrorKind::WouldBlock));
            }
            copy_remaining(&self.bytes, &mut self.pos, buf)
        }
    }

    struct InterruptedThenData {
        state: u8,
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for InterruptedThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.state == 0 {
                self.state = 1;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            copy_remaining(&self.bytes, &mut self.pos, buf)
        }
    }

    enum Step {
        Data(Vec<u8>),
        Idle,
    }

    /// Replays reads in order, then reports EOF.
    struct ScriptedReader {
        steps: VecDeque<Step>,
    }

    impl ScriptedReader {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: steps.into(),
            }
        }
    }

    impl Read for ScriptedReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.steps.pop_front() {
                Some(Step::Data(bytes)) => {
                    let n = bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    Ok(n)
                }
                Some(Step::Idle) => Err(std::io::Error::from(ErrorKind::WouldBlock)),
                None => Ok(0),
            }
        }
    }

    fn copy_remaining(bytes: &[u8], pos: &mut usize, buf: &mut [u8]) -> std::io::Result<usize> {
        if *pos >= bytes.len() {
            return Ok(0);
        }
        let n = (bytes.len() - *pos).min(buf.len());
        buf[..n].copy_from_slice(&bytes[*pos..*pos + n]);
        *pos += n;
        Ok(n)
    }
}
