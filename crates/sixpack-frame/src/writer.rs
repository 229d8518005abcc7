use std::io::{self, ErrorKind, Write};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use sixpack_transport::Transport;

use crate::codec::{encode_frame, Frame, FrameConfig};
use crate::error::{transport_to_frame_error, FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 512;

/// Writes complete frames to any `Write` stream.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Encode and write a complete frame (blocking).
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.buf.clear();
        encode_frame(frame, self.config.max_payload_size, &mut self.buf)?;
        write_fully(&mut self.inner, &self.buf, self.config.write_timeout)?;
        self.flush()
    }

    /// Write bytes that are already a complete encoded frame.
    pub fn write_encoded(&mut self, bytes: &[u8]) -> Result<()> {
        write_fully(&mut self.inner, bytes, self.config.write_timeout)?;
        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Update maximum payload size for subsequent frame encoding.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.config.max_payload_size = max_payload_size;
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

/// Write all of `bytes`. `WouldBlock` is retried until `timeout` has passed
/// since the first attempt; a socket reports its own expired write timeout
/// that way.
fn write_fully<T: Write>(inner: &mut T, bytes: &[u8], timeout: Option<Duration>) -> Result<()> {
    let started = Instant::now();
    let mut offset = 0usize;
    while offset < bytes.len() {
        match inner.write(&bytes[offset..]) {
            Ok(0) => return Err(FrameError::ConnectionClosed),
            Ok(n) => offset += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                if timeout.is_some_and(|limit| started.elapsed() >= limit) {
                    return Err(FrameError::Io(io::Error::new(
                        ErrorKind::TimedOut,
                        "write timed out",
                    )));
                }
            }
            Err(err) => return Err(FrameError::Io(err)),
        }
    }
    Ok(())
}

impl<T: Transport> FrameWriter<T> {
    /// Create a frame writer for a transport and apply the write timeout from config.
    pub fn with_config_transport(inner: T, config: FrameConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;
    use sixpack_transport::LinkStream;

    use super::*;
    use crate::codec::{decode_frame, DEFAULT_MAX_PAYLOAD, MIN_FRAME_SIZE};
    use crate::command::{Command, Priority};
    use crate::resync::Resynchronizer;

    fn written(writer: FrameWriter<Cursor<Vec<u8>>>) -> Vec<u8> {
        writer.into_inner().into_inner()
    }

    #[test]
    fn write_single_frame() {
        let frame = Frame::data(1, Priority::Normal, 0, Bytes::from_static(b"hello"));
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));

        writer.write_frame(&frame).unwrap();

        let wire = written(writer);
        assert_eq!(decode_frame(&wire), Ok(frame));
    }

    #[test]
    fn write_multiple_frames() {
        let frames = vec![
            Frame::data(1, Priority::Low, 0, Bytes::from_static(b"one")),
            Frame::ack(2, 0),
            Frame::status(3, Priority::Urgent, Bytes::new()),
        ];
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        for frame in &frames {
            writer.write_frame(frame).unwrap();
        }

        let wire = written(writer);
        let mut resync = Resynchronizer::new();
        let mut out = resync.feed(&wire);
        out.merge(resync.flush_idle());
        assert_eq!(out.frames, frames);
    }

    #[test]
    fn payload_too_large_rejected() {
        let cfg = FrameConfig {
            max_payload_size: 4,
            ..FrameConfig::default()
        };
        let mut writer = FrameWriter::with_config(Cursor::new(Vec::<u8>::new()), cfg);
        let frame = Frame::data(1, Priority::Low, 0, Bytes::from_static(b"oversized"));

        let err = writer.write_frame(&frame).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 9, max: 4 }));
        assert!(written(writer).is_empty());
    }

    #[test]
    fn unencodable_command_writes_nothing() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        let frame = Frame::new(Command::Beacon, 0, Priority::Low, 0, Bytes::new());

        let err = writer.write_frame(&frame).unwrap_err();
        assert!(matches!(err, FrameError::CommandNotEncodable(Command::Beacon)));
        assert!(written(writer).is_empty());
    }

    #[test]
    fn write_encoded_passes_bytes_through() {
        let encoded = Frame::nack(4, 2).encode(DEFAULT_MAX_PAYLOAD).unwrap();
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));

        writer.write_encoded(&encoded).unwrap();

        let wire = written(writer);
        assert_eq!(wire.len(), MIN_FRAME_SIZE);
        assert_eq!(wire.as_slice(), encoded.as_ref());
    }

    #[test]
    fn flush_propagates() {
        let sink = FlushTrackingWriter::default();
        let flag = Arc::clone(&sink.flushed);
        let mut writer = FrameWriter::new(sink);

        writer.write_frame(&Frame::ack(1, 1)).unwrap();

        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn accessors_and_into_inner() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));

        let _ = writer.get_ref();
        let _ = writer.get_mut();
        writer.set_max_payload_size(16);
        assert_eq!(writer.config().max_payload_size, 16);
        let _inner = writer.into_inner();
    }

    #[test]
    fn handles_interrupted_write_and_flush() {
        let writer_impl = InterruptedWriteThenFlush {
            wrote_once: false,
            flush_interrupted: false,
            data: Vec::new(),
        };

        let mut writer = FrameWriter::new(writer_impl);
        writer.write_frame(&Frame::ack(5, 5)).unwrap();

        let inner = writer.into_inner();
        assert_eq!(decode_frame(&inner.data), Ok(Frame::ack(5, 5)));
    }

    #[test]
    fn handles_would_block_write_and_flush() {
        let writer_impl = WouldBlockWriteThenFlush {
            wrote_once: false,
            flush_would_block: false,
            data: Vec::new(),
        };

        let mut writer = FrameWriter::new(writer_impl);
        writer.write_frame(&Frame::ack(6, 6)).unwrap();

        let inner = writer.into_inner();
        assert_eq!(decode_frame(&inner.data), Ok(Frame::ack(6, 6)));
    }

    #[test]
    fn short_writes_complete_the_frame() {
        let frame = Frame::data(7, Priority::High, 3, Bytes::from_static(b"trickle"));
        let mut writer = FrameWriter::new(OneByteWriter::default());

        writer.write_frame(&frame).unwrap();

        assert_eq!(decode_frame(&writer.into_inner().data), Ok(frame));
    }

    #[test]
    fn connection_closed_when_write_returns_zero() {
        let mut writer = FrameWriter::new(ZeroWriter);
        let err = writer.write_frame(&Frame::ack(1, 0)).unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn applies_write_timeout_for_transport() {
        let (left, _right) = LinkStream::pair().unwrap();
        let cfg = FrameConfig {
            write_timeout: Some(Duration::from_millis(10)),
            ..FrameConfig::default()
        };

        let writer = FrameWriter::with_config_transport(left, cfg);
        assert!(writer.is_ok());
    }

    #[test]
    fn stuck_writer_times_out() {
        let cfg = FrameConfig {
            write_timeout: Some(Duration::from_millis(20)),
            ..FrameConfig::default()
        };
        let mut writer = FrameWriter::with_config(StuckWriter, cfg);

        let err = writer.write_frame(&Frame::ack(1, 0)).unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::TimedOut));
    }

    #[test]
    fn timed_out_write_is_not_retried() {
        let mut writer = FrameWriter::new(TimedOutWriter::default());

        let err = writer.write_frame(&Frame::ack(1, 0)).unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::TimedOut));
        assert_eq!(writer.get_ref().attempts, 1);
    }

    /// Never accepts a byte.
    struct StuckWriter;

    impl Write for StuckWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(ErrorKind::WouldBlock))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct TimedOutWriter {
        attempts: usize,
    }

    impl Write for TimedOutWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            self.attempts += 1;
            Err(std::io::Error::from(ErrorKind::TimedOut))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FlushTrackingWriter {
        flushed: Arc<AtomicBool>,
        data: Vec<u8>,
    }

    impl Write for FlushTrackingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.flushed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct InterruptedWriteThenFlush {
        wrote_once: bool,
        flush_interrupted: bool,
        data: Vec<u8>,
    }

    impl Write for InterruptedWriteThenFlush {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if !self.wrote_once {
                self.wrote_once = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            if !self.flush_interrupted {
                self.flush_interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            Ok(())
        }
    }

    struct WouldBlockWriteThenFlush {
        wrote_once: bool,
        flush_would_block: bool,
        data: Vec<u8>,
    }

    impl Write for WouldBlockWriteThenFlush {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if !self.wrote_once {
                self.wrote_once = true;
                return Err(std::io::Error::from(ErrorKind::WouldBlock));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            if !self.flush_would_block {
                self.flush_would_block = true;
                return Err(std::io::Error::from(ErrorKind::WouldBlock));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct OneByteWriter {
        data: Vec<u8>,
    }

    impl Write for OneByteWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            match buf.first() {
                Some(&byte) => {
                    self.data.push(byte);
                    Ok(1)
                }
                None => Ok(0),
            }
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
