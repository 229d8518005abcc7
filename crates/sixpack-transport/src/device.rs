use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};

/// Sentinel for "no timeout" in the atomic millisecond slots.
const NO_TIMEOUT: u64 = u64::MAX;

/// A character device opened non-blocking, with poll-based timeouts.
///
/// The descriptor is opened `O_NONBLOCK | O_NOCTTY` so that opening a TTY
/// never waits for carrier and never makes it the controlling terminal.
/// Blocking semantics are restored by waiting in `poll(2)` for at most the
/// configured timeout before each read or write.
pub struct DeviceStream {
    file: File,
    path: PathBuf,
    read_timeout_ms: AtomicU64,
    write_timeout_ms: AtomicU64,
}

impl DeviceStream {
    pub(crate) fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK | libc::O_NOCTTY)
            .open(&path)
            .map_err(|source| TransportError::Open {
                path: path.clone(),
                source,
            })?;
        info!(?path, "opened character device");
        Ok(Self {
            file,
            path,
            read_timeout_ms: AtomicU64::new(NO_TIMEOUT),
            write_timeout_ms: AtomicU64::new(NO_TIMEOUT),
        })
    }

    pub(crate) fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            file: self.file.try_clone()?,
            path: self.path.clone(),
            read_timeout_ms: AtomicU64::new(self.read_timeout_ms.load(Ordering::Relaxed)),
            write_timeout_ms: AtomicU64::new(self.write_timeout_ms.load(Ordering::Relaxed)),
        })
    }

    pub(crate) fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.read_timeout_ms
            .store(encode_timeout(timeout)?, Ordering::Relaxed);
        Ok(())
    }

    pub(crate) fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.write_timeout_ms
            .store(encode_timeout(timeout)?, Ordering::Relaxed);
        Ok(())
    }

    /// Wait until the descriptor is ready for `events` or the timeout expires.
    fn wait_ready(&self, events: libc::c_short, timeout_ms: u64) -> io::Result<bool> {
        let timeout = if timeout_ms == NO_TIMEOUT {
            -1
        } else {
            timeout_ms.min(libc::c_int::MAX as u64) as libc::c_int
        };
        let mut fds = libc::pollfd {
            fd: self.file.as_raw_fd(),
            events,
            revents: 0,
        };
        loop {
            // SAFETY: `fds` is a valid, exclusively borrowed pollfd array of
            // length 1 and the descriptor stays open for the call.
            let rc = unsafe { libc::poll(&mut fds, 1, timeout) };
            if rc < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            return Ok(rc > 0);
        }
    }
}

impl Read for DeviceStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let timeout = self.read_timeout_ms.load(Ordering::Relaxed);
        if !self.wait_ready(libc::POLLIN, timeout)? {
            return Err(io::Error::from(ErrorKind::WouldBlock));
        }
        self.file.read(buf)
    }
}

impl Write for DeviceStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let timeout = self.write_timeout_ms.load(Ordering::Relaxed);
        if !self.wait_ready(libc::POLLOUT, timeout)? {
            debug!(path = ?self.path, "device not writable before timeout");
            return Err(io::Error::from(ErrorKind::TimedOut));
        }
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn encode_timeout(timeout: Option<Duration>) -> Result<u64> {
    match timeout {
        None => Ok(NO_TIMEOUT),
        Some(d) if d.is_zero() => Err(TransportError::Io(io::Error::new(
            ErrorKind::InvalidInput,
            "cannot set a zero duration timeout",
        ))),
        Some(d) => Ok(u64::try_from(d.as_millis())
            .unwrap_or(NO_TIMEOUT - 1)
            .clamp(1, NO_TIMEOUT - 1)),
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    use super::*;
    use crate::traits::{LinkStream, Transport};

    fn make_fifo(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "sixpack-fifo-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("link.fifo");
        let c_path = CString::new(path.as_os_str().as_bytes()).unwrap();
        // SAFETY: `c_path` is a valid NUL-terminated path for the call.
        let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) };
        assert_eq!(rc, 0, "mkfifo should succeed");
        path
    }

    #[test]
    fn fifo_loops_bytes_back() {
        let path = make_fifo("loop");
        let mut stream = LinkStream::open_device(&path).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();

        stream.write_all(b"\x00\x04\x00").unwrap();
        let mut buf = [0u8; 3];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"\x00\x04\x00");
        assert_eq!(stream.transport_name(), "character-device");

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn empty_device_read_times_out() {
        let path = make_fifo("timeout");
        let mut stream = LinkStream::open_device(&path).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_millis(10)))
            .unwrap();

        let mut buf = [0u8; 8];
        let err = stream.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WouldBlock);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn timeouts_encode_without_truncation() {
        assert_eq!(encode_timeout(None).unwrap(), NO_TIMEOUT);
        assert_eq!(encode_timeout(Some(Duration::from_micros(10))).unwrap(), 1);
        assert_eq!(encode_timeout(Some(Duration::from_secs(2))).unwrap(), 2000);
        assert_eq!(encode_timeout(Some(Duration::MAX)).unwrap(), NO_TIMEOUT - 1);
    }

    #[test]
    fn full_device_write_times_out() {
        let path = make_fifo("full");
        let mut stream = LinkStream::open_device(&path).unwrap();
        stream
            .set_write_timeout(Some(Duration::from_millis(20)))
            .unwrap();

        // Nobody drains the FIFO, so it fills and stays full.
        let chunk = [0x55u8; 4096];
        let err = (0..1024)
            .find_map(|_| stream.write(&chunk).err())
            .expect("fifo should fill");
        assert_eq!(err.kind(), ErrorKind::TimedOut);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn zero_timeout_rejected() {
        let path = make_fifo("zero");
        let stream = LinkStream::open_device(&path).unwrap();
        assert!(stream.set_read_timeout(Some(Duration::ZERO)).is_err());

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn missing_device_reports_open_error() {
        let result = LinkStream::open_device("/nonexistent/sixpack/tty");
        assert!(matches!(result, Err(TransportError::Open { .. })));
    }
}
