use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// A duplex byte stream a link engine can own.
///
/// Reads must honor the configured read timeout and report an expired wait
/// as `WouldBlock` or `TimedOut`, so the engine can keep its retransmission
/// sweep on schedule when the link is quiet. Writes are synchronous.
pub trait Transport: Read + Write + Send {
    /// Open a second handle onto the same stream.
    fn try_clone(&self) -> Result<Self>
    where
        Self: Sized;

    /// Bound how long a single read may wait for data. `None` blocks.
    fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()>;

    /// Bound how long a single write may wait. `None` blocks.
    fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()>;

    /// Transport name for diagnostics.
    fn transport_name(&self) -> &'static str;
}

/// A connected link byte stream.
///
/// On Unix this wraps either a Unix domain socket or a character device
/// such as a serial TTY.
pub struct LinkStream {
    inner: LinkStreamInner,
}

enum LinkStreamInner {
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
    #[cfg(unix)]
    Device(crate::device::DeviceStream),
}

impl Read for LinkStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream.read(buf),
            #[cfg(unix)]
            LinkStreamInner::Device(device) => device.read(buf),
        }
    }
}

impl Write for LinkStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream.write(buf),
            #[cfg(unix)]
            LinkStreamInner::Device(device) => device.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream.flush(),
            #[cfg(unix)]
            LinkStreamInner::Device(device) => device.flush(),
        }
    }
}

impl LinkStream {
    /// Wrap a connected Unix domain socket.
    #[cfg(unix)]
    pub fn from_unix(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: LinkStreamInner::Unix(stream),
        }
    }

    /// Create a connected in-process pair, one end per link endpoint.
    #[cfg(unix)]
    pub fn pair() -> Result<(Self, Self)> {
        let (left, right) = std::os::unix::net::UnixStream::pair()?;
        Ok((Self::from_unix(left), Self::from_unix(right)))
    }

    /// Open a character device (serial TTY, PTY, FIFO) for reading and writing.
    ///
    /// The device must already be configured; line settings are not touched.
    #[cfg(unix)]
    pub fn open_device(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let device = crate::device::DeviceStream::open(path)?;
        Ok(Self {
            inner: LinkStreamInner::Device(device),
        })
    }

    fn kind(&self) -> &'static str {
        match &self.inner {
            #[cfg(unix)]
            LinkStreamInner::Unix(_) => "unix-domain-socket",
            #[cfg(unix)]
            LinkStreamInner::Device(_) => "character-device",
        }
    }
}

impl Transport for LinkStream {
    fn try_clone(&self) -> Result<Self> {
        let inner = match &self.inner {
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => LinkStreamInner::Unix(stream.try_clone()?),
            #[cfg(unix)]
            LinkStreamInner::Device(device) => LinkStreamInner::Device(device.try_clone()?),
        };
        Ok(Self { inner })
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
            #[cfg(unix)]
            LinkStreamInner::Device(device) => device.set_read_timeout(timeout),
        }
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
            #[cfg(unix)]
            LinkStreamInner::Device(device) => device.set_write_timeout(timeout),
        }
    }

    fn transport_name(&self) -> &'static str {
        self.kind()
    }
}

impl std::fmt::Debug for LinkStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkStream")
            .field("type", &self.kind())
            .finish()
    }
}
