//! Where a link's byte stream comes from.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant};

use sixpack_transport::{LinkStream, TransportError, UnixLink};
use tracing::info;

use crate::exit::{transport_error, CliError, CliResult, TIMEOUT};

const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `unix:<path>`: connect to a listening socket.
    Connect(PathBuf),
    /// `unix-listen:<path>`: bind, then accept one peer.
    Listen(PathBuf),
    /// Anything else: an already-configured character device.
    Device(PathBuf),
}

impl FromStr for Endpoint {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let endpoint = if let Some(path) = input.strip_prefix("unix-listen:") {
            Endpoint::Listen(PathBuf::from(path))
        } else if let Some(path) = input.strip_prefix("unix:") {
            Endpoint::Connect(PathBuf::from(path))
        } else {
            Endpoint::Device(PathBuf::from(input))
        };

        if endpoint.path().as_os_str().is_empty() {
            return Err(format!("endpoint path must not be empty: {input:?}"));
        }
        Ok(endpoint)
    }
}

/// An open stream. A bound listener is kept until the stream is dropped.
pub struct Opened {
    pub stream: LinkStream,
    _listener: Option<UnixLink>,
}

impl Endpoint {
    pub fn open(&self, connect_timeout: Duration) -> CliResult<Opened> {
        match self {
            Endpoint::Connect(path) => {
                let stream = connect_with_retry(path, connect_timeout)?;
                info!(?path, "connected");
                Ok(Opened {
                    stream,
                    _listener: None,
                })
            }
            Endpoint::Listen(path) => {
                let listener =
                    UnixLink::bind(path).map_err(|err| transport_error("bind failed", err))?;
                let stream = listener
                    .accept()
                    .map_err(|err| transport_error("accept failed", err))?;
                Ok(Opened {
                    stream,
                    _listener: Some(listener),
                })
            }
            Endpoint::Device(path) => {
                let stream = LinkStream::open_device(path)
                    .map_err(|err| transport_error("open failed", err))?;
                info!(?path, "device opened");
                Ok(Opened {
                    stream,
                    _listener: None,
                })
            }
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Endpoint::Connect(path) | Endpoint::Listen(path) | Endpoint::Device(path) => path,
        }
    }

    pub fn display(&self) -> String {
        match self {
            Endpoint::Connect(path) => format!("unix:{}", path.display()),
            Endpoint::Listen(path) => format!("unix-listen:{}", path.display()),
            Endpoint::Device(path) => path.display().to_string(),
        }
    }
}

fn connect_with_retry(path: &Path, timeout: Duration) -> CliResult<LinkStream> {
    let start = Instant::now();
    loop {
        match UnixLink::connect(path) {
            Ok(stream) => return Ok(stream),
            Err(err) if is_retryable_connect_error(&err) => {
                if start.elapsed() >= timeout {
                    return Err(CliError::new(
                        TIMEOUT,
                        format!("connect timed out after {timeout:?}"),
                    ));
                }
                std::thread::sleep(CONNECT_RETRY_INTERVAL);
            }
            Err(err) => return Err(transport_error("connect failed", err)),
        }
    }
}

fn is_retryable_connect_error(err: &TransportError) -> bool {
    match err {
        TransportError::Connect { source, .. } => matches!(
            source.kind(),
            std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused
        ),
        _ => false,
    }
}
