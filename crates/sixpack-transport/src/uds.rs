use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::LinkStream;

/// Unix domain socket endpoint for bench links and PTY bridges.
///
/// A soundmodem or radio bridge exposes the link as a socket; one side
/// binds, the other connects, and each gets a [`LinkStream`].
pub struct UnixLink {
    listener: UnixListener,
    path: PathBuf,
}

impl UnixLink {
    /// Permission mode applied to created socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;
    /// `sockaddr_un.sun_path` capacity: 108 bytes on Linux, 104 elsewhere.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    /// Bind a listening socket at `path`, replacing a stale socket file.
    ///
    /// An existing path that is not a socket is never removed.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let len = path.as_os_str().len();
        if len >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len,
                max: Self::MAX_PATH_LEN,
            });
        }

        let bind_err = |path: &Path, source| TransportError::Bind {
            path: path.to_path_buf(),
            source,
        };

        if let Ok(metadata) = std::fs::symlink_metadata(&path) {
            if !metadata.file_type().is_socket() {
                return Err(bind_err(
                    &path,
                    std::io::Error::new(
                        std::io::ErrorKind::AlreadyExists,
                        "existing path is not a unix socket",
                    ),
                ));
            }
            debug!(?path, "removing stale socket");
            std::fs::remove_file(&path).map_err(|e| bind_err(&path, e))?;
        }

        let listener = UnixListener::bind(&path).map_err(|e| bind_err(&path, e))?;
        std::fs::set_permissions(
            &path,
            std::fs::Permissions::from_mode(Self::DEFAULT_SOCKET_MODE),
        )
        .map_err(|e| bind_err(&path, e))?;

        info!(?path, "listening for link peer");
        Ok(Self { listener, path })
    }

    /// Accept the next link peer (blocking).
    pub fn accept(&self) -> Result<LinkStream> {
        let (stream, _addr) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(path = ?self.path, "accepted link peer");
        Ok(LinkStream::from_unix(stream))
    }

    /// Connect to a listening link socket (blocking).
    pub fn connect(path: impl AsRef<Path>) -> Result<LinkStream> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).map_err(|source| TransportError::Connect {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(?path, "connected to link socket");
        Ok(LinkStream::from_unix(stream))
    }

    /// The path this socket is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UnixLink {
    fn drop(&mut self) {
        let is_socket = std::fs::symlink_metadata(&self.path)
            .map(|m| m.file_type().is_socket())
            .unwrap_or(false);
        if is_socket {
            debug!(path = ?self.path, "removing socket file");
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
