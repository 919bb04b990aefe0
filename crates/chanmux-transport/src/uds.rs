use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};

/// Listening Unix domain socket bound to a filesystem path.
///
/// The socket file is removed on drop, but only if the path still refers to
/// the socket this listener created.
pub struct UnixDomainSocket {
    listener: UnixListener,
    path: PathBuf,
    created_inode: (u64, u64),
}

impl UnixDomainSocket {
    /// Default permission mode for created socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;
    /// `sockaddr_un.sun_path` is 108 bytes on Linux, 104 on macOS and the BSDs.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    /// Bind and listen on `path`.
    ///
    /// A stale socket at `path` is removed first; any other kind of file
    /// makes the bind fail. Must be called from within a tokio runtime.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_mode(path, Self::DEFAULT_SOCKET_MODE)
    }

    /// Bind with an explicit permission mode for the socket file.
    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let len = path.as_os_str().len();
        if len >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len,
                max: Self::MAX_PATH_LEN,
            });
        }

        let bind_err = |source: std::io::Error| TransportError::Bind {
            path: path.clone(),
            source,
        };

        match std::fs::symlink_metadata(&path) {
            Ok(metadata) if metadata.file_type().is_socket() => {
                debug!(?path, "removing stale socket");
                std::fs::remove_file(&path).map_err(bind_err)?;
            }
            Ok(_) => {
                return Err(bind_err(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "existing path is not a unix socket",
                )));
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(bind_err(err)),
        }

        let listener = UnixListener::bind(&path).map_err(bind_err)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
            .map_err(bind_err)?;
        let metadata = std::fs::symlink_metadata(&path).map_err(bind_err)?;

        info!(?path, "listening on unix domain socket");

        Ok(Self {
            listener,
            path,
            created_inode: (metadata.dev(), metadata.ino()),
        })
    }

    /// Accept the next incoming connection.
    pub async fn accept(&self) -> Result<UnixStream> {
        let (stream, _addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::Accept)?;
        debug!(path = ?self.path, "accepted connection");
        Ok(stream)
    }

    /// Connect to a listening socket.
    pub async fn connect(path: impl AsRef<Path>) -> Result<UnixStream> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path)
            .await
            .map_err(|source| TransportError::Connect {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(?path, "connected");
        Ok(stream)
    }

    /// Bound socket path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UnixDomainSocket {
    fn drop(&mut self) {
        let Ok(metadata) = std::fs::symlink_metadata(&self.path) else {
            return;
        };
        if (metadata.dev(), metadata.ino()) != self.created_inode {
            warn!(path = ?self.path, "socket path was replaced, leaving it in place");
            return;
        }
        if let Err(err) = std::fs::remove_file(&self.path) {
            warn!(path = ?self.path, error = %err, "failed to remove socket file");
        }
    }
}

impl std::fmt::Debug for UnixDomainSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnixDomainSocket")
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::stream::{split_stream, StreamConfig};
    use crate::traits::{MessageReceiver, MessageSender};

    fn sock_dir(tag: &str) -> PathBuf {
        let dir = PathBuf::from(format!(
            "/tmp/cmx-uds-{}-{}-{}",
            tag,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir
    }

    #[tokio::test]
    async fn bind_accept_connect_roundtrip() {
        let dir = sock_dir("rt");
        let path = dir.join("s.sock");
        let listener = UnixDomainSocket::bind(&path).unwrap();

        let client = tokio::spawn({
            let path = path.clone();
            async move {
                let stream = UnixDomainSocket::connect(&path).await.unwrap();
                let (sender, _rx) = split_stream(stream, &StreamConfig::default());
                sender
                    .send_message(Bytes::from_static(b"over uds"))
                    .await
                    .unwrap();
                sender.close().await.unwrap();
            }
        });

        let stream = listener.accept().await.unwrap();
        let (_tx, mut receiver) = split_stream(stream, &StreamConfig::default());
        assert_eq!(receiver.recv_message().await.unwrap().as_ref(), b"over uds");
        client.await.unwrap();

        drop(listener);
        assert!(!path.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn socket_mode_is_applied() {
        let dir = sock_dir("mode");
        let path = dir.join("s.sock");
        let _listener = UnixDomainSocket::bind(&path).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, UnixDomainSocket::DEFAULT_SOCKET_MODE);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn stale_socket_is_replaced() {
        let dir = sock_dir("stale");
        let path = dir.join("s.sock");
        let first = UnixDomainSocket::bind(&path).unwrap();
        // Simulate a crashed process: the file stays behind.
        std::mem::forget(first);

        let second = UnixDomainSocket::bind(&path);
        assert!(second.is_ok());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn refuses_to_remove_regular_file() {
        let dir = sock_dir("file");
        let path = dir.join("not-a-socket");
        std::fs::write(&path, b"data").unwrap();

        let err = UnixDomainSocket::bind(&path).unwrap_err();
        assert!(matches!(err, TransportError::Bind { .. }));
        assert!(path.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn path_too_long_rejected() {
        let path = PathBuf::from(format!("/tmp/{}", "x".repeat(200)));
        let err = UnixDomainSocket::bind(&path).unwrap_err();
        assert!(matches!(err, TransportError::PathTooLong { .. }));
    }

    #[tokio::test]
    async fn connect_to_missing_socket_fails() {
        let dir = sock_dir("missing");
        let err = UnixDomainSocket::connect(dir.join("nope.sock"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
