use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use chanmux_transport::{StreamConfig, UnixDomainSocket};
use tracing::info;

use crate::connection::MuxConnection;
use crate::error::Result;

/// Listens for and accepts multiplexed connections on a Unix socket.
#[derive(Debug)]
pub struct MuxListener {
    socket: UnixDomainSocket,
    stream_config: StreamConfig,
    next_connection_id: AtomicU64,
}

impl MuxListener {
    /// Bind to a Unix domain socket path.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let socket = UnixDomainSocket::bind(path)?;
        Ok(Self {
            socket,
            stream_config: StreamConfig::default(),
            next_connection_id: AtomicU64::new(1),
        })
    }

    /// Override the stream transport config for accepted connections.
    pub fn with_stream_config(mut self, config: StreamConfig) -> Self {
        self.stream_config = config;
        self
    }

    /// Accept the next connection and assign an auto-generated id.
    pub async fn accept<C: Clone>(&self) -> Result<MuxConnection<C>> {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        self.accept_with_id(&format!("conn-{id}")).await
    }

    /// Accept the next connection and use an explicit id.
    pub async fn accept_with_id<C: Clone>(&self, connection_id: &str) -> Result<MuxConnection<C>> {
        let stream = self.socket.accept().await?;
        info!(connection = connection_id, "accepted connection");
        Ok(MuxConnection::from_stream(
            connection_id,
            stream,
            &self.stream_config,
        ))
    }

    /// Bound socket path.
    pub fn path(&self) -> &Path {
        self.socket.path()
    }
}
