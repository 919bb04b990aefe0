use std::path::Path;

use chanmux_transport::{StreamConfig, UnixDomainSocket};
use tracing::debug;

use crate::connection::MuxConnection;
use crate::error::Result;

/// Connect to a multiplexed listener at `path` with default stream config.
pub async fn connect<C: Clone>(path: impl AsRef<Path>) -> Result<MuxConnection<C>> {
    connect_with_config(path, &StreamConfig::default()).await
}

/// Connect to a multiplexed listener at `path`.
pub async fn connect_with_config<C: Clone>(
    path: impl AsRef<Path>,
    config: &StreamConfig,
) -> Result<MuxConnection<C>> {
    let path = path.as_ref();
    let stream = UnixDomainSocket::connect(path).await?;
    debug!(?path, "opened multiplexed connection");
    Ok(MuxConnection::from_stream(
        format!("client:{}", path.display()),
        stream,
        config,
    ))
}
