/// Errors that can occur in peer operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] chanmux_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] chanmux_frame::FrameError),

    /// A channel is already registered under this id.
    #[error("another channel is already registered for channel id {0}")]
    DuplicateChannel(String),

    /// No channel is registered under this id.
    #[error("no channel is registered for channel id {0}")]
    MissingChannel(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PeerError {
    /// True when the error means the peer went away.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, PeerError::Transport(err) if err.is_disconnect())
    }
}

pub type Result<T> = std::result::Result<T, PeerError>;
