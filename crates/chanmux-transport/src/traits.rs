use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Write half of a message-oriented duplex transport.
///
/// Each call to [`send_message`](MessageSender::send_message) delivers exactly
/// one message to the peer. Senders are shared between tasks, so the methods
/// take `&self`; implementations serialize concurrent writers internally so
/// that messages never interleave on the wire.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Send one complete message.
    async fn send_message(&self, message: Bytes) -> Result<()>;

    /// Flush and shut down the write direction.
    async fn close(&self) -> Result<()>;
}

/// Read half of a message-oriented duplex transport.
///
/// There is exactly one reader per connection.
#[async_trait]
pub trait MessageReceiver: Send {
    /// Wait for the next complete message.
    ///
    /// Returns [`TransportError::Closed`](crate::TransportError::Closed) when
    /// the peer closed the stream on a message boundary.
    async fn recv_message(&mut self) -> Result<Bytes>;
}
