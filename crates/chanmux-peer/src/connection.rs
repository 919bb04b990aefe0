use std::sync::Arc;

use bytes::BytesMut;
use chanmux_frame::{decode_frame, encode_frame, Frame};
use chanmux_transport::{split_stream, MessageReceiver, MessageSender, StreamConfig};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tracing::trace;

use crate::error::Result;
use crate::registry::ChannelRegistry;

/// Many named channels over one message transport.
///
/// The connection owns the channel registry and moves frames in and out. It
/// never looks at event names or payloads. Reads are serialized through a
/// single receiver, so frames come out of [`receive`](Self::receive) in
/// arrival order; writes may come from any task.
pub struct MuxConnection<C> {
    id: String,
    sender: Arc<dyn MessageSender>,
    receiver: Mutex<Box<dyn MessageReceiver>>,
    registry: ChannelRegistry<C>,
}

impl<C: Clone> MuxConnection<C> {
    /// Build a connection from already split transport halves.
    pub fn new(
        id: impl Into<String>,
        sender: impl MessageSender + 'static,
        receiver: impl MessageReceiver + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            sender: Arc::new(sender),
            receiver: Mutex::new(Box::new(receiver)),
            registry: ChannelRegistry::new(),
        }
    }

    /// Build a connection over a byte stream with length-delimited messages.
    pub fn from_stream<S>(id: impl Into<String>, stream: S, config: &StreamConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (sender, receiver) = split_stream(stream, config);
        Self::new(id, sender, receiver)
    }

    /// Connection id, used in logs.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Encode one frame and write it as one transport message.
    pub async fn send(&self, channel_id: &str, event_name: &str, payload: &[u8]) -> Result<()> {
        let mut buf = BytesMut::new();
        encode_frame(channel_id, event_name, payload, &mut buf)?;
        self.sender.send_message(buf.freeze()).await?;
        trace!(
            connection = %self.id,
            channel_id,
            event_name,
            size = payload.len(),
            "sent frame"
        );
        Ok(())
    }

    /// Serialize `value` as JSON and send it as the frame payload.
    pub async fn send_json<T: Serialize + ?Sized>(
        &self,
        channel_id: &str,
        event_name: &str,
        value: &T,
    ) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        self.send(channel_id, event_name, &payload).await
    }

    /// Read and decode the next frame.
    ///
    /// A transport failure surfaces as [`PeerError::Transport`] and a
    /// malformed message as [`PeerError::Frame`].
    ///
    /// [`PeerError::Transport`]: crate::PeerError::Transport
    /// [`PeerError::Frame`]: crate::PeerError::Frame
    pub async fn receive(&self) -> Result<Frame> {
        let message = {
            let mut receiver = self.receiver.lock().await;
            receiver.recv_message().await?
        };
        let frame = decode_frame(message)?;
        trace!(
            connection = %self.id,
            channel_id = %frame.channel_id,
            event_name = %frame.event_name,
            size = frame.payload.len(),
            "received frame"
        );
        Ok(frame)
    }

    pub fn register_channel(&self, id: impl Into<String>, channel: C) -> Result<()> {
        self.registry.register(id, channel)
    }

    pub fn deregister_channel(&self, id: &str) -> Result<C> {
        self.registry.deregister(id)
    }

    pub fn get_channel_by_id(&self, id: &str) -> Result<C> {
        self.registry.get(id)
    }

    /// The channel registry of this connection.
    pub fn registry(&self) -> &ChannelRegistry<C> {
        &self.registry
    }

    /// Shut down the write half. The peer sees end of stream.
    pub async fn close(&self) -> Result<()> {
        self.sender.close().await?;
        Ok(())
    }
}

impl<C> std::fmt::Debug for MuxConnection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MuxConnection")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
