use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec, LengthDelimitedCodecError};
use tracing::trace;

use crate::error::{Result, TransportError};
use crate::traits::{MessageReceiver, MessageSender};

/// Size of the little-endian length prefix in front of every message.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default maximum message size: 16 MiB.
pub const DEFAULT_MAX_MESSAGE: usize = 16 * 1024 * 1024;

/// Configuration for stream-backed transports.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Maximum size of a single message in bytes, in both directions.
    pub max_message_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE,
        }
    }
}

/// Build the length-delimited codec used on the wire.
///
/// ```text
/// ┌────────────────┬──────────────────────┐
/// │ Length (4B LE) │ Message (Length B)   │
/// └────────────────┴──────────────────────┘
/// ```
fn message_codec(config: &StreamConfig) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(LENGTH_PREFIX_SIZE)
        .little_endian()
        .max_frame_length(config.max_message_size)
        .new_codec()
}

/// Write half of a stream transport.
pub struct StreamSender<W> {
    inner: Mutex<FramedWrite<W, LengthDelimitedCodec>>,
    max_message_size: usize,
}

/// Read half of a stream transport.
pub struct StreamReceiver<R> {
    inner: FramedRead<R, LengthDelimitedCodec>,
    max_message_size: usize,
}

/// Split a byte stream into message-oriented halves.
pub fn split_stream<S>(
    stream: S,
    config: &StreamConfig,
) -> (StreamSender<WriteHalf<S>>, StreamReceiver<ReadHalf<S>>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read, write) = tokio::io::split(stream);
    (
        StreamSender::new(write, config),
        StreamReceiver::new(read, config),
    )
}

impl<W: AsyncWrite + Unpin> StreamSender<W> {
    /// Wrap an `AsyncWrite`.
    pub fn new(inner: W, config: &StreamConfig) -> Self {
        Self {
            inner: Mutex::new(FramedWrite::new(inner, message_codec(config))),
            max_message_size: config.max_message_size,
        }
    }
}

impl<R: AsyncRead + Unpin> StreamReceiver<R> {
    /// Wrap an `AsyncRead`.
    pub fn new(inner: R, config: &StreamConfig) -> Self {
        Self {
            inner: FramedRead::new(inner, message_codec(config)),
            max_message_size: config.max_message_size,
        }
    }
}

#[async_trait]
impl<W> MessageSender for StreamSender<W>
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    async fn send_message(&self, message: Bytes) -> Result<()> {
        let size = message.len();
        if size > self.max_message_size {
            return Err(TransportError::MessageTooLarge {
                size,
                max: self.max_message_size,
            });
        }

        let mut framed = self.inner.lock().await;
        framed.send(message).await?;
        trace!(size, "sent message");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut framed = self.inner.lock().await;
        SinkExt::<Bytes>::close(&mut *framed).await?;
        Ok(())
    }
}

#[async_trait]
impl<R> MessageReceiver for StreamReceiver<R>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    async fn recv_message(&mut self) -> Result<Bytes> {
        match self.inner.next().await {
            Some(Ok(message)) => {
                trace!(size = message.len(), "received message");
                Ok(message.freeze())
            }
            Some(Err(err)) => Err(classify_read_error(err, self.max_message_size)),
            None => Err(TransportError::Closed),
        }
    }
}

fn classify_read_error(err: std::io::Error, max: usize) -> TransportError {
    let oversized = err
        .get_ref()
        .is_some_and(|inner| inner.is::<LengthDelimitedCodecError>());
    if oversized {
        TransportError::InboundTooLarge { max }
    } else {
        TransportError::Io(err)
    }
}
