//! Message-oriented duplex transports.
//!
//! The multiplexing layer above this crate needs one thing from the wire:
//! whole messages, delivered in order, with their boundaries intact. This
//! crate provides that over any byte stream by prefixing each message with a
//! 4-byte little-endian length:
//!
//! - [`MessageSender`] / [`MessageReceiver`]: the two halves every
//!   connection is built from
//! - [`split_stream`]: turns an `AsyncRead + AsyncWrite` stream into both
//!   halves
//! - [`UnixDomainSocket`]: listener/connector for filesystem Unix sockets

pub mod error;
pub mod stream;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use stream::{split_stream, StreamConfig, StreamReceiver, StreamSender, DEFAULT_MAX_MESSAGE};
pub use traits::{MessageReceiver, MessageSender};

#[cfg(unix)]
pub use uds::UnixDomainSocket;
