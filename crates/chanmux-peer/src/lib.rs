//! Multiplexed connections over one message transport.
//!
//! A [`MuxConnection`] carries any number of named channels. It encodes and
//! decodes frames and keeps the per-connection [`ChannelRegistry`]; what a
//! channel does with an event is decided one layer up.

pub mod connection;
#[cfg(unix)]
pub mod connector;
pub mod error;
#[cfg(unix)]
pub mod listener;
pub mod registry;

pub use connection::MuxConnection;
#[cfg(unix)]
pub use connector::{connect, connect_with_config};
pub use error::{PeerError, Result};
#[cfg(unix)]
pub use listener::MuxListener;
pub use registry::ChannelRegistry;
