//! Named-channel multiplexing with workload command sessions.
//!
//! One duplex connection carries many named channels. Frames address a
//! channel by id and name an event; channels turn events into validated
//! intents, and an executor runs each intent against a workload runtime and
//! reports status back on the same connection.
//!
//! # Crate Structure
//!
//! - [`transport`]: Length-delimited message transports (Unix sockets, any byte stream)
//! - [`frame`]: The `(channel id, event name, payload)` frame codec and event names
//! - [`peer`]: Multiplexed connections and the channel registry (behind `peer` feature)
//! - [`exec`]: Channels, intents, conduits and the saga executor (behind `exec` feature)
//! - [`local_runtime`]: A workload runtime backed by local processes (behind `local-runtime` feature)

/// Re-export transport types.
pub mod transport {
    pub use chanmux_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use chanmux_frame::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use chanmux_peer::*;
}

/// Re-export executor types (requires `exec` feature).
#[cfg(feature = "exec")]
pub mod exec {
    pub use chanmux_exec::*;
}

#[cfg(feature = "local-runtime")]
pub mod local_runtime;
