//! Channels, intents and the saga executor behind a chanmux connection.
//!
//! Frames arriving on a [`Connection`] are routed to a [`Channel`] by id.
//! Root and workload channels turn events into validated [`Intent`]s; command
//! channels feed a live session's [`Conduit`]. The [`CommandExecutor`] runs
//! each intent as a saga against a [`WorkloadRuntime`] and reports status
//! back over the same connection. [`ConnectionHandler`] wires it all up for
//! one connection.

pub mod channel;
pub mod conduit;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod intent;
pub mod response;
pub mod runtime;

#[cfg(test)]
mod test_support;

pub use channel::{Channel, Connection};
pub use conduit::{Conduit, ControlSignal, RelayEnds};
pub use dispatch::{ConnectionHandler, DispatchConfig};
pub use error::{ChannelError, ExecutorError, FieldIssue, RuntimeError, ValidationError};
pub use executor::{CommandExecutor, ExecutorConfig};
pub use intent::{
    CreateWorkload, CreateWorkloadRequest, ExecuteCommand, ExecuteCommandRequest, Intent,
    NetworkOptions, StopRequest, StopWorkload, SyncFile, SyncFileRequest, WaitForWorkload,
    WaitRequest,
};
pub use response::{
    CommandStatus, CommandStatusResponse, ErrorResponse, FileStatus, FileStatusResponse,
    WorkloadStatus, WorkloadStatusResponse,
};
pub use runtime::{ExecAttachment, ExecRequest, WorkloadRuntime, STATUS_RUNNING};
