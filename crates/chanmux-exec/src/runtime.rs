use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::RuntimeError;
use crate::intent::CreateWorkload;

/// Status string a runtime reports for a workload that is up.
pub const STATUS_RUNNING: &str = "running";

/// Parameters of one command session inside a workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub workload_id: String,
    pub command: Vec<String>,
    /// Keep stdin open for session input.
    pub interactive: bool,
    pub use_tty: bool,
}

/// The live streams of an attached command.
///
/// `output` yields what the command writes and ends when the command's output
/// ends. Dropping `input` closes the command's stdin.
#[derive(Debug)]
pub struct ExecAttachment {
    /// Opaque id assigned by the runtime.
    pub exec_id: String,
    pub output: mpsc::Receiver<Bytes>,
    pub input: mpsc::Sender<Bytes>,
}

/// The engine that actually runs workloads.
#[async_trait]
pub trait WorkloadRuntime: Send + Sync {
    /// Create and start a workload, returning its id.
    async fn create_workload(&self, spec: &CreateWorkload) -> Result<String, RuntimeError>;

    /// Current status of a workload, e.g. [`STATUS_RUNNING`].
    async fn inspect(&self, workload_id: &str) -> Result<String, RuntimeError>;

    /// Start a command inside a workload and attach to its streams.
    async fn exec_attach(&self, request: &ExecRequest) -> Result<ExecAttachment, RuntimeError>;

    async fn stop_workload(&self, workload_id: &str) -> Result<(), RuntimeError>;
}
