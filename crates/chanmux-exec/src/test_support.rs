//! In-memory runtime and connection helpers for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use chanmux_frame::Frame;
use chanmux_peer::MuxConnection;
use chanmux_transport::StreamConfig;
use tokio::sync::mpsc;

use crate::channel::Connection;
use crate::error::RuntimeError;
use crate::intent::CreateWorkload;
use crate::runtime::{ExecAttachment, ExecRequest, WorkloadRuntime};

/// The runtime side of one attached command.
pub(crate) struct MockSession {
    pub request: ExecRequest,
    pub output: mpsc::Sender<Bytes>,
    pub input: mpsc::Receiver<Bytes>,
}

pub(crate) struct MockRuntime {
    workload_id: String,
    create_error: Option<String>,
    statuses: Mutex<VecDeque<Result<String, String>>>,
    exec_error: Option<String>,
    stop_error: Option<String>,
    sessions_tx: mpsc::UnboundedSender<MockSession>,
    sessions: tokio::sync::Mutex<mpsc::UnboundedReceiver<MockSession>>,
    stopped: Mutex<Vec<String>>,
    inspect_calls: AtomicUsize,
    exec_calls: AtomicUsize,
}

impl MockRuntime {
    pub fn new() -> Self {
        let (sessions_tx, sessions) = mpsc::unbounded_channel();
        Self {
            workload_id: "w1".into(),
            create_error: None,
            statuses: Mutex::new(VecDeque::new()),
            exec_error: None,
            stop_error: None,
            sessions_tx,
            sessions: tokio::sync::Mutex::new(sessions),
            stopped: Mutex::new(Vec::new()),
            inspect_calls: AtomicUsize::new(0),
            exec_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_create_error(mut self, message: &str) -> Self {
        self.create_error = Some(message.into());
        self
    }

    /// Inspect results in order; the last one repeats. Defaults to "created".
    pub fn with_statuses(self, statuses: &[Result<&str, &str>]) -> Self {
        *self.statuses.lock().unwrap() = statuses
            .iter()
            .map(|s| s.map(str::to_string).map_err(str::to_string))
            .collect();
        self
    }

    pub fn with_exec_error(mut self, message: &str) -> Self {
        self.exec_error = Some(message.into());
        self
    }

    pub fn with_stop_error(mut self, message: &str) -> Self {
        self.stop_error = Some(message.into());
        self
    }

    /// Wait for the next successful `exec_attach`.
    pub async fn next_session(&self) -> MockSession {
        self.sessions
            .lock()
            .await
            .recv()
            .await
            .expect("runtime dropped")
    }

    pub fn inspect_calls(&self) -> usize {
        self.inspect_calls.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> Vec<String> {
        self.stopped.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkloadRuntime for MockRuntime {
    async fn create_workload(&self, _spec: &CreateWorkload) -> Result<String, RuntimeError> {
        match &self.create_error {
            Some(message) => Err(RuntimeError::Other(message.clone())),
            None => Ok(self.workload_id.clone()),
        }
    }

    async fn inspect(&self, workload_id: &str) -> Result<String, RuntimeError> {
        self.inspect_calls.fetch_add(1, Ordering::SeqCst);
        let mut statuses = self.statuses.lock().unwrap();
        let next = if statuses.len() > 1 {
            statuses.pop_front()
        } else {
            statuses.front().cloned()
        };
        match next {
            None => Ok("created".into()),
            Some(Ok(status)) => Ok(status),
            Some(Err(_)) => Err(RuntimeError::NotFound(workload_id.into())),
        }
    }

    async fn exec_attach(&self, request: &ExecRequest) -> Result<ExecAttachment, RuntimeError> {
        let n = self.exec_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(message) = &self.exec_error {
            return Err(RuntimeError::Other(message.clone()));
        }
        let (output_tx, output) = mpsc::channel(16);
        let (input, input_rx) = mpsc::channel(16);
        let _ = self.sessions_tx.send(MockSession {
            request: request.clone(),
            output: output_tx,
            input: input_rx,
        });
        Ok(ExecAttachment {
            exec_id: format!("exec-{n}"),
            output,
            input,
        })
    }

    async fn stop_workload(&self, workload_id: &str) -> Result<(), RuntimeError> {
        if let Some(message) = &self.stop_error {
            return Err(RuntimeError::Other(message.clone()));
        }
        self.stopped.lock().unwrap().push(workload_id.into());
        Ok(())
    }
}

/// A server-side connection and the client end talking to it.
pub(crate) fn connection_pair() -> (Arc<Connection>, MuxConnection<()>) {
    connection_pair_with(&StreamConfig::default())
}

pub(crate) fn connection_pair_with(config: &StreamConfig) -> (Arc<Connection>, MuxConnection<()>) {
    let (server, client) = tokio::io::duplex(64 * 1024);
    (
        Arc::new(MuxConnection::from_stream("test", server, config)),
        MuxConnection::from_stream("client", client, config),
    )
}

pub(crate) async fn next_frame(client: &MuxConnection<()>) -> Frame {
    client.receive().await.expect("frame from server")
}

/// Next frame with its payload parsed as JSON.
pub(crate) async fn next_json(client: &MuxConnection<()>) -> (String, String, serde_json::Value) {
    let frame = next_frame(client).await;
    let value = serde_json::from_slice(&frame.payload).expect("json payload");
    (frame.channel_id, frame.event_name, value)
}
