use std::sync::Arc;
use std::time::Duration;

use chanmux_frame::events::DEFAULT_ROOT_CHANNEL;
use chanmux_frame::Frame;
use chanmux_peer::PeerError;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::channel::{Channel, Connection};
use crate::executor::{CommandExecutor, ExecutorConfig};
use crate::response::ErrorResponse;
use crate::runtime::WorkloadRuntime;

/// How long teardown waits for buffered frames to reach the peer.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Per-connection settings.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Id of the root channel registered when the connection starts.
    pub root_channel_id: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            root_channel_id: DEFAULT_ROOT_CHANNEL.to_string(),
        }
    }
}

/// Drives one connection: reads frames, hands them to channels, feeds the
/// resulting intents to an executor, and tears everything down at the end.
pub struct ConnectionHandler {
    conn: Arc<Connection>,
    runtime: Arc<dyn WorkloadRuntime>,
    config: DispatchConfig,
    executor_config: ExecutorConfig,
    cancel: CancellationToken,
}

impl ConnectionHandler {
    pub fn new(conn: Arc<Connection>, runtime: Arc<dyn WorkloadRuntime>) -> Self {
        Self {
            conn,
            runtime,
            config: DispatchConfig::default(),
            executor_config: ExecutorConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_executor_config(mut self, config: ExecutorConfig) -> Self {
        self.executor_config = config;
        self
    }

    /// End this connection when `parent` is cancelled.
    pub fn with_parent_token(mut self, parent: &CancellationToken) -> Self {
        self.cancel = parent.child_token();
        self
    }

    /// Token that tears this connection down when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Serve the connection until the peer leaves, a transport or frame error
    /// occurs, or the handler is cancelled.
    ///
    /// A clean disconnect or cancellation returns `Ok(())`. In every case all
    /// spawned tasks have finished and the registry is empty on return.
    pub async fn run(self) -> Result<(), PeerError> {
        let root_id = self.config.root_channel_id.clone();
        self.conn
            .register_channel(root_id.clone(), Channel::root(&root_id))?;
        info!(connection = %self.conn.id(), root = %root_id, "connection ready");

        let tracker = TaskTracker::new();
        let executor = CommandExecutor::spawn(
            Arc::clone(&self.conn),
            Arc::clone(&self.runtime),
            self.executor_config.clone(),
            self.cancel.clone(),
            &tracker,
        );

        let result = self.read_loop(&executor).await;
        self.teardown(executor, tracker).await;
        result
    }

    async fn read_loop(&self, executor: &CommandExecutor) -> Result<(), PeerError> {
        loop {
            let received = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                received = self.conn.receive() => received,
            };
            let Frame {
                channel_id,
                event_name,
                payload,
            } = match received {
                Ok(frame) => frame,
                Err(err) if err.is_disconnect() => {
                    info!(connection = %self.conn.id(), "peer disconnected");
                    return Ok(());
                }
                Err(err) => {
                    warn!(connection = %self.conn.id(), error = %err, "read loop failed");
                    return Err(err);
                }
            };

            let channel = match self.conn.get_channel_by_id(&channel_id) {
                Ok(channel) => channel,
                Err(err) => {
                    warn!(%channel_id, %event_name, "frame for unknown channel");
                    self.reply_error(&channel_id, &event_name, err.to_string())
                        .await;
                    continue;
                }
            };

            let handled = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                handled = channel.handle(&event_name, payload) => handled,
            };
            match handled {
                Ok(intents) => {
                    if executor.dispatch(intents).await.is_err() {
                        debug!(connection = %self.conn.id(), "executor stopped accepting intents");
                        return Ok(());
                    }
                }
                Err(err) => {
                    warn!(
                        %channel_id,
                        channel_kind = channel.kind(),
                        %event_name,
                        error = %err,
                        "cannot handle event"
                    );
                    self.reply_error(&channel_id, &event_name, err.to_string())
                        .await;
                }
            }
        }
    }

    async fn reply_error(&self, channel_id: &str, event_name: &str, error: String) {
        let body = ErrorResponse { error };
        let sent = tokio::select! {
            _ = self.cancel.cancelled() => return,
            sent = self.conn.send_json(channel_id, event_name, &body) => sent,
        };
        if let Err(err) = sent {
            warn!(channel_id, event_name, error = %err, "failed to write error reply");
        }
    }

    async fn teardown(&self, executor: CommandExecutor, tracker: TaskTracker) {
        self.cancel.cancel();
        drop(executor);
        tracker.close();
        tracker.wait().await;

        // A peer that stopped reading can hold the flush forever.
        let drained = self.conn.registry().drain();
        match tokio::time::timeout(CLOSE_GRACE, self.conn.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                debug!(connection = %self.conn.id(), error = %err, "close after teardown failed");
            }
            Err(_) => {
                debug!(connection = %self.conn.id(), "peer did not drain before close");
            }
        }
        info!(
            connection = %self.conn.id(),
            channels = drained.len(),
            "connection torn down"
        );
    }
}
