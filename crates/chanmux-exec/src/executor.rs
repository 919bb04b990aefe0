use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use chanmux_frame::events;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::channel::{Channel, Connection};
use crate::conduit::{Conduit, ControlSignal, RelayEnds};
use crate::error::ExecutorError;
use crate::intent::{
    CreateWorkload, ExecuteCommand, Intent, StopWorkload, SyncFile, WaitForWorkload,
};
use crate::response::{
    CommandStatus, CommandStatusResponse, FileStatus, FileStatusResponse, WorkloadStatus,
    WorkloadStatusResponse,
};
use crate::runtime::{ExecAttachment, ExecRequest, WorkloadRuntime, STATUS_RUNNING};

/// Default intent queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1;
/// Default interval between workload inspections.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);
/// Default time to wait for a workload to report running.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(15);
/// Default buffer size of a session's control path.
pub const DEFAULT_CONDUIT_CAPACITY: usize = 64;
/// Default cap on output gathered for one reply: 8 MiB.
pub const DEFAULT_MAX_OUTPUT: usize = 8 * 1024 * 1024;

/// Executor tuning.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Intents buffered before the read loop blocks.
    pub queue_capacity: usize,
    pub poll_interval: Duration,
    /// Used when a wait request carries no timeout.
    pub default_wait_timeout: Duration,
    pub conduit_capacity: usize,
    /// Most bytes a non-interactive session or file read may return.
    pub max_output_size: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            poll_interval: DEFAULT_POLL_INTERVAL,
            default_wait_timeout: DEFAULT_WAIT_TIMEOUT,
            conduit_capacity: DEFAULT_CONDUIT_CAPACITY,
            max_output_size: DEFAULT_MAX_OUTPUT,
        }
    }
}

/// Runs intents against a workload runtime.
///
/// Intents go through a bounded queue to a single draining task, which runs
/// the short part of every saga in arrival order. Long-running parts (waiting
/// for a workload, relaying a session, transferring a file) are spawned on the
/// connection's task tracker. Dropping the executor closes the queue.
#[derive(Debug)]
pub struct CommandExecutor {
    queue: mpsc::Sender<Intent>,
    cancel: CancellationToken,
}

impl CommandExecutor {
    /// Start the draining task on `tracker`.
    pub fn spawn(
        conn: Arc<Connection>,
        runtime: Arc<dyn WorkloadRuntime>,
        config: ExecutorConfig,
        cancel: CancellationToken,
        tracker: &TaskTracker,
    ) -> Self {
        let (queue, intents) = mpsc::channel(config.queue_capacity.max(1));
        let sagas = Sagas {
            conn,
            runtime,
            config: Arc::new(config),
            cancel: cancel.clone(),
            tracker: tracker.clone(),
        };
        tracker.spawn(sagas.drain(intents));
        Self { queue, cancel }
    }

    /// Enqueue one intent, waiting while the queue is full.
    pub async fn submit(&self, intent: Intent) -> Result<(), ExecutorError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(ExecutorError::QueueClosed),
            sent = self.queue.send(intent) => sent.map_err(|_| ExecutorError::QueueClosed),
        }
    }

    /// Enqueue intents in order.
    pub async fn dispatch(&self, intents: Vec<Intent>) -> Result<(), ExecutorError> {
        for intent in intents {
            self.submit(intent).await?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Session {
    workload_id: String,
    session_id: String,
    exec_id: String,
}

#[derive(Clone)]
struct Sagas {
    conn: Arc<Connection>,
    runtime: Arc<dyn WorkloadRuntime>,
    config: Arc<ExecutorConfig>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl Sagas {
    async fn drain(self, mut intents: mpsc::Receiver<Intent>) {
        loop {
            let intent = tokio::select! {
                _ = self.cancel.cancelled() => break,
                intent = intents.recv() => match intent {
                    Some(intent) => intent,
                    None => break,
                },
            };
            debug!(connection = %self.conn.id(), intent = intent.kind(), "handling intent");

            match intent {
                Intent::CreateWorkload(create) => self.create_workload(create).await,
                Intent::ExecuteCommand(exec) => self.execute_command(exec).await,
                Intent::SyncFile(sync) => self.sync_file(sync).await,
                Intent::WaitForWorkload(wait) => {
                    self.tracker.spawn(self.clone().wait_for_workload(wait));
                }
                Intent::StopWorkload(stop) => self.stop_workload(stop).await,
            }
        }
        debug!(connection = %self.conn.id(), "intent queue closed");
    }

    /// `None` when the connection is torn down first.
    async fn until_cancelled<T>(&self, fut: impl Future<Output = T>) -> Option<T> {
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            out = fut => Some(out),
        }
    }

    async fn create_workload(&self, intent: CreateWorkload) {
        let origin = intent.origin_channel_id();
        let hash = intent.correlation_hash();
        info!(
            name = intent.name(),
            image = %intent.image_reference(),
            hash,
            "creating workload"
        );

        let Some(created) = self
            .until_cancelled(self.runtime.create_workload(&intent))
            .await
        else {
            return;
        };
        let workload_id = match created {
            Ok(id) if !id.is_empty() => id,
            Ok(_) => {
                warn!(name = intent.name(), "runtime returned an empty workload id");
                self.workload_status(origin, "", hash, WorkloadStatus::Failed).await;
                return;
            }
            Err(err) => {
                warn!(name = intent.name(), error = %err, "workload creation failed");
                self.workload_status(origin, "", hash, WorkloadStatus::Failed).await;
                return;
            }
        };

        if let Err(err) = self
            .conn
            .register_channel(workload_id.clone(), Channel::workload(&workload_id))
        {
            warn!(%workload_id, error = %err, "cannot register workload channel");
            self.workload_status(origin, &workload_id, hash, WorkloadStatus::Failed)
                .await;
            return;
        }

        info!(%workload_id, "workload pending");
        self.workload_status(origin, &workload_id, hash, WorkloadStatus::Pending)
            .await;

        match WaitForWorkload::try_new(origin, &workload_id, hash, None) {
            Ok(wait) => {
                self.tracker.spawn(self.clone().wait_for_workload(wait));
            }
            Err(err) => {
                warn!(%workload_id, error = %err, "cannot wait for workload");
                self.workload_status(origin, &workload_id, hash, WorkloadStatus::Error)
                    .await;
            }
        }
    }

    /// Inspect until running, an inspect error, or the timeout; then report once.
    async fn wait_for_workload(self, intent: WaitForWorkload) {
        let workload_id = intent.workload_id();
        let timeout = intent.timeout().unwrap_or(self.config.default_wait_timeout);
        let interval = self.config.poll_interval;
        let mut polls: u32 = 0;

        let status = loop {
            let Some(inspected) = self.until_cancelled(self.runtime.inspect(workload_id)).await
            else {
                debug!(workload_id, "wait cancelled");
                return;
            };
            match inspected {
                Err(err) => {
                    warn!(workload_id, error = %err, "inspect failed");
                    break WorkloadStatus::Error;
                }
                Ok(reported) => {
                    polls = polls.saturating_add(1);
                    if interval.saturating_mul(polls) > timeout {
                        break WorkloadStatus::TimedOut;
                    }
                    if reported == STATUS_RUNNING {
                        break WorkloadStatus::Running;
                    }
                    debug!(workload_id, status = %reported, polls, "workload not running yet");
                }
            }
            if self.until_cancelled(sleep(interval)).await.is_none() {
                debug!(workload_id, "wait cancelled");
                return;
            }
        };

        info!(workload_id, ?status, polls, "wait finished");
        self.workload_status(
            intent.origin_channel_id(),
            workload_id,
            intent.correlation_hash(),
            status,
        )
        .await;
    }

    async fn execute_command(&self, intent: ExecuteCommand) {
        let mut session = Session {
            workload_id: intent.workload_id().to_string(),
            session_id: intent.session_id().to_string(),
            exec_id: String::new(),
        };
        let request = ExecRequest {
            workload_id: session.workload_id.clone(),
            command: intent.command().to_vec(),
            interactive: intent.interactive(),
            use_tty: intent.use_tty(),
        };

        let Some(attached) = self.until_cancelled(self.runtime.exec_attach(&request)).await
        else {
            return;
        };
        let attachment = match attached {
            Ok(attachment) => attachment,
            Err(err) => {
                warn!(
                    workload_id = %session.workload_id,
                    session_id = %session.session_id,
                    error = %err,
                    "exec attach failed"
                );
                self.command_status(&session, CommandStatus::Failed, Some(err.to_string()))
                    .await;
                return;
            }
        };

        let conduit = Arc::new(Conduit::new(
            session.session_id.as_str(),
            attachment,
            self.config.conduit_capacity,
        ));
        session.exec_id = conduit.exec_id().to_string();
        let Some(ends) = conduit.take_relay() else {
            return;
        };

        let channel = Channel::command(session.workload_id.as_str(), conduit);
        if let Err(err) = self.conn.register_channel(session.session_id.as_str(), channel) {
            warn!(session_id = %session.session_id, error = %err, "cannot register session channel");
            self.command_status(&session, CommandStatus::Failed, Some(err.to_string()))
                .await;
            return;
        }

        info!(
            workload_id = %session.workload_id,
            session_id = %session.session_id,
            exec_id = %session.exec_id,
            interactive = intent.interactive(),
            "command session attached"
        );
        self.command_status(&session, CommandStatus::Success, None)
            .await;

        let deadline = intent.timeout().map(|timeout| Instant::now() + timeout);
        if intent.interactive() {
            self.tracker
                .spawn(self.clone().relay_session(session, ends, deadline));
        } else {
            self.tracker
                .spawn(self.clone().collect_session(session, ends, deadline));
        }
    }

    /// Forward output as it arrives until the session ends.
    async fn relay_session(self, session: Session, mut ends: RelayEnds, deadline: Option<Instant>) {
        let expiry = session_deadline(deadline);
        tokio::pin!(expiry);

        let status = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!(session_id = %session.session_id, "relay cancelled");
                    return;
                }
                output = ends.output.recv() => match output {
                    Some(data) => {
                        self.send_frame(&session.session_id, events::SESSION_OUTPUT, &data)
                            .await;
                    }
                    None => break CommandStatus::Stopped,
                },
                signal = ends.control.recv() => match signal {
                    Some(ControlSignal::Quit) | None => break CommandStatus::Stopped,
                    Some(ControlSignal::Other(signal)) => {
                        debug!(session_id = %session.session_id, %signal, "ignoring control signal");
                    }
                },
                _ = &mut expiry => break CommandStatus::TimedOut,
            }
        };

        // Output queued before the session ended still goes out first.
        while let Ok(data) = ends.output.try_recv() {
            if !self
                .send_frame(&session.session_id, events::SESSION_OUTPUT, &data)
                .await
            {
                break;
            }
        }
        self.finish_session(&session, status, None).await;
    }

    /// Gather all output, send it once, then report completion.
    ///
    /// Output past `max_output_size` is cut off and the session fails.
    async fn collect_session(self, session: Session, mut ends: RelayEnds, deadline: Option<Instant>) {
        let expiry = session_deadline(deadline);
        tokio::pin!(expiry);
        let limit = self.config.max_output_size;
        let mut collected = OutputBuffer::new(limit);

        let (mut status, mut reason) = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                output = ends.output.recv() => match output {
                    Some(data) => {
                        if !collected.push(&data) {
                            warn!(session_id = %session.session_id, limit, "session output truncated");
                            break (CommandStatus::Failed, Some(output_limit_reason(limit)));
                        }
                    }
                    None => break (CommandStatus::Completed, None),
                },
                signal = ends.control.recv() => match signal {
                    Some(ControlSignal::Quit) | None => break (CommandStatus::Stopped, None),
                    Some(ControlSignal::Other(_)) => {}
                },
                _ = &mut expiry => break (CommandStatus::TimedOut, None),
            }
        };
        drop(ends);

        if !self
            .send_frame(&session.session_id, events::SESSION_OUTPUT, collected.as_ref())
            .await
        {
            if self.cancel.is_cancelled() {
                return;
            }
            status = CommandStatus::Failed;
            reason = Some("session output could not be delivered".to_string());
        }
        self.finish_session(&session, status, reason).await;
    }

    async fn finish_session(&self, session: &Session, status: CommandStatus, reason: Option<String>) {
        if let Err(err) = self.conn.deregister_channel(&session.session_id) {
            debug!(session_id = %session.session_id, error = %err, "session channel already gone");
        }
        info!(
            workload_id = %session.workload_id,
            session_id = %session.session_id,
            ?status,
            "command session ended"
        );
        self.command_status(session, status, reason).await;
    }

    async fn sync_file(&self, intent: SyncFile) {
        let request = ExecRequest {
            workload_id: intent.workload_id().to_string(),
            command: intent.command(),
            interactive: intent.content().is_some(),
            use_tty: false,
        };
        let Some(attached) = self.until_cancelled(self.runtime.exec_attach(&request)).await
        else {
            return;
        };
        match attached {
            Ok(attachment) => {
                self.tracker
                    .spawn(self.clone().transfer_file(intent, attachment));
            }
            Err(err) => {
                warn!(path = intent.file_path(), error = %err, "file sync attach failed");
                self.file_status(&intent, FileStatus::Failed, None, Some(err.to_string()))
                    .await;
            }
        }
    }

    async fn transfer_file(self, intent: SyncFile, attachment: ExecAttachment) {
        let ExecAttachment {
            exec_id,
            mut output,
            input,
        } = attachment;

        if let Some(content) = intent.content() {
            let data = Bytes::copy_from_slice(content.as_bytes());
            match self.until_cancelled(input.send(data)).await {
                None => return,
                Some(Ok(())) => {}
                Some(Err(_)) => {
                    let reason = "workload closed the file stream".to_string();
                    self.file_status(&intent, FileStatus::Failed, None, Some(reason))
                        .await;
                    return;
                }
            }
        }
        drop(input);

        let limit = self.config.max_output_size;
        let mut collected = OutputBuffer::new(limit);
        loop {
            let Some(chunk) = self.until_cancelled(output.recv()).await else {
                return;
            };
            match chunk {
                Some(data) => {
                    if !collected.push(&data) {
                        warn!(%exec_id, path = intent.file_path(), limit, "file sync output too large");
                        let reason = output_limit_reason(limit);
                        self.file_status(&intent, FileStatus::Failed, None, Some(reason))
                            .await;
                        return;
                    }
                }
                None => break,
            }
        }
        drop(output);

        debug!(%exec_id, path = intent.file_path(), size = collected.len(), "file sync finished");
        let content = intent
            .content()
            .is_none()
            .then(|| String::from_utf8_lossy(collected.as_ref()).into_owned());
        if self
            .file_status(&intent, FileStatus::Success, content, None)
            .await
            || self.cancel.is_cancelled()
        {
            return;
        }
        let reason = "file content does not fit in one message".to_string();
        self.file_status(&intent, FileStatus::Failed, None, Some(reason))
            .await;
    }

    async fn stop_workload(&self, intent: StopWorkload) {
        let workload_id = intent.workload_id();
        let Some(stopped) = self
            .until_cancelled(self.runtime.stop_workload(workload_id))
            .await
        else {
            return;
        };

        let status = match stopped {
            Ok(()) => {
                let removed = self
                    .conn
                    .registry()
                    .deregister_where(|_, channel| channel.workload_id() == Some(workload_id));
                info!(workload_id, channels = removed.len(), "workload stopped");
                WorkloadStatus::Stopped
            }
            Err(err) => {
                warn!(workload_id, error = %err, "workload stop failed");
                WorkloadStatus::Error
            }
        };
        self.workload_status(
            intent.origin_channel_id(),
            workload_id,
            intent.correlation_hash(),
            status,
        )
        .await;
    }

    async fn workload_status(&self, channel_id: &str, id: &str, hash: &str, status: WorkloadStatus) {
        let body = WorkloadStatusResponse {
            id: id.to_string(),
            hash: hash.to_string(),
            status,
        };
        self.emit(channel_id, events::WORKLOAD_STATUS, &body).await;
    }

    async fn command_status(&self, session: &Session, status: CommandStatus, reason: Option<String>) {
        let body = CommandStatusResponse {
            exec_id: session.exec_id.clone(),
            cell_id: session.session_id.clone(),
            status,
            reason,
        };
        self.emit(&session.workload_id, events::WORKLOAD_COMMAND_STATUS, &body)
            .await;
    }

    async fn file_status(
        &self,
        intent: &SyncFile,
        status: FileStatus,
        content: Option<String>,
        reason: Option<String>,
    ) -> bool {
        let body = FileStatusResponse {
            cell_id: intent.session_id().to_string(),
            path: intent.file_path().to_string(),
            status,
            content,
            reason,
        };
        self.emit(intent.workload_id(), events::WORKLOAD_FILE_STATUS, &body)
            .await
    }

    /// Send one JSON event. `false` if it was not written.
    async fn emit<T: Serialize>(&self, channel_id: &str, event_name: &str, body: &T) -> bool {
        match self
            .until_cancelled(self.conn.send_json(channel_id, event_name, body))
            .await
        {
            Some(Ok(())) => true,
            Some(Err(err)) => {
                warn!(connection = %self.conn.id(), channel_id, event_name, error = %err, "failed to emit event");
                false
            }
            None => false,
        }
    }

    async fn send_frame(&self, channel_id: &str, event_name: &str, payload: &[u8]) -> bool {
        match self
            .until_cancelled(self.conn.send(channel_id, event_name, payload))
            .await
        {
            Some(Ok(())) => true,
            Some(Err(err)) => {
                warn!(connection = %self.conn.id(), channel_id, event_name, error = %err, "failed to send frame");
                false
            }
            None => false,
        }
    }
}

/// Output gathered for a single reply, capped at a byte limit.
struct OutputBuffer {
    data: BytesMut,
    limit: usize,
}

impl OutputBuffer {
    fn new(limit: usize) -> Self {
        Self {
            data: BytesMut::new(),
            limit,
        }
    }

    /// Append up to the limit. `false` once anything had to be dropped.
    fn push(&mut self, chunk: &[u8]) -> bool {
        let room = self.limit.saturating_sub(self.data.len());
        let taken = chunk.len().min(room);
        self.data.extend_from_slice(&chunk[..taken]);
        taken == chunk.len()
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}

impl AsRef<[u8]> for OutputBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

fn output_limit_reason(limit: usize) -> String {
    format!("output exceeds {limit} bytes")
}

async fn session_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
