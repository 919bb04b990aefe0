//! A [`WorkloadRuntime`] backed by local processes.
//!
//! Meant for development and for exercising the CLI end to end. There are no
//! images, no isolation and no TTYs: a workload is the process started from
//! the create request's `command`, and every exec session is a sibling
//! process that inherits the workload's environment variables.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chanmux_exec::{
    CreateWorkload, ExecAttachment, ExecRequest, RuntimeError, WorkloadRuntime, STATUS_RUNNING,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Status reported once a workload process has exited.
pub const STATUS_EXITED: &str = "exited";

const READ_CHUNK: usize = 8 * 1024;
const STREAM_BUFFER: usize = 32;

struct LocalWorkload {
    child: Child,
    // Kept open so shells started as workloads do not see EOF and exit.
    _stdin: Option<ChildStdin>,
    env: Vec<(String, String)>,
    /// Cancelled when the workload stops; kills its exec sessions.
    sessions: CancellationToken,
}

/// Runs workloads and command sessions as child processes of this one.
#[derive(Default)]
pub struct LocalProcessRuntime {
    workloads: Mutex<HashMap<String, LocalWorkload>>,
    next_exec: AtomicU64,
}

impl LocalProcessRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids of the workloads currently tracked, sorted.
    pub async fn workload_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.workloads.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Kill every workload and its sessions.
    pub async fn shutdown(&self) {
        let workloads: Vec<(String, LocalWorkload)> =
            self.workloads.lock().await.drain().collect();
        for (workload_id, workload) in workloads {
            if let Err(err) = terminate(workload).await {
                warn!(%workload_id, error = %err, "failed to kill workload");
            }
        }
    }
}

impl std::fmt::Debug for LocalProcessRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalProcessRuntime").finish_non_exhaustive()
    }
}

#[async_trait]
impl WorkloadRuntime for LocalProcessRuntime {
    async fn create_workload(&self, spec: &CreateWorkload) -> Result<String, RuntimeError> {
        let mut workloads = self.workloads.lock().await;
        if let Some(id) = spec.workload_id() {
            if workloads.contains_key(id) {
                debug!(workload_id = id, "re-attaching to existing workload");
                return Ok(id.to_string());
            }
        }

        let env = parse_env(spec.env_vars());
        let (program, args) = split_command(spec.command())?;
        let mut child = Command::new(program)
            .args(args)
            .envs(env.iter().map(|(key, value)| (key.as_str(), value.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let workload_id = match spec.workload_id() {
            Some(id) => id.to_string(),
            None => format!("local-{}", &Uuid::new_v4().simple().to_string()[..12]),
        };
        info!(
            %workload_id,
            name = spec.name(),
            image = %spec.image_reference(),
            pid = ?child.id(),
            "started local workload"
        );

        let stdin = child.stdin.take();
        workloads.insert(
            workload_id.clone(),
            LocalWorkload {
                child,
                _stdin: stdin,
                env,
                sessions: CancellationToken::new(),
            },
        );
        Ok(workload_id)
    }

    async fn inspect(&self, workload_id: &str) -> Result<String, RuntimeError> {
        let mut workloads = self.workloads.lock().await;
        let workload = workloads
            .get_mut(workload_id)
            .ok_or_else(|| RuntimeError::NotFound(workload_id.to_string()))?;

        match workload.child.try_wait()? {
            None => Ok(STATUS_RUNNING.to_string()),
            Some(status) => {
                debug!(workload_id, %status, "workload process has exited");
                Ok(STATUS_EXITED.to_string())
            }
        }
    }

    async fn exec_attach(&self, request: &ExecRequest) -> Result<ExecAttachment, RuntimeError> {
        let (env, stop) = {
            let mut workloads = self.workloads.lock().await;
            let workload = workloads
                .get_mut(&request.workload_id)
                .ok_or_else(|| RuntimeError::NotFound(request.workload_id.clone()))?;
            if workload.child.try_wait()?.is_some() {
                return Err(RuntimeError::Other(format!(
                    "workload {} is not running",
                    request.workload_id
                )));
            }
            (workload.env.clone(), workload.sessions.child_token())
        };

        if request.use_tty {
            debug!(workload_id = %request.workload_id, "no tty for local sessions, using pipes");
        }
        let stdin = if request.interactive {
            Stdio::piped()
        } else {
            Stdio::null()
        };
        let (program, args) = split_command(&request.command)?;
        let mut child = Command::new(program)
            .args(args)
            .envs(env)
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let exec_id = format!("exec-{}", self.next_exec.fetch_add(1, Ordering::Relaxed) + 1);
        debug!(
            workload_id = %request.workload_id,
            %exec_id,
            pid = ?child.id(),
            "started exec session"
        );

        let (output_tx, output) = mpsc::channel(STREAM_BUFFER);
        let (input, input_rx) = mpsc::channel(STREAM_BUFFER);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump_output(stdout, output_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_output(stderr, output_tx));
        }
        if let Some(child_stdin) = child.stdin.take() {
            tokio::spawn(pump_input(input_rx, child_stdin));
        }
        tokio::spawn(reap(exec_id.clone(), child, stop));

        Ok(ExecAttachment {
            exec_id,
            output,
            input,
        })
    }

    async fn stop_workload(&self, workload_id: &str) -> Result<(), RuntimeError> {
        let workload = self
            .workloads
            .lock()
            .await
            .remove(workload_id)
            .ok_or_else(|| RuntimeError::NotFound(workload_id.to_string()))?;
        terminate(workload).await?;
        info!(workload_id, "stopped local workload");
        Ok(())
    }
}

async fn terminate(mut workload: LocalWorkload) -> std::io::Result<()> {
    workload.sessions.cancel();
    if workload.child.try_wait()?.is_none() {
        workload.child.kill().await?;
    }
    Ok(())
}

fn split_command(command: &[String]) -> Result<(&String, &[String]), RuntimeError> {
    command
        .split_first()
        .ok_or_else(|| RuntimeError::Other("command cannot be empty".to_string()))
}

/// `KEY=VALUE` pairs; entries without `=` are skipped.
fn parse_env(vars: &[String]) -> Vec<(String, String)> {
    vars.iter()
        .filter_map(|var| match var.split_once('=') {
            Some((key, value)) if !key.is_empty() => Some((key.to_string(), value.to_string())),
            _ => {
                warn!(entry = %var, "ignoring malformed environment entry");
                None
            }
        })
        .collect()
}

async fn pump_output<R>(mut reader: R, output: mpsc::Sender<Bytes>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    loop {
        buf.reserve(READ_CHUNK);
        match reader.read_buf(&mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if output.send(buf.split().freeze()).await.is_err() {
                    break;
                }
            }
            Err(err) => {
                debug!(error = %err, "exec output read failed");
                break;
            }
        }
    }
}

async fn pump_input(mut input: mpsc::Receiver<Bytes>, mut stdin: ChildStdin) {
    while let Some(chunk) = input.recv().await {
        if let Err(err) = stdin.write_all(&chunk).await {
            debug!(error = %err, "exec input write failed");
            break;
        }
        if stdin.flush().await.is_err() {
            break;
        }
    }
}

/// Wait for an exec process, killing it if its workload stops first.
async fn reap(exec_id: String, mut child: Child, stop: CancellationToken) {
    let stopped = tokio::select! {
        status = child.wait() => {
            match status {
                Ok(status) => debug!(%exec_id, %status, "exec session exited"),
                Err(err) => warn!(%exec_id, error = %err, "waiting for exec session failed"),
            }
            false
        }
        _ = stop.cancelled() => true,
    };

    if stopped {
        if let Err(err) = child.kill().await {
            warn!(%exec_id, error = %err, "failed to kill exec session");
        }
    }
}
