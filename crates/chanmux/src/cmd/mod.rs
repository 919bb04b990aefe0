use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod send;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept connections and run workloads as local processes.
    Serve(ServeArgs),
    /// Send a single frame and optionally print the replies.
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub async fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args).await,
        Command::Send(args) => send::run(args, format).await,
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    /// Id of the root channel registered on every connection.
    #[arg(long, env = "CHANMUX_ROOT_CHANNEL", default_value = "root")]
    pub root_channel: String,
    /// Capacity of each connection's intent queue.
    #[arg(long, env = "CHANMUX_QUEUE_CAPACITY", default_value_t = 1)]
    pub queue_capacity: usize,
    /// Delay between workload status checks (e.g. 3s, 500ms).
    #[arg(long, env = "CHANMUX_POLL_INTERVAL", default_value = "3s")]
    pub poll_interval: String,
    /// How long to wait for a workload to report running when no timeout is given.
    #[arg(long, env = "CHANMUX_WAIT_TIMEOUT", default_value = "15s")]
    pub wait_timeout: String,
    /// Largest transport message accepted or sent, in bytes.
    #[arg(long, env = "CHANMUX_MAX_MESSAGE_SIZE", default_value_t = chanmux_transport::DEFAULT_MAX_MESSAGE)]
    pub max_message_size: usize,
    /// Stop accepting after N connections and exit once they end.
    #[arg(long)]
    pub max_connections: Option<usize>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Socket path to connect to.
    pub path: PathBuf,
    /// Channel id to address.
    #[arg(long, short = 'c', default_value = "root")]
    pub channel: String,
    /// Event name.
    #[arg(long, short = 'e')]
    pub event: String,
    /// JSON payload.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub json: Option<String>,
    /// Raw string payload.
    #[arg(long, conflicts_with_all = ["json", "file"])]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with_all = ["json", "data"])]
    pub file: Option<PathBuf>,
    /// Wait for N frames from any channel and print them.
    #[arg(long, default_value_t = 0)]
    pub wait: usize,
    /// Maximum time to wait for each frame when --wait is set (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `250ms`, `3s`, `2m`, or a bare number of seconds. Zero is rejected.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    let unit_start = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (digits, unit) = input.split_at(unit_start);
    let value: u64 = digits
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration: {input:?}")))?;

    let duration = match unit {
        "" | "s" => Duration::from_secs(value),
        "ms" => Duration::from_millis(value),
        "m" => Duration::from_secs(value.saturating_mul(60)),
        other => {
            return Err(CliError::new(
                USAGE,
                format!("unsupported duration unit {other:?} in {input:?}"),
            ))
        }
    };
    if duration.is_zero() {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }
    Ok(duration)
}
