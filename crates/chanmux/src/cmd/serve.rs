use std::sync::Arc;

use chanmux::local_runtime::LocalProcessRuntime;
use chanmux_exec::{
    Channel, ConnectionHandler, DispatchConfig, ExecutorConfig, WorkloadRuntime,
};
use chanmux_peer::MuxListener;
use chanmux_transport::StreamConfig;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::cmd::{parse_duration, ServeArgs};
use crate::exit::{peer_error, CliError, CliResult, SUCCESS, USAGE};

struct ServeSettings {
    stream: StreamConfig,
    dispatch: DispatchConfig,
    executor: ExecutorConfig,
}

fn settings(args: &ServeArgs) -> CliResult<ServeSettings> {
    if args.root_channel.is_empty() || args.root_channel.len() > chanmux_frame::MAX_FIELD_LEN {
        return Err(CliError::new(
            USAGE,
            format!(
                "--root-channel must be 1 to {} bytes",
                chanmux_frame::MAX_FIELD_LEN
            ),
        ));
    }
    if args.queue_capacity == 0 {
        return Err(CliError::new(USAGE, "--queue-capacity must be at least 1"));
    }
    if args.max_message_size < chanmux_frame::HEADER_SIZE {
        return Err(CliError::new(
            USAGE,
            format!(
                "--max-message-size must be at least {} bytes",
                chanmux_frame::HEADER_SIZE
            ),
        ));
    }

    Ok(ServeSettings {
        stream: StreamConfig {
            max_message_size: args.max_message_size,
        },
        dispatch: DispatchConfig {
            root_channel_id: args.root_channel.clone(),
        },
        executor: ExecutorConfig {
            queue_capacity: args.queue_capacity,
            poll_interval: parse_duration(&args.poll_interval)?,
            default_wait_timeout: parse_duration(&args.wait_timeout)?,
            // Half the message limit leaves room for JSON escaping and headers.
            max_output_size: args.max_message_size / 2,
            ..ExecutorConfig::default()
        },
    })
}

pub async fn run(args: ServeArgs) -> CliResult<i32> {
    let settings = settings(&args)?;
    let listener = MuxListener::bind(&args.path)
        .map_err(|err| peer_error("bind failed", err))?
        .with_stream_config(settings.stream);
    let local = Arc::new(LocalProcessRuntime::new());
    let runtime: Arc<dyn WorkloadRuntime> = local.clone();

    let shutdown = CancellationToken::new();
    let tracker = TaskTracker::new();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    info!(path = %listener.path().display(), root = %settings.dispatch.root_channel_id, "serving");

    let mut accepted = 0usize;
    let interrupted = loop {
        if args.max_connections.is_some_and(|max| accepted >= max) {
            info!(accepted, "connection limit reached");
            break false;
        }

        let conn = tokio::select! {
            _ = &mut ctrl_c => break true,
            conn = listener.accept::<Channel>() => match conn {
                Ok(conn) => conn,
                Err(err) => {
                    shutdown.cancel();
                    tracker.close();
                    tracker.wait().await;
                    local.shutdown().await;
                    return Err(peer_error("accept failed", err));
                }
            },
        };
        accepted += 1;

        let handler = ConnectionHandler::new(Arc::new(conn), Arc::clone(&runtime))
            .with_config(settings.dispatch.clone())
            .with_executor_config(settings.executor.clone())
            .with_parent_token(&shutdown);
        tracker.spawn(async move {
            if let Err(err) = handler.run().await {
                warn!(error = %err, "connection ended with error");
            }
        });
    };

    tracker.close();
    if interrupted {
        info!("interrupted, closing connections");
        shutdown.cancel();
        tracker.wait().await;
    } else {
        tokio::select! {
            _ = tracker.wait() => {}
            _ = &mut ctrl_c => {
                info!("interrupted, closing connections");
                shutdown.cancel();
                tracker.wait().await;
            }
        }
    }

    local.shutdown().await;
    info!("server stopped");
    Ok(SUCCESS)
}
