use std::fs;
use std::time::Duration;

use chanmux_frame::Frame;
use chanmux_peer::{connect, MuxConnection};

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{peer_error, CliError, CliResult, SUCCESS, TIMEOUT, USAGE};
use crate::output::{print_frames, OutputFormat};

pub async fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let payload = resolve_payload(&args)?;
    if !chanmux_frame::events::is_inbound(&args.event) {
        tracing::warn!(event_name = %args.event, "event is not one the server handles");
    }

    let conn: MuxConnection<()> = connect(&args.path)
        .await
        .map_err(|err| peer_error("connect failed", err))?;
    conn.send(&args.channel, &args.event, &payload)
        .await
        .map_err(|err| peer_error("send failed", err))?;
    tracing::debug!(
        channel_id = %args.channel,
        event_name = %args.event,
        size = payload.len(),
        "frame sent"
    );

    let received = collect_frames(&conn, args.wait, wait_timeout).await;
    if let Err(err) = conn.close().await {
        tracing::debug!(error = %err, "close failed");
    }

    // Print whatever arrived even when the wait fell short.
    let (frames, outcome) = match received {
        Ok(frames) => (frames, Ok(SUCCESS)),
        Err((frames, err)) => (frames, Err(err)),
    };
    print_frames(&frames, conn.id(), format);
    outcome
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(json) = &args.json {
        serde_json::from_str::<serde_json::Value>(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
        return Ok(json.as_bytes().to_vec());
    }
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path).map_err(|err| {
            crate::exit::io_error(&format!("failed reading {}", path.display()), err)
        });
    }
    Ok(Vec::new())
}

/// Receive up to `count` frames, giving each one `per_frame` to arrive.
///
/// On failure the frames received so far come back with the error.
async fn collect_frames<C: Clone>(
    conn: &MuxConnection<C>,
    count: usize,
    per_frame: Duration,
) -> Result<Vec<Frame>, (Vec<Frame>, CliError)> {
    let mut frames = Vec::with_capacity(count);
    while frames.len() < count {
        let received = match tokio::time::timeout(per_frame, conn.receive()).await {
            Ok(received) => received,
            Err(_) => {
                let message = format!(
                    "timed out waiting for frame {} of {count}",
                    frames.len() + 1
                );
                return Err((frames, CliError::new(TIMEOUT, message)));
            }
        };
        match received {
            Ok(frame) => frames.push(frame),
            Err(err) => return Err((frames, peer_error("receive failed", err))),
        }
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chanmux_transport::StreamConfig;

    use super::*;
    use crate::exit::FAILURE;

    fn pair() -> (MuxConnection<()>, MuxConnection<()>) {
        let (left, right) = tokio::io::duplex(4096);
        let config = StreamConfig::default();
        (
            MuxConnection::from_stream("left", left, &config),
            MuxConnection::from_stream("right", right, &config),
        )
    }

    fn args() -> SendArgs {
        SendArgs {
            path: PathBuf::from("/tmp/chanmux.sock"),
            channel: "root".to_string(),
            event: "workload:start".to_string(),
            json: None,
            data: None,
            file: None,
            wait: 0,
            wait_timeout: "5s".to_string(),
        }
    }

    #[test]
    fn payload_from_json_is_validated() {
        let mut with_json = args();
        with_json.json = Some(r#"{"name":"n"}"#.to_string());
        assert_eq!(resolve_payload(&with_json).unwrap(), br#"{"name":"n"}"#);

        with_json.json = Some("{not json".to_string());
        assert_eq!(resolve_payload(&with_json).unwrap_err().code, USAGE);
    }

    #[test]
    fn payload_defaults_to_empty() {
        let mut with_data = args();
        assert!(resolve_payload(&with_data).unwrap().is_empty());
        with_data.data = Some("quit".to_string());
        assert_eq!(resolve_payload(&with_data).unwrap(), b"quit");
    }

    #[tokio::test]
    async fn collects_requested_frames_in_order() {
        let (server, client) = pair();
        server.send("root", "workload:status", b"1").await.unwrap();
        server.send("w1", "workload:command-status", b"2").await.unwrap();
        server.send("c1", "session:output", b"3").await.unwrap();

        let frames = collect_frames(&client, 2, Duration::from_secs(1))
            .await
            .unwrap();
        let channels: Vec<&str> = frames.iter().map(|f| f.channel_id.as_str()).collect();
        assert_eq!(channels, ["root", "w1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out_with_partial_frames() {
        let (server, client) = pair();
        server.send("root", "workload:status", b"{}").await.unwrap();

        let (frames, err) = collect_frames(&client, 2, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(frames.len(), 1);
        assert_eq!(err.code, TIMEOUT);
        assert_eq!(err.message, "timed out waiting for frame 2 of 2");
    }

    #[tokio::test]
    async fn peer_hangup_is_a_failure() {
        let (server, client) = pair();
        server.close().await.unwrap();

        let (frames, err) = collect_frames(&client, 1, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(frames.is_empty());
        assert_eq!(err.code, FAILURE);
    }

    #[tokio::test]
    async fn zero_wait_returns_immediately() {
        let (_server, client) = pair();
        let frames = collect_frames(&client, 0, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(frames.is_empty());
    }
}
