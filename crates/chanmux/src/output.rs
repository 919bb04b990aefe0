use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use chanmux_frame::Frame;
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct FrameOutput<'a> {
    channel_id: &'a str,
    event_name: &'a str,
    payload_size: usize,
    /// Parsed JSON when the payload is JSON, otherwise a text preview.
    payload: Value,
    peer_id: &'a str,
    /// Unix seconds.
    received_at: u64,
}

pub fn print_frames(frames: &[Frame], peer_id: &str, format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if !frames.is_empty() {
                println!("{}", frame_table(frames));
            }
        }
        _ => {
            for frame in frames {
                print_frame(frame, peer_id, format);
            }
        }
    }
}

pub fn print_frame(frame: &Frame, peer_id: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!("{}", frame_json(frame, peer_id)),
        OutputFormat::Table => println!("{}", frame_table(std::slice::from_ref(frame))),
        OutputFormat::Pretty => {
            println!(
                "channel={} event={} size={} payload={}",
                frame.channel_id,
                frame.event_name,
                frame.payload.len(),
                payload_preview(frame.payload.as_ref())
            );
        }
        OutputFormat::Raw => print_raw(frame.payload.as_ref()),
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout().lock();
    if out.write_all(data).and_then(|()| out.flush()).is_err() {
        tracing::debug!(size = data.len(), "stdout closed while writing payload");
    }
}

fn frame_json(frame: &Frame, peer_id: &str) -> String {
    let out = FrameOutput {
        channel_id: &frame.channel_id,
        event_name: &frame.event_name,
        payload_size: frame.payload.len(),
        payload: payload_value(frame.payload.as_ref()),
        peer_id,
        received_at: unix_seconds(),
    };
    serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
}

fn frame_table(frames: &[Frame]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["CHANNEL", "EVENT", "SIZE", "PAYLOAD"]);
    for frame in frames {
        table.add_row(vec![
            frame.channel_id.clone(),
            frame.event_name.clone(),
            frame.payload.len().to_string(),
            payload_preview(frame.payload.as_ref()),
        ]);
    }
    table
}

fn payload_value(payload: &[u8]) -> Value {
    serde_json::from_slice(payload)
        .unwrap_or_else(|_| Value::String(payload_preview(payload)))
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}
