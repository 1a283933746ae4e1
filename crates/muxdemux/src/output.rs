use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use muxdemux_channel::{Arg, Chunk};
use serde::Serialize;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
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

/// One thing observed on the demultiplexed side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubstreamEvent {
    /// `None` for chunks that were not envelopes.
    pub substream: Option<String>,
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

impl SubstreamEvent {
    pub fn data(substream: &str, chunk: &Chunk) -> Self {
        Self {
            substream: Some(substream.to_string()),
            event: "data".to_string(),
            payload: Some(chunk_preview(chunk)),
        }
    }

    pub fn passthrough(chunk: &Chunk) -> Self {
        Self {
            substream: None,
            event: "passthrough".to_string(),
            payload: Some(chunk_preview(chunk)),
        }
    }

    pub fn named(substream: &str, event: &str, args: &[Arg]) -> Self {
        let payload = (!args.is_empty()).then(|| {
            args.iter()
                .map(arg_preview)
                .collect::<Vec<_>>()
                .join(" ")
        });
        Self {
            substream: Some(substream.to_string()),
            event: event.to_string(),
            payload,
        }
    }
}

#[derive(Serialize)]
struct EventOutput<'a> {
    #[serde(flatten)]
    event: &'a SubstreamEvent,
    timestamp: String,
}

pub fn print_event(event: &SubstreamEvent, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = EventOutput {
                event,
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["SUBSTREAM", "EVENT", "PAYLOAD"])
                .add_row(vec![
                    event.substream.clone().unwrap_or_else(|| "-".to_string()),
                    event.event.clone(),
                    event.payload.clone().unwrap_or_default(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let substream = event.substream.as_deref().unwrap_or("-");
            match &event.payload {
                Some(payload) => println!("[{substream}] {} {payload}", event.event),
                None => println!("[{substream}] {}", event.event),
            }
        }
        OutputFormat::Raw => {
            // Raw output carries substream data only.
            if event.event == "data" {
                if let Some(payload) = &event.payload {
                    print_raw(payload.as_bytes());
                    print_raw(b"\n");
                }
            }
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

pub fn chunk_preview(chunk: &Chunk) -> String {
    match chunk {
        Chunk::Bytes(bytes) => payload_preview(bytes),
        Chunk::Object(value) => value.to_string(),
    }
}

fn arg_preview(arg: &Arg) -> String {
    match arg {
        Arg::Value(serde_json::Value::String(text)) => text.clone(),
        Arg::Value(value) => value.to_string(),
        Arg::Bytes(bytes) => payload_preview(bytes),
        Arg::Error(err) => err.message().to_string(),
    }
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
