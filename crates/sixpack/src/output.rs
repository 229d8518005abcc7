use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use sixpack_frame::Frame;
use sixpack_link::{StatisticsSnapshot, TelemetryStatus};

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
    event: &'static str,
    command: String,
    channel: u8,
    priority: &'static str,
    sequence: u8,
    payload_size: usize,
    payload: String,
    endpoint: &'a str,
    timestamp: String,
}

/// Print one verified frame seen on the wire.
pub fn print_frame(frame: &Frame, endpoint: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = FrameOutput {
                event: "frame",
                command: frame.command.to_string(),
                channel: frame.channel,
                priority: frame.priority.name(),
                sequence: frame.sequence,
                payload_size: frame.payload.len(),
                payload: payload_preview(frame.payload.as_ref()),
                endpoint,
                timestamp: now_unix_seconds(),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["COMMAND", "CHANNEL", "PRIORITY", "SEQ", "SIZE", "PAYLOAD"])
                .add_row(vec![
                    frame.command.to_string(),
                    frame.channel.to_string(),
                    frame.priority.name().to_string(),
                    frame.sequence.to_string(),
                    frame.payload.len().to_string(),
                    payload_preview(frame.payload.as_ref()),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "{} channel={} priority={} seq={} size={} payload={}",
                frame.command,
                frame.channel,
                frame.priority,
                frame.sequence,
                frame.payload.len(),
                payload_preview(frame.payload.as_ref())
            );
        }
        OutputFormat::Raw => {
            print_raw(frame.payload.as_ref());
        }
    }
}

#[derive(Serialize)]
struct DataOutput<'a> {
    event: &'static str,
    channel: u8,
    payload_size: usize,
    payload: String,
    endpoint: &'a str,
    timestamp: String,
}

/// Print one payload delivered in order by the link.
pub fn print_data(channel: u8, payload: &[u8], endpoint: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&DataOutput {
            event: "data",
            channel,
            payload_size: payload.len(),
            payload: payload_preview(payload),
            endpoint,
            timestamp: now_unix_seconds(),
        }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CHANNEL", "SIZE", "ENDPOINT", "PAYLOAD"])
                .add_row(vec![
                    channel.to_string(),
                    payload.len().to_string(),
                    endpoint.to_string(),
                    payload_preview(payload),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!(
            "channel={channel} size={} payload={}",
            payload.len(),
            payload_preview(payload)
        ),
        OutputFormat::Raw => print_raw(payload),
    }
}

#[derive(Serialize)]
struct StatusOutput<'a> {
    event: &'static str,
    channel: u8,
    #[serde(flatten)]
    status: &'a TelemetryStatus,
    timestamp: String,
}

pub fn print_status(channel: u8, status: &TelemetryStatus, format: OutputFormat) {
    let rows = [
        ("frequency_mhz", format!("{:.3}", status.frequency)),
        ("tx_power_dbm", status.tx_power.to_string()),
        ("tx_packet_count", status.tx_packet_count.to_string()),
        ("rx_packet_count", status.rx_packet_count.to_string()),
        ("crc_error_count", status.crc_error_count.to_string()),
    ];

    match format {
        OutputFormat::Json => print_json(&StatusOutput {
            event: "status",
            channel,
            status,
            timestamp: now_unix_seconds(),
        }),
        OutputFormat::Table => print_table(["FIELD", "VALUE"], &rows),
        OutputFormat::Pretty => {
            println!("Status (channel {channel}):");
            for (name, value) in rows {
                println!("  {name:<16} {value}");
            }
        }
        OutputFormat::Raw => print_raw(&status.to_bytes()),
    }
}

#[derive(Serialize)]
struct SendOutput<'a> {
    event: &'static str,
    channel: u8,
    sequence: u8,
    outcome: &'a str,
    statistics: &'a StatisticsSnapshot,
}

/// Result of a `send`: the delivery outcome plus a statistics snapshot.
pub fn print_delivery(
    channel: u8,
    sequence: u8,
    outcome: &str,
    stats: &StatisticsSnapshot,
    format: OutputFormat,
) {
    match format {
        OutputFormat::Json => print_json(&SendOutput {
            event: "send",
            channel,
            sequence,
            outcome,
            statistics: stats,
        }),
        OutputFormat::Table => {
            println!("channel {channel} seq {sequence}: {outcome}");
            print_stats_table(stats);
        }
        OutputFormat::Pretty => {
            println!("channel={channel} seq={sequence} outcome={outcome}");
            for (name, value) in stats.fields() {
                println!("  {name:<20} {value}");
            }
        }
        OutputFormat::Raw => println!("{outcome}"),
    }
}

fn print_stats_table(stats: &StatisticsSnapshot) {
    let rows: Vec<(&str, String)> = stats
        .fields()
        .into_iter()
        .map(|(name, value)| (name, value.to_string()))
        .collect();
    print_table(["COUNTER", "VALUE"], &rows);
}

fn print_table(header: [&str; 2], rows: &[(&str, String)]) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header.to_vec());
    for (name, value) in rows {
        table.add_row(vec![name.to_string(), value.clone()]);
    }
    println!("{table}");
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
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
