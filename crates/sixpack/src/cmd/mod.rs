use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use sixpack_frame::Priority;
use sixpack_link::LinkConfig;

use crate::endpoint::Endpoint;
use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod listen;
pub mod monitor;
pub mod send;
pub mod status;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send one DATA frame and wait for its ACK.
    Send(SendArgs),
    /// Print delivered DATA and STATUS events.
    Listen(ListenArgs),
    /// Decode frames passively without acknowledging them.
    Monitor(MonitorArgs),
    /// Request telemetry status and print the reply.
    Status(StatusArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat, engine: &EngineArgs) -> CliResult<i32> {
    match command {
        Command::Send(args) => send::run(args, format, engine),
        Command::Listen(args) => listen::run(args, format, engine),
        Command::Monitor(args) => monitor::run(args, format, engine),
        Command::Status(args) => status::run(args, format, engine),
        Command::Version(args) => version::run(args),
    }
}

/// Link engine tuning shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct EngineArgs {
    /// Time to wait for an ACK before retransmitting (e.g. 5s, 500ms).
    #[arg(long, env = "SIXPACK_ACK_TIMEOUT", default_value = "5s", global = true)]
    pub ack_timeout: String,
    /// Retransmissions before a frame is given up.
    #[arg(long, env = "SIXPACK_MAX_RETRIES", default_value_t = 3, global = true)]
    pub max_retries: u32,
    /// Upper bound on one receive wait (e.g. 10ms).
    #[arg(long, env = "SIXPACK_POLL_INTERVAL", default_value = "10ms", global = true)]
    pub poll_interval: String,
    /// How long to keep retrying a `unix:` connect.
    #[arg(long, env = "SIXPACK_CONNECT_TIMEOUT", default_value = "5s", global = true)]
    pub connect_timeout: String,
}

impl EngineArgs {
    pub fn link_config(&self) -> CliResult<LinkConfig> {
        Ok(LinkConfig {
            ack_timeout: parse_duration(&self.ack_timeout)?,
            max_retries: self.max_retries,
            poll_interval: parse_duration(&self.poll_interval)?,
            ..LinkConfig::default()
        })
    }

    pub fn connect_timeout(&self) -> CliResult<Duration> {
        parse_duration(&self.connect_timeout)
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum PriorityArg {
    Low,
    Normal,
    High,
    Urgent,
}

impl From<PriorityArg> for Priority {
    fn from(arg: PriorityArg) -> Self {
        match arg {
            PriorityArg::Low => Priority::Low,
            PriorityArg::Normal => Priority::Normal,
            PriorityArg::High => Priority::High,
            PriorityArg::Urgent => Priority::Urgent,
        }
    }
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// unix:<path>, unix-listen:<path>, or a device path.
    pub endpoint: Endpoint,
    /// Channel to send on (0-15).
    #[arg(long, short = 'c', default_value_t = 0)]
    pub channel: u8,
    #[arg(long, short = 'p', value_enum, default_value = "normal")]
    pub priority: PriorityArg,
    /// Raw string payload.
    #[arg(long, conflicts_with = "file")]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with = "data")]
    pub file: Option<PathBuf>,
    /// Give up waiting for the ACK after this long. Default: long enough
    /// for every retry to run out.
    #[arg(long, value_name = "DURATION")]
    pub wait: Option<String>,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// unix:<path>, unix-listen:<path>, or a device path.
    pub endpoint: Endpoint,
    /// Filter to specific channels (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub channels: Option<Vec<u8>>,
    /// Exit after printing N events.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// unix:<path>, unix-listen:<path>, or a device path.
    pub endpoint: Endpoint,
    /// Exit after printing N frames.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// unix:<path>, unix-listen:<path>, or a device path.
    pub endpoint: Endpoint,
    #[arg(long, short = 'c', default_value_t = 0)]
    pub channel: u8,
    /// How long to wait for the reply (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}
