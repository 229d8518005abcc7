mod cmd;
mod endpoint;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::{Command, EngineArgs};
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "sixpack", version, about = "6PACK reliable link CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(flatten)]
    engine: EngineArgs,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format, &cli.engine);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_send_subcommand() {
        let cli = Cli::try_parse_from([
            "sixpack",
            "send",
            "unix:/tmp/tnc.sock",
            "--channel",
            "3",
            "--priority",
            "urgent",
            "--data",
            "hello",
        ])
        .expect("send args should parse");

        match cli.command {
            Command::Send(args) => {
                assert_eq!(args.channel, 3);
                assert_eq!(
                    args.endpoint,
                    endpoint::Endpoint::Connect("/tmp/tnc.sock".into())
                );
            }
            other => panic!("expected send, got {other:?}"),
        }
    }

    #[test]
    fn rejects_conflicting_payload_args() {
        let err = Cli::try_parse_from([
            "sixpack",
            "send",
            "unix:/tmp/tnc.sock",
            "--data",
            "hello",
            "--file",
            "/tmp/payload.bin",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn engine_flags_are_global() {
        let cli = Cli::try_parse_from([
            "sixpack",
            "listen",
            "unix-listen:/tmp/tnc.sock",
            "--ack-timeout",
            "200ms",
            "--max-retries",
            "1",
            "--channels",
            "1,2",
        ])
        .expect("listen args should parse");

        assert_eq!(cli.engine.ack_timeout, "200ms");
        assert_eq!(cli.engine.max_retries, 1);
        assert!(matches!(cli.command, Command::Listen(_)));
    }

    #[test]
    fn rejects_empty_endpoint_path() {
        let err = Cli::try_parse_from(["sixpack", "monitor", "unix:"])
            .expect_err("empty endpoint should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }
}
