use std::fs;
use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};

use sixpack_link::{Link, LinkHandle};

use crate::cmd::{parse_duration, EngineArgs, SendArgs};
use crate::exit::{
    io_error, link_error, CliError, CliResult, DELIVERY_FAILED, FAILURE, SUCCESS, TIMEOUT,
};
use crate::output::{print_delivery, OutputFormat};

const DELIVERY_POLL: Duration = Duration::from_millis(10);

pub fn run(args: SendArgs, format: OutputFormat, engine: &EngineArgs) -> CliResult<i32> {
    let config = engine.link_config()?;
    let wait = match &args.wait {
        Some(wait) => parse_duration(wait)?,
        None => config.ack_timeout * config.max_retries.saturating_add(2),
    };
    let payload = resolve_payload(&args)?;

    let opened = args.endpoint.open(engine.connect_timeout()?)?;
    let (failed_tx, failed_rx) = mpsc::channel();
    let mut link = Link::builder(opened.stream)
        .with_config(config)
        .register_failure_handler(move |channel, sequence| {
            let _ = failed_tx.send((channel, sequence));
        })
        .build()
        .map_err(|err| link_error("link setup failed", err))?;

    let sequence = link
        .try_submit(args.channel, payload, args.priority.into())
        .map_err(|err| link_error("submit failed", err))?;
    link.start()
        .map_err(|err| link_error("link start failed", err))?;

    let state = LinkDelivery {
        handle: link.handle(),
        channel: args.channel,
        sequence,
        failures: failed_rx,
    };
    let delivery = wait_for_delivery(&state, wait);
    let stats = link.get_statistics();
    let stopped = link.stop();

    let code = match delivery {
        Delivery::Acked => SUCCESS,
        Delivery::Failed => DELIVERY_FAILED,
        Delivery::TimedOut => TIMEOUT,
        Delivery::LinkDown => {
            // The loop's own error says why.
            return Err(match stopped {
                Err(err) => link_error("link failed", err),
                Ok(_) => CliError::new(FAILURE, "link stopped before delivery"),
            });
        }
    };
    print_delivery(args.channel, sequence, delivery.as_str(), &stats, format);
    Ok(code)
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    Ok(Vec::new())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Acked,
    Failed,
    TimedOut,
    LinkDown,
}

impl Delivery {
    fn as_str(self) -> &'static str {
        match self {
            Delivery::Acked => "acked",
            Delivery::Failed => "failed",
            Delivery::TimedOut => "timed-out",
            Delivery::LinkDown => "link-down",
        }
    }
}

trait DeliveryState {
    fn is_pending(&self) -> bool;
    fn has_failed(&self) -> bool;
    fn is_running(&self) -> bool;
}

struct LinkDelivery {
    handle: LinkHandle,
    channel: u8,
    sequence: u8,
    failures: Receiver<(u8, u8)>,
}

impl DeliveryState for LinkDelivery {
    fn is_pending(&self) -> bool {
        self.handle.is_pending(self.channel, self.sequence)
    }

    fn has_failed(&self) -> bool {
        self.failures
            .try_iter()
            .any(|failed| failed == (self.channel, self.sequence))
    }

    fn is_running(&self) -> bool {
        self.handle.is_running()
    }
}

/// Poll until the frame is ACKed, given up, or `wait` runs out.
///
/// A failure removes the pending entry too, so failures are checked again
/// once the entry is gone.
fn wait_for_delivery<P: DeliveryState>(state: &P, wait: Duration) -> Delivery {
    let start = Instant::now();
    loop {
        if state.has_failed() {
            return Delivery::Failed;
        }
        if !state.is_pending() {
            return if state.has_failed() {
                Delivery::Failed
            } else {
                Delivery::Acked
            };
        }
        if !state.is_running() {
            return Delivery::LinkDown;
        }
        if start.elapsed() >= wait {
            return Delivery::TimedOut;
        }
        std::thread::sleep(DELIVERY_POLL);
    }
}
