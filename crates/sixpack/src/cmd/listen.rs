use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use sixpack_frame::FrameError;
use sixpack_link::{Link, LinkError, TelemetryStatus};

use crate::cmd::{EngineArgs, ListenArgs};
use crate::exit::{link_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_data, print_status, OutputFormat};

const EVENT_WAIT: Duration = Duration::from_millis(100);

enum Event {
    Data(u8, Bytes),
    Status(u8, TelemetryStatus),
}

impl Event {
    fn channel(&self) -> u8 {
        match self {
            Event::Data(channel, _) | Event::Status(channel, _) => *channel,
        }
    }
}

pub fn run(args: ListenArgs, format: OutputFormat, engine: &EngineArgs) -> CliResult<i32> {
    let config = engine.link_config()?;
    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let opened = args.endpoint.open(engine.connect_timeout()?)?;
    let endpoint = args.endpoint.display();

    let (events_tx, events_rx) = mpsc::channel();
    let status_tx = events_tx.clone();
    let mut link = Link::builder(opened.stream)
        .with_config(config)
        .register_data_handler(move |channel, payload| {
            let _ = events_tx.send(Event::Data(channel, payload));
        })
        .register_status_handler(move |channel, status| {
            let _ = status_tx.send(Event::Status(channel, status));
        })
        .build()
        .map_err(|err| link_error("link setup failed", err))?;
    link.start()
        .map_err(|err| link_error("link start failed", err))?;

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        let event = match events_rx.recv_timeout(EVENT_WAIT) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) if link.is_running() => continue,
            // Receive loop ended; its result decides the exit code.
            Err(_) => break,
        };

        if let Some(channels) = &args.channels {
            if !channels.contains(&event.channel()) {
                continue;
            }
        }

        match event {
            Event::Data(channel, payload) => print_data(channel, &payload, &endpoint, format),
            Event::Status(channel, status) => print_status(channel, &status, format),
        }
        printed = printed.saturating_add(1);

        if args.count.is_some_and(|count| printed >= count) {
            break;
        }
    }

    match link.stop() {
        Ok(_) => Ok(SUCCESS),
        Err(err) if matches!(err.root(), LinkError::Frame(FrameError::ConnectionClosed)) => {
            Ok(SUCCESS)
        }
        Err(err) => Err(link_error("link failed", err)),
    }
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
