use std::sync::mpsc;

use sixpack_link::Link;

use crate::cmd::{parse_duration, EngineArgs, StatusArgs};
use crate::exit::{link_error, CliError, CliResult, SUCCESS, TIMEOUT};
use crate::output::{print_status, OutputFormat};

pub fn run(args: StatusArgs, format: OutputFormat, engine: &EngineArgs) -> CliResult<i32> {
    let config = engine.link_config()?;
    let timeout = parse_duration(&args.timeout)?;

    let opened = args.endpoint.open(engine.connect_timeout()?)?;
    let (status_tx, status_rx) = mpsc::channel();
    let wanted = args.channel;
    let mut link = Link::builder(opened.stream)
        .with_config(config)
        .register_status_handler(move |channel, status| {
            if channel == wanted {
                let _ = status_tx.send(status);
            }
        })
        .build()
        .map_err(|err| link_error("link setup failed", err))?;

    link.request_status(args.channel)
        .map_err(|err| link_error("status request failed", err))?;
    link.start()
        .map_err(|err| link_error("link start failed", err))?;

    let reply = status_rx.recv_timeout(timeout);
    let stopped = link.stop();

    match reply {
        Ok(status) => {
            print_status(args.channel, &status, format);
            Ok(SUCCESS)
        }
        Err(_) => match stopped {
            Err(err) => Err(link_error("link failed", err)),
            Ok(_) => Err(CliError::new(
                TIMEOUT,
                format!("no status reply within {timeout:?}"),
            )),
        },
    }
}
