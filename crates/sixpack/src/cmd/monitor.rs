use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sixpack_frame::{FrameError, FrameReader};
use tracing::info;

use crate::cmd::{EngineArgs, MonitorArgs};
use crate::exit::{frame_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_frame, OutputFormat};

/// Decode and print frames without taking part in the protocol.
pub fn run(args: MonitorArgs, format: OutputFormat, engine: &EngineArgs) -> CliResult<i32> {
    let config = engine.link_config()?;
    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))
        .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))?;

    let opened = args.endpoint.open(engine.connect_timeout()?)?;
    let endpoint = args.endpoint.display();
    let mut reader = FrameReader::with_config_transport(opened.stream, config.frame_config())
        .map_err(|err| frame_error("monitor setup failed", err))?;
    reader.set_resync_window(config.resync_buffer_limit);

    let mut printed = 0usize;
    'outer: while running.load(Ordering::SeqCst) {
        let outcome = match reader.poll() {
            Ok(outcome) => outcome,
            Err(FrameError::ConnectionClosed) => break,
            Err(err) => return Err(frame_error("receive failed", err)),
        };
        for frame in &outcome.frames {
            print_frame(frame, &endpoint, format);
            printed = printed.saturating_add(1);
            if args.count.is_some_and(|count| printed >= count) {
                break 'outer;
            }
        }
    }

    info!(
        frames = printed,
        corrupt = reader.corrupt_frames(),
        framing_errors = reader.framing_errors(),
        "monitor finished"
    );
    Ok(SUCCESS)
}
