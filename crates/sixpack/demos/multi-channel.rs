//! Multi-channel example: prioritized traffic on several channels over a
//! Unix socket, plus a telemetry status exchange.
//!
//! Run with:
//!   cargo run --example multi-channel

use std::fs;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use sixpack::frame::Priority;
use sixpack::link::{Link, TelemetryStatus};
use sixpack::transport::UnixLink;

const TELEMETRY_CHANNEL: u8 = 15;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let sock_dir = std::env::temp_dir().join(format!("sixpack-multi-{}", std::process::id()));
    fs::create_dir_all(&sock_dir)?;
    let sock_path = sock_dir.join("tnc.sock");

    let listener = UnixLink::bind(&sock_path)?;
    let connector = thread::spawn({
        let path = sock_path.clone();
        move || UnixLink::connect(path)
    });
    let tnc_side = listener.accept()?;
    let station_side = connector
        .join()
        .map_err(|_| "connector thread panicked")??;

    // The "TNC" answers status requests with its telemetry.
    let (tnc_events, tnc_rx) = mpsc::channel();
    let mut tnc = Link::builder(tnc_side)
        .register_data_handler(move |channel, payload| {
            let _ = tnc_events.send((channel, payload));
        })
        .build()?;
    let tnc_handle = tnc.handle();

    let (status_tx, status_rx) = mpsc::channel();
    let mut station = Link::builder(station_side)
        .register_status_handler(move |channel, status| {
            let _ = status_tx.send((channel, status));
        })
        .build()?;

    // Queued before start: drained URGENT first, LOW last.
    station.submit(2, &b"bulk position report"[..], Priority::Low);
    station.submit(1, &b"EMERGENCY"[..], Priority::Urgent);
    station.submit(3, &b"chat: hello"[..], Priority::Normal);

    tnc.start()?;
    station.start()?;

    for _ in 0..3 {
        let (channel, payload) = tnc_rx.recv_timeout(Duration::from_secs(5))?;
        eprintln!(
            "[tnc] channel={channel} payload={}",
            String::from_utf8_lossy(&payload)
        );
    }

    tnc_handle.send_status(
        TELEMETRY_CHANNEL,
        &TelemetryStatus {
            frequency: 433.775,
            tx_power: 17,
            ..TelemetryStatus::default()
        },
    )?;
    let (channel, status) = status_rx.recv_timeout(Duration::from_secs(5))?;
    eprintln!(
        "[station] status channel={channel} frequency={:.3}MHz power={}dBm",
        status.frequency, status.tx_power
    );

    station.stop()?;
    tnc.stop()?;
    drop(listener);
    let _ = fs::remove_dir_all(&sock_dir);
    Ok(())
}
