//! Loopback example: two links joined by an in-process socket pair.
//!
//! Run with:
//!   cargo run --example loopback

use std::sync::mpsc;
use std::time::Duration;

use sixpack::frame::Priority;
use sixpack::link::Link;
use sixpack::transport::LinkStream;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (station, tnc) = LinkStream::pair()?;

    let (delivered_tx, delivered_rx) = mpsc::channel();
    let mut receiver = Link::builder(tnc)
        .register_data_handler(move |channel, payload| {
            let _ = delivered_tx.send((channel, payload));
        })
        .build()?;

    let mut sender = Link::builder(station)
        .register_failure_handler(|channel, sequence| {
            eprintln!("[sender] gave up on channel={channel} seq={sequence}");
        })
        .build()?;

    receiver.start()?;
    sender.start()?;

    let sequence = sender.try_submit(0, &b"Hello, 6PACK World!"[..], Priority::Normal)?;
    eprintln!("[sender] queued seq={sequence}");

    let (channel, payload) = delivered_rx.recv_timeout(Duration::from_secs(5))?;
    eprintln!(
        "[receiver] channel={channel} payload={}",
        String::from_utf8_lossy(&payload)
    );

    while sender.pending_count() > 0 {
        std::thread::sleep(Duration::from_millis(10));
    }

    let stats = sender.get_statistics();
    eprintln!(
        "[sender] frames_tx={} acks_received={} retries={}",
        stats.frames_tx, stats.acks_received, stats.retries
    );

    sender.stop()?;
    receiver.stop()?;
    Ok(())
}
