//! Serial reader loop

use std::thread;
use std::time::Duration;

use super::{DemuxEvent, Shared, StreamDemux};
use crate::protocol::{payload::hexdump, stream::is_idle_read, Channel};

const READ_CHUNK: usize = 512;
const IDLE_SLEEP: Duration = Duration::from_millis(10);
const ERROR_BACKOFF: Duration = Duration::from_millis(50);

pub(super) fn run(mut channel: Box<dyn Channel>, shared: &Shared) {
    let mut demux = StreamDemux::new();
    let mut chunk = [0u8; READ_CHUNK];

    while !shared.stopping() {
        match channel.read(&mut chunk) {
            Ok(0) => thread::sleep(IDLE_SLEEP),
            Ok(n) => {
                for event in demux.feed(&chunk[..n]) {
                    dispatch(shared, event);
                }
            }
            Err(e) if is_idle_read(&e) => thread::sleep(IDLE_SLEEP),
            Err(e) => {
                tracing::warn!("reader: {}", e);
                thread::sleep(ERROR_BACKOFF);
            }
        }
    }
    tracing::debug!("reader thread exiting");
}

fn dispatch(shared: &Shared, event: DemuxEvent) {
    match event {
        DemuxEvent::Frame(raw) => {
            if !shared.capture.offer_frame(&raw) {
                tracing::debug!("unsolicited frame dropped: {}", hexdump(&raw));
            }
        }
        DemuxEvent::Line(line) => {
            if line.starts_with('$') || !shared.capture.offer_line(&line) {
                shared.sink.forward(&line);
            }
        }
    }
}
