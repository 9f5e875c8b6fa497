//! Proxy socket server loop

use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::thread;
use std::time::{Duration, Instant};

use super::{Captured, ProxyRequest, ProxyResponse, Shared};
use crate::protocol::{
    decode, encode,
    stream::{drain, DrainMode},
    ProtocolError,
};

const ACCEPT_POLL: Duration = Duration::from_millis(100);
const CLIENT_READ_TIMEOUT: Duration = Duration::from_secs(1);
const PRE_WRITE_DRAIN: Duration = Duration::from_millis(30);
const WAIT_STEP: Duration = Duration::from_millis(20);

pub(super) fn run(listener: UnixListener, shared: &Shared) {
    while !shared.stopping() {
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(e) = handle_connection(stream, shared) {
                    tracing::warn!("server: {}", e);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(e) => {
                tracing::warn!("server accept: {}", e);
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
    tracing::debug!("server thread exiting");
}

fn handle_connection(stream: UnixStream, shared: &Shared) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(CLIENT_READ_TIMEOUT))?;

    let mut line = Vec::new();
    BufReader::new(&stream).read_until(b'\n', &mut line)?;

    let response = match ProxyRequest::parse(&String::from_utf8_lossy(&line)) {
        Ok(request) => respond(shared, &request),
        Err(e) => {
            tracing::debug!("rejected request: {}", e);
            e.into()
        }
    };

    let mut stream = stream;
    stream.write_all(response.to_line().as_bytes())?;
    stream.flush()
}

fn respond(shared: &Shared, request: &ProxyRequest) -> ProxyResponse {
    let captured = match round_trip(shared, request) {
        Ok(captured) => captured,
        Err(e) => {
            tracing::warn!("serial error: {}", e);
            return ProxyResponse::failure(format!("serial error: {}", e));
        }
    };

    let human = if request.decode {
        render(shared, &captured.frames)
    } else {
        String::new()
    };

    ProxyResponse::success(
        captured.frames.iter().map(hex::encode).collect(),
        captured.lines,
        human,
    )
}

/// Write one request and collect what arrives within its window.
///
/// The writer lock is held for the whole window so round trips never overlap.
fn round_trip(shared: &Shared, request: &ProxyRequest) -> Result<Captured, ProtocolError> {
    let encoded = encode(request.command_id, request.subsystem_id, &request.payload)?;

    let mut writer = shared.writer.lock().unwrap_or_else(|e| e.into_inner());
    writer.clear_buffers()?;
    drain(&mut **writer, PRE_WRITE_DRAIN, DrainMode::FullWindow)?;

    shared.capture.begin(Some(request.command_id));
    if let Err(e) = writer.write_all(&encoded).and_then(|_| writer.flush()) {
        shared.capture.finish();
        return Err(e.into());
    }
    tracing::debug!(
        "proxied 0x{:04X} to 0x{:02X} ({} bytes)",
        request.command_id,
        request.subsystem_id,
        encoded.len()
    );

    let deadline = Instant::now() + request.wait;
    while !shared.stopping() {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep(WAIT_STEP.min(deadline - now));
    }

    Ok(shared.capture.finish())
}

fn render(shared: &Shared, frames: &[Vec<u8>]) -> String {
    let mut lines = Vec::new();
    for raw in frames {
        match decode(raw) {
            Ok(frame) => {
                let interpretation = shared.registry.interpret(&frame);
                lines.extend(interpretation.human.lines().map(str::to_string));
            }
            Err(e) => lines.push(format!("[decode error] {}", e)),
        }
    }
    lines.join("\n")
}
