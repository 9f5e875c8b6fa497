//! Shared test doubles
#![allow(dead_code)]

use orbfix_core::monitor::TelemetrySink;
use orbfix_core::protocol::Channel;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Produces the bytes the "receiver" sends back for one write
pub type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

#[derive(Default)]
struct MockState {
    recv_buffer: VecDeque<u8>,
    writes: Vec<Vec<u8>>,
    responder: Option<Responder>,
    fail_on_send: bool,
    fail_when_empty: bool,
}

/// Mock serial port implementing [`Channel`].
///
/// Clones share state, like two handles to the same device. Reads on an
/// empty buffer sleep briefly and time out, as a real port would.
#[derive(Clone)]
pub struct MockSerial {
    state: Arc<Mutex<MockState>>,
    idle: Duration,
}

impl MockSerial {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            idle: Duration::from_millis(2),
        }
    }

    pub fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Vec<u8> + Send + 'static,
    {
        let mock = Self::new();
        mock.state.lock().unwrap().responder = Some(Box::new(responder));
        mock
    }

    /// Bytes arriving from the receiver without a request
    pub fn push_incoming(&self, bytes: &[u8]) {
        self.state.lock().unwrap().recv_buffer.extend(bytes);
    }

    /// Every write, in order
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().writes.clone()
    }

    pub fn set_fail_on_send(&self, fail: bool) {
        self.state.lock().unwrap().fail_on_send = fail;
    }

    /// Once the receive buffer runs dry, reads fail like an unplugged device
    pub fn set_fail_when_empty(&self, fail: bool) {
        self.state.lock().unwrap().fail_when_empty = fail;
    }
}

impl Read for MockSerial {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        {
            let mut state = self.state.lock().unwrap();
            if !state.recv_buffer.is_empty() {
                let n = buf.len().min(state.recv_buffer.len());
                for (slot, byte) in buf.iter_mut().zip(state.recv_buffer.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }
            if state.fail_when_empty {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
            }
        }
        std::thread::sleep(self.idle);
        Err(io::Error::new(io::ErrorKind::TimedOut, "mock read timeout"))
    }
}

impl Write for MockSerial {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        if state.fail_on_send {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "Serial write failed"));
        }
        state.writes.push(buf.to_vec());
        if let Some(responder) = state.responder.as_mut() {
            let reply = responder(buf);
            state.recv_buffer.extend(reply);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Channel for MockSerial {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.idle = timeout.min(Duration::from_millis(2));
        Ok(())
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.state.lock().unwrap().recv_buffer.clear();
        Ok(())
    }

    fn clear_output_buffer(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn try_clone(&self) -> io::Result<Box<dyn Channel>> {
        Ok(Box::new(self.clone()))
    }

    fn bytes_to_read(&mut self) -> io::Result<u32> {
        Ok(self.state.lock().unwrap().recv_buffer.len() as u32)
    }

    fn name(&self) -> Option<String> {
        Some("mock".to_string())
    }
}

/// Telemetry sink that records what it was given
#[derive(Default)]
pub struct CollectingSink {
    lines: Mutex<Vec<String>>,
}

impl CollectingSink {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    /// Poll until `pred` holds for the collected lines or `timeout` elapses
    pub fn wait_for<F: Fn(&[String]) -> bool>(&self, timeout: Duration, pred: F) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if pred(&self.lines()) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        pred(&self.lines())
    }
}

impl TelemetrySink for CollectingSink {
    fn forward(&self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }
}
