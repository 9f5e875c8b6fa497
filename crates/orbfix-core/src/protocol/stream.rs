//! Byte channels
//!
//! [`Channel`] abstracts the serial handle so the exchange, monitor and
//! firmware layers can run against real hardware or a scripted stand-in.

use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use super::FrameParser;

/// Abstraction for a bidirectional byte stream to the receiver
pub trait Channel: Read + Write + Send {
    /// Set timeout for read/write operations
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Clear input buffers
    fn clear_input_buffer(&mut self) -> io::Result<()>;

    /// Clear output buffers
    fn clear_output_buffer(&mut self) -> io::Result<()>;

    /// Try to clone the channel (independent handle to the same device)
    fn try_clone(&self) -> io::Result<Box<dyn Channel>>;

    /// Get number of bytes available to read
    fn bytes_to_read(&mut self) -> io::Result<u32>;

    /// Device name, for logging
    fn name(&self) -> Option<String> {
        None
    }

    /// Clear both OS buffers
    fn clear_buffers(&mut self) -> io::Result<()> {
        self.clear_input_buffer()?;
        self.clear_output_buffer()
    }
}

/// Serial port wrapper implementing [`Channel`]
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
}

impl SerialChannel {
    /// Wrap an opened serial port
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl Read for SerialChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl Channel for SerialChannel {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.port.set_timeout(timeout).map_err(io::Error::other)
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(io::Error::other)
    }

    fn clear_output_buffer(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Output)
            .map_err(io::Error::other)
    }

    fn try_clone(&self) -> io::Result<Box<dyn Channel>> {
        let port_clone = self.port.try_clone().map_err(io::Error::other)?;
        Ok(Box::new(SerialChannel::new(port_clone)))
    }

    fn bytes_to_read(&mut self) -> io::Result<u32> {
        self.port.bytes_to_read().map_err(io::Error::other)
    }

    fn name(&self) -> Option<String> {
        self.port.name()
    }
}

/// True for the error kinds a timed-out serial read reports
pub fn is_idle_read(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// How [`drain`] decides it is done
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainMode {
    /// Stop at the first read that returns nothing
    UntilIdle,
    /// Keep reading for the whole window
    FullWindow,
}

/// Discard residual bytes already buffered at the device.
///
/// Returns the number of bytes thrown away.
pub fn drain(channel: &mut dyn Channel, window: Duration, mode: DrainMode) -> io::Result<usize> {
    let deadline = Instant::now() + window;
    let mut buffer = [0u8; 256];
    let mut drained = 0;

    while Instant::now() < deadline {
        let want = match channel.bytes_to_read() {
            Ok(0) if mode == DrainMode::UntilIdle => break,
            Ok(0) => 1,
            Ok(n) => (n as usize).min(buffer.len()),
            Err(e) if is_idle_read(&e) => 1,
            Err(e) => return Err(e),
        };

        match channel.read(&mut buffer[..want]) {
            Ok(0) if mode == DrainMode::UntilIdle => break,
            Ok(0) => {}
            Ok(n) => drained += n,
            Err(e) if is_idle_read(&e) => {
                if mode == DrainMode::UntilIdle {
                    break;
                }
            }
            Err(e) => return Err(e),
        }
    }

    if drained > 0 {
        tracing::debug!("drained {} stale bytes", drained);
    }
    Ok(drained)
}

/// Frames read before a deadline, plus the error that cut the read short
#[derive(Debug, Default)]
pub struct FrameBatch {
    /// Raw frames completed in the window, in arrival order
    pub frames: Vec<Vec<u8>>,
    /// Transport failure that ended the read early, if any
    pub error: Option<io::Error>,
}

/// Read until `deadline`, feeding every byte through `parser`.
///
/// A transport error stops the read; frames completed before it are kept.
pub fn read_frames(
    channel: &mut dyn Channel,
    parser: &mut FrameParser,
    deadline: Instant,
) -> FrameBatch {
    let mut batch = FrameBatch::default();
    let mut chunk = [0u8; 256];

    while Instant::now() < deadline {
        match channel.read(&mut chunk) {
            Ok(0) => {}
            Ok(n) => {
                tracing::debug!("rx {}", super::payload::hexdump(&chunk[..n]));
                for frame in parser.feed(&chunk[..n]) {
                    tracing::debug!("frame {}", super::payload::hexdump(&frame));
                    batch.frames.push(frame);
                }
            }
            Err(e) if is_idle_read(&e) => {}
            Err(e) => {
                batch.error = Some(e);
                break;
            }
        }
    }

    batch
}
