//! Command exchange
//!
//! Drives one request/response cycle: open, drain, write, then collect every
//! frame that arrives before the overall deadline. Attempts that come back
//! empty are retried, optionally reopening the device by VID/PID because a
//! receiver that resets re-enumerates under a fresh path.

use std::time::{Duration, Instant};

use super::{
    decode, encode,
    payload::hexdump,
    serial::{open_port, reopen_by_vid_pid, VidPid},
    stream::{drain, read_frames, DrainMode},
    Channel, Frame, FrameParser, ProtocolError, SerialChannel, DEFAULT_BAUD_RATE,
    DEFAULT_OVERALL_WAIT, DEFAULT_READ_TIMEOUT,
};

/// Pause between attempts
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Default window for discarding residual bytes before a command
pub const DEFAULT_DRAIN_WINDOW: Duration = Duration::from_millis(50);

/// Default time to wait for a device to re-enumerate
pub const DEFAULT_REOPEN_WAIT: Duration = Duration::from_secs(30);

/// One command to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    /// Command id
    pub command_id: u16,
    /// Target subsystem
    pub subsystem_id: u8,
    /// Raw payload
    pub payload: Vec<u8>,
}

impl CommandRequest {
    /// Create a request
    pub fn new(command_id: u16, subsystem_id: u8, payload: Vec<u8>) -> Self {
        Self {
            command_id,
            subsystem_id,
            payload,
        }
    }

    /// Encode the request as a wire frame
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self.command_id, self.subsystem_id, &self.payload)
    }
}

/// Exchange configuration
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    /// How long to collect frames after writing
    pub overall_wait: Duration,
    /// Extra attempts after the first one
    pub retries: u32,
    /// Clear OS buffers and drain residual bytes before writing
    pub pre_flush: bool,
    /// Upper bound on the drain
    pub drain_window: Duration,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            overall_wait: DEFAULT_OVERALL_WAIT,
            retries: 1,
            pre_flush: true,
            drain_window: DEFAULT_DRAIN_WINDOW,
        }
    }
}

/// Reopen the device by USB id on attempts after the first
#[derive(Debug, Clone, Copy)]
pub struct ReopenPolicy {
    /// Device to look for
    pub id: VidPid,
    /// How long to wait for it to appear
    pub wait: Duration,
}

impl ReopenPolicy {
    /// Reopen policy with the default wait
    pub fn new(id: VidPid) -> Self {
        Self {
            id,
            wait: DEFAULT_REOPEN_WAIT,
        }
    }
}

/// Produces a fresh channel for each attempt
pub trait ChannelOpener {
    /// Open the channel for `attempt` (1-based)
    fn open(&mut self, attempt: u32) -> Result<Box<dyn Channel>, ProtocolError>;
}

impl<F> ChannelOpener for F
where
    F: FnMut(u32) -> Result<Box<dyn Channel>, ProtocolError>,
{
    fn open(&mut self, attempt: u32) -> Result<Box<dyn Channel>, ProtocolError> {
        self(attempt)
    }
}

/// Opens a serial port by path, falling back to VID/PID discovery on retries
#[derive(Debug, Clone)]
pub struct SerialOpener {
    /// Serial port path
    pub path: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Per-read timeout
    pub read_timeout: Duration,
    /// Optional reopen-by-VID/PID policy
    pub reopen: Option<ReopenPolicy>,
}

impl SerialOpener {
    /// Opener with default baud rate and read timeout
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: DEFAULT_READ_TIMEOUT,
            reopen: None,
        }
    }

    /// Set the baud rate
    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set the per-read timeout
    pub fn read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Reopen by VID/PID on attempts after the first
    pub fn reopen(mut self, policy: ReopenPolicy) -> Self {
        self.reopen = Some(policy);
        self
    }
}

impl ChannelOpener for SerialOpener {
    fn open(&mut self, attempt: u32) -> Result<Box<dyn Channel>, ProtocolError> {
        let port = match self.reopen {
            Some(policy) if attempt > 1 => {
                tracing::info!("reopening by VID:PID {} (attempt {})", policy.id, attempt);
                reopen_by_vid_pid(policy.id, policy.wait, self.baud_rate, self.read_timeout)?
            }
            _ => open_port(&self.path, self.baud_rate, self.read_timeout)?,
        };
        Ok(Box::new(SerialChannel::new(port)))
    }
}

/// Result of a single attempt
#[derive(Debug)]
pub enum AttemptOutcome {
    /// At least one valid frame arrived
    Frames(Vec<Frame>),
    /// Nothing valid arrived before the deadline
    Silent,
    /// The transport failed
    Failed(ProtocolError),
}

/// Send a command and collect every valid frame that arrives within
/// `config.overall_wait`, retrying up to `config.retries` extra times.
///
/// Frames are returned regardless of command id; filtering is up to the
/// caller. An empty list means the receiver never answered. A transport
/// error is returned only when it is what ended the final attempt, or when
/// the device could not be found at all.
pub fn send_and_receive(
    opener: &mut dyn ChannelOpener,
    request: &CommandRequest,
    config: &ExchangeConfig,
) -> Result<Vec<Frame>, ProtocolError> {
    let encoded = request.encode()?;
    let attempts = config.retries.saturating_add(1);

    for attempt in 1..=attempts {
        let outcome = run_attempt(opener, attempt, &encoded, config);

        let last_error = match outcome {
            AttemptOutcome::Frames(frames) => return Ok(frames),
            AttemptOutcome::Silent => None,
            AttemptOutcome::Failed(ProtocolError::DeviceNotFound(id)) => {
                return Err(ProtocolError::DeviceNotFound(id));
            }
            AttemptOutcome::Failed(e) => {
                tracing::warn!("attempt {}/{} failed: {}", attempt, attempts, e);
                Some(e)
            }
        };

        if attempt == attempts {
            return match last_error {
                Some(e) => Err(e),
                None => {
                    tracing::warn!("no response received before timeout");
                    Ok(Vec::new())
                }
            };
        }

        std::thread::sleep(RETRY_DELAY);
    }

    Ok(Vec::new())
}

fn run_attempt(
    opener: &mut dyn ChannelOpener,
    attempt: u32,
    encoded: &[u8],
    config: &ExchangeConfig,
) -> AttemptOutcome {
    let mut channel = match opener.open(attempt) {
        Ok(channel) => channel,
        Err(e) => return AttemptOutcome::Failed(e),
    };

    match exchange_once(channel.as_mut(), encoded, config) {
        Ok(frames) if frames.is_empty() => AttemptOutcome::Silent,
        Ok(frames) => AttemptOutcome::Frames(frames),
        Err(e) => AttemptOutcome::Failed(e),
    }
}

/// Write one encoded frame on an already-open channel and collect the
/// valid frames that arrive before the deadline.
///
/// A read error after at least one valid frame ends the window early and
/// still returns those frames; the command is not sent again.
pub fn exchange_once(
    channel: &mut dyn Channel,
    encoded: &[u8],
    config: &ExchangeConfig,
) -> Result<Vec<Frame>, ProtocolError> {
    if let Some(name) = channel.name() {
        tracing::debug!("connected to {}", name);
    }

    if config.pre_flush {
        channel.clear_buffers()?;
        drain(channel, config.drain_window, DrainMode::UntilIdle)?;
    }

    tracing::debug!("sent {} ({} bytes)", hexdump(encoded), encoded.len());
    channel.write_all(encoded)?;
    channel.flush()?;

    let deadline = Instant::now() + config.overall_wait;
    let mut parser = FrameParser::new();
    let batch = read_frames(channel, &mut parser, deadline);

    let frames: Vec<Frame> = batch
        .frames
        .iter()
        .filter_map(|raw| match decode(raw) {
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::warn!("skipping frame ({}): {} [{}]", e.code(), e, hexdump(raw));
                None
            }
        })
        .collect();

    match batch.error {
        Some(e) if frames.is_empty() => Err(e.into()),
        Some(e) => {
            tracing::warn!("read ended early after {} frame(s): {}", frames.len(), e);
            Ok(frames)
        }
        None => Ok(frames),
    }
}
