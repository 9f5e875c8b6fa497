//! Incremental frame parser
//!
//! A byte-at-a-time state machine that reassembles RISE frames from a
//! streaming source. Noise before a frame is skipped until the first sync
//! byte shows up, so the parser resynchronises on its own.

use super::{EOL, HEADER_LEN, MAX_MESSAGE_SIZE, SYNC1, SYNC2};

/// Parser states, in wire order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    /// Hunting for `R`
    WaitSync1,
    /// Expecting `S`
    WaitSync2,
    /// CRC high byte
    ReadCrc0,
    /// CRC low byte
    ReadCrc1,
    /// Subsystem id
    ReadSubsystem,
    /// Command id high byte
    ReadCmd0,
    /// Command id low byte
    ReadCmd1,
    /// Length high byte
    ReadLen0,
    /// Length low byte
    ReadLen1,
    /// Payload bytes
    ReadPayload,
    /// Trailing EOL
    ReadEol,
}

/// Incremental RISE decoder state.
///
/// One instance per byte stream. After [`push`](Self::push) reports a
/// complete frame, the bytes stay in [`buffer`](Self::buffer) only until the
/// next call, so copy them out first (or use [`take_frame`](Self::take_frame)).
#[derive(Debug, Clone)]
pub struct FrameParser {
    state: ParserState,
    buffer: Vec<u8>,
    expected_length: usize,
    max_message_size: usize,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameParser {
    /// Create a parser bounded by [`MAX_MESSAGE_SIZE`]
    pub fn new() -> Self {
        Self::with_max_size(MAX_MESSAGE_SIZE)
    }

    /// Create a parser with a custom frame size limit
    pub fn with_max_size(max_message_size: usize) -> Self {
        Self {
            state: ParserState::WaitSync1,
            buffer: Vec::with_capacity(max_message_size + 1),
            expected_length: 0,
            max_message_size,
        }
    }

    /// Current FSM state
    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Bytes of the frame most recently completed (or in progress)
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Return to [`ParserState::WaitSync1`], discarding any partial frame
    pub fn reset(&mut self) {
        self.state = ParserState::WaitSync1;
        self.expected_length = 0;
    }

    /// Process one byte.
    ///
    /// Returns 0 while the frame is incomplete (or was just discarded), or
    /// the total frame length once the EOL byte arrives.
    pub fn push(&mut self, byte: u8) -> usize {
        match self.state {
            ParserState::WaitSync1 => {
                if byte == SYNC1 {
                    self.buffer.clear();
                    self.buffer.push(byte);
                    self.state = ParserState::WaitSync2;
                }
            }
            ParserState::WaitSync2 => {
                if byte == SYNC2 {
                    self.buffer.push(byte);
                    self.state = ParserState::ReadCrc0;
                } else {
                    // The offending byte is dropped, not retried as sync1
                    self.reset();
                }
            }
            ParserState::ReadCrc0 => self.advance(byte, ParserState::ReadCrc1),
            ParserState::ReadCrc1 => self.advance(byte, ParserState::ReadSubsystem),
            ParserState::ReadSubsystem => self.advance(byte, ParserState::ReadCmd0),
            ParserState::ReadCmd0 => self.advance(byte, ParserState::ReadCmd1),
            ParserState::ReadCmd1 => self.advance(byte, ParserState::ReadLen0),
            ParserState::ReadLen0 => {
                self.expected_length = (byte as usize) << 8;
                self.advance(byte, ParserState::ReadLen1);
            }
            ParserState::ReadLen1 => {
                self.buffer.push(byte);
                self.expected_length |= byte as usize;

                if HEADER_LEN + self.expected_length > self.max_message_size {
                    tracing::debug!(
                        "parser: length {} exceeds max message size, resyncing",
                        self.expected_length
                    );
                    self.reset();
                    return 0;
                }

                self.state = if self.expected_length == 0 {
                    ParserState::ReadEol
                } else {
                    ParserState::ReadPayload
                };
            }
            ParserState::ReadPayload => {
                self.buffer.push(byte);
                if self.buffer.len() == HEADER_LEN + self.expected_length {
                    self.state = ParserState::ReadEol;
                }
            }
            ParserState::ReadEol => {
                self.buffer.push(byte);
                if byte != EOL {
                    self.reset();
                    return 0;
                }
                let frame_len = self.buffer.len();
                self.reset();
                return frame_len;
            }
        }
        0
    }

    /// Push one byte and, when it completes a frame, return an owned copy
    pub fn take_frame(&mut self, byte: u8) -> Option<Vec<u8>> {
        match self.push(byte) {
            0 => None,
            len => Some(self.buffer[..len].to_vec()),
        }
    }

    /// Push a chunk of bytes and collect every frame it completes
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        bytes.iter().filter_map(|&b| self.take_frame(b)).collect()
    }

    fn advance(&mut self, byte: u8, next: ParserState) {
        self.buffer.push(byte);
        self.state = next;
    }
}
