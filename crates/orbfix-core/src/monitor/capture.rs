//! Request-scoped capture of frames and text lines
//!
//! The reader thread offers everything it sees; only while a round trip is
//! open does anything stick. The server thread opens the window with
//! [`CaptureBuffer::begin`] and takes ownership of the result with
//! [`CaptureBuffer::finish`].

use std::sync::{Mutex, MutexGuard};

use crate::protocol::frame_command_id;

/// Upper bound on frames kept for one request
pub const MAX_CAPTURED_FRAMES: usize = 256;

/// Upper bound on text lines kept for one request
pub const MAX_CAPTURED_LINES: usize = 1024;

/// What one round trip collected
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Captured {
    /// Raw frames, in arrival order
    pub frames: Vec<Vec<u8>>,
    /// Non-telemetry text lines, in arrival order
    pub lines: Vec<String>,
}

#[derive(Debug, Default)]
struct CaptureState {
    active: bool,
    expected_command: Option<u16>,
    captured: Captured,
    dropped: usize,
}

/// Mutex-guarded, bounded capture window shared by the reader and server
#[derive(Debug, Default)]
pub struct CaptureBuffer {
    state: Mutex<CaptureState>,
}

impl CaptureBuffer {
    /// Create an inactive buffer
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CaptureState> {
        // Every update leaves the state consistent, so a poisoned lock is still usable
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Clear previous results and start capturing.
    ///
    /// With `expected_command` set, only frames carrying that command id are kept.
    pub fn begin(&self, expected_command: Option<u16>) {
        let mut state = self.lock();
        state.captured = Captured::default();
        state.dropped = 0;
        state.expected_command = expected_command;
        state.active = true;
    }

    /// Stop capturing and hand over what was collected
    pub fn finish(&self) -> Captured {
        let mut state = self.lock();
        state.active = false;
        state.expected_command = None;
        if state.dropped > 0 {
            tracing::warn!("capture overflowed, {} items dropped", state.dropped);
        }
        std::mem::take(&mut state.captured)
    }

    /// Whether a round trip is currently collecting
    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    /// Offer a raw frame; returns true if it was kept
    pub fn offer_frame(&self, raw: &[u8]) -> bool {
        let mut state = self.lock();
        if !state.active {
            return false;
        }
        if let Some(expected) = state.expected_command {
            if frame_command_id(raw) != Some(expected) {
                return false;
            }
        }
        if state.captured.frames.len() >= MAX_CAPTURED_FRAMES {
            state.dropped += 1;
            return false;
        }
        state.captured.frames.push(raw.to_vec());
        true
    }

    /// Offer a text line; returns true if it was kept
    pub fn offer_line(&self, line: &str) -> bool {
        let mut state = self.lock();
        if !state.active {
            return false;
        }
        if state.captured.lines.len() >= MAX_CAPTURED_LINES {
            state.dropped += 1;
            return true;
        }
        state.captured.lines.push(line.to_string());
        true
    }
}
