//! Protocol errors

use thiserror::Error;

/// Reasons a complete byte buffer is not a valid RISE frame.
///
/// These are per-frame and recoverable: the caller skips the frame and
/// keeps parsing.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame too short: {len} bytes")]
    FrameTooShort { len: usize },

    #[error("length mismatch: header says {expected} bytes, buffer has {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("invalid sync or EOL bytes")]
    HeaderInvalid,

    #[error("unknown subsystem id 0x{0:02X}")]
    UnknownSubsystem(u8),

    #[error("CRC mismatch: expected {expected:#06x}, got {actual:#06x}")]
    CrcMismatch { expected: u16, actual: u16 },
}

impl DecodeError {
    /// Numeric code reported in logs and by older tooling
    pub fn code(&self) -> i32 {
        match self {
            DecodeError::FrameTooShort { .. } | DecodeError::LengthMismatch { .. } => -1,
            DecodeError::HeaderInvalid => -2,
            DecodeError::UnknownSubsystem(_) => -3,
            DecodeError::CrcMismatch { .. } => -4,
        }
    }
}

/// Errors that can occur during protocol communication
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Payload too large: {len} bytes (max {max})")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("Serial port error: {0}")]
    SerialError(String),

    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("USB device {0} not found")]
    DeviceNotFound(String),

    #[error("Response timeout")]
    Timeout,

    #[error("Monitor error: {0}")]
    Monitor(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether another attempt at the same exchange may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProtocolError::SerialError(_) | ProtocolError::IoError(_) | ProtocolError::Timeout
        )
    }
}

impl From<serialport::Error> for ProtocolError {
    fn from(e: serialport::Error) -> Self {
        match e.kind() {
            serialport::ErrorKind::NoDevice => ProtocolError::PortNotFound(e.description),
            _ => ProtocolError::SerialError(e.description),
        }
    }
}
