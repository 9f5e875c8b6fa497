//! Firmware transfer
//!
//! Streams a firmware bundle to the receiver on command `0x0005`: one
//! metadata frame announcing packet count, CRC32 and size, then one data
//! frame per chunk. Every frame must be acknowledged before the next one is
//! sent.
//!
//! ## Payloads (big-endian)
//!
//! | Frame | Layout |
//! |---|---|
//! | metadata | `0u8, total_packets: u16, checksum: u64, total_size: u64` |
//! | data | `1u8, index: u16, chunk...` |
//! | ack | empty, or `status: u8, code: u16, message...` (`status == 0` is OK) |

mod ack;
mod plan;
mod upload;

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::protocol::ProtocolError;

pub use ack::{parse_ack, AckVerdict};
pub use plan::TransferPlan;
pub use upload::{resolve_image_path, FirmwareUploader, TransferReport};

/// Command id carrying every transfer frame
pub const FILE_TRANSFER_CMD: u16 = 0x0005;

/// Largest encoded frame the receiver accepts during a transfer
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024;

/// Header plus EOL added by the frame encoder
pub const FRAME_OVERHEAD: usize = 10;

/// Status byte plus packet index at the start of every data payload
pub const PACKET_META_LEN: usize = 3;

/// Chunk size used when the frame limit leaves no room for data
pub const FALLBACK_CHUNK_SIZE: usize = 512;

/// Default time to wait for each acknowledgement
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_millis(2500);

/// Subsystem firmware bundles are addressed to by default
pub const DEFAULT_SUBSYSTEM_ID: u8 = 0x6A;

/// Bundle file name looked up when a directory is given
pub const IMAGE_FILE_NAME: &str = "OrbFixApp.zip";

/// Progress is logged every this many packets
pub const PROGRESS_INTERVAL: u16 = 32;

/// Status byte of the metadata payload
pub(crate) const STATUS_METADATA: u8 = 0;

/// Status byte of a data payload
pub(crate) const STATUS_DATA: u8 = 1;

/// Reasons a transfer stopped
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Firmware image is empty")]
    EmptyImage,

    #[error("Firmware image needs {packets} packets, more than a u16 index can address")]
    TooManyPackets { packets: usize },

    #[error("Firmware image not found: {0}")]
    ImageNotFound(PathBuf),

    #[error("No acknowledgement for {stage} (bytes seen: {bytes_seen})")]
    AckTimeout { stage: String, bytes_seen: usize },

    #[error("{stage} rejected: status {status}, code {code}: {message}")]
    AckNak {
        stage: String,
        status: u8,
        code: u16,
        message: String,
    },

    #[error("Malformed acknowledgement for {stage}: {reason}")]
    AckMalformed { stage: String, reason: String },

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    /// True when the receiver answered badly or not at all, as opposed to a
    /// local or transport failure
    pub fn is_ack_failure(&self) -> bool {
        matches!(
            self,
            TransferError::AckTimeout { .. }
                | TransferError::AckNak { .. }
                | TransferError::AckMalformed { .. }
        )
    }
}

/// Transfer settings
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Subsystem the frames are addressed to
    pub subsystem_id: u8,
    /// How long to wait for each acknowledgement
    pub ack_timeout: Duration,
    /// Largest encoded frame, sets the chunk size
    pub max_frame_size: usize,
    /// Resend a data chunk once before giving up
    pub retry_once: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            subsystem_id: DEFAULT_SUBSYSTEM_ID,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            retry_once: true,
        }
    }
}
