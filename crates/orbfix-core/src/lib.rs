//! # OrbFIX Core Library
//!
//! Host-side engine for the RISE command protocol spoken by OrbFIX GNSS
//! receivers over RS-422.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - RISE frame encoding/decoding with CRC-16 validation
//! - An incremental, byte-at-a-time frame parser for streaming serial input
//! - Serial transport with VID/PID discovery and reopen-on-reset
//! - Request/response exchange with drain, deadline and retry handling
//! - A monitor daemon that owns the port and proxies commands over a Unix socket
//! - Chunked, acknowledged firmware transfer
//!
//! ## Example
//!
//! ```rust,ignore
//! use orbfix_core::protocol::{send_and_receive, CommandRequest, ExchangeConfig, SerialOpener};
//!
//! let mut opener = SerialOpener::new("/dev/ttyUSB0");
//! let request = CommandRequest::new(0x0001, 0x6A, Vec::new());
//! let frames = send_and_receive(&mut opener, &request, &ExchangeConfig::default())?;
//! for frame in frames {
//!     println!("{:04X}: {:02X?}", frame.command_id, frame.payload);
//! }
//! ```

pub mod commander;
pub mod firmware;
#[cfg(unix)]
pub mod monitor;
pub mod protocol;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::commander::{Commander, CommanderConfig};
    pub use crate::firmware::{FirmwareUploader, TransferConfig, TransferError, TransferPlan};
    #[cfg(unix)]
    pub use crate::monitor::{Monitor, MonitorClient, MonitorConfig};
    pub use crate::protocol::{
        decode, encode, send_and_receive, Channel, CommandRequest, DecodeError, ExchangeConfig,
        Frame, FrameParser, Interpretation, InterpreterRegistry, PayloadInterpreter,
        ProtocolError, SerialOpener,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
