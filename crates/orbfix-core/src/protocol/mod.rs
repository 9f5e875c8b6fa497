//! RISE Protocol Communication
//!
//! Implements the RISE binary framing used by OrbFIX receivers, the serial
//! transport underneath it and the request/response exchange on top of it.
//!
//! Every frame is `RS | crc16 | subsystem | command | length | payload | \n`,
//! big-endian, with the CRC covering subsystem through payload.

mod error;
pub mod exchange;
pub mod frame;
pub mod interpret;
pub mod parser;
pub mod payload;
pub mod serial;
pub mod stream;

use std::time::Duration;

pub use error::{DecodeError, ProtocolError};
pub use exchange::{
    send_and_receive, AttemptOutcome, ChannelOpener, CommandRequest, ExchangeConfig, ReopenPolicy,
    SerialOpener,
};
pub use frame::{crc16_ccitt, decode, encode, frame_command_id, Frame, PayloadBuilder};
pub use interpret::{Interpretation, InterpreterRegistry, PayloadInterpreter};
pub use parser::{FrameParser, ParserState};
pub use serial::{find_by_vid_pid, list_ports, open_port, PortInfo, VidPid};
pub use stream::{Channel, FrameBatch, SerialChannel};

/// First sync byte (`'R'`)
pub const SYNC1: u8 = 0x52;

/// Second sync byte (`'S'`)
pub const SYNC2: u8 = 0x53;

/// End-of-line terminator closing every frame
pub const EOL: u8 = 0x0A;

/// Header size: sync(2) + crc(2) + subsystem(1) + command(2) + length(2)
pub const HEADER_LEN: usize = 9;

/// Maximum size of a frame the parser will assemble
pub const MAX_MESSAGE_SIZE: usize = 2048;

/// Largest payload `encode` accepts
pub const MAX_PAYLOAD_LEN: usize = MAX_MESSAGE_SIZE - HEADER_LEN - 1;

/// Control subsystem id
pub const CTL_SUBSYSTEM_ID: u8 = 0x7A;

/// GNSS engine subsystem ids
pub const GNSS_SUBSYSTEM_IDS: [u8; 3] = [0x6A, 0x6B, 0x6C];

/// Default baud rate for the RS-422 link
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default per-call serial read timeout
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Default overall receive window for one command
pub const DEFAULT_OVERALL_WAIT: Duration = Duration::from_secs(2);

/// Check whether a subsystem id is one the receiver answers on
pub fn is_known_subsystem(id: u8) -> bool {
    id == CTL_SUBSYSTEM_ID || GNSS_SUBSYSTEM_IDS.contains(&id)
}
