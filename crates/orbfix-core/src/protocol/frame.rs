//! Frame encoding/decoding
//!
//! Frame format (all multi-byte fields big-endian):
//! - 2 bytes: sync `R` `S`
//! - 2 bytes: CRC-16/CCITT-FALSE over subsystem..payload
//! - 1 byte: subsystem id
//! - 2 bytes: command id
//! - 2 bytes: payload length
//! - N bytes: payload
//! - 1 byte: EOL (`\n`)

use byteorder::{BigEndian, ByteOrder};

use super::{
    is_known_subsystem, DecodeError, ProtocolError, EOL, HEADER_LEN, MAX_PAYLOAD_LEN, SYNC1, SYNC2,
};

/// A decoded RISE frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Subsystem the frame is addressed to / came from
    pub subsystem_id: u8,
    /// Command id
    pub command_id: u16,
    /// CRC carried on the wire
    pub crc: u16,
    /// Payload bytes
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a frame, computing its CRC
    pub fn new(command_id: u16, subsystem_id: u8, payload: Vec<u8>) -> Self {
        let crc = frame_crc(subsystem_id, command_id, &payload);
        Self {
            subsystem_id,
            command_id,
            crc,
            payload,
        }
    }

    /// Decode a frame from raw bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        decode(data)
    }

    /// Encode the frame to raw bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self.command_id, self.subsystem_id, &self.payload)
    }

    /// Total size on the wire
    pub fn encoded_size(&self) -> usize {
        HEADER_LEN + self.payload.len() + 1
    }
}

/// CRC-16/CCITT-FALSE as used by RISE: poly 0x1021, init 0x0000, no
/// reflection, no final XOR. Computed bit by bit.
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    let mut crc: u16 = 0x0000;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

fn frame_crc(subsystem_id: u8, command_id: u16, payload: &[u8]) -> u16 {
    let mut covered = Vec::with_capacity(5 + payload.len());
    covered.push(subsystem_id);
    covered.extend_from_slice(&command_id.to_be_bytes());
    covered.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    covered.extend_from_slice(payload);
    crc16_ccitt(&covered)
}

/// Build a complete frame ready to be written to the wire
pub fn encode(command_id: u16, subsystem_id: u8, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::PayloadTooLarge {
            len: payload.len(),
            max: MAX_PAYLOAD_LEN,
        });
    }

    let crc = frame_crc(subsystem_id, command_id, payload);

    let mut bytes = vec![0u8; HEADER_LEN + payload.len() + 1];
    bytes[0] = SYNC1;
    bytes[1] = SYNC2;
    BigEndian::write_u16(&mut bytes[2..4], crc);
    bytes[4] = subsystem_id;
    BigEndian::write_u16(&mut bytes[5..7], command_id);
    BigEndian::write_u16(&mut bytes[7..9], payload.len() as u16);
    bytes[HEADER_LEN..HEADER_LEN + payload.len()].copy_from_slice(payload);
    bytes[HEADER_LEN + payload.len()] = EOL;

    Ok(bytes)
}

/// Decode and validate a complete frame.
///
/// Length, header, subsystem and CRC are checked in that order and each
/// failure is reported distinctly.
pub fn decode(buffer: &[u8]) -> Result<Frame, DecodeError> {
    if buffer.len() < HEADER_LEN + 1 {
        return Err(DecodeError::FrameTooShort { len: buffer.len() });
    }

    let crc = BigEndian::read_u16(&buffer[2..4]);
    let subsystem_id = buffer[4];
    let command_id = BigEndian::read_u16(&buffer[5..7]);
    let length = BigEndian::read_u16(&buffer[7..9]) as usize;

    let expected = HEADER_LEN + length + 1;
    if buffer.len() != expected {
        return Err(DecodeError::LengthMismatch {
            expected,
            actual: buffer.len(),
        });
    }

    if buffer[0] != SYNC1 || buffer[1] != SYNC2 || buffer[expected - 1] != EOL {
        return Err(DecodeError::HeaderInvalid);
    }

    if !is_known_subsystem(subsystem_id) {
        return Err(DecodeError::UnknownSubsystem(subsystem_id));
    }

    let payload = buffer[HEADER_LEN..HEADER_LEN + length].to_vec();
    let computed = frame_crc(subsystem_id, command_id, &payload);
    if computed != crc {
        return Err(DecodeError::CrcMismatch {
            expected: computed,
            actual: crc,
        });
    }

    Ok(Frame {
        subsystem_id,
        command_id,
        crc,
        payload,
    })
}

/// Peek the command id of a raw frame without validating it
pub fn frame_command_id(raw: &[u8]) -> Option<u16> {
    raw.get(5..7).map(BigEndian::read_u16)
}

/// Builder for big-endian command payloads
#[derive(Debug, Default)]
pub struct PayloadBuilder {
    payload: Vec<u8>,
}

impl PayloadBuilder {
    /// Create an empty payload builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a single byte
    pub fn byte(mut self, b: u8) -> Self {
        self.payload.push(b);
        self
    }

    /// Add a 16-bit value (big-endian)
    pub fn u16_be(mut self, value: u16) -> Self {
        let mut bytes = [0u8; 2];
        BigEndian::write_u16(&mut bytes, value);
        self.payload.extend_from_slice(&bytes);
        self
    }

    /// Add a 32-bit value (big-endian)
    pub fn u32_be(mut self, value: u32) -> Self {
        let mut bytes = [0u8; 4];
        BigEndian::write_u32(&mut bytes, value);
        self.payload.extend_from_slice(&bytes);
        self
    }

    /// Add a 64-bit value (big-endian)
    pub fn u64_be(mut self, value: u64) -> Self {
        let mut bytes = [0u8; 8];
        BigEndian::write_u64(&mut bytes, value);
        self.payload.extend_from_slice(&bytes);
        self
    }

    /// Add raw bytes
    pub fn bytes(mut self, data: &[u8]) -> Self {
        self.payload.extend_from_slice(data);
        self
    }

    /// Finish and return the payload bytes
    pub fn build(self) -> Vec<u8> {
        self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CTL_SUBSYSTEM_ID;

    #[test]
    fn test_crc16_check_value() {
        // Standard check input for the 0x1021/0x0000 variant (XMODEM)
        assert_eq!(crc16_ccitt(b"123456789"), 0x31C3);
        assert_eq!(crc16_ccitt(&[]), 0x0000);
    }

    #[test]
    fn test_encode_empty_payload_layout() {
        let bytes = encode(0x0001, 0x6A, &[]).unwrap();
        assert_eq!(
            bytes,
            vec![0x52, 0x53, 0x68, 0x42, 0x6A, 0x00, 0x01, 0x00, 0x00, 0x0A]
        );
    }

    #[test]
    fn test_encode_with_payload() {
        let bytes = encode(0x0005, CTL_SUBSYSTEM_ID, &[1, 2, 3]).unwrap();
        assert_eq!(bytes.len(), 13);
        assert_eq!(&bytes[2..4], &[0x98, 0x9C]);
        assert_eq!(&bytes[9..12], &[1, 2, 3]);
        assert_eq!(bytes[12], EOL);
    }

    #[test]
    fn test_encode_rejects_oversize_payload() {
        let payload = vec![0u8; MAX_PAYLOAD_LEN + 1];
        assert!(matches!(
            encode(0x0001, 0x6A, &payload),
            Err(ProtocolError::PayloadTooLarge { .. })
        ));
        assert!(encode(0x0001, 0x6A, &payload[..MAX_PAYLOAD_LEN]).is_ok());
    }

    #[test]
    fn test_frame_roundtrip() {
        let original = Frame::new(0x0007, 0x6B, vec![0xDE, 0xAD, 0xBE, 0xEF]);
        let encoded = original.to_bytes().unwrap();
        assert_eq!(encoded.len(), original.encoded_size());
        let decoded = Frame::from_bytes(&encoded).expect("Should decode successfully");
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_decode_too_short() {
        assert_eq!(
            decode(&[0x52, 0x53, 0, 0]),
            Err(DecodeError::FrameTooShort { len: 4 })
        );
    }

    #[test]
    fn test_decode_length_mismatch() {
        let mut bytes = encode(0x0001, 0x6A, &[1, 2]).unwrap();
        bytes.push(0x00);
        assert!(matches!(
            decode(&bytes),
            Err(DecodeError::LengthMismatch { expected: 12, actual: 13 })
        ));
    }

    #[test]
    fn test_decode_header_invalid() {
        let mut bytes = encode(0x0001, 0x6A, &[]).unwrap();
        bytes[0] = b'X';
        assert_eq!(decode(&bytes), Err(DecodeError::HeaderInvalid));

        let mut bytes = encode(0x0001, 0x6A, &[]).unwrap();
        let last = bytes.len() - 1;
        bytes[last] = b'\r';
        assert_eq!(decode(&bytes), Err(DecodeError::HeaderInvalid));
    }

    #[test]
    fn test_decode_unknown_subsystem() {
        let bytes = encode(0x0001, 0x10, &[]).unwrap();
        assert_eq!(decode(&bytes), Err(DecodeError::UnknownSubsystem(0x10)));
        assert_eq!(DecodeError::UnknownSubsystem(0x10).code(), -3);
    }

    #[test]
    fn test_crc_verification() {
        let mut encoded = encode(0x0002, 0x6C, &[1, 2, 3, 4, 5]).unwrap();

        // Corrupt a payload byte
        encoded[10] ^= 0xFF;

        let err = decode(&encoded).unwrap_err();
        assert!(matches!(err, DecodeError::CrcMismatch { .. }));
        assert_eq!(err.code(), -4);
    }

    #[test]
    fn test_frame_command_id_peek() {
        let bytes = encode(0xBEEF, 0x6A, &[]).unwrap();
        assert_eq!(frame_command_id(&bytes), Some(0xBEEF));
        assert_eq!(frame_command_id(&bytes[..6]), None);
    }

    #[test]
    fn test_payload_builder() {
        let payload = PayloadBuilder::new()
            .byte(0)
            .u16_be(3)
            .u64_be(0x1122_3344)
            .u32_be(0xAABBCCDD)
            .bytes(b"ok")
            .build();

        assert_eq!(payload.len(), 1 + 2 + 8 + 4 + 2);
        assert_eq!(&payload[1..3], &[0x00, 0x03]);
        assert_eq!(&payload[3..11], &[0, 0, 0, 0, 0x11, 0x22, 0x33, 0x44]);
        assert_eq!(&payload[15..], b"ok");
    }
}
