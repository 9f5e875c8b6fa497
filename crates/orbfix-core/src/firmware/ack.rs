//! Acknowledgement frames

use byteorder::{BigEndian, ByteOrder};

use crate::protocol::decode;

/// What a response frame says about the frame just sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckVerdict {
    /// Accepted
    Ack { code: u16, message: String },
    /// Rejected by the receiver
    Nak {
        status: u8,
        code: u16,
        message: String,
    },
    /// Not a usable acknowledgement
    Malformed(String),
}

impl AckVerdict {
    /// True for [`AckVerdict::Ack`]
    pub fn is_ack(&self) -> bool {
        matches!(self, AckVerdict::Ack { .. })
    }
}

/// Classify a raw response frame.
///
/// An empty payload is an ACK. Three or more bytes read as
/// `status, code, message`; any non-zero status is a NAK. One or two bytes,
/// or a frame that does not decode, is malformed.
pub fn parse_ack(raw: &[u8]) -> AckVerdict {
    let frame = match decode(raw) {
        Ok(frame) => frame,
        Err(e) => return AckVerdict::Malformed(format!("ack decode error: {}", e)),
    };

    match frame.payload.as_slice() {
        [] => AckVerdict::Ack {
            code: 0,
            message: String::new(),
        },
        [status, code_hi, code_lo, message @ ..] => {
            let code = BigEndian::read_u16(&[*code_hi, *code_lo]);
            let message = String::from_utf8_lossy(message).into_owned();
            if *status == 0 {
                AckVerdict::Ack { code, message }
            } else {
                AckVerdict::Nak {
                    status: *status,
                    code,
                    message,
                }
            }
        }
        short => AckVerdict::Malformed(format!("ack too short ({} bytes)", short.len())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firmware::FILE_TRANSFER_CMD;
    use crate::protocol::encode;

    fn ack_frame(payload: &[u8]) -> Vec<u8> {
        encode(FILE_TRANSFER_CMD, 0x6A, payload).unwrap()
    }

    #[test]
    fn test_empty_payload_is_ack() {
        assert_eq!(
            parse_ack(&ack_frame(&[])),
            AckVerdict::Ack {
                code: 0,
                message: String::new()
            }
        );
    }

    #[test]
    fn test_status_zero_is_ack() {
        let verdict = parse_ack(&ack_frame(&[0, 0x01, 0x02, b'o', b'k']));
        assert_eq!(
            verdict,
            AckVerdict::Ack {
                code: 0x0102,
                message: "ok".to_string()
            }
        );
        assert!(verdict.is_ack());
    }

    #[test]
    fn test_nonzero_status_is_nak() {
        let verdict = parse_ack(&ack_frame(&[2, 0x00, 0x07]));
        assert_eq!(
            verdict,
            AckVerdict::Nak {
                status: 2,
                code: 7,
                message: String::new()
            }
        );
        assert!(!verdict.is_ack());
    }

    #[test]
    fn test_short_payload_is_malformed() {
        assert!(matches!(
            parse_ack(&ack_frame(&[0])),
            AckVerdict::Malformed(_)
        ));
        assert!(matches!(
            parse_ack(&ack_frame(&[0, 1])),
            AckVerdict::Malformed(_)
        ));
    }

    #[test]
    fn test_bad_crc_is_malformed() {
        let mut raw = ack_frame(&[]);
        raw[2] ^= 0xFF;
        assert!(matches!(parse_ack(&raw), AckVerdict::Malformed(_)));
    }
}
