//! Proxy socket messages
//!
//! One newline-terminated JSON object per direction per connection.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::protocol::{DEFAULT_OVERALL_WAIT, MAX_PAYLOAD_LEN};

/// Longest capture window a client may ask for
pub const MAX_WAIT: Duration = Duration::from_secs(60);

/// Why a request was rejected before touching the port
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("bad json: {0}")]
    JsonMalformed(String),

    #[error("bad fields: {0}")]
    FieldInvalid(String),
}

fn default_wait() -> f64 {
    DEFAULT_OVERALL_WAIT.as_secs_f64()
}

fn default_decode() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize)]
struct WireRequest {
    cmd_id: u64,
    sysid: u64,
    #[serde(default)]
    payload_hex: String,
    #[serde(default = "default_wait")]
    wait: f64,
    #[serde(default = "default_decode")]
    decode: bool,
}

/// A validated command request
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyRequest {
    /// Command id
    pub command_id: u16,
    /// Target subsystem
    pub subsystem_id: u8,
    /// Raw payload
    pub payload: Vec<u8>,
    /// Capture window after the write
    pub wait: Duration,
    /// Render captured frames through the interpreter registry
    pub decode: bool,
}

impl ProxyRequest {
    /// Request with the default wait and decoding enabled
    pub fn new(command_id: u16, subsystem_id: u8, payload: Vec<u8>) -> Self {
        Self {
            command_id,
            subsystem_id,
            payload,
            wait: DEFAULT_OVERALL_WAIT,
            decode: true,
        }
    }

    /// Parse and validate one request line
    pub fn parse(line: &str) -> Result<Self, RequestError> {
        let value: serde_json::Value = serde_json::from_str(line.trim())
            .map_err(|e| RequestError::JsonMalformed(e.to_string()))?;
        let wire: WireRequest = serde_json::from_value(value)
            .map_err(|e| RequestError::FieldInvalid(e.to_string()))?;

        let command_id = u16::try_from(wire.cmd_id).map_err(|_| {
            RequestError::FieldInvalid(format!("cmd_id {} exceeds 0xFFFF", wire.cmd_id))
        })?;
        let subsystem_id = u8::try_from(wire.sysid).map_err(|_| {
            RequestError::FieldInvalid(format!("sysid {} exceeds 0xFF", wire.sysid))
        })?;

        let clean: String = wire
            .payload_hex
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let payload = hex::decode(&clean)
            .map_err(|e| RequestError::FieldInvalid(format!("payload_hex: {}", e)))?;
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(RequestError::FieldInvalid(format!(
                "payload is {} bytes (max {})",
                payload.len(),
                MAX_PAYLOAD_LEN
            )));
        }

        if !wire.wait.is_finite() || wire.wait < 0.0 || wire.wait > MAX_WAIT.as_secs_f64() {
            return Err(RequestError::FieldInvalid(format!(
                "wait must be between 0 and {} seconds, got {}",
                MAX_WAIT.as_secs(),
                wire.wait
            )));
        }

        Ok(Self {
            command_id,
            subsystem_id,
            payload,
            wait: Duration::from_secs_f64(wire.wait),
            decode: wire.decode,
        })
    }

    /// Serialise as a request line, including the trailing newline
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let wire = WireRequest {
            cmd_id: u64::from(self.command_id),
            sysid: u64::from(self.subsystem_id),
            payload_hex: hex::encode(&self.payload),
            wait: self.wait.as_secs_f64(),
            decode: self.decode,
        };
        let mut line = serde_json::to_string(&wire)?;
        line.push('\n');
        Ok(line)
    }
}

/// Reply to a proxy request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyResponse {
    /// Whether the request reached the port
    pub ok: bool,
    /// Captured frames, lowercase hex
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frames_hex: Option<Vec<String>>,
    /// Captured text lines
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_lines: Option<Vec<String>>,
    /// Rendered frames, one line each
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human: Option<String>,
    /// Failure reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProxyResponse {
    /// Successful round trip
    pub fn success(frames_hex: Vec<String>, text_lines: Vec<String>, human: String) -> Self {
        Self {
            ok: true,
            frames_hex: Some(frames_hex),
            text_lines: Some(text_lines),
            human: Some(human),
            error: None,
        }
    }

    /// Failed request
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            frames_hex: None,
            text_lines: None,
            human: None,
            error: Some(error.into()),
        }
    }

    /// Decode `frames_hex` back to raw frames
    pub fn raw_frames(&self) -> Result<Vec<Vec<u8>>, hex::FromHexError> {
        self.frames_hex
            .iter()
            .flatten()
            .map(hex::decode)
            .collect()
    }

    /// Serialise as a reply line, including the trailing newline
    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"ok":false,"error":"{}"}}"#, e));
        line.push('\n');
        line
    }
}

impl From<RequestError> for ProxyResponse {
    fn from(e: RequestError) -> Self {
        Self::failure(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_defaults() {
        let req = ProxyRequest::parse(r#"{"cmd_id": 1, "sysid": 106}"#).unwrap();
        assert_eq!(req, ProxyRequest::new(0x0001, 0x6A, Vec::new()));
        assert_eq!(req.wait, Duration::from_secs(2));
        assert!(req.decode);
    }

    #[test]
    fn test_parse_full() {
        let req = ProxyRequest::parse(
            r#"{"cmd_id": 5, "sysid": 122, "payload_hex": "01 02ff", "wait": 0.5, "decode": false}"#,
        )
        .unwrap();
        assert_eq!(req.command_id, 5);
        assert_eq!(req.subsystem_id, 0x7A);
        assert_eq!(req.payload, vec![0x01, 0x02, 0xFF]);
        assert_eq!(req.wait, Duration::from_millis(500));
        assert!(!req.decode);
    }

    #[test]
    fn test_bad_json() {
        let err = ProxyRequest::parse("{not json").unwrap_err();
        assert!(matches!(err, RequestError::JsonMalformed(_)));
        assert!(err.to_string().starts_with("bad json: "));
    }

    #[test]
    fn test_bad_fields() {
        let cases = [
            r#"{"sysid": 106}"#,
            r#"{"cmd_id": 65536, "sysid": 106}"#,
            r#"{"cmd_id": -1, "sysid": 106}"#,
            r#"{"cmd_id": 1, "sysid": 256}"#,
            r#"{"cmd_id": 1, "sysid": 106, "payload_hex": "abc"}"#,
            r#"{"cmd_id": 1, "sysid": 106, "payload_hex": "zz"}"#,
            r#"{"cmd_id": 1, "sysid": 106, "wait": -1.0}"#,
            r#"{"cmd_id": 1, "sysid": 106, "wait": 3600}"#,
        ];
        for case in cases {
            let err = ProxyRequest::parse(case).unwrap_err();
            assert!(
                err.to_string().starts_with("bad fields: "),
                "{} -> {}",
                case,
                err
            );
        }
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let line = format!(
            r#"{{"cmd_id": 1, "sysid": 106, "payload_hex": "{}"}}"#,
            "00".repeat(MAX_PAYLOAD_LEN + 1)
        );
        assert!(matches!(
            ProxyRequest::parse(&line),
            Err(RequestError::FieldInvalid(_))
        ));
    }

    #[test]
    fn test_request_line_parses_back() {
        let mut req = ProxyRequest::new(0x0004, 0x6B, vec![0xDE, 0xAD]);
        req.wait = Duration::from_millis(250);
        let line = req.to_line().unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(ProxyRequest::parse(&line).unwrap(), req);
    }

    #[test]
    fn test_response_shapes() {
        let ok = ProxyResponse::success(vec!["5253".into()], vec!["OK".into()], String::new());
        let value: serde_json::Value = serde_json::from_str(&ok.to_line()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"ok": true, "frames_hex": ["5253"], "text_lines": ["OK"], "human": ""})
        );

        let err = ProxyResponse::from(RequestError::FieldInvalid("cmd_id".into()));
        let value: serde_json::Value = serde_json::from_str(&err.to_line()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"ok": false, "error": "bad fields: cmd_id"})
        );
    }

    #[test]
    fn test_raw_frames() {
        let ok = ProxyResponse::success(vec!["0a0b".into()], vec![], String::new());
        assert_eq!(ok.raw_frames().unwrap(), vec![vec![0x0A, 0x0B]]);
        assert!(ProxyResponse::failure("x").raw_frames().unwrap().is_empty());
    }
}
