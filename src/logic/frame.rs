//! CAN frame record and line parser.
//!
//! A frame is the unit of work the whole pipeline operates on. Parsing is a
//! boundary concern: it never touches detector or baseline state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single observed CAN bus frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub timestamp: f64,
    pub can_id: String,
    pub dlc: u8,
    pub payload: Vec<u8>,
    #[serde(default)]
    pub is_attack: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Empty,
    MissingField(&'static str),
    BadTimestamp(String),
    BadCanId(String),
    BadDlc(String),
    BadPayload(String),
    DlcPayloadMismatch { dlc: u8, payload_len: usize },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Empty => write!(f, "empty line"),
            ParseError::MissingField(name) => write!(f, "missing field: {}", name),
            ParseError::BadTimestamp(s) => write!(f, "invalid timestamp: {}", s),
            ParseError::BadCanId(s) => write!(f, "invalid can_id: {}", s),
            ParseError::BadDlc(s) => write!(f, "invalid dlc: {}", s),
            ParseError::BadPayload(s) => write!(f, "invalid payload: {}", s),
            ParseError::DlcPayloadMismatch { dlc, payload_len } => write!(
                f,
                "dlc {} does not match payload length {}",
                dlc, payload_len
            ),
        }
    }
}

impl std::error::Error for ParseError {}

impl Frame {
    /// Normalizes `can_id` to the canonical `0x`-prefixed uppercase hex form.
    pub fn normalize_can_id(raw: &str) -> Result<String, ParseError> {
        let trimmed = raw.trim();
        let hex_part = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        if hex_part.is_empty() || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ParseError::BadCanId(raw.to_string()));
        }
        let value = u32::from_str_radix(hex_part, 16).map_err(|_| ParseError::BadCanId(raw.to_string()))?;
        Ok(format!("0x{:X}", value))
    }

    pub fn can_id_value(&self) -> Result<u32, ParseError> {
        let hex_part = self
            .can_id
            .strip_prefix("0x")
            .or_else(|| self.can_id.strip_prefix("0X"))
            .unwrap_or(&self.can_id);
        u32::from_str_radix(hex_part, 16).map_err(|_| ParseError::BadCanId(self.can_id.clone()))
    }

    /// MD5 hex digest of the payload bytes, matching the canonical
    /// `frame_data.payload_hash` field in the alert schema.
    pub fn payload_hash(&self) -> String {
        format!("{:x}", md5::compute(&self.payload))
    }

    pub fn payload_hex(&self) -> String {
        self.payload.iter().map(|b| format!("{:02X}", b)).collect()
    }

    fn validate(self) -> Result<Self, ParseError> {
        if self.payload.len() != self.dlc as usize {
            return Err(ParseError::DlcPayloadMismatch {
                dlc: self.dlc,
                payload_len: self.payload.len(),
            });
        }
        Ok(self)
    }

    /// Parses one line of the newline-delimited JSON frame log (§6.1).
    pub fn parse_json_line(line: &str) -> Result<Self, ParseError> {
        if line.trim().is_empty() {
            return Err(ParseError::Empty);
        }
        let raw: RawFrame =
            serde_json::from_str(line).map_err(|e| ParseError::BadPayload(e.to_string()))?;
        raw.into_frame()
    }
}

/// Intermediate shape tolerant of the hex/array payload encodings and
/// string/number timestamp and dlc encodings seen in frame logs.
#[derive(Debug, Deserialize)]
struct RawFrame {
    timestamp: serde_json::Value,
    can_id: String,
    dlc: serde_json::Value,
    payload: serde_json::Value,
    #[serde(default)]
    is_attack: bool,
}

impl RawFrame {
    fn into_frame(self) -> Result<Frame, ParseError> {
        let timestamp = self
            .timestamp
            .as_f64()
            .ok_or_else(|| ParseError::BadTimestamp(self.timestamp.to_string()))?;

        let dlc: u8 = match &self.dlc {
            serde_json::Value::Number(n) => n
                .as_u64()
                .and_then(|v| u8::try_from(v).ok())
                .ok_or_else(|| ParseError::BadDlc(self.dlc.to_string()))?,
            serde_json::Value::String(s) => {
                s.parse::<u8>().map_err(|_| ParseError::BadDlc(s.clone()))?
            }
            _ => return Err(ParseError::BadDlc(self.dlc.to_string())),
        };
        if dlc > 8 {
            return Err(ParseError::BadDlc(dlc.to_string()));
        }

        let payload = match &self.payload {
            serde_json::Value::String(s) => {
                parse_hex_string(s).ok_or_else(|| ParseError::BadPayload(s.clone()))?
            }
            serde_json::Value::Array(items) => {
                let mut bytes = Vec::with_capacity(items.len());
                for item in items {
                    let b = item
                        .as_u64()
                        .and_then(|v| u8::try_from(v).ok())
                        .ok_or_else(|| ParseError::BadPayload(self.payload.to_string()))?;
                    bytes.push(b);
                }
                bytes
            }
            _ => return Err(ParseError::BadPayload(self.payload.to_string())),
        };

        let can_id = Frame::normalize_can_id(&self.can_id)?;

        Frame {
            timestamp,
            can_id,
            dlc,
            payload,
            is_attack: self.is_attack,
        }
        .validate()
    }
}

/// Parses a contiguous hex string (with or without a `0x` prefix, with or
/// without whitespace between byte pairs) into bytes.
pub fn parse_hex_string(s: &str) -> Option<Vec<u8>> {
    let cleaned: String = s
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return Some(Vec::new());
    }
    if cleaned.len() % 2 != 0 {
        return None;
    }
    let mut out = Vec::with_capacity(cleaned.len() / 2);
    let bytes = cleaned.as_bytes();
    for chunk in bytes.chunks(2) {
        let pair = std::str::from_utf8(chunk).ok()?;
        out.push(u8::from_str_radix(pair, 16).ok()?);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_can_id_case_and_prefix() {
        assert_eq!(Frame::normalize_can_id("1a3").unwrap(), "0x1A3");
        assert_eq!(Frame::normalize_can_id("0X1a3").unwrap(), "0x1A3");
        assert_eq!(Frame::normalize_can_id("0x1A3").unwrap(), "0x1A3");
    }

    #[test]
    fn rejects_non_hex_can_id() {
        assert!(Frame::normalize_can_id("zzz").is_err());
    }

    #[test]
    fn parses_hex_payload_line() {
        let line = r#"{"timestamp": 1.5, "can_id": "0x100", "dlc": 2, "payload": "AABB"}"#;
        let frame = Frame::parse_json_line(line).unwrap();
        assert_eq!(frame.can_id, "0x100");
        assert_eq!(frame.payload, vec![0xAA, 0xBB]);
    }

    #[test]
    fn parses_array_payload_line() {
        let line = r#"{"timestamp": 1.5, "can_id": "0x100", "dlc": 2, "payload": [1, 2]}"#;
        let frame = Frame::parse_json_line(line).unwrap();
        assert_eq!(frame.payload, vec![1, 2]);
    }

    #[test]
    fn rejects_dlc_payload_mismatch() {
        let line = r#"{"timestamp": 1.5, "can_id": "0x100", "dlc": 3, "payload": "AABB"}"#;
        assert!(matches!(
            Frame::parse_json_line(line),
            Err(ParseError::DlcPayloadMismatch { .. })
        ));
    }

    #[test]
    fn payload_hash_is_md5_hex() {
        let frame = Frame {
            timestamp: 0.0,
            can_id: "0x100".into(),
            dlc: 0,
            payload: vec![],
            is_attack: false,
        };
        assert_eq!(frame.payload_hash(), format!("{:x}", md5::compute([])));
    }
}
