//! The control-channel frame codec.
//!
//! A single ordered stream of typed JSON frames carried over a
//! message-oriented duplex transport (a WebSocket on both ends of this
//! workspace, though the codec itself doesn't know that). Frames share a
//! `type` discriminator and are encoded with `serde`'s internally-tagged
//! enum representation.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind, Result};

/// Minimum protocol version this codec accepts from a peer.
pub const MIN_VERSION: &str = "1.0";

/// Default maximum frame size, in bytes, before the connection is closed
/// with `FRAME_TOO_LARGE`.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Init {
        version: String,
        local_url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },
    TunnelCreated {
        tunnel_id: String,
        subdomain: String,
        public_url: String,
        #[serde(default = "active_status")]
        status: String,
    },
    Error {
        code: ErrorKind,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    Request {
        request_id: String,
        method: String,
        path: String,
        headers: HashMap<String, Vec<String>>,
        body_b64: String,
        remote_addr: String,
        received_at: String,
    },
    Response {
        request_id: String,
        status: u16,
        headers: HashMap<String, Vec<String>>,
        body_b64: String,
        duration_ms: u64,
    },
    Ping,
    Pong,
}

fn active_status() -> String {
    "active".to_string()
}

impl Frame {
    /// Encode the frame as the JSON text that goes out over the wire.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a frame from wire text, rejecting it only when the frame
    /// carries an incompatible version (forward-compatible otherwise:
    /// unknown fields are ignored by serde's default behavior).
    pub fn decode(text: &str) -> Result<Self> {
        let frame: Frame = serde_json::from_str(text)?;
        if let Frame::Init { version, .. } = &frame {
            if !is_compatible_version(version) {
                return Err(Error::wire(
                    ErrorKind::Protocol,
                    format!("unsupported protocol version {version}"),
                ));
            }
        }
        Ok(frame)
    }

    /// Decode, enforcing the frame-size cap before deserialization is
    /// even attempted — the point is to never let an oversized frame's
    /// bytes get buffered past the cap.
    pub fn decode_checked(bytes: &[u8], max_frame_size: usize) -> Result<Self> {
        if bytes.len() > max_frame_size {
            return Err(Error::wire(
                ErrorKind::FrameTooLarge,
                format!("frame of {} bytes exceeds cap of {max_frame_size}", bytes.len()),
            ));
        }
        let text = std::str::from_utf8(bytes)
            .map_err(|e| Error::wire(ErrorKind::Protocol, e.to_string()))?;
        Self::decode(text)
    }
}

fn is_compatible_version(version: &str) -> bool {
    // Only major.minor are compared; a client on a newer minor is still
    // compatible as long as the major matches.
    let parse = |v: &str| -> Option<u32> { v.split('.').next()?.parse().ok() };
    match (parse(version), parse(MIN_VERSION)) {
        (Some(major), Some(min_major)) => major >= min_major,
        _ => false,
    }
}

/// Encode body bytes for a `request`/`response` frame.
pub fn encode_body(body: &[u8]) -> String {
    BASE64.encode(body)
}

/// Decode a frame's `body_b64` field back into raw bytes.
pub fn decode_body(body_b64: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(body_b64)
        .map_err(|e| Error::wire(ErrorKind::Protocol, format!("invalid body encoding: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_request_frame() {
        let frame = Frame::Request {
            request_id: "r1".into(),
            method: "GET".into(),
            path: "/ping".into(),
            headers: HashMap::new(),
            body_b64: encode_body(b"hello"),
            remote_addr: "127.0.0.1".into(),
            received_at: "2024-01-01T00:00:00Z".into(),
        };
        let text = frame.encode().unwrap();
        let decoded = Frame::decode(&text).unwrap();
        match decoded {
            Frame::Request { body_b64, .. } => {
                assert_eq!(decode_body(&body_b64).unwrap(), b"hello");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let text = r#"{"type":"ping","extra_future_field":123}"#;
        assert!(matches!(Frame::decode(text).unwrap(), Frame::Ping));
    }

    #[test]
    fn incompatible_version_is_rejected() {
        let frame = Frame::Init {
            version: "0.9".into(),
            local_url: "http://localhost:8080".into(),
            token: None,
        };
        let text = frame.encode().unwrap();
        assert!(Frame::decode(&text).is_err());
    }

    #[test]
    fn oversized_frame_is_rejected_before_parsing() {
        let huge = vec![b'a'; 64];
        let err = Frame::decode_checked(&huge, 8).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::FrameTooLarge));
    }
}
