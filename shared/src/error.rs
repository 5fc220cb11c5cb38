//! Error taxonomy for uniroute.
//!
//! `ErrorKind` is the wire-level vocabulary carried in `error` frames
//! (`{type: "error", code, message, request_id?}`) and is what the public
//! gateway maps to an HTTP status. `Error` is the crate-internal error type
//! used by fallible operations; it wraps an `ErrorKind` plus lower-level
//! transport/IO failures.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Wire-level error codes, per the core's error handling design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    SubdomainTaken,
    InvalidSubdomain,
    SubdomainExhausted,
    Unauthorized,
    TokenExpired,
    Protocol,
    FrameTooLarge,
    Timeout,
    Cancelled,
    ConnectionLost,
    Backpressure,
    RateLimited,
    BadRequest,
    PayloadTooLarge,
    DuplicateResponse,
    #[serde(rename = "CONNECTION_REFUSED")]
    OriginConnectionRefused,
    #[serde(rename = "DNS")]
    OriginDns,
    #[serde(rename = "TIMEOUT")]
    OriginTimeout,
    #[serde(rename = "UNKNOWN")]
    OriginUnknown,
}

impl ErrorKind {
    /// The HTTP status the public gateway writes for this kind, where
    /// applicable (control-plane-only kinds return `None`).
    pub fn http_status(self) -> Option<u16> {
        use ErrorKind::*;
        match self {
            Timeout => Some(504),
            Cancelled => None, // the caller is already gone; nothing is written
            ConnectionLost => Some(502),
            Backpressure => Some(503),
            RateLimited => Some(429),
            BadRequest => Some(400),
            PayloadTooLarge => Some(413),
            OriginConnectionRefused | OriginDns | OriginTimeout | OriginUnknown => Some(502),
            SubdomainTaken | InvalidSubdomain | SubdomainExhausted | Unauthorized
            | TokenExpired | Protocol | FrameTooLarge | DuplicateResponse => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        use ErrorKind::*;
        match self {
            SubdomainTaken => "SUBDOMAIN_TAKEN",
            InvalidSubdomain => "INVALID_SUBDOMAIN",
            SubdomainExhausted => "SUBDOMAIN_EXHAUSTED",
            Unauthorized => "UNAUTHORIZED",
            TokenExpired => "TOKEN_EXPIRED",
            Protocol => "PROTOCOL",
            FrameTooLarge => "FRAME_TOO_LARGE",
            Timeout => "TIMEOUT",
            Cancelled => "CANCELLED",
            ConnectionLost => "CONNECTION_LOST",
            Backpressure => "BACKPRESSURE",
            RateLimited => "RATE_LIMITED",
            BadRequest => "BAD_REQUEST",
            PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            DuplicateResponse => "DUPLICATE_RESPONSE",
            OriginConnectionRefused => "CONNECTION_REFUSED",
            OriginDns => "DNS",
            OriginTimeout => "TIMEOUT",
            OriginUnknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{kind}: {message}")]
    Wire { kind: ErrorKind, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn wire(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error::Wire {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Error::Wire { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
