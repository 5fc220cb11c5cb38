//! Client-side handling of one `request` frame: forward to the local
//! origin, and translate the outcome into the `response`/`error` frame
//! sent back over the control channel.

use std::time::Duration;

use tracing::warn;
use uniroute_shared::error::ErrorKind;
use uniroute_shared::protocol::{self, Frame};

use crate::proxy;

/// Maximum time to wait for the local origin before reporting
/// `ORIGIN_TIMEOUT` back to the relay.
pub const ORIGIN_DEADLINE: Duration = Duration::from_secs(30);

/// Forward a decoded `request` frame to `local_host:local_port` and
/// build the matching `response` or `error` frame. Panics if `frame` is
/// not a `Frame::Request` — callers only invoke this after matching on
/// the frame type.
pub async fn handle_request(local_host: &str, local_port: u16, frame: Frame) -> Frame {
    let Frame::Request {
        request_id,
        method,
        path,
        headers,
        body_b64,
        ..
    } = frame
    else {
        panic!("handle_request called with a non-request frame");
    };

    let body = match protocol::decode_body(&body_b64) {
        Ok(b) => b,
        Err(e) => {
            return Frame::Error {
                code: ErrorKind::BadRequest,
                message: e.to_string(),
                request_id: Some(request_id),
            }
        }
    };

    let start = std::time::Instant::now();
    let result = tokio::time::timeout(
        ORIGIN_DEADLINE,
        proxy::forward_http(local_host, local_port, &method, &path, &headers, &body),
    )
    .await;

    match result {
        Ok(Ok(resp)) => Frame::Response {
            request_id,
            status: resp.status,
            headers: resp.headers,
            body_b64: protocol::encode_body(&resp.body),
            duration_ms: start.elapsed().as_millis() as u64,
        },
        Ok(Err(e)) => {
            warn!(request_id = %request_id, error = %e, "origin request failed");
            Frame::Error {
                code: classify_io_error(&e),
                message: e.to_string(),
                request_id: Some(request_id),
            }
        }
        Err(_) => Frame::Error {
            code: ErrorKind::OriginTimeout,
            message: format!("local origin did not respond within {:?}", ORIGIN_DEADLINE),
            request_id: Some(request_id),
        },
    }
}

fn classify_io_error(err: &anyhow::Error) -> ErrorKind {
    if let Some(io_err) = err.downcast_ref::<std::io::Error>() {
        return match io_err.kind() {
            std::io::ErrorKind::ConnectionRefused => ErrorKind::OriginConnectionRefused,
            std::io::ErrorKind::NotFound | std::io::ErrorKind::AddrNotAvailable => ErrorKind::OriginDns,
            std::io::ErrorKind::TimedOut => ErrorKind::OriginTimeout,
            _ => ErrorKind::OriginUnknown,
        };
    }
    ErrorKind::OriginUnknown
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn bad_body_encoding_reports_bad_request() {
        let frame = Frame::Request {
            request_id: "r1".into(),
            method: "GET".into(),
            path: "/".into(),
            headers: HashMap::new(),
            body_b64: "not valid base64!!".into(),
            remote_addr: "127.0.0.1".into(),
            received_at: "2024-01-01T00:00:00Z".into(),
        };
        let result = handle_request("127.0.0.1", 1, frame).await;
        match result {
            Frame::Error { code, request_id, .. } => {
                assert_eq!(code, ErrorKind::BadRequest);
                assert_eq!(request_id.as_deref(), Some("r1"));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn connection_refused_maps_to_origin_connection_refused() {
        // Port 0 on loopback reliably refuses; the kernel never listens there.
        let frame = Frame::Request {
            request_id: "r2".into(),
            method: "GET".into(),
            path: "/".into(),
            headers: HashMap::new(),
            body_b64: protocol::encode_body(b""),
            remote_addr: "127.0.0.1".into(),
            received_at: "2024-01-01T00:00:00Z".into(),
        };
        let result = handle_request("127.0.0.1", 1, frame).await;
        match result {
            Frame::Error { code, .. } => {
                assert!(matches!(code, ErrorKind::OriginConnectionRefused | ErrorKind::OriginUnknown));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}
