//! The public HTTP gateway: resolves a request's subdomain to a live
//! tunnel, frames it as a `request`, and waits for the matching
//! `response` frame, built on the registry/correlation/connection
//! seams instead of a single `HashMap<String, Tunnel>` behind one lock.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::warn;
use uniroute_shared::error::ErrorKind;
use uniroute_shared::protocol::{self, Frame};

use crate::correlation::wait_for_response;
use crate::headers as hdr;
use crate::log_export::LogExporter;
use crate::pages;
use crate::ratelimit::RateLimiter;
use crate::registry::TunnelRegistry;
use crate::stats::StatsObserver;
use crate::store::RequestLogRecord;

#[derive(Clone)]
pub struct GatewayState {
    pub registry: Arc<TunnelRegistry>,
    pub rate_limiter: Arc<RateLimiter>,
    pub stats: StatsObserver,
    pub log_exporter: LogExporter,
    pub domain: String,
    pub max_body_size: usize,
    pub request_deadline: Duration,
    /// Per-subdomain rate-limit overrides loaded from the tunnel
    /// presets file, keyed by subdomain.
    pub rate_limit_overrides: Arc<HashMap<String, crate::ratelimit::RateLimitConfig>>,
}

/// Maximum accepted request path length, in bytes.
pub const MAX_PATH_LEN: usize = 2048;
/// Maximum accepted total header size (names + values), in bytes.
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Extensions served as a static asset rather than the HTML branded
/// error page, paired with the `Content-Type` the stub response carries.
/// A request for `app.js` that hits a 502 must not come back as HTML —
/// a `<script>` tag blindly executing that body would be an XSS vector.
const ASSET_CONTENT_TYPES: &[(&str, &str)] = &[
    ("js", "application/javascript"),
    ("mjs", "application/javascript"),
    ("css", "text/css"),
    ("json", "application/json"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("svg", "image/svg+xml"),
    ("ico", "image/x-icon"),
    ("webp", "image/webp"),
    ("woff", "font/woff"),
    ("woff2", "font/woff2"),
    ("ttf", "font/ttf"),
    ("map", "application/json"),
    ("txt", "text/plain"),
];

/// The `Content-Type` to serve for a static-asset-shaped path's error
/// response, if its extension is recognized.
fn asset_content_type(path: &str) -> Option<&'static str> {
    let name = path.rsplit('/').next().unwrap_or(path);
    let (_, ext) = name.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    ASSET_CONTENT_TYPES
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, ct)| *ct)
}

/// Build the error response for `path`: a recognized static-asset
/// extension gets an empty, correctly-typed stub instead of the HTML
/// branded page, so embedding an error mid-asset-load can't inject
/// markup into a JS/CSS/image context.
fn error_response(status: u16, title: &str, detail: &str, path: &str) -> Response {
    let code = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    if let Some(content_type) = asset_content_type(path) {
        return (code, [("content-type", content_type)], Vec::new()).into_response();
    }
    (code, [("content-type", "text/html")], pages::render(status, title, detail)).into_response()
}

/// Reduce a request path to a canonical form before it's forwarded:
/// collapse repeated slashes, resolve `.`/`..` segments against the
/// tunnel's root rather than passing them through (a `..` that would
/// climb above the root is simply dropped, not forwarded), and drop a
/// trailing slash (except for the root). Applying this twice must be a
/// no-op — the gateway may be asked to re-sanitize a path it already
/// touched when retrying a request internally.
///
/// Rejects a path over `MAX_PATH_LEN` bytes or containing a NUL byte;
/// the caller turns either into a 400.
pub fn sanitize_path(path: &str) -> std::result::Result<String, ()> {
    if path.len() > MAX_PATH_LEN || path.as_bytes().contains(&0) {
        return Err(());
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }

    let mut out = String::from("/");
    out.push_str(&segments.join("/"));
    Ok(out)
}

/// Sum of header name + value bytes across every header on the
/// request, used to reject requests whose header block exceeds
/// `MAX_HEADER_BYTES` before they're framed and sent to the tunnel
/// client.
fn total_header_bytes(headers: &HeaderMap) -> usize {
    headers
        .iter()
        .map(|(name, value)| name.as_str().len() + value.as_bytes().len())
        .sum()
}

fn subdomain_from_host(host: &str, domain: &str) -> Option<String> {
    let suffix = format!(".{domain}");
    host.strip_suffix(&suffix).map(|s| s.to_string())
}

fn axum_headers_to_wire(headers: &HeaderMap) -> hdr::Headers {
    let mut out: hdr::Headers = HashMap::new();
    for (name, value) in headers.iter() {
        if let Ok(v) = value.to_str() {
            out.entry(name.as_str().to_string())
                .or_default()
                .push(v.to_string());
        }
    }
    out
}

fn wire_headers_to_response(builder: &mut axum::http::response::Builder, headers: &hdr::Headers) {
    if let Some(headers_mut) = builder.headers_mut() {
        for (k, values) in headers {
            for v in values {
                if let (Ok(name), Ok(value)) = (
                    axum::http::HeaderName::from_bytes(k.as_bytes()),
                    axum::http::HeaderValue::from_str(v),
                ) {
                    headers_mut.append(name, value);
                }
            }
        }
    }
}

pub async fn proxy_handler(
    State(state): State<GatewayState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: Request<Body>,
) -> Response {
    let start = Instant::now();
    let raw_path = req.uri().path().to_string();

    let host = req
        .headers()
        .get(axum::http::header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("")
        .to_string();

    let subdomain = match subdomain_from_host(&host, &state.domain) {
        Some(s) if !s.is_empty() => s,
        _ => {
            return (
                StatusCode::NOT_FOUND,
                [("content-type", "text/html")],
                pages::not_found(&host),
            )
                .into_response();
        }
    };

    let tunnel = match state.registry.lookup(&subdomain).await {
        Some(t) => t,
        None => {
            return (
                StatusCode::NOT_FOUND,
                [("content-type", "text/html")],
                pages::not_found(&subdomain),
            )
                .into_response();
        }
    };

    let override_config = state.rate_limit_overrides.get(&subdomain).copied();
    if let Some(_window) = state.rate_limiter.check(&tunnel.id, override_config).await {
        let (status, title, detail) = pages::for_error_kind(ErrorKind::RateLimited, &tunnel.local_url);
        state.stats.record(&tunnel.id, status, 0, 0, 0, false).await;
        return error_response(status, title, &detail, &raw_path);
    }

    if total_header_bytes(req.headers()) > MAX_HEADER_BYTES {
        let (status, title, detail) = pages::for_error_kind(ErrorKind::BadRequest, &tunnel.local_url);
        state.stats.record(&tunnel.id, status, 0, 0, 0, false).await;
        return error_response(status, title, &detail, &raw_path);
    }

    let method = req.method().to_string();
    let path = match sanitize_path(req.uri().path()) {
        Ok(p) => p,
        Err(()) => {
            let (status, title, detail) = pages::for_error_kind(ErrorKind::BadRequest, &tunnel.local_url);
            state.stats.record(&tunnel.id, status, 0, 0, 0, false).await;
            return error_response(status, title, &detail, &raw_path);
        }
    };
    let mut wire_headers = axum_headers_to_wire(req.headers());
    hdr::strip_hop_by_hop(&mut wire_headers);

    let remote_addr = peer.ip().to_string();
    hdr::inject_forwarded(&mut wire_headers, &remote_addr, &host);

    let body_bytes = match axum::body::to_bytes(req.into_body(), state.max_body_size).await {
        Ok(b) => b,
        Err(_) => {
            let (status, title, detail) = pages::for_error_kind(ErrorKind::PayloadTooLarge, &tunnel.local_url);
            state.stats.record(&tunnel.id, status, 0, 0, 0, false).await;
            return error_response(status, title, &detail, &raw_path);
        }
    };
    let bytes_in = body_bytes.len() as u64;

    let request_id = format!("req_{}", uuid_like());
    let frame = Frame::Request {
        request_id: request_id.clone(),
        method: method.clone(),
        path: path.clone(),
        headers: wire_headers,
        body_b64: protocol::encode_body(&body_bytes),
        remote_addr,
        received_at: chrono::Utc::now().to_rfc3339(),
    };

    let rx = tunnel.pending().reserve(request_id.clone());

    let remaining = state.request_deadline.saturating_sub(start.elapsed());
    if let Err(e) = tunnel.submit_with_deadline(frame, remaining).await {
        tunnel.pending().cancel(&request_id);
        let kind = e.kind().unwrap_or(ErrorKind::ConnectionLost);
        let (status, title, detail) = pages::for_error_kind(kind, &tunnel.local_url);
        state.stats.record(&tunnel.id, status, 0, bytes_in, 0, false).await;
        return error_response(status, title, &detail, &raw_path);
    }

    tunnel.record_request();

    let remaining = state.request_deadline.saturating_sub(start.elapsed());
    let response_frame = match wait_for_response(rx, remaining).await {
        Ok(frame) => frame,
        Err(e) => {
            tunnel.pending().cancel(&request_id);
            let kind = e.kind().unwrap_or(ErrorKind::OriginUnknown);
            let (status, title, detail) = pages::for_error_kind(kind, &tunnel.local_url);
            let latency_ms = start.elapsed().as_millis() as u64;
            state.stats.record(&tunnel.id, status, latency_ms, bytes_in, 0, false).await;
            return error_response(status, title, &detail, &raw_path);
        }
    };

    let Frame::Response {
        status,
        mut headers,
        body_b64,
        ..
    } = response_frame
    else {
        warn!("tunnel {} sent a non-response frame for {request_id}", tunnel.id);
        let (status, title, detail) = pages::for_error_kind(ErrorKind::Protocol, &tunnel.local_url);
        state.stats.record(&tunnel.id, status, 0, bytes_in, 0, false).await;
        return error_response(status, title, &detail, &raw_path);
    };

    hdr::strip_hop_by_hop(&mut headers);
    let body = protocol::decode_body(&body_b64).unwrap_or_default();
    let bytes_out = body.len() as u64;
    let latency_ms = start.elapsed().as_millis() as u64;

    state
        .stats
        .record(&tunnel.id, status, latency_ms, bytes_in, bytes_out, true)
        .await;

    state.log_exporter.log(RequestLogRecord {
        tunnel_id: tunnel.id.clone(),
        request_id: request_id.clone(),
        method,
        path,
        status,
        duration_ms: latency_ms,
        timestamp: chrono::Utc::now(),
    });

    let mut builder = Response::builder().status(StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY));
    wire_headers_to_response(&mut builder, &headers);
    builder
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn uuid_like() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("{now:x}{n:x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_collapses_repeated_slashes() {
        assert_eq!(sanitize_path("//a//b").unwrap(), "/a/b");
    }

    #[test]
    fn sanitize_drops_trailing_slash_except_root() {
        assert_eq!(sanitize_path("/a/b/").unwrap(), "/a/b");
        assert_eq!(sanitize_path("/").unwrap(), "/");
    }

    #[test]
    fn sanitize_is_idempotent() {
        let once = sanitize_path("//a//b//").unwrap();
        let twice = sanitize_path(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn sanitize_strips_traversal_segments() {
        assert_eq!(sanitize_path("/a/../b").unwrap(), "/b");
        assert_eq!(sanitize_path("/../../etc/passwd").unwrap(), "/etc/passwd");
        assert_eq!(sanitize_path("/a/./b").unwrap(), "/a/b");
    }

    #[test]
    fn sanitize_rejects_null_bytes() {
        assert!(sanitize_path("/a\0b").is_err());
    }

    #[test]
    fn sanitize_rejects_overlong_paths() {
        let long = format!("/{}", "a".repeat(MAX_PATH_LEN));
        assert!(sanitize_path(&long).is_err());
    }

    #[test]
    fn asset_extensions_get_their_own_content_type() {
        assert_eq!(asset_content_type("/static/app.js"), Some("application/javascript"));
        assert_eq!(asset_content_type("/static/app.css"), Some("text/css"));
        assert_eq!(asset_content_type("/api/widgets"), None);
    }

    #[test]
    fn subdomain_extraction() {
        assert_eq!(
            subdomain_from_host("demo.example.com", "example.com"),
            Some("demo".to_string())
        );
        assert_eq!(subdomain_from_host("example.com", "example.com"), None);
    }
}
