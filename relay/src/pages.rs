//! Branded HTML error pages the gateway serves for error dispositions
//! that reach an end user's browser (as opposed to API error frames).

use uniroute_shared::error::ErrorKind;

/// Render a minimal branded error page for `status`. `detail` is a
/// short, safe-to-display reason string (already validated not to
/// contain the tunnel client's raw output).
pub fn render(status: u16, title: &str, detail: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{status} {title}</title>
<style>
body {{ font-family: -apple-system, sans-serif; background: #0b0d12; color: #e6e6e6;
       display: flex; align-items: center; justify-content: center; height: 100vh; margin: 0; }}
.card {{ text-align: center; max-width: 420px; }}
h1 {{ font-size: 72px; margin: 0; color: #5b8def; }}
p {{ color: #9aa0ab; }}
</style>
</head>
<body>
<div class="card">
<h1>{status}</h1>
<p>{title}</p>
<p>{detail}</p>
</div>
</body>
</html>"#
    )
}

/// Map a wire error kind to the HTTP status/title/detail the branded
/// page shows. `local_url` is the tunnel's configured origin, folded
/// into the detail text for the origin-down kinds so the page tells the
/// operator which local address the relay couldn't reach.
pub fn for_error_kind(kind: ErrorKind, local_url: &str) -> (u16, &'static str, String) {
    match kind {
        ErrorKind::Timeout | ErrorKind::OriginTimeout => (
            504,
            "Gateway Timeout",
            format!("The local server at {local_url} took too long to respond."),
        ),
        ErrorKind::ConnectionLost | ErrorKind::OriginConnectionRefused => (
            502,
            "Bad Gateway",
            format!("The tunnel client disconnected, or {local_url} refused the connection."),
        ),
        ErrorKind::OriginDns => (
            502,
            "Bad Gateway",
            format!("The address for {local_url} could not be resolved."),
        ),
        ErrorKind::OriginUnknown => (
            502,
            "Bad Gateway",
            format!("{local_url} returned an unexpected error."),
        ),
        ErrorKind::Backpressure => (
            503,
            "Service Unavailable",
            "This tunnel is overloaded, try again shortly.".to_string(),
        ),
        ErrorKind::RateLimited => (
            429,
            "Too Many Requests",
            "This tunnel has exceeded its request rate limit.".to_string(),
        ),
        ErrorKind::BadRequest => (400, "Bad Request", "The request could not be forwarded.".to_string()),
        ErrorKind::PayloadTooLarge => (
            413,
            "Payload Too Large",
            "The request body exceeds the configured limit.".to_string(),
        ),
        _ => (502, "Bad Gateway", "An unexpected error occurred.".to_string()),
    }
}

pub fn not_found(subdomain: &str) -> String {
    render(
        404,
        "Tunnel Not Found",
        &format!("No active tunnel is bound to '{subdomain}'."),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_status_and_detail() {
        let html = render(404, "Not Found", "nothing here");
        assert!(html.contains("404"));
        assert!(html.contains("nothing here"));
    }

    #[test]
    fn maps_known_kinds() {
        assert_eq!(for_error_kind(ErrorKind::Timeout, "http://localhost:3000").0, 504);
        assert_eq!(for_error_kind(ErrorKind::RateLimited, "http://localhost:3000").0, 429);
        assert_eq!(for_error_kind(ErrorKind::PayloadTooLarge, "http://localhost:3000").0, 413);
    }

    #[test]
    fn origin_down_detail_names_the_local_url() {
        let (_, _, detail) = for_error_kind(ErrorKind::OriginConnectionRefused, "http://localhost:4000");
        assert!(detail.contains("http://localhost:4000"));
    }
}
