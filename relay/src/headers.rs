//! Hop-by-hop header stripping and `X-Forwarded-*` injection.
//!
//! Operates on the multi-valued `HashMap<String, Vec<String>>` header
//! shape the wire protocol carries, and strips the headers RFC 7230
//! §6.1 marks hop-by-hop (these must never be tunnelled through a
//! proxy).

use std::collections::HashMap;

/// Headers that apply only to a single transport hop and must not be
/// forwarded across the relay.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub type Headers = HashMap<String, Vec<String>>;

/// Strip hop-by-hop headers before a request crosses the relay, in
/// either direction.
pub fn strip_hop_by_hop(headers: &mut Headers) {
    headers.retain(|k, _| !HOP_BY_HOP.contains(&k.to_ascii_lowercase().as_str()));
}

/// Inject the standard forwarding headers into a request before it is
/// framed and sent to the tunnel client.
pub fn inject_forwarded(headers: &mut Headers, client_ip: &str, forwarded_host: &str) {
    set(headers, "X-Forwarded-For", client_ip);
    set(headers, "X-Forwarded-Proto", "https");
    set(headers, "X-Forwarded-Host", forwarded_host);
    set(headers, "X-Real-IP", client_ip);
}

fn set(headers: &mut Headers, key: &str, value: &str) {
    headers.insert(key.to_string(), vec![value.to_string()]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_hop_by_hop_headers() {
        let mut headers = Headers::new();
        headers.insert("Connection".into(), vec!["keep-alive".into()]);
        headers.insert("Content-Type".into(), vec!["text/plain".into()]);
        strip_hop_by_hop(&mut headers);
        assert!(!headers.contains_key("Connection"));
        assert!(headers.contains_key("Content-Type"));
    }

    #[test]
    fn injects_forwarded_headers() {
        let mut headers = Headers::new();
        inject_forwarded(&mut headers, "1.2.3.4", "demo.example.com");
        assert_eq!(headers.get("X-Forwarded-For").unwrap(), &vec!["1.2.3.4".to_string()]);
        assert_eq!(
            headers.get("X-Forwarded-Host").unwrap(),
            &vec!["demo.example.com".to_string()]
        );
    }
}
