//! Hand-rolled HTTP/1.1 forwarding to the local origin.
//!
//! A raw-socket writer/reader rather than a pooled HTTP client: each
//! forwarded request is one-shot and short-lived, so a connection pool
//! buys nothing here.

use std::collections::HashMap;

use anyhow::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// The parsed HTTP/1.1 response read back from the local origin.
pub struct LocalResponse {
    pub status: u16,
    pub headers: HashMap<String, Vec<String>>,
    pub body: Vec<u8>,
}

/// Forward one request to `host:port`, preserving method, path, headers,
/// and body. Returns the parsed status/headers/body, or the `io::Error`
/// that stopped the exchange (connect refused, timeout via the caller's
/// own deadline, or a malformed response).
pub async fn forward_http(
    host: &str,
    port: u16,
    method: &str,
    path: &str,
    headers: &HashMap<String, Vec<String>>,
    body: &[u8],
) -> Result<LocalResponse> {
    let mut stream = TcpStream::connect((host, port)).await?;

    let mut request = format!("{method} {path} HTTP/1.1\r\nHost: {host}:{port}\r\n");
    for (key, values) in headers {
        for value in values {
            request.push_str(&format!("{key}: {value}\r\n"));
        }
    }
    if !body.is_empty() {
        request.push_str(&format!("Content-Length: {}\r\n", body.len()));
    }
    request.push_str("Connection: close\r\n\r\n");

    stream.write_all(request.as_bytes()).await?;
    if !body.is_empty() {
        stream.write_all(body).await?;
    }

    read_response(&mut stream).await
}

async fn read_response(stream: &mut TcpStream) -> Result<LocalResponse> {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 8192];
    let mut header_end = None;

    loop {
        let n = stream.read(&mut tmp).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&tmp[..n]);
        if header_end.is_none() {
            if let Some(pos) = find_header_end(&buf) {
                header_end = Some(pos);
                break;
            }
        }
    }

    let Some(hend) = header_end else {
        return Ok(LocalResponse {
            status: 200,
            headers: HashMap::new(),
            body: buf,
        });
    };

    let header_bytes = &buf[..hend];
    let mut lines = header_bytes
        .split(|b| *b == b'\r' || *b == b'\n')
        .filter(|l| !l.is_empty());
    let status_line = lines.next().unwrap_or(&[]);
    let status = parse_status_code(status_line).unwrap_or(502);

    let mut response_headers: HashMap<String, Vec<String>> = HashMap::new();
    let mut content_length: Option<usize> = None;
    let mut chunked = false;
    for line in lines {
        if let Some((k, v)) = split_header_kv(line) {
            if k.eq_ignore_ascii_case("content-length") {
                content_length = v.trim().parse::<usize>().ok();
            }
            if k.eq_ignore_ascii_case("transfer-encoding") && v.trim().eq_ignore_ascii_case("chunked") {
                chunked = true;
            }
            response_headers
                .entry(k.to_lowercase())
                .or_default()
                .push(v.to_string());
        }
    }

    let mut body = buf[hend + 4..].to_vec();
    if chunked {
        loop {
            let n = stream.read(&mut tmp).await?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&tmp[..n]);
        }
        body = dechunk(&body);
    } else if let Some(cl) = content_length {
        while body.len() < cl {
            let n = stream.read(&mut tmp).await?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&tmp[..n]);
        }
        body.truncate(cl);
    }

    Ok(LocalResponse {
        status,
        headers: response_headers,
        body,
    })
}

fn dechunk(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < raw.len() {
        let Some(nl) = raw[pos..].iter().position(|&b| b == b'\n') else {
            break;
        };
        let size_line = &raw[pos..pos + nl];
        let size_str = std::str::from_utf8(size_line).unwrap_or("0").trim();
        let Ok(size) = usize::from_str_radix(size_str, 16) else {
            break;
        };
        if size == 0 {
            break;
        }
        let chunk_start = pos + nl + 1;
        let chunk_end = (chunk_start + size).min(raw.len());
        out.extend_from_slice(&raw[chunk_start..chunk_end]);
        pos = chunk_end + 2; // skip trailing CRLF
    }
    out
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    let pat = b"\r\n\r\n";
    buf.windows(4).position(|w| w == pat)
}

fn parse_status_code(line: &[u8]) -> Option<u16> {
    let s = std::str::from_utf8(line).ok()?;
    let parts: Vec<&str> = s.split_whitespace().collect();
    if parts.len() >= 2 {
        parts[1].parse::<u16>().ok()
    } else {
        None
    }
}

fn split_header_kv(line: &[u8]) -> Option<(&str, &str)> {
    let s = std::str::from_utf8(line).ok()?;
    let mut iter = s.splitn(2, ':');
    let k = iter.next()?.trim();
    let v = iter.next()?.trim();
    Some((k, v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_header_end() {
        let buf = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";
        assert_eq!(find_header_end(buf), Some(35));
    }

    #[test]
    fn parses_status_line() {
        assert_eq!(parse_status_code(b"HTTP/1.1 404 Not Found"), Some(404));
        assert_eq!(parse_status_code(b"garbage"), None);
    }

    #[test]
    fn splits_header_line() {
        assert_eq!(
            split_header_kv(b"Content-Type: application/json"),
            Some(("Content-Type", "application/json"))
        );
    }

    #[test]
    fn dechunks_simple_body() {
        let raw = b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n";
        assert_eq!(dechunk(raw), b"Wikipedia".to_vec());
    }
}
