//! Helpers for working with raw HTTP request/response bytes.

use url::Url;

use crate::{CoreError, Result};

/// Splits a raw HTTP message into its header and body sections at the first
/// empty line (`\r\n\r\n`, or `\n\n` for lenient input). The separator is
/// not included in either half. Messages without a separator are all
/// headers.
pub fn split_headers_body(raw: &[u8]) -> (&[u8], &[u8]) {
    if let Some(idx) = find(raw, b"\r\n\r\n") {
        return (&raw[..idx], &raw[idx + 4..]);
    }
    if let Some(idx) = find(raw, b"\n\n") {
        return (&raw[..idx], &raw[idx + 2..]);
    }
    (raw, &[])
}

/// Parses the status code out of a raw HTTP response status line.
/// Returns 0 for anything that is not a valid `HTTP/x <code>` line.
pub fn read_response_status_code(raw: &[u8]) -> u16 {
    let line = match raw.split(|&b| b == b'\n').next() {
        Some(l) => l,
        None => return 0,
    };
    let line = String::from_utf8_lossy(line);
    let line = line.trim_end_matches('\r');

    if !line.starts_with("HTTP/") {
        return 0;
    }
    let mut parts = line.splitn(3, ' ');
    let _version = parts.next();
    let code = match parts.next() {
        Some(c) => c,
        None => return 0,
    };
    match code.parse::<u16>() {
        Ok(n) if (100..=599).contains(&n) => n,
        _ => 0,
    }
}

/// Extracts `(method, host, path)` from a raw HTTP request. The host comes
/// from the `Host` header; an empty string means the header was absent.
pub fn extract_request_meta(raw: &[u8]) -> (String, String, String) {
    let (headers, _) = split_headers_body(raw);
    let text = String::from_utf8_lossy(headers);
    let mut lines = text.lines();

    let (mut method, mut path) = (String::new(), String::new());
    if let Some(request_line) = lines.next() {
        let mut parts = request_line.split_whitespace();
        if let Some(m) = parts.next() {
            method = m.to_string();
        }
        if let Some(p) = parts.next() {
            path = p.to_string();
        }
    }

    let mut host = String::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("host") {
                host = value.trim().to_string();
                break;
            }
        }
    }

    (method, host, path)
}

/// Returns the header lines of a raw request, excluding the request line.
pub fn extract_header_lines(raw: &[u8]) -> Vec<String> {
    let (headers, _) = split_headers_body(raw);
    let text = String::from_utf8_lossy(headers);
    text.lines().skip(1).map(|l| l.to_string()).collect()
}

/// Infers a scheme from an explicit port on a `host[:port]` string.
/// Portless hosts and `:443` map to HTTPS; any other explicit port is
/// treated as plain HTTP.
pub fn infer_scheme_from_port(host: &str) -> &'static str {
    match host.rsplit_once(':') {
        Some((_, "443")) => "https",
        Some((_, port)) if port.chars().all(|c| c.is_ascii_digit()) => "http",
        _ => "https",
    }
}

/// Parses a URL, prepending `https://` when no scheme is present.
pub fn parse_url_with_default_scheme(s: &str) -> Result<Url> {
    let candidate = if s.contains("://") {
        s.to_string()
    } else {
        format!("https://{}", s)
    };
    Url::parse(&candidate).map_err(|e| CoreError::InvalidUrl(format!("{}: {}", s, e)))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
