//! Request validator and trusted-header IP parser (C8).
//!
//! Transport-agnostic: callers hand in the request facts that matter
//! (method, URL length, header size, content-length, content-type) as a
//! plain struct rather than a concrete HTTP request type, so this module
//! has no dependency on any particular server framework.

use crate::error::ErrorCode;

pub const URL_MAX_LEN: usize = 2_048;
pub const HEADERS_MAX_BYTES: usize = 8_192;
pub const CONTENT_LENGTH_MAX: usize = 2_000_000;

const ALLOWED_METHODS: [&str; 4] = ["GET", "POST", "OPTIONS", "HEAD"];

/// The request facts the validator needs. Built by the transport layer
/// (out of scope here) from whatever concrete request type it holds.
#[derive(Debug, Clone)]
pub struct RequestMeta<'a> {
    pub url_len: usize,
    pub method: &'a str,
    pub header_bytes: usize,
    pub content_length: Option<usize>,
    pub content_type: Option<&'a str>,
    pub has_body: bool,
}

/// Runs every check in spec order, short-circuiting on the first failure.
pub fn validate_request(meta: &RequestMeta<'_>) -> Result<(), ErrorCode> {
    if meta.url_len > URL_MAX_LEN {
        return Err(ErrorCode::UrlTooLong);
    }
    if !ALLOWED_METHODS.contains(&meta.method) {
        return Err(ErrorCode::MethodNotAllowed);
    }
    if meta.header_bytes > HEADERS_MAX_BYTES {
        return Err(ErrorCode::HeadersTooLarge);
    }
    if let Some(len) = meta.content_length {
        if len > CONTENT_LENGTH_MAX {
            return Err(ErrorCode::RequestTooLarge);
        }
    }
    if meta.has_body && !content_type_is_json(meta.content_type) {
        return Err(ErrorCode::UnsupportedMediaType);
    }
    Ok(())
}

fn content_type_is_json(content_type: Option<&str>) -> bool {
    match content_type {
        Some(ct) => {
            let base = ct.split(';').next().unwrap_or("").trim();
            base.eq_ignore_ascii_case("application/json")
        }
        None => false,
    }
}

/// Strips control characters (code points below `0x20` other than tab and
/// newline, plus `0x7F`) and truncates to `max_len` characters. `None`
/// sanitizes to the empty string.
pub fn sanitize(input: Option<&str>, max_len: usize) -> String {
    let Some(input) = input else { return String::new() };
    input
        .chars()
        .filter(|&c| !is_stripped_control(c))
        .take(max_len)
        .collect()
}

fn is_stripped_control(c: char) -> bool {
    let code = c as u32;
    (code < 0x20 && c != '\t' && c != '\n') || code == 0x7F
}

/// Reads the single trusted client-IP header value and returns a validated
/// IP, or the loopback sentinel `127.0.0.1` if the header is absent or the
/// value is malformed. Any other forwarded-for style header is never
/// consulted — it is attacker-controlled and untrusted.
pub fn parse_trusted_ip(header_value: Option<&str>) -> String {
    match header_value {
        Some(value) if is_valid_ipv4(value) || is_valid_ipv6(value) => value.to_string(),
        _ => "127.0.0.1".to_string(),
    }
}

fn is_valid_ipv4(s: &str) -> bool {
    let parts: Vec<&str> = s.split('.').collect();
    if parts.len() != 4 {
        return false;
    }
    parts.iter().all(|p| {
        if p.is_empty() || p.len() > 3 || !p.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
        if p.len() > 1 && p.starts_with('0') {
            return false;
        }
        p.parse::<u16>().is_ok_and(|n| n <= 255)
    })
}

fn is_valid_ipv6(s: &str) -> bool {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_hexdigit() || b == b':') {
        return false;
    }
    let colon_count = s.matches(':').count();
    if !(2..=7).contains(&colon_count) {
        return false;
    }
    let double_colon_count = s.matches("::").count();
    if double_colon_count > 1 {
        return false;
    }

    let is_hextet = |p: &str| (1..=4).contains(&p.len()) && p.bytes().all(|b| b.is_ascii_hexdigit());

    if double_colon_count == 1 {
        let mut halves = s.splitn(2, "::");
        let left = halves.next().unwrap_or("");
        let right = halves.next().unwrap_or("");
        let left_parts: Vec<&str> = if left.is_empty() { Vec::new() } else { left.split(':').collect() };
        let right_parts: Vec<&str> = if right.is_empty() { Vec::new() } else { right.split(':').collect() };
        if left_parts.len() + right_parts.len() >= 8 {
            return false;
        }
        left_parts.iter().chain(right_parts.iter()).all(|p| is_hextet(p))
    } else {
        let parts: Vec<&str> = s.split(':').collect();
        parts.len() == 8 && parts.iter().all(|p| is_hextet(p))
    }
}
