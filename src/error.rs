//! Structured API errors.
//!
//! Mirrors the error taxonomy in the system spec: every kind carries a
//! stable `code`, an HTTP status, and a caller-safe `message`. Internal
//! detail (stack traces, dependency error chains) is attached only to the
//! `tracing` event at the call site, never to the serialized body — see
//! [`ApiError::log`].

use http::{HeaderName, StatusCode};
use serde::Serialize;

/// The fixed security header set spec.md §6 requires on every response,
/// named so a transport adapter cannot forget one.
pub fn security_headers() -> &'static [(HeaderName, &'static str)] {
    use std::sync::OnceLock;
    static HEADERS: OnceLock<Vec<(HeaderName, &'static str)>> = OnceLock::new();
    HEADERS.get_or_init(|| {
        vec![
            (HeaderName::from_static("x-content-type-options"), "nosniff"),
            (HeaderName::from_static("x-frame-options"), "DENY"),
            (HeaderName::from_static("content-security-policy"), "default-src 'none'; sandbox"),
            (
                HeaderName::from_static("strict-transport-security"),
                "max-age=31536000; includeSubDomains; preload",
            ),
            (HeaderName::from_static("referrer-policy"), "no-referrer"),
            (HeaderName::from_static("cross-origin-opener-policy"), "same-origin"),
            (HeaderName::from_static("cross-origin-resource-policy"), "same-origin"),
            (HeaderName::from_static("cross-origin-embedder-policy"), "require-corp"),
        ]
    })
}

/// A single structured error, matching the `{code, message, status,
/// requestId, details?}` shape the spec requires of every error response.
/// Rate-limit response headers a transport adapter attaches to a response,
/// derived from a [`crate::ratelimit::RateLimitDecision`]. Carried on
/// `ApiError` (skipped from the serialized body) so a `429` still exposes
/// the decision that produced it, not just the generic error shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitHeaders {
    pub limit: u64,
    pub remaining: u64,
    pub reset_at_secs: u64,
    pub retry_after_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip)]
    pub status: u16,
    pub details: Option<String>,
    #[serde(skip)]
    pub rate_limit: Option<RateLimitHeaders>,
}

impl ApiError {
    pub fn new(kind: ErrorCode) -> Self {
        let message = kind.default_message().to_string();
        let status = kind.status().as_u16();
        Self { code: kind, message, status, details: None, rate_limit: None }
    }

    pub fn with_message(kind: ErrorCode, message: impl Into<String>) -> Self {
        let status = kind.status().as_u16();
        Self { code: kind, message: message.into(), status, details: None, rate_limit: None }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_rate_limit(mut self, headers: RateLimitHeaders) -> Self {
        self.rate_limit = Some(headers);
        self
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// The fixed security header set every response carries, error or not.
    pub fn security_headers(&self) -> &'static [(HeaderName, &'static str)] {
        security_headers()
    }

    /// Emits a `tracing` event for this error. Stack traces / chained
    /// causes are only included when `environment != "production"`,
    /// matching the spec's stack-trace sanitization gate.
    pub fn log(&self, request_id: &str, environment: &str, cause: Option<&anyhow::Error>) {
        if environment != "production" {
            if let Some(cause) = cause {
                tracing::warn!(request_id, code = ?self.code, status = self.status, cause = ?cause, "api error");
                return;
            }
        }
        tracing::warn!(request_id, code = ?self.code, status = self.status, "api error");
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

/// Stable machine-readable error codes, one per spec.md §7 error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    MissingFields,
    EmptyContent,
    InvalidEncoding,
    InvalidIvLength,
    InvalidId,
    BadJson,
    UnsupportedMediaType,
    UrlTooLong,
    RequestTooLarge,
    HeadersTooLarge,
    MethodNotAllowed,
    SecretTooLarge,
    PayloadTooLarge,
    SecretNotFound,
    SecretExpired,
    CorsForbidden,
    IpBlacklisted,
    RateLimited,
    StoreFailed,
    IdGenerationFailed,
    ServiceUnavailable,
}

impl ErrorCode {
    pub fn status(self) -> StatusCode {
        use ErrorCode::*;
        match self {
            MissingFields | EmptyContent | InvalidEncoding | InvalidIvLength | InvalidId
            | BadJson => StatusCode::BAD_REQUEST,
            UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            UrlTooLong => StatusCode::URI_TOO_LONG,
            RequestTooLarge | SecretTooLarge | PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            HeadersTooLarge => StatusCode::from_u16(431).unwrap(),
            MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            SecretNotFound => StatusCode::NOT_FOUND,
            SecretExpired => StatusCode::GONE,
            CorsForbidden | IpBlacklisted => StatusCode::FORBIDDEN,
            RateLimited => StatusCode::TOO_MANY_REQUESTS,
            StoreFailed | IdGenerationFailed => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// The `SCREAMING_SNAKE_CASE` wire code the spec names for this kind.
    pub fn as_str(self) -> &'static str {
        use ErrorCode::*;
        match self {
            MissingFields => "MISSING_FIELDS",
            EmptyContent => "EMPTY_CONTENT",
            InvalidEncoding => "INVALID_ENCODING",
            InvalidIvLength => "INVALID_IV_LENGTH",
            InvalidId => "INVALID_ID",
            BadJson => "BAD_JSON",
            UnsupportedMediaType => "UNSUPPORTED_MEDIA_TYPE",
            UrlTooLong => "URL_TOO_LONG",
            RequestTooLarge => "REQUEST_TOO_LARGE",
            HeadersTooLarge => "HEADERS_TOO_LARGE",
            MethodNotAllowed => "METHOD_NOT_ALLOWED",
            SecretTooLarge => "SECRET_TOO_LARGE",
            PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            SecretNotFound => "SECRET_NOT_FOUND",
            SecretExpired => "SECRET_EXPIRED",
            CorsForbidden => "CORS_FORBIDDEN",
            IpBlacklisted => "IP_BLACKLISTED",
            RateLimited => "RATE_LIMITED",
            StoreFailed => "STORE_FAILED",
            IdGenerationFailed => "ID_GENERATION_FAILED",
            ServiceUnavailable => "SERVICE_UNAVAILABLE",
        }
    }

    fn default_message(self) -> &'static str {
        use ErrorCode::*;
        match self {
            MissingFields => "request is missing required fields",
            EmptyContent => "field must not be empty",
            InvalidEncoding => "field is not valid base64url",
            InvalidIvLength => "iv must decode to exactly 12 bytes",
            InvalidId => "id must be 8-64 alphanumeric characters",
            BadJson => "request body is not valid JSON",
            UnsupportedMediaType => "content-type must be application/json",
            UrlTooLong => "request URL exceeds the maximum length",
            RequestTooLarge => "request exceeds the maximum content length",
            HeadersTooLarge => "request headers exceed the maximum total size",
            MethodNotAllowed => "http method is not allowed on this route",
            SecretTooLarge => "encrypted payload exceeds the maximum size",
            PayloadTooLarge => "payload exceeds the maximum allowed size",
            SecretNotFound => "secret not found",
            SecretExpired => "secret has expired",
            CorsForbidden => "origin is not allowed",
            IpBlacklisted => "ip is temporarily banned",
            RateLimited => "rate limit exceeded",
            StoreFailed => "internal storage failure",
            IdGenerationFailed => "failed to generate a unique id",
            ServiceUnavailable => "dependency is temporarily unavailable",
        }
    }
}

/// Wire representation a transport adapter serializes as the JSON error
/// body, pairing the error with the request id that produced it.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorWire {
    pub code: ErrorCode,
    pub message: String,
    pub status: u16,
    #[serde(rename = "requestId")]
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    pub fn to_wire(&self, request_id: impl Into<String>) -> ErrorWire {
        ErrorWire {
            code: self.code,
            message: self.message.clone(),
            status: self.status,
            request_id: request_id.into(),
            details: self.details.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_spec() {
        assert_eq!(ErrorCode::InvalidIvLength.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::SecretNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::SecretExpired.status(), StatusCode::GONE);
        assert_eq!(ErrorCode::RateLimited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ErrorCode::ServiceUnavailable.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(ErrorCode::HeadersTooLarge.status().as_u16(), 431);
        assert_eq!(ErrorCode::IpBlacklisted.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn wire_code_strings_are_screaming_snake_case() {
        assert_eq!(ErrorCode::InvalidIvLength.as_str(), "INVALID_IV_LENGTH");
        assert_eq!(ErrorCode::IdGenerationFailed.as_str(), "ID_GENERATION_FAILED");
    }

    #[test]
    fn serialized_code_matches_as_str() {
        let json = serde_json::to_string(&ErrorCode::IdGenerationFailed).unwrap();
        assert_eq!(json, "\"ID_GENERATION_FAILED\"");
    }

    #[test]
    fn security_headers_include_the_fixed_set() {
        let err = ApiError::new(ErrorCode::SecretNotFound);
        let names: Vec<&str> = err.security_headers().iter().map(|(n, _)| n.as_str()).collect();
        assert!(names.contains(&"x-content-type-options"));
        assert!(names.contains(&"content-security-policy"));
        assert!(names.contains(&"strict-transport-security"));
    }
}
