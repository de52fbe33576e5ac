//! CORS origin decision (C9 support).
//!
//! Origin matching follows the teacher's own CORS plugin
//! (`plugins::cors::add_cors_headers`): an empty allowlist only ever
//! appears in tests here since [`Config`] always carries at least the
//! configured origins, and a present-but-unlisted origin is rejected
//! outright rather than silently dropping the CORS headers the way the
//! teacher's plugin does — this system treats a disallowed cross-origin
//! call as a request to refuse, not merely a response to leave unadorned.

use crate::config::Config;

pub const PREFLIGHT_MAX_AGE_SECS: u32 = 86_400;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsDecision {
    /// No `Origin` header: a non-browser client, let through with no CORS
    /// response headers.
    NoOrigin,
    /// A browser request whose origin is on the allowlist; echo it back in
    /// `Access-Control-Allow-Origin`.
    Allowed { origin: String },
    /// A browser request whose origin is not on the allowlist.
    Forbidden,
}

pub fn decide(origin: Option<&str>, config: &Config) -> CorsDecision {
    match origin {
        None => CorsDecision::NoOrigin,
        Some(origin) if config.allowed_origins.iter().any(|o| o == origin) => {
            CorsDecision::Allowed { origin: origin.to_string() }
        }
        Some(_) => CorsDecision::Forbidden,
    }
}
