//! Runtime configuration, loaded from the environment with safe defaults.
//!
//! Unknown environment variables are ignored; every recognized option has a
//! default that keeps the service usable with zero configuration, matching
//! spec.md §6.

use std::env;

/// Recognized environment-driven options (spec.md §6).
#[derive(Debug, Clone)]
pub struct Config {
    /// Comma-separated CORS allowlist. Empty means "no browser origins are
    /// pre-approved"; requests with no `Origin` header are always allowed.
    pub allowed_origins: Vec<String>,
    pub rate_limit_window_ms: u64,
    pub rate_limit_create_per_window: u32,
    pub rate_limit_read_per_window: u32,
    /// Contact line published at `/.well-known/security.txt`.
    pub security_contact: String,
    /// `Expires` line for `/.well-known/security.txt`, RFC 3986 date-time.
    pub security_txt_expires: String,
    /// `Preferred-Languages` line for `/.well-known/security.txt`.
    pub security_txt_languages: String,
    /// Gates stack-trace/cause inclusion in internal logs.
    pub environment: String,
    /// Optional error-reporting sink DSN; absence disables it entirely.
    pub sentry_dsn: Option<String>,
    /// Optional persistent blacklist backend identifier/connection string.
    pub security_kv: Option<String>,
    /// The single trusted client-IP header C8 reads; any other
    /// forwarded-for style header is ignored as untrusted.
    pub trusted_ip_header: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            rate_limit_window_ms: 3_600_000,
            rate_limit_create_per_window: 100,
            rate_limit_read_per_window: 1_000,
            security_contact: "security@example.com".to_string(),
            security_txt_expires: "2027-01-01T00:00:00.000Z".to_string(),
            security_txt_languages: "en".to_string(),
            environment: "development".to_string(),
            sentry_dsn: None,
            security_kv: None,
            trusted_ip_header: "cf-connecting-ip".to_string(),
        }
    }
}

impl Config {
    /// Loads configuration from the process environment, falling back to
    /// [`Config::default`] for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            allowed_origins: env::var("ALLOWED_ORIGINS")
                .ok()
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.allowed_origins),
            rate_limit_window_ms: env_u64("RATE_LIMIT_WINDOW_MS", defaults.rate_limit_window_ms),
            rate_limit_create_per_window: env_u32(
                "RATE_LIMIT_CREATE_PER_WINDOW",
                defaults.rate_limit_create_per_window,
            ),
            rate_limit_read_per_window: env_u32(
                "RATE_LIMIT_READ_PER_WINDOW",
                defaults.rate_limit_read_per_window,
            ),
            security_contact: env::var("SECURITY_CONTACT").unwrap_or(defaults.security_contact),
            security_txt_expires: env::var("SECURITY_TXT_EXPIRES").unwrap_or(defaults.security_txt_expires),
            security_txt_languages: env::var("SECURITY_TXT_LANGUAGES").unwrap_or(defaults.security_txt_languages),
            environment: env::var("ENVIRONMENT").unwrap_or(defaults.environment),
            sentry_dsn: env::var("SENTRY_DSN").ok(),
            security_kv: env::var("SECURITY_KV").ok(),
            trusted_ip_header: env::var("TRUSTED_IP_HEADER").unwrap_or(defaults.trusted_ip_header),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = Config::default();
        assert_eq!(cfg.rate_limit_window_ms, 3_600_000);
        assert_eq!(cfg.rate_limit_create_per_window, 100);
        assert_eq!(cfg.rate_limit_read_per_window, 1_000);
        assert!(!cfg.is_production());
    }
}
