//! API surface (C9): composes C1–C8 into the four external operations
//! (`create`, `read`, `validate_id`, `health`) plus the two static response
//! bodies (`security.txt`, security headers — the latter lives on
//! [`crate::error::ApiError`]).
//!
//! This module never binds a transport: every operation takes plain values
//! in and returns plain values (or `ApiError`) out, leaving the HTTP
//! mapping in spec.md §6 to whatever adapter embeds this crate, exactly as
//! the teacher's own `Responder` trait separates "what the response is"
//! from "how it reaches the wire".

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

use crate::blacklist::Blacklist;
use crate::breaker::{BreakerConfig, BreakerError, BreakerState, CircuitBreaker};
use crate::clock::SharedClock;
use crate::config::Config;
use crate::dedup::Deduplicator;
use crate::error::{ApiError, ErrorCode, RateLimitHeaders};
use crate::id::{generate_id, is_valid_id_format};
use crate::metrics::Metrics;
use crate::ratelimit::{Operation, RateLimitConfig, RateLimiter};
use crate::secret::{self, SecretStore, StoreError};

pub const SECRET_MAX_LEN: usize = 1_400_000;
const IV_ENCODED_LEN: usize = 16;
const REQUEST_ID_RANDOM_LEN: usize = 8;

fn is_base64url(s: &str) -> bool {
    URL_SAFE_NO_PAD.decode(s).is_ok()
}

fn clamp_ttl(ttl: Option<u64>) -> u64 {
    ttl.unwrap_or(secret::TTL_DEFAULT_MS).clamp(secret::TTL_MIN_MS, secret::TTL_MAX_MS)
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateOutcome {
    pub id: String,
    #[serde(rename = "expiresAt")]
    pub expires_at: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadOutcome {
    pub encrypted: String,
    pub iv: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidateOutcome {
    pub id: String,
    pub status: &'static str,
    #[serde(rename = "createdAt")]
    pub created_at: u64,
    #[serde(rename = "expiresAt")]
    pub expires_at: u64,
    pub ttl: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UptimeInfo {
    pub ms: u64,
    pub seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DependencyStates {
    pub secrets: &'static str,
    #[serde(rename = "rateLimiter")]
    pub rate_limiter: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub create: crate::metrics::OperationSnapshot,
    pub read: crate::metrics::OperationSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub ok: bool,
    pub version: &'static str,
    pub uptime: UptimeInfo,
    #[serde(rename = "do")]
    pub dependencies: DependencyStates,
    pub metrics: MetricsReport,
}

fn breaker_state_label(state: BreakerState) -> &'static str {
    match state {
        BreakerState::Closed => "available",
        BreakerState::Open => "open",
        BreakerState::HalfOpen => "half-open",
    }
}

/// Required-field shape of the `POST /api/secrets` JSON body. Only the
/// presence check belongs here; content validation (non-empty, base64url,
/// size) is [`Api::create`]'s job so it can attach rate-limit headers to
/// whichever check fails.
#[derive(Debug, Deserialize)]
struct CreateRequestWire {
    encrypted: Option<String>,
    iv: Option<String>,
    ttl: Option<u64>,
}

/// Parses and field-checks a create request body. Kept separate from
/// [`Api::create`] so a transport adapter can surface `BAD_JSON` /
/// `MISSING_FIELDS` before it even has a client IP to rate-limit against.
pub fn parse_create_request(body: &[u8]) -> Result<(String, String, Option<u64>), ApiError> {
    let wire: CreateRequestWire = serde_json::from_slice(body).map_err(|_| ApiError::new(ErrorCode::BadJson))?;
    let encrypted = wire.encrypted.ok_or_else(|| ApiError::new(ErrorCode::MissingFields))?;
    let iv = wire.iv.ok_or_else(|| ApiError::new(ErrorCode::MissingFields))?;
    Ok((encrypted, iv, wire.ttl))
}

async fn read_through_breaker(secrets: SecretStore, breaker: Arc<CircuitBreaker>, id: String) -> Result<secret::ReadOutcome, String> {
    breaker
        .call(move || async move { Ok::<secret::ReadOutcome, ()>(secrets.read(&id).await) })
        .await
        .map_err(|e: BreakerError<()>| e.to_string())
}

async fn validate_through_breaker(secrets: SecretStore, breaker: Arc<CircuitBreaker>, id: String) -> Result<secret::ValidateOutcome, String> {
    breaker
        .call(move || async move { Ok::<secret::ValidateOutcome, ()>(secrets.validate(&id).await) })
        .await
        .map_err(|e: BreakerError<()>| e.to_string())
}

pub struct Api {
    config: Config,
    clock: SharedClock,
    secrets: SecretStore,
    secret_breaker: Arc<CircuitBreaker>,
    read_dedup: Deduplicator<String, secret::ReadOutcome, String>,
    validate_dedup: Deduplicator<String, secret::ValidateOutcome, String>,
    rate_limiter: Arc<RateLimiter>,
    blacklist: Arc<Blacklist>,
    metrics: Metrics,
    started_at_ms: u64,
    request_id_counter: AtomicU64,
}

impl Api {
    pub fn new(config: Config, clock: SharedClock) -> Self {
        let blacklist = Arc::new(Blacklist::new(Default::default()));
        let rate_limit_config = RateLimitConfig {
            window_ms: config.rate_limit_window_ms,
            create_per_window: config.rate_limit_create_per_window as u64,
            read_per_window: config.rate_limit_read_per_window as u64,
            ..Default::default()
        };
        let rate_limiter = Arc::new(RateLimiter::new(rate_limit_config, clock.clone(), blacklist.clone()));
        let started_at_ms = clock.now_ms();
        Self {
            secrets: SecretStore::new(clock.clone()),
            secret_breaker: Arc::new(CircuitBreaker::new(BreakerConfig::default(), clock.clone())),
            read_dedup: Deduplicator::new(),
            validate_dedup: Deduplicator::new(),
            rate_limiter,
            blacklist,
            metrics: Metrics::default(),
            started_at_ms,
            request_id_counter: AtomicU64::new(0),
            config,
            clock,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Timestamp-random request id for `X-Request-ID` and error logging.
    pub fn generate_request_id(&self) -> String {
        let now = self.clock.now_ms();
        let ordinal = self.request_id_counter.fetch_add(1, Ordering::Relaxed);
        let id = generate_id();
        let random = &id[..REQUEST_ID_RANDOM_LEN];
        format!("{now:x}-{ordinal:x}-{random}")
    }

    fn check_blacklist(&self, ip: &str) -> Result<(), ApiError> {
        if self.blacklist.is_blacklisted(ip, self.clock.now_ms()) {
            return Err(ApiError::new(ErrorCode::IpBlacklisted));
        }
        Ok(())
    }

    async fn check_rate_limit(&self, operation: Operation, ip: &str) -> Result<RateLimitHeaders, ApiError> {
        let decision = self.rate_limiter.check(operation, ip).await;
        let now = self.clock.now_ms();
        let headers = RateLimitHeaders {
            limit: decision.limit,
            remaining: decision.remaining,
            reset_at_secs: decision.reset_at / 1_000,
            retry_after_secs: (!decision.allowed).then(|| decision.reset_at.saturating_sub(now) / 1_000),
        };
        if !decision.allowed {
            return Err(ApiError::new(ErrorCode::RateLimited).with_rate_limit(headers));
        }
        Ok(headers)
    }

    pub async fn create(&self, ip: &str, encrypted: String, iv: String, ttl: Option<u64>) -> Result<(CreateOutcome, RateLimitHeaders), ApiError> {
        self.metrics.create.record_attempt();
        let outcome = self.create_inner(ip, encrypted, iv, ttl).await;
        match &outcome {
            Ok(_) => self.metrics.create.record_success(),
            Err(_) => self.metrics.create.record_failure(),
        }
        outcome
    }

    async fn create_inner(&self, ip: &str, encrypted: String, iv: String, ttl: Option<u64>) -> Result<(CreateOutcome, RateLimitHeaders), ApiError> {
        self.check_blacklist(ip)?;
        let headers = self.check_rate_limit(Operation::Create, ip).await?;

        if encrypted.is_empty() || iv.is_empty() {
            return Err(ApiError::new(ErrorCode::EmptyContent).with_rate_limit(headers));
        }
        if !is_base64url(&encrypted) {
            return Err(ApiError::new(ErrorCode::InvalidEncoding).with_rate_limit(headers));
        }
        if encrypted.len() > SECRET_MAX_LEN {
            return Err(ApiError::new(ErrorCode::SecretTooLarge).with_rate_limit(headers));
        }
        let iv_bytes = URL_SAFE_NO_PAD
            .decode(&iv)
            .map_err(|_| ApiError::new(ErrorCode::InvalidEncoding).with_rate_limit(headers))?;
        if iv_bytes.len() != 12 || iv.len() != IV_ENCODED_LEN {
            return Err(ApiError::new(ErrorCode::InvalidIvLength).with_rate_limit(headers));
        }

        let ttl_ms = clamp_ttl(ttl);
        let now = self.clock.now_ms();

        for _ in 0..5 {
            let id = generate_id();
            match self.secret_breaker.call(|| self.secrets.store(&id, encrypted.clone(), iv.clone(), ttl_ms)).await {
                Ok(()) => {
                    return Ok((CreateOutcome { id, expires_at: now + ttl_ms }, headers));
                }
                Err(BreakerError::Inner(StoreError::IdCollision)) => continue,
                Err(BreakerError::Open) | Err(BreakerError::Timeout) => {
                    return Err(ApiError::new(ErrorCode::ServiceUnavailable).with_rate_limit(headers));
                }
            }
        }
        Err(ApiError::new(ErrorCode::IdGenerationFailed).with_rate_limit(headers))
    }

    pub async fn read(&self, ip: &str, id: &str) -> Result<(ReadOutcome, RateLimitHeaders), ApiError> {
        self.metrics.read.record_attempt();
        let outcome = self.read_inner(ip, id).await;
        match &outcome {
            Ok(_) => self.metrics.read.record_success(),
            Err(_) => self.metrics.read.record_failure(),
        }
        outcome
    }

    async fn read_inner(&self, ip: &str, id: &str) -> Result<(ReadOutcome, RateLimitHeaders), ApiError> {
        self.check_blacklist(ip)?;
        let headers = self.check_rate_limit(Operation::Read, ip).await?;

        if !is_valid_id_format(id) {
            return Err(ApiError::new(ErrorCode::InvalidId).with_rate_limit(headers));
        }

        let secrets = self.secrets.clone();
        let breaker = self.secret_breaker.clone();
        let id_owned = id.to_string();
        let result = self.read_dedup.deduplicate(id.to_string(), move || read_through_breaker(secrets, breaker, id_owned)).await;

        match result {
            Ok(secret::ReadOutcome::Ok { encrypted, iv }) => Ok((ReadOutcome { encrypted, iv }, headers)),
            Ok(secret::ReadOutcome::NotFound) => Err(ApiError::new(ErrorCode::SecretNotFound).with_rate_limit(headers)),
            Ok(secret::ReadOutcome::Expired) => Err(ApiError::new(ErrorCode::SecretExpired).with_rate_limit(headers)),
            Err(_breaker_failure) => Err(ApiError::new(ErrorCode::ServiceUnavailable).with_rate_limit(headers)),
        }
    }

    pub async fn validate_id(&self, ip: &str, id: &str) -> Result<(ValidateOutcome, RateLimitHeaders), ApiError> {
        self.check_blacklist(ip)?;
        let headers = self.check_rate_limit(Operation::Read, ip).await?;

        if !is_valid_id_format(id) {
            return Err(ApiError::new(ErrorCode::InvalidId).with_rate_limit(headers));
        }

        let secrets = self.secrets.clone();
        let breaker = self.secret_breaker.clone();
        let id_owned = id.to_string();
        let result = self.validate_dedup.deduplicate(id.to_string(), move || validate_through_breaker(secrets, breaker, id_owned)).await;

        match result {
            Ok(secret::ValidateOutcome::Ready { created_at, expires_at, ttl }) => {
                Ok((ValidateOutcome { id: id.to_string(), status: "ready", created_at, expires_at, ttl }, headers))
            }
            Ok(secret::ValidateOutcome::NotFound) => Err(ApiError::new(ErrorCode::SecretNotFound).with_rate_limit(headers)),
            Ok(secret::ValidateOutcome::Expired) => Err(ApiError::new(ErrorCode::SecretExpired).with_rate_limit(headers)),
            Err(_breaker_failure) => Err(ApiError::new(ErrorCode::ServiceUnavailable).with_rate_limit(headers)),
        }
    }

    pub fn health(&self) -> HealthReport {
        let now = self.clock.now_ms();
        let uptime_ms = now.saturating_sub(self.started_at_ms);
        HealthReport {
            ok: true,
            version: env!("CARGO_PKG_VERSION"),
            uptime: UptimeInfo { ms: uptime_ms, seconds: uptime_ms / 1_000 },
            dependencies: DependencyStates {
                secrets: breaker_state_label(self.secret_breaker.state()),
                rate_limiter: breaker_state_label(self.rate_limiter.breaker().state()),
            },
            metrics: MetricsReport { create: self.metrics.create.snapshot(), read: self.metrics.read.snapshot() },
        }
    }
}

/// `GET /.well-known/security.txt` body, RFC 9116 shape.
pub fn security_txt(config: &Config) -> String {
    let contact = if config.security_contact.contains("://") || config.security_contact.starts_with("mailto:") {
        config.security_contact.clone()
    } else {
        format!("mailto:{}", config.security_contact)
    };
    format!(
        "Contact: {contact}\nExpires: {}\nPreferred-Languages: {}\n",
        config.security_txt_expires, config.security_txt_languages
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, TestClock};

    fn api() -> (Api, Arc<TestClock>) {
        let clock = Arc::new(TestClock::new(1_000_000));
        (Api::new(Config::default(), clock.clone()), clock)
    }

    fn b64(bytes: &[u8]) -> String {
        URL_SAFE_NO_PAD.encode(bytes)
    }

    #[tokio::test]
    async fn create_then_read_round_trips_and_burns() {
        let (api, _clock) = api();
        let encrypted = b64(b"super secret payload");
        let iv = b64(&[0u8; 12]);
        let (created, _headers) = api.create("203.0.113.1", encrypted.clone(), iv.clone(), None).await.unwrap();
        assert_eq!(created.id.len(), crate::id::ID_LENGTH);

        let (read, _headers) = api.read("203.0.113.1", &created.id).await.unwrap();
        assert_eq!(read.encrypted, encrypted);
        assert_eq!(read.iv, iv);

        let err = api.read("203.0.113.1", &created.id).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::SecretNotFound);
    }

    #[tokio::test]
    async fn create_rejects_non_base64_payload() {
        let (api, _clock) = api();
        let err = api.create("203.0.113.1", "not base64!!".to_string(), b64(&[0u8; 12]), None).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidEncoding);
    }

    #[tokio::test]
    async fn create_rejects_an_iv_that_does_not_decode_to_12_bytes() {
        let (api, _clock) = api();
        let err = api.create("203.0.113.1", b64(b"hello"), b64(&[0u8; 4]), None).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidIvLength);
    }

    #[tokio::test]
    async fn create_rejects_oversized_ciphertext() {
        let (api, _clock) = api();
        let huge = "A".repeat(SECRET_MAX_LEN + 4);
        let err = api.create("203.0.113.1", huge, b64(&[0u8; 12]), None).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::SecretTooLarge);
    }

    #[tokio::test]
    async fn create_clamps_ttl_to_the_allowed_range() {
        let (api, clock) = api();
        let (created, _) = api.create("203.0.113.1", b64(b"x"), b64(&[0u8; 12]), Some(1)).await.unwrap();
        assert_eq!(created.expires_at, clock.now_ms() + secret::TTL_MIN_MS);
    }

    #[tokio::test]
    async fn read_with_malformed_id_is_rejected_without_touching_the_store() {
        let (api, _clock) = api();
        let err = api.read("203.0.113.1", "short").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidId);
    }

    #[tokio::test]
    async fn validate_does_not_consume_the_secret() {
        let (api, _clock) = api();
        let (created, _) = api.create("203.0.113.1", b64(b"x"), b64(&[0u8; 12]), None).await.unwrap();
        let (validated, _) = api.validate_id("203.0.113.1", &created.id).await.unwrap();
        assert_eq!(validated.status, "ready");
        let (read, _) = api.read("203.0.113.1", &created.id).await.unwrap();
        assert_eq!(read.iv, b64(&[0u8; 12]));
    }

    #[tokio::test]
    async fn blacklisted_ip_is_rejected_before_rate_limiting() {
        let (api, clock) = api();
        api.blacklist.blacklist_ip("203.0.113.9", "abuse", 10_000, clock.now_ms());
        let err = api.create("203.0.113.9", b64(b"x"), b64(&[0u8; 12]), None).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::IpBlacklisted);
        assert_eq!(err.status, 403);
    }

    #[tokio::test]
    async fn health_reports_available_breakers_and_zeroed_metrics_initially() {
        let (api, _clock) = api();
        let report = api.health();
        assert!(report.ok);
        assert_eq!(report.dependencies.secrets, "available");
        assert_eq!(report.metrics.create.attempts, 0);
    }

    #[tokio::test]
    async fn health_reflects_attempted_operations() {
        let (api, _clock) = api();
        let _ = api.create("203.0.113.1", b64(b"x"), b64(&[0u8; 12]), None).await;
        let report = api.health();
        assert_eq!(report.metrics.create.attempts, 1);
        assert_eq!(report.metrics.create.successes, 1);
    }

    #[test]
    fn parses_a_well_formed_create_request() {
        let body = br#"{"encrypted":"abc","iv":"def","ttl":1000}"#;
        let (encrypted, iv, ttl) = parse_create_request(body).unwrap();
        assert_eq!(encrypted, "abc");
        assert_eq!(iv, "def");
        assert_eq!(ttl, Some(1000));
    }

    #[test]
    fn rejects_malformed_json() {
        let err = parse_create_request(b"not json").unwrap_err();
        assert_eq!(err.code, ErrorCode::BadJson);
    }

    #[test]
    fn rejects_missing_required_fields() {
        let err = parse_create_request(br#"{"encrypted":"abc"}"#).unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingFields);
    }

    #[test]
    fn security_txt_includes_contact_expiry_and_language() {
        let config = Config::default();
        let body = security_txt(&config);
        assert!(body.contains("Contact: mailto:"));
        assert!(body.contains("Expires:"));
        assert!(body.contains("Preferred-Languages:"));
    }
}
