//! Sharded fixed-window rate limiter (C5).
//!
//! Per-IP quotas for `create` and `read`, sharded by the first byte of
//! `SHA-256(ip)` so raw IPs never sit alongside counters (grounded in the
//! pack's `SessionKey::from_cookie` pattern of hashing identifying material
//! before using it as a map key). Fronted by the LRU cache (C2) with a
//! 1-second TTL and coalesced through the deduplicator (C3); the
//! underlying counter update is wrapped in its own circuit breaker (C4)
//! instance, distinct from the one guarding the secret store, and fails
//! open when that breaker is open or the counter update errors — denying
//! writes to a quota service that is itself down would just amplify the
//! outage.

use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::blacklist::Blacklist;
use crate::breaker::{BreakerConfig, BreakerError, CircuitBreaker};
use crate::cache::Lru;
use crate::clock::SharedClock;
use crate::dedup::Deduplicator;

pub const DEFAULT_SHARDS: u16 = 256;
const CACHE_TTL_MS: u64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Read,
}

impl Operation {
    fn as_str(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Read => "read",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub window_ms: u64,
    pub create_per_window: u64,
    pub read_per_window: u64,
    pub shards: u16,
    pub abuse_threshold_multiplier: u64,
    pub ban_duration_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: 3_600_000,
            create_per_window: 100,
            read_per_window: 1_000,
            shards: DEFAULT_SHARDS,
            abuse_threshold_multiplier: 5,
            ban_duration_ms: 86_400_000,
        }
    }
}

impl RateLimitConfig {
    fn limit_for(&self, op: Operation) -> u64 {
        match op {
            Operation::Create => self.create_per_window,
            Operation::Read => self.read_per_window,
        }
    }
}

/// Result of a rate-limit check, exactly the fields the API surface needs
/// to populate `X-RateLimit-*` headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub count: u64,
    pub remaining: u64,
    pub reset_at: u64,
    pub limit: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct StoreKey {
    operation: Operation,
    shard: u8,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    count: u64,
    reset_at: u64,
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// `(shard, hashed_ip_hex)` as specified: shard is the first byte of
/// `SHA-256(ip)`, and the hashed form (not the raw IP) is what's stored
/// alongside the counter.
fn shard_and_hash(ip: &str) -> (u8, String) {
    let digest = Sha256::digest(ip.as_bytes());
    (digest[0], hex_encode(&digest))
}

/// Sharded, cached, deduplicated, circuit-broken rate limiter.
pub struct RateLimiter {
    config: RateLimitConfig,
    clock: SharedClock,
    store: Arc<DashMap<(StoreKey, String), Entry>>,
    cache: Mutex<Lru<String, RateLimitDecision>>,
    dedup: Deduplicator<String, RateLimitDecision, String>,
    breaker: Arc<CircuitBreaker>,
    blacklist: Arc<Blacklist>,
    faulty: AtomicBool,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, clock: SharedClock, blacklist: Arc<Blacklist>) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(BreakerConfig::default(), clock.clone()));
        Self {
            config,
            clock,
            store: Arc::new(DashMap::new()),
            cache: Mutex::new(Lru::new(4096)),
            dedup: Deduplicator::new(),
            breaker,
            blacklist,
            faulty: AtomicBool::new(false),
        }
    }

    /// Test-only: force the underlying store call to fail, to exercise the
    /// fail-open path and the circuit breaker.
    pub fn inject_fault(&self, faulty: bool) {
        self.faulty.store(faulty, Ordering::SeqCst);
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Checks and records one request for `ip` under `operation`.
    pub async fn check(&self, operation: Operation, ip: &str) -> RateLimitDecision {
        let now = self.clock.now_ms();
        let cache_key = format!("{}:{ip}", operation.as_str());

        if let Some(decision) = self.cache.lock().get(&cache_key, now) {
            return decision;
        }

        let limit = self.config.limit_for(operation);
        let window_ms = self.config.window_ms;
        let store = self.store.clone();
        let faulty = self.faulty.load(Ordering::SeqCst);
        let clock = self.clock.clone();
        let breaker = self.breaker.clone();
        let ip = ip.to_string();

        let result = self
            .dedup
            .deduplicate(cache_key.clone(), move || async move {
                breaker
                    .call(|| store_check(&store, operation, ip, limit, window_ms, clock.now_ms(), faulty))
                    .await
                    .map_err(|e: BreakerError<String>| e.to_string())
            })
            .await;

        let decision = match result {
            Ok(decision) => decision,
            Err(reason) => {
                tracing::warn!(operation = operation.as_str(), ip, reason, "rate limiter fail-open");
                RateLimitDecision { allowed: true, count: 0, remaining: limit, reset_at: now + window_ms, limit }
            }
        };

        self.cache.lock().set(cache_key, decision, CACHE_TTL_MS, now);

        if !decision.allowed {
            self.maybe_flag_abuse(ip, decision, limit).await;
        }

        decision
    }

    async fn maybe_flag_abuse(&self, ip: &str, decision: RateLimitDecision, limit: u64) {
        if decision.count < limit.saturating_mul(self.config.abuse_threshold_multiplier) {
            return;
        }
        if self.blacklist.is_blacklisted(ip, self.clock.now_ms()) {
            return;
        }
        tracing::info!(ip, "banning ip for rate limit abuse");
        self.blacklist.blacklist_ip(ip, "rate_limit_abuse", self.config.ban_duration_ms, self.clock.now_ms());
    }
}

async fn store_check(
    store: &DashMap<(StoreKey, String), Entry>,
    operation: Operation,
    ip: String,
    limit: u64,
    window_ms: u64,
    now: u64,
    faulty: bool,
) -> Result<RateLimitDecision, String> {
    if faulty {
        return Err("store unavailable".to_string());
    }

    let (shard, hashed_ip) = shard_and_hash(&ip);
    let key = (StoreKey { operation, shard }, hashed_ip);

    let mut entry = store.entry(key).or_insert(Entry { count: 0, reset_at: 0 });
    if now >= entry.reset_at {
        entry.count = 1;
        entry.reset_at = now + window_ms;
        return Ok(RateLimitDecision { allowed: true, count: 1, remaining: limit.saturating_sub(1), reset_at: entry.reset_at, limit });
    }

    // Count every attempt, not just admitted ones: abuse detection (see
    // `maybe_flag_abuse`) needs `count` to keep climbing past `limit` so it
    // can reach `abuse_threshold_multiplier * limit`. Capping it at `limit`
    // would make that comparison permanently unreachable.
    let allowed = entry.count < limit;
    entry.count += 1;
    if allowed {
        Ok(RateLimitDecision { allowed: true, count: entry.count, remaining: limit.saturating_sub(entry.count), reset_at: entry.reset_at, limit })
    } else {
        Ok(RateLimitDecision { allowed: false, count: entry.count, remaining: 0, reset_at: entry.reset_at, limit })
    }
}
