#![cfg_attr(docsrs, feature(doc_cfg))]

//! Server-side data and reliability plane for a burn-after-reading,
//! zero-knowledge secret-sharing service.
//!
//! This crate has no transport of its own — no listener, no router, no
//! HTTP types on its public surface beyond the status/header plumbing
//! [`error`] needs. It is the part of the service that a thin adapter
//! (an HTTP framework's handler layer, a serverless function, a test
//! harness) wires up to actually answer requests: creating secrets,
//! burning them on first read, checking their liveness without consuming
//! them, rate-limiting and blacklisting abusive clients, and reporting
//! health.
//!
//! # Modules
//! - [clock] — the `now()` seam every TTL/window/alarm computation runs
//!   through, so tests can drive time deterministically.
//! - [cache] — a bounded, TTL-aware LRU used to front expensive checks.
//! - [dedup] — thundering-herd protection: concurrent callers sharing a
//!   key coalesce onto one in-flight future.
//! - [breaker] — a CLOSED/OPEN/HALF_OPEN circuit breaker wrapping any
//!   fallible async operation.
//! - [id] — cryptographically random, unbiased identifier generation.
//! - [secret] — the burn-after-reading secret cell store itself.
//! - [ratelimit] — sharded, per-operation fixed-window rate limiting.
//! - [blacklist] — time-bounded IP bans fed by rate-limit abuse signals.
//! - [validate] — request-shape validation independent of any transport.
//! - [cors] — origin-allowlist decisions for browser clients.
//! - [metrics] — in-process operation counters feeding the health report.
//! - [config] — environment-driven runtime configuration.
//! - [error] — the stable error taxonomy and wire shape.
//! - [api] — composes every module above into the service's four external
//!   operations (create, read, validate, health).
//!
//! # Feature flags
//! - `tracing-init` — pulls in `tracing-subscriber` and exposes
//!   [`tracing_init::init_tracing`] for binaries that embed this crate
//!   directly and want its logging wired up with one call.

pub mod api;
pub mod blacklist;
pub mod breaker;
pub mod cache;
pub mod clock;
pub mod config;
pub mod cors;
pub mod dedup;
pub mod error;
pub mod id;
pub mod metrics;
pub mod ratelimit;
pub mod secret;

#[cfg(feature = "tracing-init")]
#[cfg_attr(docsrs, doc(cfg(feature = "tracing-init")))]
pub mod tracing_init;

pub mod validate;

pub use api::Api;
pub use clock::{Clock, SharedClock, SystemClock, system_clock};
pub use config::Config;
pub use error::{ApiError, ErrorCode};
