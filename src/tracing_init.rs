//! Optional `tracing-subscriber` wiring for binaries embedding this crate
//! directly, gated behind the `tracing-init` feature (grounded in
//! `tako::tracing::init_tracing`, adapted to read the level from
//! [`crate::config::Config`] instead of a hard-coded `DEBUG` filter).

#![cfg(feature = "tracing-init")]

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{Layer, fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the global subscriber. `DEBUG` outside production, `INFO` in
/// production, so a misconfigured deploy doesn't silently lose logs.
pub fn init_tracing(is_production: bool) {
    let level = if is_production { LevelFilter::INFO } else { LevelFilter::DEBUG };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_span_events(FmtSpan::CLOSE)
                .with_file(true)
                .with_line_number(true)
                .with_level(true)
                .with_filter(level),
        )
        .init();
}
