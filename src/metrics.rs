//! Lifetime operation counters feeding the health report (C9 ambient
//! addition). Plain atomics rather than a metrics crate: spec.md's
//! Non-goals exclude an external metrics/observability pipeline, but the
//! health endpoint still needs in-process counts, so this is the smallest
//! ambient piece that satisfies it.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct OperationCounters {
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OperationSnapshot {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    #[serde(rename = "successRate")]
    pub success_rate: f64,
}

impl OperationCounters {
    pub fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> OperationSnapshot {
        let attempts = self.attempts.load(Ordering::Relaxed);
        let successes = self.successes.load(Ordering::Relaxed);
        let failures = self.failures.load(Ordering::Relaxed);
        let success_rate = if attempts == 0 { 0.0 } else { successes as f64 / attempts as f64 };
        OperationSnapshot { attempts, successes, failures, success_rate }
    }
}

/// One counter set per tracked operation (`create`, `read`).
#[derive(Debug, Default)]
pub struct Metrics {
    pub create: OperationCounters,
    pub read: OperationCounters,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_rate_is_zero_with_no_attempts() {
        let counters = OperationCounters::default();
        assert_eq!(counters.snapshot().success_rate, 0.0);
    }

    #[test]
    fn success_rate_reflects_recorded_outcomes() {
        let counters = OperationCounters::default();
        for _ in 0..4 {
            counters.record_attempt();
        }
        counters.record_success();
        counters.record_success();
        counters.record_success();
        counters.record_failure();
        let snap = counters.snapshot();
        assert_eq!(snap.attempts, 4);
        assert_eq!(snap.successes, 3);
        assert_eq!(snap.failures, 1);
        assert_eq!(snap.success_rate, 0.75);
    }
}
