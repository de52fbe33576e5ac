//! Circuit breaker (C4): CLOSED / OPEN / HALF_OPEN wrapper with a bounded
//! timeout around any fallible async operation.
//!
//! The timeout is `tokio::time::timeout` around the wrapped future — the
//! same primitive the teacher's idempotency plugin already reaches for
//! (`tokio::time::timeout` around the in-flight wait). Wrapping the
//! operation in `timeout` structurally guarantees the timer is cancelled
//! the instant the operation resolves first: the timer is just the other
//! branch of `timeout`'s internal `select`, dropped as soon as either side
//! completes. A fired timer is reported as a failure even though the
//! wrapped operation may still be running in the background.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;

use crate::clock::SharedClock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout_ms: u64,
    pub reset_timeout_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, success_threshold: 2, timeout_ms: 10_000, reset_timeout_ms: 60_000 }
    }
}

struct Inner {
    state: BreakerState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<u64>,
}

/// Error returned by a call rejected or failed by the breaker, parameterized
/// over the wrapped operation's own error type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakerError<E> {
    /// The breaker is OPEN and the call was rejected without running.
    Open,
    /// The operation exceeded `timeout_ms`.
    Timeout,
    /// The operation ran and failed on its own terms.
    Inner(E),
}

impl<E: std::fmt::Display> std::fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerError::Open => write!(f, "circuit breaker is open"),
            BreakerError::Timeout => write!(f, "operation timed out"),
            BreakerError::Inner(e) => write!(f, "{e}"),
        }
    }
}

impl<E: std::fmt::Debug + std::fmt::Display> std::error::Error for BreakerError<E> {}

pub struct CircuitBreaker {
    config: BreakerConfig,
    clock: SharedClock,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig, clock: SharedClock) -> Self {
        Self { config, clock, inner: Mutex::new(Inner { state: BreakerState::Closed, failure_count: 0, success_count: 0, opened_at: None }) }
    }

    /// Current state as of the last transition (does not itself trigger the
    /// OPEN -> HALF_OPEN transition; that only happens on the next `call`).
    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Runs `op` through the breaker. Returns `BreakerError::Open` without
    /// running `op` at all if the breaker is OPEN and `reset_timeout_ms`
    /// has not yet elapsed.
    pub async fn call<F, Fut, T, E>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.admit() {
            return Err(BreakerError::Open);
        }

        match tokio::time::timeout(Duration::from_millis(self.config.timeout_ms), op()).await {
            Ok(Ok(value)) => {
                self.record_success();
                Ok(value)
            }
            Ok(Err(e)) => {
                self.record_failure();
                Err(BreakerError::Inner(e))
            }
            Err(_elapsed) => {
                self.record_failure();
                Err(BreakerError::Timeout)
            }
        }
    }

    /// Decides whether a call may proceed, transitioning OPEN -> HALF_OPEN
    /// if `reset_timeout_ms` has elapsed.
    fn admit(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let now = self.clock.now_ms();
                let elapsed = inner.opened_at.map(|at| now.saturating_sub(at)).unwrap_or(u64::MAX);
                if elapsed >= self.config.reset_timeout_ms {
                    inner.state = BreakerState::HalfOpen;
                    inner.success_count = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => inner.failure_count = 0,
            BreakerState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    inner.state = BreakerState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.opened_at = None;
                }
            }
            BreakerState::Open => {}
        }
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(self.clock.now_ms());
                    inner.failure_count = 0;
                }
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(self.clock.now_ms());
                inner.success_count = 0;
                inner.failure_count = 0;
            }
            BreakerState::Open => {}
        }
    }

    /// Unconditionally returns the breaker to CLOSED with zero counters,
    /// regardless of current state. Idempotent.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.opened_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use std::sync::Arc;

    fn breaker(clock: Arc<TestClock>) -> CircuitBreaker {
        CircuitBreaker::new(BreakerConfig { failure_threshold: 3, success_threshold: 2, timeout_ms: 50, reset_timeout_ms: 1_000 }, clock)
    }

    #[tokio::test]
    async fn opens_after_failure_threshold_and_rejects_immediately() {
        let clock = Arc::new(TestClock::new(0));
        let cb = breaker(clock.clone());
        for _ in 0..3 {
            let r: Result<(), BreakerError<&str>> = cb.call(|| async { Err("boom") }).await;
            assert!(matches!(r, Err(BreakerError::Inner("boom"))));
        }
        assert_eq!(cb.state(), BreakerState::Open);
        let r: Result<(), BreakerError<&str>> = cb.call(|| async { Ok(()) }).await;
        assert_eq!(r, Err(BreakerError::Open));
    }

    #[tokio::test]
    async fn half_open_after_reset_timeout_then_closes_on_successes() {
        let clock = Arc::new(TestClock::new(0));
        let cb = breaker(clock.clone());
        for _ in 0..3 {
            let _: Result<(), BreakerError<&str>> = cb.call(|| async { Err("boom") }).await;
        }
        assert_eq!(cb.state(), BreakerState::Open);

        clock.advance(1_000);
        let r: Result<i32, BreakerError<&str>> = cb.call(|| async { Ok(1) }).await;
        assert_eq!(r, Ok(1));
        assert_eq!(cb.state(), BreakerState::HalfOpen);

        let r: Result<i32, BreakerError<&str>> = cb.call(|| async { Ok(2) }).await;
        assert_eq!(r, Ok(2));
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let clock = Arc::new(TestClock::new(0));
        let cb = breaker(clock.clone());
        for _ in 0..3 {
            let _: Result<(), BreakerError<&str>> = cb.call(|| async { Err("boom") }).await;
        }
        clock.advance(1_000);
        let _: Result<i32, BreakerError<&str>> = cb.call(|| async { Ok(1) }).await;
        assert_eq!(cb.state(), BreakerState::HalfOpen);

        let r: Result<i32, BreakerError<&str>> = cb.call(|| async { Err("still broken") }).await;
        assert_eq!(r, Err(BreakerError::Inner("still broken")));
        assert_eq!(cb.state(), BreakerState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_recorded_as_a_failure() {
        let clock = Arc::new(TestClock::new(0));
        let cb = breaker(clock);
        let r: Result<(), BreakerError<&str>> = cb
            .call(|| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(())
            })
            .await;
        assert_eq!(r, Err(BreakerError::Timeout));
    }

    #[tokio::test]
    async fn reset_is_idempotent_and_returns_to_closed_from_any_state() {
        let clock = Arc::new(TestClock::new(0));
        let cb = breaker(clock);
        for _ in 0..3 {
            let _: Result<(), BreakerError<&str>> = cb.call(|| async { Err("boom") }).await;
        }
        assert_eq!(cb.state(), BreakerState::Open);
        cb.reset();
        cb.reset();
        assert_eq!(cb.state(), BreakerState::Closed);
        let r: Result<i32, BreakerError<&str>> = cb.call(|| async { Ok(1) }).await;
        assert_eq!(r, Ok(1));
    }

    #[tokio::test]
    async fn success_in_closed_state_resets_failure_counter() {
        let clock = Arc::new(TestClock::new(0));
        let cb = breaker(clock);
        let _: Result<(), BreakerError<&str>> = cb.call(|| async { Err("boom") }).await;
        let _: Result<(), BreakerError<&str>> = cb.call(|| async { Err("boom") }).await;
        let _: Result<i32, BreakerError<&str>> = cb.call(|| async { Ok(1) }).await;
        // Counter reset, so two more failures are needed (not one) to trip.
        let _: Result<(), BreakerError<&str>> = cb.call(|| async { Err("boom") }).await;
        assert_eq!(cb.state(), BreakerState::Closed);
    }
}
