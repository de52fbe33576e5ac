//! Time-bounded IP blacklist (C7).
//!
//! A process-local `ip -> (until, reason)` map with lazy pruning on access,
//! a size-triggered sweep at [`MAX_SIZE`], and a time-triggered sweep no
//! more than once per [`CLEANUP_INTERVAL_MS`]. Guarded by a single
//! `parking_lot::Mutex`, the same discipline the circuit breaker (C4) uses
//! for its own small, frequently-touched state — contention here is far
//! cheaper than the bookkeeping a lock-free structure would add.

use std::collections::HashMap;

use parking_lot::Mutex;

pub const MAX_SIZE: usize = 1_000;
pub const CLEANUP_INTERVAL_MS: u64 = 300_000;
pub const KV_SYNC_INTERVAL_MS: u64 = 60_000;

#[derive(Debug, Clone)]
struct Entry {
    until: u64,
    reason: String,
}

/// Optional persistent backend for blacklist entries. Loss of this backend
/// is non-fatal: the in-memory map is authoritative within a process, and a
/// backend is purely a best-effort cross-process mirror.
pub trait BlacklistBackend: Send + Sync {
    fn sync(&self, entries: &[(String, u64, String)]);
}

/// Backend used when no persistent store is configured; synchronization is
/// a no-op.
pub struct NullBackend;

impl BlacklistBackend for NullBackend {
    fn sync(&self, _entries: &[(String, u64, String)]) {}
}

pub struct BlacklistConfig {
    pub max_size: usize,
    pub cleanup_interval_ms: u64,
}

impl Default for BlacklistConfig {
    fn default() -> Self {
        Self { max_size: MAX_SIZE, cleanup_interval_ms: CLEANUP_INTERVAL_MS }
    }
}

struct Inner {
    entries: HashMap<String, Entry>,
    last_swept_at: u64,
    last_synced_at: Option<u64>,
}

pub struct Blacklist {
    config: BlacklistConfig,
    inner: Mutex<Inner>,
    backend: Box<dyn BlacklistBackend>,
}

impl Blacklist {
    pub fn new(config: BlacklistConfig) -> Self {
        Self::with_backend(config, Box::new(NullBackend))
    }

    pub fn with_backend(config: BlacklistConfig, backend: Box<dyn BlacklistBackend>) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner { entries: HashMap::new(), last_swept_at: 0, last_synced_at: None }),
            backend,
        }
    }

    /// True iff `ip` has an entry with `now < until`. Lazily prunes `ip`'s
    /// own entry if it has expired, and may trigger a full sweep if the
    /// size or time thresholds have been crossed.
    pub fn is_blacklisted(&self, ip: &str, now_ms: u64) -> bool {
        let mut inner = self.inner.lock();
        self.maybe_sweep(&mut inner, now_ms);

        match inner.entries.get(ip) {
            Some(entry) if now_ms < entry.until => true,
            Some(_) => {
                inner.entries.remove(ip);
                false
            }
            None => false,
        }
    }

    /// Inserts a new ban or extends an existing one. Extension takes the
    /// later of the current and new `until`, since a second, shorter ban
    /// request should never shrink an existing ban's window.
    pub fn blacklist_ip(&self, ip: &str, reason: &str, duration_ms: u64, now_ms: u64) {
        let mut inner = self.inner.lock();
        let until = now_ms + duration_ms;
        inner
            .entries
            .entry(ip.to_string())
            .and_modify(|e| {
                if until > e.until {
                    e.until = until;
                }
                e.reason = reason.to_string();
            })
            .or_insert(Entry { until, reason: reason.to_string() });

        self.maybe_sweep(&mut inner, now_ms);
        self.maybe_sync_backend(&mut inner, now_ms);
    }

    pub fn size(&self) -> usize {
        self.inner.lock().entries.len()
    }

    fn maybe_sweep(&self, inner: &mut Inner, now_ms: u64) {
        let size_triggered = inner.entries.len() > self.config.max_size;
        let time_triggered = now_ms.saturating_sub(inner.last_swept_at) >= self.config.cleanup_interval_ms;
        if !size_triggered && !time_triggered {
            return;
        }
        inner.entries.retain(|_, e| now_ms < e.until);
        inner.last_swept_at = now_ms;
    }

    /// Mirrors the table to the optional persistent backend at most once per
    /// [`KV_SYNC_INTERVAL_MS`] — the backend is a best-effort cross-process
    /// mirror, never the write path itself, so there is no need to pay for a
    /// sync on every single ban.
    fn maybe_sync_backend(&self, inner: &mut Inner, now_ms: u64) {
        let due = match inner.last_synced_at {
            Some(last) => now_ms.saturating_sub(last) >= KV_SYNC_INTERVAL_MS,
            None => true,
        };
        if !due {
            return;
        }
        let snapshot: Vec<(String, u64, String)> =
            inner.entries.iter().map(|(ip, e)| (ip.clone(), e.until, e.reason.clone())).collect();
        self.backend.sync(&snapshot);
        inner.last_synced_at = Some(now_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_blacklisted_by_default() {
        let bl = Blacklist::new(BlacklistConfig::default());
        assert!(!bl.is_blacklisted("203.0.113.1", 0));
    }

    #[test]
    fn blacklisted_ip_is_reported_until_expiry() {
        let bl = Blacklist::new(BlacklistConfig::default());
        bl.blacklist_ip("203.0.113.1", "abuse", 1_000, 0);
        assert!(bl.is_blacklisted("203.0.113.1", 500));
        assert!(!bl.is_blacklisted("203.0.113.1", 1_000));
    }

    #[test]
    fn extending_a_ban_never_shortens_it() {
        let bl = Blacklist::new(BlacklistConfig::default());
        bl.blacklist_ip("203.0.113.1", "abuse", 10_000, 0);
        bl.blacklist_ip("203.0.113.1", "abuse-again", 1_000, 0);
        assert!(bl.is_blacklisted("203.0.113.1", 5_000));
    }

    #[test]
    fn size_triggered_sweep_removes_expired_entries() {
        let config = BlacklistConfig { max_size: 2, cleanup_interval_ms: u64::MAX };
        let bl = Blacklist::new(config);
        bl.blacklist_ip("1.1.1.1", "x", 100, 0);
        bl.blacklist_ip("2.2.2.2", "x", 100, 0);
        // Third insert pushes size past max_size at a time when the first two
        // have already expired, triggering a sweep that clears them.
        bl.blacklist_ip("3.3.3.3", "x", 100_000, 1_000);
        assert_eq!(bl.size(), 1);
        assert!(bl.is_blacklisted("3.3.3.3", 1_000));
    }

    #[test]
    fn time_triggered_sweep_runs_at_most_once_per_interval() {
        let config = BlacklistConfig { max_size: usize::MAX, cleanup_interval_ms: 1_000 };
        let bl = Blacklist::new(config);
        bl.blacklist_ip("1.1.1.1", "x", 100, 0);
        assert!(bl.is_blacklisted("1.1.1.1", 50));
        // Past expiry but before the sweep interval: lazy per-key pruning on
        // access still reports it absent even though the sweep hasn't run.
        assert!(!bl.is_blacklisted("1.1.1.1", 500));
    }

    struct RecordingBackend {
        calls: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    }

    impl BlacklistBackend for RecordingBackend {
        fn sync(&self, _entries: &[(String, u64, String)]) {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[test]
    fn backend_is_synced_on_write() {
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let backend = RecordingBackend { calls: calls.clone() };
        let bl = Blacklist::with_backend(BlacklistConfig::default(), Box::new(backend));
        bl.blacklist_ip("1.1.1.1", "x", 1_000, 0);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
