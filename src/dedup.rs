//! Request deduplication (C3): coalesce concurrent operations sharing a key
//! onto a single in-flight future.
//!
//! Guards against thundering-herd amplification when many callers race for
//! the same downstream read (e.g. many clients validating the same rate
//! limit key within the same millisecond). Uses `futures::future::Shared`
//! — the exact shape the spec calls for ("a `Shared<Future>` ... that
//! multiple callers can await and that resolves exactly once") — keyed in a
//! `dashmap::DashMap`, the same concurrent-map shape the teacher's
//! idempotency plugin uses for its own in-flight table.

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};

type DedupFuture<V, E> = Shared<BoxFuture<'static, Result<V, E>>>;

/// Coalesces concurrent callers keyed by `K` onto one in-flight operation.
/// All callers sharing a key observe the same result value or the same
/// error; `thunk` runs exactly once per dedup episode.
pub struct Deduplicator<K, V, E> {
    inflight: Arc<DashMap<K, DedupFuture<V, E>>>,
}

impl<K, V, E> Default for Deduplicator<K, V, E>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, E> Deduplicator<K, V, E>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self { inflight: Arc::new(DashMap::new()) }
    }

    /// Runs `thunk()` for `key` if nothing is already in flight for it,
    /// otherwise joins the existing in-flight future. The mapping entry is
    /// removed by the future's own terminator, on success or failure.
    pub async fn deduplicate<F, Fut>(&self, key: K, thunk: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        if let Some(existing) = self.inflight.get(&key) {
            return existing.clone().await;
        }

        let map = self.inflight.clone();
        let cleanup_key = key.clone();
        let boxed: BoxFuture<'static, Result<V, E>> = async move {
            let result = thunk().await;
            map.remove(&cleanup_key);
            result
        }
        .boxed();
        let shared = boxed.shared();

        // Re-check under the shard lock: the plain `get()` above and this
        // `entry()` are two separate locks, so another caller may have
        // installed a future for `key` in between. Whoever wins joins the
        // other's future instead of starting a second thunk.
        let to_await = match self.inflight.entry(key) {
            Entry::Occupied(o) => o.get().clone(),
            Entry::Vacant(v) => {
                v.insert(shared.clone());
                shared
            }
        };
        to_await.await
    }

    /// Number of keys currently in flight.
    pub fn inflight_count(&self) -> usize {
        self.inflight.len()
    }

    /// Test-only: drops all in-flight bookkeeping without waiting for it to
    /// resolve naturally.
    pub fn clear(&self) {
        self.inflight.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn different_keys_never_block_each_other() {
        let dedup: Deduplicator<&str, i32, String> = Deduplicator::new();
        let (a, b) = tokio::join!(
            dedup.deduplicate("a", || async { Ok(1) }),
            dedup.deduplicate("b", || async { Ok(2) }),
        );
        assert_eq!(a, Ok(1));
        assert_eq!(b, Ok(2));
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_thunk_invocation() {
        let dedup: Arc<Deduplicator<&str, i32, String>> = Arc::new(Deduplicator::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..50 {
            let dedup = dedup.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                dedup
                    .deduplicate("k", || {
                        let calls = calls.clone();
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok::<i32, String>(7)
                        }
                    })
                    .await
            }));
        }

        for h in handles {
            assert_eq!(h.await.unwrap(), Ok(7));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(dedup.inflight_count(), 0);
    }

    #[tokio::test]
    async fn concurrent_callers_observe_the_same_error() {
        let dedup: Arc<Deduplicator<&str, i32, String>> = Arc::new(Deduplicator::new());
        let mut handles = Vec::new();
        for _ in 0..10 {
            let dedup = dedup.clone();
            handles.push(tokio::spawn(async move {
                dedup.deduplicate("k", || async { Err::<i32, String>("boom".to_string()) }).await
            }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap(), Err("boom".to_string()));
        }
    }

    #[tokio::test]
    async fn entry_is_removed_after_resolution() {
        let dedup: Deduplicator<&str, i32, String> = Deduplicator::new();
        let _ = dedup.deduplicate("k", || async { Ok(1) }).await;
        assert_eq!(dedup.inflight_count(), 0);
    }
}
