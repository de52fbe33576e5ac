//! Secret cell (C6): a per-ID, single-payload, burn-after-reading store.
//!
//! Each ID is a slot transitioning `EMPTY -> OCCUPIED -> (burned | expired)`.
//! Both terminal outcomes collapse back to an absent entry — there is no
//! reason to retain a tombstone once a cell has nothing left to serve, since
//! identifiers are never reused — so the whole state machine is carried by
//! presence/absence in a `DashMap`, with `dashmap`'s own entry API providing
//! the atomic check-then-write the store operation needs (the same entry
//! API the rate limiter and the deduplicator lean on for their own
//! single-writer sections). Deletion alarms are `tokio::spawn`'d sleeps
//! holding only a `Weak` handle back into the store, so a pending alarm
//! never keeps the store alive past its last strong reference.

use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::clock::SharedClock;

pub const TTL_MIN_MS: u64 = 300_000;
pub const TTL_MAX_MS: u64 = 604_800_000;
pub const TTL_DEFAULT_MS: u64 = 86_400_000;

#[derive(Debug, Clone)]
struct Payload {
    encrypted: String,
    iv: String,
    created_at: u64,
    expires_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    IdCollision,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Ok { encrypted: String, iv: String },
    NotFound,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidateOutcome {
    Ready { created_at: u64, expires_at: u64, ttl: u64 },
    NotFound,
    Expired,
}

struct Inner {
    payloads: DashMap<String, Payload>,
    clock: SharedClock,
}

/// Cheaply cloneable handle onto the whole per-process table of secret cells.
#[derive(Clone)]
pub struct SecretStore(Arc<Inner>);

impl SecretStore {
    pub fn new(clock: SharedClock) -> Self {
        Self(Arc::new(Inner { payloads: DashMap::new(), clock }))
    }

    /// Atomically creates a cell if `id` is currently empty. Callers (C9)
    /// are responsible for validating `ttl_ms` bounds and payload shape
    /// before calling; this only enforces the single-writer invariant.
    pub async fn store(&self, id: &str, encrypted: String, iv: String, ttl_ms: u64) -> Result<(), StoreError> {
        let now = self.0.clock.now_ms();
        let expires_at = now + ttl_ms;

        match self.0.payloads.entry(id.to_string()) {
            Entry::Occupied(_) => Err(StoreError::IdCollision),
            Entry::Vacant(v) => {
                v.insert(Payload { encrypted, iv, created_at: now, expires_at });
                self.schedule_alarm(id.to_string(), expires_at.saturating_sub(now));
                Ok(())
            }
        }
    }

    /// Destructive read: returns the payload and deletes it, or reports
    /// `not_found` / `expired` (deleting on the latter too).
    pub async fn read(&self, id: &str) -> ReadOutcome {
        let now = self.0.clock.now_ms();
        match self.0.payloads.entry(id.to_string()) {
            Entry::Occupied(o) => {
                if now > o.get().expires_at {
                    o.remove();
                    ReadOutcome::Expired
                } else {
                    let payload = o.remove();
                    ReadOutcome::Ok { encrypted: payload.encrypted, iv: payload.iv }
                }
            }
            Entry::Vacant(_) => ReadOutcome::NotFound,
        }
    }

    /// Non-destructive status check. Still deletes (and reports) an expired
    /// cell, since an expired payload must never be servable by a later
    /// read — the delete-on-expired branch here and the alarm are both
    /// idempotent removals of the same thing.
    pub async fn validate(&self, id: &str) -> ValidateOutcome {
        let now = self.0.clock.now_ms();
        match self.0.payloads.entry(id.to_string()) {
            Entry::Occupied(o) => {
                if now > o.get().expires_at {
                    o.remove();
                    ValidateOutcome::Expired
                } else {
                    let payload = o.get();
                    ValidateOutcome::Ready {
                        created_at: payload.created_at,
                        expires_at: payload.expires_at,
                        ttl: payload.expires_at - now,
                    }
                }
            }
            Entry::Vacant(_) => ValidateOutcome::NotFound,
        }
    }

    /// Unconditionally removes any payload at `id`. A no-op if the cell was
    /// already emptied by a read that beat the alarm to it.
    pub fn alarm(&self, id: &str) {
        self.0.payloads.remove(id);
    }

    fn schedule_alarm(&self, id: String, delay_ms: u64) {
        let weak: Weak<Inner> = Arc::downgrade(&self.0);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            if let Some(inner) = weak.upgrade() {
                inner.payloads.remove(&id);
            }
        });
    }

    #[cfg(test)]
    fn contains(&self, id: &str) -> bool {
        self.0.payloads.contains_key(id)
    }
}
