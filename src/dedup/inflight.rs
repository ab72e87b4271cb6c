//! # In-flight request map.
//!
//! [`InFlightMap`] enforces at most one in-flight request per fingerprint.
//! Admission is an atomic check-and-insert; release is scoped: `try_admit`
//! hands back an [`InFlightGuard`] that removes the entry on drop, so a
//! failing handler can never leave a fingerprint blocked — the guard runs on
//! every exit path (success, error, panic).
//!
//! A background reaper is the safety net for handlers that never drop their
//! guard (e.g. a leaked future): every [`REAP_INTERVAL`] it deletes entries
//! older than the TTL.
//!
//! ## Rules
//! - At most one entry per fingerprint.
//! - A guard only evicts the entry it admitted: entries carry an epoch, so a
//!   stale guard whose entry was reaped and re-admitted leaves the newer
//!   entry alone.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Age past which an unreleased entry is evicted by the reaper.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// How often the reaper scans the map.
pub const REAP_INTERVAL: Duration = Duration::from_secs(60);

struct Entry {
    admitted_at: Instant,
    epoch: u64,
}

struct Inner {
    entries: Mutex<HashMap<String, Entry>>,
    ttl: Duration,
    next_epoch: AtomicU64,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Map from request fingerprint to admission timestamp.
///
/// Cheap to clone; clones share the same entries.
#[derive(Clone)]
pub struct InFlightMap {
    inner: Arc<Inner>,
}

impl InFlightMap {
    /// Creates an empty map with the default 300 s TTL.
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    /// Creates an empty map with a custom reaper TTL.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                ttl,
                next_epoch: AtomicU64::new(0),
            }),
        }
    }

    /// Atomically admits `key` if no identical request is in flight.
    ///
    /// Returns `None` when the fingerprint is already present — the caller
    /// should surface a "duplicate request" condition, not retry internally.
    pub fn try_admit(&self, key: impl Into<String>) -> Option<InFlightGuard> {
        let key = key.into();
        let epoch = self.inner.next_epoch.fetch_add(1, Ordering::Relaxed);

        let mut entries = self.inner.lock();
        if entries.contains_key(&key) {
            return None;
        }
        entries.insert(
            key.clone(),
            Entry {
                admitted_at: Instant::now(),
                epoch,
            },
        );
        Some(InFlightGuard {
            inner: Arc::clone(&self.inner),
            key,
            epoch,
        })
    }

    /// Returns whether `key` is currently in flight.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().contains_key(key)
    }

    /// Returns the number of in-flight entries.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawns the background reaper, cancelled through `token`.
    ///
    /// Every [`REAP_INTERVAL`], deletes entries whose age exceeds the TTL.
    /// Must be called from within a Tokio runtime.
    pub fn spawn_reaper(&self, token: CancellationToken) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + REAP_INTERVAL, REAP_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let now = Instant::now();
                        let mut entries = inner.lock();
                        let before = entries.len();
                        entries.retain(|_, e| now.duration_since(e.admitted_at) <= inner.ttl);
                        let reaped = before - entries.len();
                        drop(entries);
                        if reaped > 0 {
                            tracing::warn!(reaped, "evicted stale in-flight entries");
                        }
                    }
                }
            }
        });
    }
}

impl Default for InFlightMap {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped release of one admitted fingerprint.
///
/// Dropping the guard removes the entry — on every exit path.
pub struct InFlightGuard {
    inner: Arc<Inner>,
    key: String,
    epoch: u64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut entries = self.inner.lock();
        // Only evict our own entry; the reaper may have replaced it already.
        if entries.get(&self.key).is_some_and(|e| e.epoch == self.epoch) {
            entries.remove(&self.key);
        }
    }
}
