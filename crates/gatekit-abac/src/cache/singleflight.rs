//! Per-key request coalescing.
//!
//! Concurrent misses for the same cache key serialize on a keyed async
//! lock: the first holder fetches from storage and fills the cache, the
//! waiters re-check the cache under the lock and find the shared result.
//! Only one storage round-trip executes per key.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A table of per-key async locks.
#[derive(Default)]
pub struct SingleFlight {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

/// Holds the key's lock; dropping releases it and garbage-collects the
/// entry once nobody is waiting.
pub struct SingleFlightGuard {
    key: String,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    lock: Arc<Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl SingleFlight {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock for `key`, waiting behind any in-flight holder.
    pub async fn acquire(&self, key: &str) -> SingleFlightGuard {
        let lock = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.clone().lock_owned().await;
        SingleFlightGuard {
            key: key.to_string(),
            locks: Arc::clone(&self.locks),
            lock,
            guard: Some(guard),
        }
    }
}

impl Drop for SingleFlightGuard {
    fn drop(&mut self) {
        self.guard.take();
        // Entry GC: strong refs are the map's plus ours; more means waiters
        // still queued, so the entry stays.
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) <= 2 && Arc::ptr_eq(lock, &self.lock));
    }
}
