//! Cached expression records, shared tier over storage.
//!
//! Expression bodies are shared across subjects, so they live in the L2
//! tier under `iam:expr:{expression_pk}` rather than per-process memory.
//! Misses are batch-fetched under single-flight. Unknown pks stay absent
//! from the result; the PRP treats them as orphaned references.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::backend::SharedCache;
use crate::cache::singleflight::SingleFlight;
use crate::config::CacheConfig;
use crate::storage::ExpressionStore;
use crate::types::ExpressionRecord;
use crate::AbacResult;

/// The expression-by-pk cache.
pub struct ExpressionCache {
    shared: SharedCache,
    shared_ttl: Duration,
    store: Arc<dyn ExpressionStore>,
    flight: SingleFlight,
}

fn shared_key(expression_pk: i64) -> String {
    format!("iam:expr:{expression_pk}")
}

impl ExpressionCache {
    /// Creates the cache over an expression store and shared tier.
    #[must_use]
    pub fn new(store: Arc<dyn ExpressionStore>, shared: SharedCache, config: &CacheConfig) -> Self {
        Self {
            shared,
            shared_ttl: config.shared.ttl,
            store,
            flight: SingleFlight::new(),
        }
    }

    /// Fetches expression records by pk: shared tier first, storage for the
    /// misses, shared tier repopulated. Result order follows `pks`; unknown
    /// pks are absent.
    ///
    /// # Errors
    ///
    /// Returns an error only when storage fails.
    pub async fn list_by_pks(
        &self,
        pks: &[i64],
        without_cache: bool,
    ) -> AbacResult<Vec<ExpressionRecord>> {
        let mut found: Vec<ExpressionRecord> = Vec::with_capacity(pks.len());
        let mut missing: Vec<i64> = Vec::new();

        if without_cache {
            missing.extend_from_slice(pks);
        } else {
            for &pk in pks {
                match self.shared.get_json::<ExpressionRecord>(&shared_key(pk)).await {
                    Some(record) => found.push(record),
                    None => missing.push(pk),
                }
            }
        }

        if !missing.is_empty() {
            let flight_key = {
                let mut sorted = missing.clone();
                sorted.sort_unstable();
                format!(
                    "expr:{}",
                    sorted
                        .iter()
                        .map(i64::to_string)
                        .collect::<Vec<_>>()
                        .join(",")
                )
            };
            let _guard = self.flight.acquire(&flight_key).await;

            let records = self.store.list_expressions_by_pks(&missing).await?;
            for record in &records {
                self.shared
                    .set_json(&shared_key(record.pk), record, self.shared_ttl)
                    .await;
            }
            found.extend(records);
        }

        // Deterministic order: follow the requested pk order.
        found.sort_by_key(|record| {
            pks.iter()
                .position(|&pk| pk == record.pk)
                .unwrap_or(usize::MAX)
        });
        Ok(found)
    }

    /// Drops the listed expression records from the shared tier.
    pub async fn batch_delete(&self, expression_pks: &[i64]) {
        let keys: Vec<String> = expression_pks.iter().copied().map(shared_key).collect();
        self.shared.delete(&keys).await;
        tracing::debug!(count = expression_pks.len(), "expressions invalidated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingStore {
        rows: Vec<ExpressionRecord>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ExpressionStore for CountingStore {
        async fn list_expressions_by_pks(&self, pks: &[i64]) -> AbacResult<Vec<ExpressionRecord>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .rows
                .iter()
                .filter(|r| pks.contains(&r.pk))
                .cloned()
                .collect())
        }
    }

    fn record(pk: i64) -> ExpressionRecord {
        ExpressionRecord {
            pk,
            kind: 1,
            expression: String::new(),
            signature: format!("sig-{pk}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_preserves_requested_order() {
        let store = Arc::new(CountingStore {
            rows: vec![record(1), record(2), record(3)],
            calls: AtomicUsize::new(0),
        });
        let cache = ExpressionCache::new(store, SharedCache::Disabled, &CacheConfig::default());

        let records = cache.list_by_pks(&[3, 1], false).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].pk, 3);
        assert_eq!(records[1].pk, 1);
    }

    #[tokio::test]
    async fn test_unknown_pks_are_absent() {
        let store = Arc::new(CountingStore {
            rows: vec![record(1)],
            calls: AtomicUsize::new(0),
        });
        let cache = ExpressionCache::new(store, SharedCache::Disabled, &CacheConfig::default());

        let records = cache.list_by_pks(&[1, 999], false).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].pk, 1);
    }
}
