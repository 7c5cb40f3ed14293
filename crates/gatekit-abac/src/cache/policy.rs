//! Cached policy lists keyed by `(system, subject_pk, action_pk)`.
//!
//! L1 holds the list under a typed key; the shared tier mirrors it under
//! `iam:policy:{system}:{subject_pk}:{action_pk}`. Misses are fetched from
//! storage in one batch per request, under single-flight. Negative results
//! (a subject with no policies for the action) are cached too.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use serde::{Deserialize, Serialize};

use crate::cache::backend::SharedCache;
use crate::cache::singleflight::SingleFlight;
use crate::config::CacheConfig;
use crate::storage::PolicyStore;
use crate::types::{now_unix, PolicyRecord};
use crate::AbacResult;

/// L1 key of one cached policy list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PolicyListKey {
    /// The system dimension.
    pub system: String,

    /// One effective subject pk.
    pub subject_pk: i64,

    /// The action pk.
    pub action_pk: i64,
}

/// One cached policy row: the expression pk plus the policy fields needed
/// to materialize an `AuthPolicy` without another storage read.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CachedPolicy {
    /// Policy pk.
    pub policy_pk: i64,

    /// Expression pk the policy points at.
    pub expression_pk: i64,

    /// Policy expiry, unix seconds.
    pub expired_at: i64,
}

/// The `(system, subject_pk, action_pk)` → policy-list cache.
pub struct PolicyCache {
    local: Cache<PolicyListKey, Arc<Vec<CachedPolicy>>>,
    shared: SharedCache,
    shared_ttl: Duration,
    store: Arc<dyn PolicyStore>,
    flight: SingleFlight,
}

fn shared_key(system: &str, subject_pk: i64, action_pk: i64) -> String {
    format!("iam:policy:{system}:{subject_pk}:{action_pk}")
}

impl PolicyCache {
    /// Creates the cache over a policy store and shared tier.
    #[must_use]
    pub fn new(store: Arc<dyn PolicyStore>, shared: SharedCache, config: &CacheConfig) -> Self {
        Self {
            local: Cache::builder()
                .max_capacity(config.local.size)
                .time_to_live(config.local.ttl)
                .support_invalidation_closures()
                .build(),
            shared,
            shared_ttl: config.shared.ttl,
            store,
            flight: SingleFlight::new(),
        }
    }

    /// Returns the live cached policies for every effective subject pk, in
    /// subject-pk input order.
    ///
    /// With `without_cache` both tiers are skipped for reads; writes still
    /// populate them.
    ///
    /// # Errors
    ///
    /// Returns an error only when storage fails; cache-tier failures
    /// downgrade to storage.
    pub async fn list_for_subjects(
        &self,
        system: &str,
        subject_pks: &[i64],
        action_pk: i64,
        without_cache: bool,
    ) -> AbacResult<Vec<CachedPolicy>> {
        let mut lists: HashMap<i64, Arc<Vec<CachedPolicy>>> = HashMap::new();

        if without_cache {
            let grouped = self.fetch_and_fill(system, subject_pks, action_pk).await?;
            lists.extend(grouped);
        } else {
            let mut missing = Vec::new();
            for &subject_pk in subject_pks {
                let key = PolicyListKey {
                    system: system.to_string(),
                    subject_pk,
                    action_pk,
                };
                match self.local.get(&key).await {
                    Some(list) => {
                        lists.insert(subject_pk, list);
                    }
                    None => missing.push(subject_pk),
                }
            }

            if !missing.is_empty() {
                let flight_key = {
                    let mut pks = missing.clone();
                    pks.sort_unstable();
                    format!(
                        "{system}:{action_pk}:{}",
                        pks.iter()
                            .map(i64::to_string)
                            .collect::<Vec<_>>()
                            .join(",")
                    )
                };
                let _guard = self.flight.acquire(&flight_key).await;

                // Re-check L1 under the lock: a coalesced peer may have
                // filled it while this task waited.
                let mut still_missing = Vec::new();
                for &subject_pk in &missing {
                    let key = PolicyListKey {
                        system: system.to_string(),
                        subject_pk,
                        action_pk,
                    };
                    match self.local.get(&key).await {
                        Some(list) => {
                            lists.insert(subject_pk, list);
                        }
                        None => still_missing.push(subject_pk),
                    }
                }

                // Probe the shared tier before storage.
                let mut storage_pks = Vec::new();
                for &subject_pk in &still_missing {
                    match self
                        .shared
                        .get_json::<Vec<CachedPolicy>>(&shared_key(system, subject_pk, action_pk))
                        .await
                    {
                        Some(list) => {
                            let list = Arc::new(list);
                            self.local
                                .insert(
                                    PolicyListKey {
                                        system: system.to_string(),
                                        subject_pk,
                                        action_pk,
                                    },
                                    Arc::clone(&list),
                                )
                                .await;
                            lists.insert(subject_pk, list);
                        }
                        None => storage_pks.push(subject_pk),
                    }
                }

                if !storage_pks.is_empty() {
                    let grouped = self.fetch_and_fill(system, &storage_pks, action_pk).await?;
                    lists.extend(grouped);
                }
            }
        }

        let now = now_unix();
        let mut result = Vec::new();
        for subject_pk in subject_pks {
            if let Some(list) = lists.get(subject_pk) {
                result.extend(list.iter().copied().filter(|p| p.expired_at > now));
            }
        }
        Ok(result)
    }

    /// One batched storage query; fills both tiers for every queried pk,
    /// empty lists included.
    async fn fetch_and_fill(
        &self,
        system: &str,
        subject_pks: &[i64],
        action_pk: i64,
    ) -> AbacResult<HashMap<i64, Arc<Vec<CachedPolicy>>>> {
        let rows = self
            .store
            .list_effect_policies(subject_pks, action_pk)
            .await?;

        let mut grouped: HashMap<i64, Vec<CachedPolicy>> =
            subject_pks.iter().map(|&pk| (pk, Vec::new())).collect();
        for row in rows {
            let PolicyRecord {
                pk,
                subject_pk,
                expression_pk,
                expired_at,
                ..
            } = row;
            grouped.entry(subject_pk).or_default().push(CachedPolicy {
                policy_pk: pk,
                expression_pk,
                expired_at,
            });
        }

        let mut filled = HashMap::with_capacity(grouped.len());
        for (subject_pk, list) in grouped {
            let list = Arc::new(list);
            self.local
                .insert(
                    PolicyListKey {
                        system: system.to_string(),
                        subject_pk,
                        action_pk,
                    },
                    Arc::clone(&list),
                )
                .await;
            self.shared
                .set_json(
                    &shared_key(system, subject_pk, action_pk),
                    list.as_ref(),
                    self.shared_ttl,
                )
                .await;
            filled.insert(subject_pk, list);
        }
        Ok(filled)
    }

    /// Drops every cached list for `(system, subject_pk, *)`, both tiers.
    pub async fn delete_system_subject_pks(&self, system: &str, subject_pks: &[i64]) {
        let system_owned = system.to_string();
        let pks: Vec<i64> = subject_pks.to_vec();
        if let Err(e) = self.local.invalidate_entries_if(move |key, _| {
            key.system == system_owned && pks.contains(&key.subject_pk)
        }) {
            tracing::warn!(system = %system, error = %e, "L1 policy invalidation failed");
        }

        for &subject_pk in subject_pks {
            self.shared
                .delete_by_prefix(&format!("iam:policy:{system}:{subject_pk}:"))
                .await;
        }
        tracing::debug!(system = %system, subjects = subject_pks.len(), "policy lists invalidated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingStore {
        rows: Vec<PolicyRecord>,
        calls: AtomicUsize,
    }

    impl CountingStore {
        fn new(rows: Vec<PolicyRecord>) -> Self {
            Self {
                rows,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PolicyStore for CountingStore {
        async fn list_effect_policies(
            &self,
            subject_pks: &[i64],
            action_pk: i64,
        ) -> AbacResult<Vec<PolicyRecord>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .rows
                .iter()
                .filter(|r| subject_pks.contains(&r.subject_pk) && r.action_pk == action_pk)
                .cloned()
                .collect())
        }
    }

    fn row(pk: i64, subject_pk: i64, expression_pk: i64) -> PolicyRecord {
        PolicyRecord {
            pk,
            subject_pk,
            action_pk: 9,
            expression_pk,
            expired_at: now_unix() + 3600,
            template_id: 0,
        }
    }

    fn make_cache(store: Arc<CountingStore>) -> PolicyCache {
        PolicyCache::new(store, SharedCache::Disabled, &CacheConfig::default())
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let store = Arc::new(CountingStore::new(vec![row(1, 100, 11), row(2, 200, 22)]));
        let cache = make_cache(Arc::clone(&store));

        let policies = cache
            .list_for_subjects("iam", &[100, 200], 9, false)
            .await
            .unwrap();
        assert_eq!(policies.len(), 2);
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);

        // second call is served from L1
        let policies = cache
            .list_for_subjects("iam", &[100, 200], 9, false)
            .await
            .unwrap();
        assert_eq!(policies.len(), 2);
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_negative_result_is_cached() {
        let store = Arc::new(CountingStore::new(vec![]));
        let cache = make_cache(Arc::clone(&store));

        for _ in 0..3 {
            let policies = cache
                .list_for_subjects("iam", &[100], 9, false)
                .await
                .unwrap();
            assert!(policies.is_empty());
        }
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_without_cache_reads_storage_but_populates() {
        let store = Arc::new(CountingStore::new(vec![row(1, 100, 11)]));
        let cache = make_cache(Arc::clone(&store));

        cache
            .list_for_subjects("iam", &[100], 9, true)
            .await
            .unwrap();
        cache
            .list_for_subjects("iam", &[100], 9, true)
            .await
            .unwrap();
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);

        // the bypassing calls still filled L1
        cache
            .list_for_subjects("iam", &[100], 9, false)
            .await
            .unwrap();
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidation_forces_refetch() {
        let store = Arc::new(CountingStore::new(vec![row(1, 100, 11)]));
        let cache = make_cache(Arc::clone(&store));

        cache
            .list_for_subjects("iam", &[100], 9, false)
            .await
            .unwrap();
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);

        cache.delete_system_subject_pks("iam", &[100]).await;

        cache
            .list_for_subjects("iam", &[100], 9, false)
            .await
            .unwrap();
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidation_is_scoped_to_system_and_subject() {
        let store = Arc::new(CountingStore::new(vec![row(1, 100, 11), row(2, 200, 22)]));
        let cache = make_cache(Arc::clone(&store));

        cache
            .list_for_subjects("iam", &[100, 200], 9, false)
            .await
            .unwrap();
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);

        // another system: no effect on iam entries
        cache.delete_system_subject_pks("cmdb", &[100, 200]).await;
        cache
            .list_for_subjects("iam", &[100, 200], 9, false)
            .await
            .unwrap();
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);

        // only subject 100 invalidated: the batch refetches just that pk
        cache.delete_system_subject_pks("iam", &[100]).await;
        cache
            .list_for_subjects("iam", &[100, 200], 9, false)
            .await
            .unwrap();
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_expired_policies_filtered_at_read() {
        let mut expired = row(1, 100, 11);
        expired.expired_at = now_unix() - 10;
        let store = Arc::new(CountingStore::new(vec![expired, row(2, 100, 22)]));
        let cache = make_cache(store);

        let policies = cache
            .list_for_subjects("iam", &[100], 9, false)
            .await
            .unwrap();
        assert_eq!(policies.len(), 1);
        assert_eq!(policies[0].policy_pk, 2);
    }

    #[tokio::test]
    async fn test_concurrent_misses_coalesce() {
        let store = Arc::new(CountingStore::new(vec![row(1, 100, 11)]));
        let cache = Arc::new(make_cache(Arc::clone(&store)));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                cache.list_for_subjects("iam", &[100], 9, false).await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().len(), 1);
        }
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }
}
