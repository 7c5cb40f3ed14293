//! Cached subject pk and membership lookups.
//!
//! The pk mapping is two-tier (`iam:spk:{type}:{id}` in the shared tier);
//! membership details change more often and stay process-local.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;

use crate::cache::backend::SharedCache;
use crate::config::CacheConfig;
use crate::storage::SubjectStore;
use crate::types::{SubjectDetail, SubjectGroup, SubjectKind};
use crate::AbacResult;

/// Subject pk and detail caches over a subject store.
pub struct SubjectCache {
    pk_local: Cache<(SubjectKind, String), i64>,
    detail_local: Cache<i64, Arc<SubjectDetail>>,
    shared: SharedCache,
    shared_ttl: Duration,
    store: Arc<dyn SubjectStore>,
}

fn shared_pk_key(kind: SubjectKind, id: &str) -> String {
    format!("iam:spk:{kind}:{id}")
}

impl SubjectCache {
    /// Creates the caches over a subject store and shared tier.
    #[must_use]
    pub fn new(store: Arc<dyn SubjectStore>, shared: SharedCache, config: &CacheConfig) -> Self {
        Self {
            pk_local: Cache::builder()
                .max_capacity(config.local.size)
                .time_to_live(config.local.ttl)
                .build(),
            detail_local: Cache::builder()
                .max_capacity(config.local.size)
                .time_to_live(config.local.ttl)
                .build(),
            shared,
            shared_ttl: config.shared.ttl,
            store,
        }
    }

    /// Resolves a subject `(type, id)` to its pk; `None` for unknown
    /// subjects. Unknown subjects are not negatively cached: a subject
    /// created moments later must be visible immediately.
    ///
    /// # Errors
    ///
    /// Returns an error only when storage fails.
    pub async fn get_subject_pk(
        &self,
        kind: SubjectKind,
        id: &str,
        without_cache: bool,
    ) -> AbacResult<Option<i64>> {
        let local_key = (kind, id.to_string());
        if !without_cache {
            if let Some(pk) = self.pk_local.get(&local_key).await {
                return Ok(Some(pk));
            }
            if let Some(pk) = self.shared.get_json::<i64>(&shared_pk_key(kind, id)).await {
                self.pk_local.insert(local_key, pk).await;
                return Ok(Some(pk));
            }
        }

        let Some(pk) = self.store.get_subject_pk(kind, id).await? else {
            return Ok(None);
        };
        self.pk_local.insert(local_key, pk).await;
        self.shared
            .set_json(&shared_pk_key(kind, id), &pk, self.shared_ttl)
            .await;
        Ok(Some(pk))
    }

    /// Fetches a subject's memberships; `None` for unknown subjects.
    ///
    /// # Errors
    ///
    /// Returns an error only when storage fails.
    pub async fn get_subject_detail(
        &self,
        pk: i64,
        without_cache: bool,
    ) -> AbacResult<Option<Arc<SubjectDetail>>> {
        if !without_cache {
            if let Some(detail) = self.detail_local.get(&pk).await {
                return Ok(Some(detail));
            }
        }

        let Some(detail) = self.store.get_subject_detail(pk).await? else {
            return Ok(None);
        };
        let detail = Arc::new(detail);
        self.detail_local.insert(pk, Arc::clone(&detail)).await;
        Ok(Some(detail))
    }

    /// Groups inherited through the given departments, straight from
    /// storage. Resolution is per request; the policy-list single-flight
    /// bounds the stampede cost.
    ///
    /// # Errors
    ///
    /// Returns an error only when storage fails.
    pub async fn list_subject_effect_groups(
        &self,
        department_pks: &[i64],
    ) -> AbacResult<Vec<SubjectGroup>> {
        self.store.list_subject_effect_groups(department_pks).await
    }
}
