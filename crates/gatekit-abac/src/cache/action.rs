//! Cached action detail lookups, process-local.

use std::sync::Arc;

use moka::future::Cache;

use crate::config::CacheConfig;
use crate::storage::{ActionDetail, ActionStore};
use crate::AbacResult;

/// The `(system, action_id)` → action detail cache.
pub struct ActionCache {
    local: Cache<(String, String), Arc<ActionDetail>>,
    store: Arc<dyn ActionStore>,
}

impl ActionCache {
    /// Creates the cache over an action store.
    #[must_use]
    pub fn new(store: Arc<dyn ActionStore>, config: &CacheConfig) -> Self {
        Self {
            local: Cache::builder()
                .max_capacity(config.local.size)
                .time_to_live(config.local.ttl)
                .build(),
            store,
        }
    }

    /// Resolves an action's pk and bound resource types; `None` for unknown
    /// actions. Unknown actions are not negatively cached.
    ///
    /// # Errors
    ///
    /// Returns an error only when storage fails.
    pub async fn get_action_detail(
        &self,
        system: &str,
        action_id: &str,
        without_cache: bool,
    ) -> AbacResult<Option<Arc<ActionDetail>>> {
        let key = (system.to_string(), action_id.to_string());
        if !without_cache {
            if let Some(detail) = self.local.get(&key).await {
                return Ok(Some(detail));
            }
        }

        let Some(detail) = self.store.get_action_detail(system, action_id).await? else {
            return Ok(None);
        };
        let detail = Arc::new(detail);
        self.local.insert(key, Arc::clone(&detail)).await;
        Ok(Some(detail))
    }
}
