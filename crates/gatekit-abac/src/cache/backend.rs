//! Shared (L2) cache backend over redis.
//!
//! Values are JSON bytes. Every operation is bounded by the configured
//! per-call deadline; a slow or failing backend counts as a miss (reads) or
//! is logged and ignored (writes). The engine never fails a request because
//! the shared tier is down.

use std::time::Duration;

use deadpool_redis::Pool;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// The shared cache tier.
///
/// `Disabled` is the single-process mode: every read misses, every write is
/// a no-op, and the engine runs on L1 + storage alone.
#[derive(Clone)]
pub enum SharedCache {
    /// No shared tier configured.
    Disabled,
    /// Redis-backed shared tier.
    Redis {
        /// Connection pool.
        pool: Pool,
        /// Per-call deadline.
        deadline: Duration,
    },
}

impl SharedCache {
    /// Creates a redis-backed shared cache.
    #[must_use]
    pub fn new_redis(pool: Pool, deadline: Duration) -> Self {
        Self::Redis { pool, deadline }
    }

    /// Gets and decodes a value; any failure is a miss.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let Self::Redis { pool, deadline } = self else {
            return None;
        };

        let fetch = async {
            let mut conn = pool.get().await.ok()?;
            conn.get::<_, Option<Vec<u8>>>(key).await.ok()?
        };
        match tokio::time::timeout(*deadline, fetch).await {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(value) => {
                    tracing::debug!(key = %key, "cache hit (L2)");
                    Some(value)
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "dropping undecodable L2 entry");
                    None
                }
            },
            Ok(None) => None,
            Err(_) => {
                tracing::warn!(key = %key, "L2 GET deadline exceeded");
                None
            }
        }
    }

    /// Encodes and stores a value with a TTL. Failures are logged and
    /// ignored.
    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let Self::Redis { pool, deadline } = self else {
            return;
        };

        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "L2 value encode failed");
                return;
            }
        };

        let write = async {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| format!("pool: {e}"))?;
            conn.set_ex::<_, _, ()>(key, bytes, ttl.as_secs())
                .await
                .map_err(|e| format!("SET: {e}"))
        };
        match tokio::time::timeout(*deadline, write).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(key = %key, error = %e, "L2 SET failed"),
            Err(_) => tracing::warn!(key = %key, "L2 SET deadline exceeded"),
        }
    }

    /// Deletes keys. Failures are logged and ignored.
    pub async fn delete(&self, keys: &[String]) {
        let Self::Redis { pool, deadline } = self else {
            return;
        };
        if keys.is_empty() {
            return;
        }

        let delete = async {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| format!("pool: {e}"))?;
            conn.del::<_, ()>(keys)
                .await
                .map_err(|e| format!("DEL: {e}"))
        };
        match tokio::time::timeout(*deadline, delete).await {
            Ok(Ok(())) => tracing::debug!(count = keys.len(), "L2 keys deleted"),
            Ok(Err(e)) => tracing::warn!(error = %e, "L2 DEL failed"),
            Err(_) => tracing::warn!("L2 DEL deadline exceeded"),
        }
    }

    /// Deletes every key matching `{prefix}*` via cursor scans. Failures
    /// are logged and ignored.
    pub async fn delete_by_prefix(&self, prefix: &str) {
        let Self::Redis { pool, deadline } = self else {
            return;
        };

        let pattern = format!("{prefix}*");
        let scan_delete = async {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| format!("pool: {e}"))?;
            let mut cursor: u64 = 0;
            loop {
                let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(100)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| format!("SCAN: {e}"))?;
                if !keys.is_empty() {
                    conn.del::<_, ()>(keys)
                        .await
                        .map_err(|e| format!("DEL: {e}"))?;
                }
                cursor = next;
                if cursor == 0 {
                    break;
                }
            }
            Ok::<_, String>(())
        };

        // Prefix scans cover many keys; give them a few deadline windows.
        match tokio::time::timeout(*deadline * 4, scan_delete).await {
            Ok(Ok(())) => tracing::debug!(pattern = %pattern, "L2 prefix deleted"),
            Ok(Err(e)) => tracing::warn!(pattern = %pattern, error = %e, "L2 prefix delete failed"),
            Err(_) => tracing::warn!(pattern = %pattern, "L2 prefix delete deadline exceeded"),
        }
    }
}
