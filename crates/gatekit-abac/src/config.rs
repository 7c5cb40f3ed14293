//! Engine configuration.
//!
//! All sections have serde defaults, so an empty config is a fully working
//! single-process setup (local caches only, no shared tier).
//!
//! # Example (TOML)
//!
//! ```toml
//! [cache.local]
//! size = 50000
//! ttl = "5m"
//!
//! [cache.shared]
//! ttl = "1h"
//!
//! [eval]
//! max_resources = 10
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the ABAC engine.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AbacConfig {
    /// Cache tier configuration.
    pub cache: CacheConfig,

    /// Evaluation limits.
    pub eval: EvalConfig,

    /// Remote resource provider configuration.
    pub remote: RemoteConfig,
}

/// Configuration for both cache tiers.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Process-local (L1) cache settings.
    pub local: LocalCacheConfig,

    /// Shared (L2) cache settings.
    pub shared: SharedCacheConfig,
}

/// Process-local cache tier.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LocalCacheConfig {
    /// Maximum number of entries per local cache.
    pub size: u64,

    /// How long local entries remain valid.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for LocalCacheConfig {
    fn default() -> Self {
        Self {
            size: 50_000,
            ttl: Duration::from_secs(5 * 60),
        }
    }
}

/// Shared cache tier (redis).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SharedCacheConfig {
    /// How long shared entries remain valid.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// Per-call bound on shared-tier operations. A call that exceeds this
    /// counts as a cache miss, never as a request failure.
    #[serde(with = "humantime_serde")]
    pub deadline: Duration,
}

impl Default for SharedCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            deadline: Duration::from_millis(200),
        }
    }
}

/// Evaluation limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EvalConfig {
    /// Requests naming more resources than this are rejected.
    pub max_resources: usize,

    /// Deadline for one whole decision, storage and remote calls included.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            max_resources: 10,
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Remote resource provider settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Deadline for one outbound attribute-batch call.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(500),
        }
    }
}
