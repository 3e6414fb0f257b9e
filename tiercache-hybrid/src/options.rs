//! Hybrid engine configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Names of the collaborating instances and the engine's own policies.
///
/// Instance names resolve against the registry populated at bootstrap;
/// several engines with different option sets can coexist in one process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridCacheOptions {
    /// Bus topic the engine publishes invalidations to and subscribes on
    pub topic: String,

    /// Registered name of the local (in-process) provider
    pub local_provider: String,

    /// Registered name of the distributed provider
    pub distributed_provider: String,

    /// Registered name of the bus transport
    pub bus: String,

    /// Registered name of the value serializer
    pub serializer: String,

    /// Local-tier expiration used when the distributed store cannot
    /// report a remaining TTL
    #[serde(with = "humantime_serde")]
    pub fallback_expiration: Duration,

    /// Store null sentinels for empty populate-on-miss results
    pub cache_nulls: bool,
}

impl Default for HybridCacheOptions {
    fn default() -> Self {
        Self {
            topic: "tiercache.invalidation".to_string(),
            local_provider: "local".to_string(),
            distributed_provider: "distributed".to_string(),
            bus: "inprocess".to_string(),
            serializer: "json".to_string(),
            fallback_expiration: Duration::from_secs(60),
            cache_nulls: false,
        }
    }
}
