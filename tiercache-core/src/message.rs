//! Invalidation message exchanged between engine instances

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payload carried on the bus when an instance mutates cache entries.
///
/// Carries only keys, never values: receivers drop their local copies and
/// re-fetch from the distributed store on next access. `source_id`
/// identifies the originating engine instance so receivers can skip
/// messages they published themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMessage {
    /// Unique id of this message
    pub id: String,

    /// Instance id of the engine that published the message
    pub source_id: String,

    /// Keys that were mutated or evicted, in mutation order
    pub keys: Vec<String>,

    /// When true, `keys` holds prefixes to purge rather than exact keys
    #[serde(default)]
    pub prefix: bool,

    /// Wall-clock publish time, for log correlation
    pub sent_at: DateTime<Utc>,
}

impl CacheMessage {
    /// Message announcing that exact keys were mutated
    pub fn evict(source_id: impl Into<String>, keys: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source_id: source_id.into(),
            keys,
            prefix: false,
            sent_at: Utc::now(),
        }
    }

    /// Message announcing that a whole key prefix was purged
    pub fn purge_prefix(source_id: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source_id: source_id.into(),
            keys: vec![prefix.into()],
            prefix: true,
            sent_at: Utc::now(),
        }
    }
}
