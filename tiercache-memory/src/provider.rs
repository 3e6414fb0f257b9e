//! HashMap-backed provider implementation

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tiercache_core::{
    validate_key, validate_ttl, CacheError, CacheResult, CacheStats, CacheValue, CachingProvider,
    ProviderInfo, ProviderKind, StatsCollector,
};

/// Tuning knobs for an in-memory provider instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InMemoryOptions {
    /// Store null sentinels for empty populate-on-miss results
    pub cache_nulls: bool,
}

impl Default for InMemoryOptions {
    fn default() -> Self {
        Self { cache_nulls: false }
    }
}

struct MemoryEntry {
    /// `None` is the cached-null sentinel
    payload: Option<Vec<u8>>,
    expires_at: Instant,
}

impl MemoryEntry {
    fn new(payload: Option<Vec<u8>>, ttl: Duration) -> Self {
        Self {
            payload,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    fn to_value(&self) -> CacheValue<Vec<u8>> {
        match &self.payload {
            Some(bytes) => CacheValue::new(bytes.clone()),
            None => CacheValue::null(),
        }
    }
}

/// In-process store keyed by string, safe for concurrent use
pub struct InMemoryProvider {
    info: ProviderInfo,
    store: Arc<RwLock<HashMap<String, MemoryEntry>>>,
    stats: Arc<StatsCollector>,
}

impl InMemoryProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_options(name, InMemoryOptions::default())
    }

    pub fn with_options(name: impl Into<String>, options: InMemoryOptions) -> Self {
        Self {
            info: ProviderInfo {
                name: name.into(),
                kind: ProviderKind::InMemory,
                is_distributed: false,
                serializer: None,
                cache_nulls: options.cache_nulls,
            },
            store: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(StatsCollector::new()),
        }
    }

    /// A distributed-flagged instance, for tests and single-host setups
    /// standing in for a shared store
    pub fn distributed(name: impl Into<String>) -> Self {
        let mut provider = Self::new(name);
        provider.info.is_distributed = true;
        provider
    }

    fn live_count(&self, prefix: &str) -> usize {
        self.store
            .read()
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && !entry.is_expired())
            .count()
    }

    fn insert(
        store: &mut HashMap<String, MemoryEntry>,
        key: String,
        value: CacheValue<Vec<u8>>,
        ttl: Duration,
    ) -> CacheResult<()> {
        if !value.has_value() {
            return Err(CacheError::InvalidArgument(
                "cannot store the no-value sentinel".into(),
            ));
        }
        store.insert(key, MemoryEntry::new(value.into_value(), ttl));
        Ok(())
    }
}

#[async_trait]
impl CachingProvider for InMemoryProvider {
    fn info(&self) -> ProviderInfo {
        self.info.clone()
    }

    async fn get(&self, key: &str) -> CacheResult<CacheValue<Vec<u8>>> {
        validate_key(key)?;

        let mut store = self.store.write();
        match store.get(key) {
            Some(entry) if entry.is_expired() => {
                store.remove(key);
                self.stats.record_eviction();
                self.stats.record_miss();
                Ok(CacheValue::no_value())
            }
            Some(entry) => {
                self.stats.record_hit();
                Ok(entry.to_value())
            }
            None => {
                self.stats.record_miss();
                Ok(CacheValue::no_value())
            }
        }
    }

    async fn set(&self, key: &str, value: CacheValue<Vec<u8>>, ttl: Duration) -> CacheResult<()> {
        validate_key(key)?;
        validate_ttl(ttl)?;

        let mut store = self.store.write();
        Self::insert(&mut store, key.to_string(), value, ttl)?;
        self.stats.record_set();
        Ok(())
    }

    async fn set_all(
        &self,
        entries: Vec<(String, CacheValue<Vec<u8>>)>,
        ttl: Duration,
    ) -> CacheResult<()> {
        validate_ttl(ttl)?;
        for (key, value) in &entries {
            validate_key(key)?;
            if !value.has_value() {
                return Err(CacheError::InvalidArgument(
                    "cannot store the no-value sentinel".into(),
                ));
            }
        }

        let mut store = self.store.write();
        for (key, value) in entries {
            Self::insert(&mut store, key, value, ttl)?;
            self.stats.record_set();
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> CacheResult<()> {
        validate_key(key)?;

        self.store.write().remove(key);
        self.stats.record_removal();
        Ok(())
    }

    async fn remove_all(&self, keys: &[String]) -> CacheResult<()> {
        for key in keys {
            validate_key(key)?;
        }

        let mut store = self.store.write();
        for key in keys {
            store.remove(key);
            self.stats.record_removal();
        }
        Ok(())
    }

    async fn remove_by_prefix(&self, prefix: &str) -> CacheResult<()> {
        validate_key(prefix)?;

        let mut store = self.store.write();
        let before = store.len();
        store.retain(|key, _| !key.starts_with(prefix));
        for _ in store.len()..before {
            self.stats.record_removal();
        }
        Ok(())
    }

    async fn count(&self, prefix: &str) -> CacheResult<usize> {
        Ok(self.live_count(prefix))
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        validate_key(key)?;

        let store = self.store.read();
        Ok(store.get(key).is_some_and(|entry| !entry.is_expired()))
    }

    async fn expiration(&self, key: &str) -> CacheResult<Option<Duration>> {
        validate_key(key)?;

        let store = self.store.read();
        Ok(store
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(MemoryEntry::remaining))
    }

    async fn flush(&self) -> CacheResult<()> {
        let mut store = self.store.write();
        for _ in 0..store.len() {
            self.stats.record_eviction();
        }
        store.clear();
        Ok(())
    }

    async fn stats(&self) -> CacheResult<CacheStats> {
        Ok(self.stats.snapshot(self.live_count("")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use tiercache_core::{JsonSerializer, ProviderExt};

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn basic_operations() {
        let cache = InMemoryProvider::new("default");

        cache
            .set("key1", CacheValue::new(b"value1".to_vec()), TTL)
            .await
            .unwrap();
        let value = cache.get("key1").await.unwrap();
        assert_eq!(value.value().map(Vec::as_slice), Some(&b"value1"[..]));

        let miss = cache.get("key2").await.unwrap();
        assert!(!miss.has_value());

        cache.remove("key1").await.unwrap();
        assert!(!cache.get("key1").await.unwrap().has_value());
    }

    #[tokio::test]
    async fn entries_expire() {
        let cache = InMemoryProvider::new("default");

        cache
            .set(
                "key1",
                CacheValue::new(b"value1".to_vec()),
                Duration::from_millis(50),
            )
            .await
            .unwrap();
        assert!(cache.exists("key1").await.unwrap());

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!cache.exists("key1").await.unwrap());
        assert!(!cache.get("key1").await.unwrap().has_value());
    }

    #[tokio::test]
    async fn cached_nulls_are_not_misses() {
        let cache = InMemoryProvider::new("default");

        cache.set("empty", CacheValue::null(), TTL).await.unwrap();

        let value = cache.get("empty").await.unwrap();
        assert!(value.has_value());
        assert!(value.is_null());
    }

    #[tokio::test]
    async fn storing_no_value_is_rejected() {
        let cache = InMemoryProvider::new("default");

        let err = cache
            .set("key", CacheValue::no_value(), TTL)
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn empty_key_and_zero_ttl_fail_fast() {
        let cache = InMemoryProvider::new("default");

        assert!(matches!(
            cache.get("").await.unwrap_err(),
            CacheError::InvalidArgument(_)
        ));
        assert!(matches!(
            cache
                .set("key", CacheValue::new(vec![1]), Duration::ZERO)
                .await
                .unwrap_err(),
            CacheError::InvalidArgument(_)
        ));
    }

    #[tokio::test]
    async fn prefix_operations() {
        let cache = InMemoryProvider::new("default");

        for key in ["user:1", "user:2", "session:1"] {
            cache
                .set(key, CacheValue::new(b"v".to_vec()), TTL)
                .await
                .unwrap();
        }

        assert_eq!(cache.count("user:").await.unwrap(), 2);
        assert_eq!(cache.count("").await.unwrap(), 3);

        cache.remove_by_prefix("user:").await.unwrap();
        assert_eq!(cache.count("user:").await.unwrap(), 0);
        assert!(cache.exists("session:1").await.unwrap());
    }

    #[tokio::test]
    async fn expiration_reports_remaining_ttl() {
        let cache = InMemoryProvider::new("default");

        cache
            .set("key1", CacheValue::new(vec![1]), Duration::from_secs(60))
            .await
            .unwrap();

        let remaining = cache.expiration("key1").await.unwrap().unwrap();
        assert!(remaining <= Duration::from_secs(60));
        assert!(remaining > Duration::from_secs(55));

        assert_eq!(cache.expiration("absent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_all_shares_one_ttl() {
        let cache = InMemoryProvider::new("default");

        cache
            .set_all(
                vec![
                    ("a".to_string(), CacheValue::new(vec![1])),
                    ("b".to_string(), CacheValue::new(vec![2])),
                ],
                TTL,
            )
            .await
            .unwrap();

        assert!(cache.exists("a").await.unwrap());
        assert!(cache.exists("b").await.unwrap());
    }

    #[tokio::test]
    async fn flush_drops_everything() {
        let cache = InMemoryProvider::new("default");

        cache
            .set("key1", CacheValue::new(vec![1]), TTL)
            .await
            .unwrap();
        cache.flush().await.unwrap();

        assert_eq!(cache.count("").await.unwrap(), 0);
        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.evictions, 1);
    }

    #[tokio::test]
    async fn stats_track_hits_and_misses() {
        let cache = InMemoryProvider::new("default");

        cache
            .set("key1", CacheValue::new(vec![1]), TTL)
            .await
            .unwrap();
        cache.get("key1").await.unwrap();
        cache.get("key1").await.unwrap();
        cache.get("nope").await.unwrap();

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.gets, 3);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.sets, 1);
        assert_eq!(stats.entry_count, 1);
    }

    #[tokio::test]
    async fn get_or_fetch_populates_on_miss() {
        let cache = InMemoryProvider::new("default");
        let serializer = JsonSerializer::new();

        let value = cache
            .get_or_fetch::<String>(
                &serializer,
                "greeting",
                Box::new(|| async { Ok(Some("hello".to_string())) }.boxed()),
                TTL,
            )
            .await
            .unwrap();
        assert_eq!(value.value(), Some(&"hello".to_string()));

        // Second call is served from cache; a panicking factory proves it
        let cached = cache
            .get_or_fetch::<String>(
                &serializer,
                "greeting",
                Box::new(|| async { panic!("factory must not run on a hit") }.boxed()),
                TTL,
            )
            .await
            .unwrap();
        assert_eq!(cached.value(), Some(&"hello".to_string()));
    }

    #[tokio::test]
    async fn get_or_fetch_caches_nulls_when_enabled() {
        let cache = InMemoryProvider::with_options("default", InMemoryOptions { cache_nulls: true });
        let serializer = JsonSerializer::new();

        let first = cache
            .get_or_fetch::<String>(
                &serializer,
                "absent",
                Box::new(|| async { Ok(None) }.boxed()),
                TTL,
            )
            .await
            .unwrap();
        assert!(first.is_null());

        // The stored sentinel short-circuits the factory
        let second = cache
            .get_or_fetch::<String>(
                &serializer,
                "absent",
                Box::new(|| async { panic!("factory must not run for a cached null") }.boxed()),
                TTL,
            )
            .await
            .unwrap();
        assert!(second.is_null());
    }
}
