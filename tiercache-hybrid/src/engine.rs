//! Two-tier cache engine

use async_trait::async_trait;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use tiercache_core::serializer::{from_payload, to_payload};
use tiercache_core::{
    validate_key, validate_ttl, CacheBus, CacheMessage, CacheRegistry, CacheResult, CacheValue,
    CachingProvider, MessageHandler, Serializer, ValueFactory,
};

use crate::options::HybridCacheOptions;

/// Two-tier cache: reads prefer the local provider and fall through to
/// the distributed one, writes go to the distributed store first and are
/// announced to other instances over the bus.
///
/// Coherence is eventual: between a remote instance's distributed write
/// completing and its invalidation message arriving here, a local read
/// may still return the previously cached value. Within one instance a
/// `set` followed by a `get` of the same key is always consistent.
///
/// The distributed store is the source of truth: its errors propagate to
/// the caller, while local-tier errors and publish failures are logged
/// and absorbed.
pub struct HybridCache {
    id: String,
    options: HybridCacheOptions,
    local: Arc<dyn CachingProvider>,
    distributed: Arc<dyn CachingProvider>,
    bus: Arc<dyn CacheBus>,
    serializer: Arc<dyn Serializer>,
}

/// Evicts keys announced by other instances from the local tier only;
/// the originator already updated the distributed store.
struct InvalidationHandler {
    id: String,
    cache_name: String,
    local: Arc<dyn CachingProvider>,
}

#[async_trait]
impl MessageHandler for InvalidationHandler {
    async fn handle(&self, message: CacheMessage) {
        if message.source_id == self.id {
            debug!(
                "cache '{}': ignoring own invalidation {}",
                self.cache_name, message.id
            );
            return;
        }

        for key in &message.keys {
            let result = if message.prefix {
                self.local.remove_by_prefix(key).await
            } else {
                self.local.remove(key).await
            };

            if let Err(err) = result {
                warn!(
                    "cache '{}': local eviction of '{}' failed: {}",
                    self.cache_name, key, err
                );
            }
        }
    }
}

impl HybridCache {
    /// Wire an engine from explicit collaborators and subscribe it to the
    /// invalidation topic. A subscribe error propagates; wrap the bus in
    /// the circuit-breaker decoration to make startup resilient to a
    /// broker outage.
    pub async fn new(
        options: HybridCacheOptions,
        local: Arc<dyn CachingProvider>,
        distributed: Arc<dyn CachingProvider>,
        bus: Arc<dyn CacheBus>,
        serializer: Arc<dyn Serializer>,
    ) -> CacheResult<Arc<Self>> {
        validate_key(&options.topic)?;

        let engine = Arc::new(Self {
            id: Uuid::new_v4().to_string(),
            options,
            local,
            distributed,
            bus,
            serializer,
        });

        let handler = Arc::new(InvalidationHandler {
            id: engine.id.clone(),
            cache_name: engine.options.topic.clone(),
            local: Arc::clone(&engine.local),
        });
        engine.bus.subscribe(&engine.options.topic, handler).await?;

        Ok(engine)
    }

    /// Wire an engine by resolving every collaborator name in `options`
    /// against the registry
    pub async fn from_registry(
        registry: &CacheRegistry,
        options: HybridCacheOptions,
    ) -> CacheResult<Arc<Self>> {
        let local = registry.provider(&options.local_provider)?;
        let distributed = registry.provider(&options.distributed_provider)?;
        let bus = registry.bus(&options.bus)?;
        let serializer = registry.serializer(&options.serializer)?;
        Self::new(options, local, distributed, bus, serializer).await
    }

    /// Unique id of this engine instance, carried on every published
    /// message so receivers can skip self-originated invalidations
    pub fn instance_id(&self) -> &str {
        &self.id
    }

    /// Read a value, preferring the local tier.
    ///
    /// A distributed hit is mirrored into the local tier with the
    /// distributed store's remaining TTL, or the configured fallback
    /// expiration when the TTL cannot be read.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> CacheResult<CacheValue<T>> {
        validate_key(key)?;

        match self.local.get(key).await {
            Ok(cached) if cached.has_value() => return self.decode(cached),
            Ok(_) => {}
            Err(err) => {
                warn!(
                    "cache '{}': local read of '{}' failed ({}), trying distributed",
                    self.options.topic, key, err
                );
            }
        }

        let remote = self.distributed.get(key).await?;
        if !remote.has_value() {
            return Ok(CacheValue::no_value());
        }

        let ttl = match self.distributed.expiration(key).await {
            Ok(Some(ttl)) if !ttl.is_zero() => ttl,
            Ok(_) => self.options.fallback_expiration,
            Err(err) => {
                warn!(
                    "cache '{}': TTL query for '{}' failed ({}), using fallback expiration",
                    self.options.topic, key, err
                );
                self.options.fallback_expiration
            }
        };

        if let Err(err) = self.local.set(key, remote.clone(), ttl).await {
            warn!(
                "cache '{}': local populate of '{}' failed: {}",
                self.options.topic, key, err
            );
        }

        self.decode(remote)
    }

    /// Read a value, invoking `factory` to populate both tiers on miss.
    ///
    /// A `None` factory result is stored as a null sentinel when
    /// `cache_nulls` is on. Concurrent misses may each invoke the
    /// factory; single-flight is intentionally not provided.
    pub async fn get_or_fetch<T>(
        &self,
        key: &str,
        factory: ValueFactory<T>,
        ttl: Duration,
    ) -> CacheResult<CacheValue<T>>
    where
        T: Serialize + DeserializeOwned,
    {
        validate_ttl(ttl)?;

        let cached = self.get::<T>(key).await?;
        if cached.has_value() {
            return Ok(cached);
        }

        match factory().await? {
            Some(value) => {
                self.set(key, &value, ttl).await?;
                Ok(CacheValue::new(value))
            }
            None => {
                if self.options.cache_nulls {
                    self.store(key, CacheValue::null(), ttl).await?;
                    Ok(CacheValue::null())
                } else {
                    Ok(CacheValue::no_value())
                }
            }
        }
    }

    /// Write a value to both tiers and announce the key to other
    /// instances.
    ///
    /// The distributed write decides the outcome; a publish failure never
    /// fails the call.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> CacheResult<()> {
        validate_key(key)?;
        validate_ttl(ttl)?;

        let payload = to_payload(self.serializer.as_ref(), value)?;
        self.store(key, CacheValue::new(payload), ttl).await
    }

    /// Drop a key from both tiers and announce the eviction
    pub async fn remove(&self, key: &str) -> CacheResult<()> {
        validate_key(key)?;

        self.distributed.remove(key).await?;
        if let Err(err) = self.local.remove(key).await {
            warn!(
                "cache '{}': local removal of '{}' failed: {}",
                self.options.topic, key, err
            );
        }

        self.announce(CacheMessage::evict(&self.id, vec![key.to_string()]))
            .await;
        Ok(())
    }

    /// Drop every key with the given prefix from both tiers and announce
    /// the purge
    pub async fn remove_by_prefix(&self, prefix: &str) -> CacheResult<()> {
        validate_key(prefix)?;

        self.distributed.remove_by_prefix(prefix).await?;
        if let Err(err) = self.local.remove_by_prefix(prefix).await {
            warn!(
                "cache '{}': local purge of '{}*' failed: {}",
                self.options.topic, prefix, err
            );
        }

        self.announce(CacheMessage::purge_prefix(&self.id, prefix))
            .await;
        Ok(())
    }

    /// Whether either tier holds the key
    pub async fn exists(&self, key: &str) -> CacheResult<bool> {
        validate_key(key)?;

        match self.local.exists(key).await {
            Ok(true) => return Ok(true),
            Ok(false) => {}
            Err(err) => {
                warn!(
                    "cache '{}': local exists check for '{}' failed: {}",
                    self.options.topic, key, err
                );
            }
        }

        self.distributed.exists(key).await
    }

    async fn store(
        &self,
        key: &str,
        payload: CacheValue<Vec<u8>>,
        ttl: Duration,
    ) -> CacheResult<()> {
        self.distributed.set(key, payload.clone(), ttl).await?;

        if let Err(err) = self.local.set(key, payload, ttl).await {
            warn!(
                "cache '{}': local write of '{}' failed: {}",
                self.options.topic, key, err
            );
        }

        self.announce(CacheMessage::evict(&self.id, vec![key.to_string()]))
            .await;
        Ok(())
    }

    /// Publish inside its own error boundary: mutation success is never
    /// coupled to broker availability.
    async fn announce(&self, message: CacheMessage) {
        let token = CancellationToken::new();
        if let Err(err) = self
            .bus
            .publish(&self.options.topic, &message, &token)
            .await
        {
            warn!(
                "cache '{}': invalidation publish failed ({}), other instances converge on their next distributed read",
                self.options.topic, err
            );
        }
    }

    fn decode<T: DeserializeOwned>(&self, raw: CacheValue<Vec<u8>>) -> CacheResult<CacheValue<T>> {
        match raw.into_value() {
            Some(bytes) => {
                let value = from_payload(self.serializer.as_ref(), &bytes)?;
                Ok(CacheValue::new(value))
            }
            None => Ok(CacheValue::null()),
        }
    }
}
