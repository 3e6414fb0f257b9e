//! Provider capability interface and the typed layer above it

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::serializer::{self, Serializer};
use crate::{CacheError, CacheResult, CacheStats, CacheValue};

/// Backend family a provider belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    InMemory,
    Redis,
    Memcached,
    Sqlite,
    Disk,
    Etcd,
    /// Third-party backends and wrappers whose inner store is not known yet
    Other,
}

/// Descriptive identity a provider advertises to the registry and the
/// hybrid engine. Constructed once, immutable afterwards.
#[derive(Debug, Clone)]
pub struct ProviderInfo {
    /// Registered instance name
    pub name: String,

    /// Backend family
    pub kind: ProviderKind,

    /// Whether the store is shared across processes
    pub is_distributed: bool,

    /// Name of the serializer the provider encodes values with, if any
    pub serializer: Option<String>,

    /// Whether populate-on-miss stores null sentinels for empty results
    pub cache_nulls: bool,
}

impl ProviderInfo {
    /// Descriptor for a wrapper whose inner provider has not been
    /// constructed yet (decorators resolve their inner instance lazily)
    pub fn deferred(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ProviderKind::Other,
            is_distributed: false,
            serializer: None,
            cache_nulls: false,
        }
    }
}

/// Reject empty keys before any I/O
pub fn validate_key(key: &str) -> CacheResult<()> {
    if key.is_empty() {
        return Err(CacheError::InvalidArgument("cache key is empty".into()));
    }
    Ok(())
}

/// Reject non-positive expirations before any I/O
pub fn validate_ttl(ttl: Duration) -> CacheResult<()> {
    if ttl.is_zero() {
        return Err(CacheError::InvalidArgument(
            "expiration must be positive".into(),
        ));
    }
    Ok(())
}

/// Contract every concrete store implements.
///
/// Payloads are serialized bytes so decorators and the registry can treat
/// every store uniformly; typed access goes through [`ProviderExt`].
/// A `CacheValue::null()` payload stores the cached-null sentinel.
#[async_trait]
pub trait CachingProvider: Send + Sync {
    /// Identity advertised to the registry. Owned so wrappers can defer to
    /// their lazily-constructed inner instance.
    fn info(&self) -> ProviderInfo;

    /// Look up a key. Returns `no_value` on miss, `null` for a cached null.
    async fn get(&self, key: &str) -> CacheResult<CacheValue<Vec<u8>>>;

    /// Store a payload under a key with the given time-to-live.
    /// Passing `no_value` is an invalid argument.
    async fn set(&self, key: &str, value: CacheValue<Vec<u8>>, ttl: Duration) -> CacheResult<()>;

    /// Store several payloads with one shared time-to-live
    async fn set_all(
        &self,
        entries: Vec<(String, CacheValue<Vec<u8>>)>,
        ttl: Duration,
    ) -> CacheResult<()>;

    /// Drop a key; succeeds whether or not the key existed
    async fn remove(&self, key: &str) -> CacheResult<()>;

    /// Drop several keys
    async fn remove_all(&self, keys: &[String]) -> CacheResult<()>;

    /// Drop every key starting with `prefix`
    async fn remove_by_prefix(&self, prefix: &str) -> CacheResult<()>;

    /// Number of live entries whose key starts with `prefix`
    /// (an empty prefix counts everything)
    async fn count(&self, prefix: &str) -> CacheResult<usize>;

    async fn exists(&self, key: &str) -> CacheResult<bool>;

    /// Remaining time-to-live, `None` when the key is absent or unexpiring
    async fn expiration(&self, key: &str) -> CacheResult<Option<Duration>>;

    /// Drop every entry
    async fn flush(&self) -> CacheResult<()>;

    async fn stats(&self) -> CacheResult<CacheStats>;
}

/// Async factory used by populate-on-miss; `None` means the source has no
/// value for the key.
pub type ValueFactory<T> = Box<dyn FnOnce() -> BoxFuture<'static, CacheResult<Option<T>>> + Send>;

/// Typed access over any [`CachingProvider`], including trait objects.
#[async_trait]
pub trait ProviderExt: CachingProvider {
    /// Look up and decode a typed value
    async fn get_as<T>(&self, serializer: &dyn Serializer, key: &str) -> CacheResult<CacheValue<T>>
    where
        T: DeserializeOwned + Send,
    {
        let raw = self.get(key).await?;
        if !raw.has_value() {
            return Ok(CacheValue::no_value());
        }
        match raw.into_value() {
            Some(bytes) => {
                let value = serializer::from_payload(serializer, &bytes)?;
                Ok(CacheValue::new(value))
            }
            None => Ok(CacheValue::null()),
        }
    }

    /// Encode and store a typed value
    async fn set_as<T>(
        &self,
        serializer: &dyn Serializer,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> CacheResult<()>
    where
        T: Serialize + Sync,
    {
        let payload = serializer::to_payload(serializer, value)?;
        self.set(key, CacheValue::new(payload), ttl).await
    }

    /// Look up a typed value, invoking `factory` to populate on miss.
    ///
    /// When the factory yields `None` and the provider's `cache_nulls`
    /// policy is on, the null sentinel is stored so the factory is not
    /// re-invoked for the key until it expires. Concurrent misses may each
    /// invoke the factory; callers needing single-flight must lock
    /// externally.
    async fn get_or_fetch<T>(
        &self,
        serializer: &dyn Serializer,
        key: &str,
        factory: ValueFactory<T>,
        ttl: Duration,
    ) -> CacheResult<CacheValue<T>>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
    {
        validate_key(key)?;
        validate_ttl(ttl)?;

        let cached = self.get_as::<T>(serializer, key).await?;
        if cached.has_value() {
            return Ok(cached);
        }

        match factory().await? {
            Some(value) => {
                self.set_as(serializer, key, &value, ttl).await?;
                Ok(CacheValue::new(value))
            }
            None => {
                if self.info().cache_nulls {
                    self.set(key, CacheValue::null(), ttl).await?;
                    Ok(CacheValue::null())
                } else {
                    Ok(CacheValue::no_value())
                }
            }
        }
    }
}

#[async_trait]
impl<P: CachingProvider + ?Sized> ProviderExt for P {}
