//! Retry policy, executor and the retry decorators

use async_trait::async_trait;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use tiercache_core::{
    BusDecoration, BusFactory, CacheBus, CacheError, CacheMessage, CacheResult, CacheStats,
    CacheValue, CachingProvider, LazyHolder, MessageHandler, ProviderDecoration, ProviderFactory,
    ProviderInfo,
};

use crate::backoff::{BackoffCalculator, BackoffStrategy};
use crate::filters::{self, ErrorFilter};

/// Default attempt count on the publish path
pub const DEFAULT_PUBLISH_ATTEMPTS: u32 = 3;

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,

    /// Delay after the first failed attempt
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,

    /// Upper bound on any single delay
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    /// How delays grow between attempts
    pub strategy: BackoffStrategy,

    /// Spread delays by ±20% to decorrelate competing clients
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_PUBLISH_ATTEMPTS,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            strategy: BackoffStrategy::Exponential { base: 2.0 },
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Default backoff shape with a caller-chosen attempt count
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        BackoffCalculator::new(
            self.strategy.clone(),
            self.initial_delay,
            self.max_delay,
            self.jitter,
        )
        .delay_for(attempt)
    }
}

/// Runs an operation under a retry policy.
///
/// Only errors accepted by the filter are retried; anything else
/// propagates on the first occurrence. When attempts are exhausted the
/// last error surfaces unchanged. Backoff sleeps observe the optional
/// cancellation token and surface `CacheError::Cancelled` promptly.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub async fn execute<F, Fut, T>(
        &self,
        filter: &ErrorFilter,
        token: Option<&CancellationToken>,
        mut f: F,
    ) -> CacheResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CacheResult<T>>,
    {
        let mut attempt = 1;

        loop {
            match f().await {
                Ok(result) => {
                    if attempt > 1 {
                        info!("operation succeeded on attempt {}", attempt);
                    }
                    return Ok(result);
                }
                Err(err) => {
                    if !filters::matches(filter, &err) {
                        return Err(err);
                    }
                    if attempt >= self.policy.max_attempts {
                        warn!("giving up after {} attempts: {}", attempt, err);
                        return Err(err);
                    }

                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        "attempt {} failed: {}. retrying in {:?}",
                        attempt, err, delay
                    );

                    match token {
                        Some(token) => {
                            tokio::select! {
                                _ = token.cancelled() => return Err(CacheError::Cancelled),
                                _ = sleep(delay) => {}
                            }
                        }
                        None => sleep(delay).await,
                    }

                    attempt += 1;
                }
            }
        }
    }
}

/// Provider decorator retrying matching failures with backoff.
///
/// The inner provider is constructed lazily; a failed construction is
/// itself retried on the next attempt.
pub struct RetryProvider {
    name: String,
    inner: Arc<LazyHolder<dyn CachingProvider>>,
    executor: RetryExecutor,
    filter: ErrorFilter,
}

#[async_trait]
impl CachingProvider for RetryProvider {
    fn info(&self) -> ProviderInfo {
        match self.inner.get() {
            Ok(provider) => provider.info(),
            Err(_) => ProviderInfo::deferred(&self.name),
        }
    }

    async fn get(&self, key: &str) -> CacheResult<CacheValue<Vec<u8>>> {
        self.executor
            .execute(&self.filter, None, || {
                let inner = Arc::clone(&self.inner);
                async move { inner.get()?.get(key).await }
            })
            .await
    }

    async fn set(&self, key: &str, value: CacheValue<Vec<u8>>, ttl: Duration) -> CacheResult<()> {
        self.executor
            .execute(&self.filter, None, || {
                let inner = Arc::clone(&self.inner);
                let value = value.clone();
                async move { inner.get()?.set(key, value, ttl).await }
            })
            .await
    }

    async fn set_all(
        &self,
        entries: Vec<(String, CacheValue<Vec<u8>>)>,
        ttl: Duration,
    ) -> CacheResult<()> {
        self.executor
            .execute(&self.filter, None, || {
                let inner = Arc::clone(&self.inner);
                let entries = entries.clone();
                async move { inner.get()?.set_all(entries, ttl).await }
            })
            .await
    }

    async fn remove(&self, key: &str) -> CacheResult<()> {
        self.executor
            .execute(&self.filter, None, || {
                let inner = Arc::clone(&self.inner);
                async move { inner.get()?.remove(key).await }
            })
            .await
    }

    async fn remove_all(&self, keys: &[String]) -> CacheResult<()> {
        self.executor
            .execute(&self.filter, None, || {
                let inner = Arc::clone(&self.inner);
                async move { inner.get()?.remove_all(keys).await }
            })
            .await
    }

    async fn remove_by_prefix(&self, prefix: &str) -> CacheResult<()> {
        self.executor
            .execute(&self.filter, None, || {
                let inner = Arc::clone(&self.inner);
                async move { inner.get()?.remove_by_prefix(prefix).await }
            })
            .await
    }

    async fn count(&self, prefix: &str) -> CacheResult<usize> {
        self.executor
            .execute(&self.filter, None, || {
                let inner = Arc::clone(&self.inner);
                async move { inner.get()?.count(prefix).await }
            })
            .await
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        self.executor
            .execute(&self.filter, None, || {
                let inner = Arc::clone(&self.inner);
                async move { inner.get()?.exists(key).await }
            })
            .await
    }

    async fn expiration(&self, key: &str) -> CacheResult<Option<Duration>> {
        self.executor
            .execute(&self.filter, None, || {
                let inner = Arc::clone(&self.inner);
                async move { inner.get()?.expiration(key).await }
            })
            .await
    }

    async fn flush(&self) -> CacheResult<()> {
        self.executor
            .execute(&self.filter, None, || {
                let inner = Arc::clone(&self.inner);
                async move { inner.get()?.flush().await }
            })
            .await
    }

    async fn stats(&self) -> CacheResult<CacheStats> {
        self.inner.get()?.stats().await
    }
}

/// Bus decorator retrying matching failures with backoff.
///
/// Publish backoff observes the caller's cancellation token.
pub struct RetryBus {
    name: String,
    inner: Arc<LazyHolder<dyn CacheBus>>,
    executor: RetryExecutor,
    filter: ErrorFilter,
}

#[async_trait]
impl CacheBus for RetryBus {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(
        &self,
        topic: &str,
        message: &CacheMessage,
        token: &CancellationToken,
    ) -> CacheResult<()> {
        self.executor
            .execute(&self.filter, Some(token), || {
                let inner = Arc::clone(&self.inner);
                async move { inner.get()?.publish(topic, message, token).await }
            })
            .await
    }

    async fn subscribe(&self, topic: &str, handler: Arc<dyn MessageHandler>) -> CacheResult<()> {
        self.executor
            .execute(&self.filter, None, || {
                let inner = Arc::clone(&self.inner);
                let handler = handler.clone();
                async move { inner.get()?.subscribe(topic, handler).await }
            })
            .await
    }
}

/// Decoration retrying every provider operation `retry_count` times with
/// the default exponential backoff
pub fn retry_provider(retry_count: u32, filter: ErrorFilter) -> ProviderDecoration {
    retry_provider_with(RetryPolicy::with_attempts(retry_count), filter)
}

/// Decoration retrying provider operations under an explicit policy
pub fn retry_provider_with(policy: RetryPolicy, filter: ErrorFilter) -> ProviderDecoration {
    Box::new(move |name: &str, inner: ProviderFactory| {
        let name = name.to_string();
        let policy = policy.clone();
        let filter = filter.clone();
        let inner = Arc::new(inner);

        Box::new(move || {
            let inner = Arc::clone(&inner);
            Ok(Arc::new(RetryProvider {
                name: name.clone(),
                inner: Arc::new(LazyHolder::new(move || (inner)())),
                executor: RetryExecutor::new(policy.clone()),
                filter: filter.clone(),
            }) as Arc<dyn CachingProvider>)
        })
    })
}

/// Decoration retrying bus operations `retry_count` times with the default
/// exponential backoff
pub fn retry_bus(retry_count: u32, filter: ErrorFilter) -> BusDecoration {
    retry_bus_with(RetryPolicy::with_attempts(retry_count), filter)
}

/// Decoration retrying bus operations under an explicit policy
pub fn retry_bus_with(policy: RetryPolicy, filter: ErrorFilter) -> BusDecoration {
    Box::new(move |name: &str, inner: BusFactory| {
        let name = name.to_string();
        let policy = policy.clone();
        let filter = filter.clone();
        let inner = Arc::new(inner);

        Box::new(move || {
            let inner = Arc::clone(&inner);
            Ok(Arc::new(RetryBus {
                name: name.clone(),
                inner: Arc::new(LazyHolder::new(move || (inner)())),
                executor: RetryExecutor::new(policy.clone()),
                filter: filter.clone(),
            }) as Arc<dyn CacheBus>)
        })
    })
}
