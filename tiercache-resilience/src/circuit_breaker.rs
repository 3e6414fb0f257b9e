//! Circuit breaker and the fail-fast decorators

use async_trait::async_trait;
use log::{info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use tiercache_core::{
    BusDecoration, BusFactory, CacheBus, CacheError, CacheMessage, CacheResult, CacheStats,
    CacheValue, CachingProvider, LazyHolder, MessageHandler, ProviderDecoration, ProviderFactory,
    ProviderInfo,
};

use crate::filters::{self, ErrorFilter};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through normally
    Closed,
    /// Calls fail fast until the break duration elapses
    Open,
    /// One trial call is allowed through to probe recovery
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive matching failures before the circuit opens
    pub failure_threshold: u32,

    /// How long the circuit stays open before admitting a trial call
    #[serde(with = "humantime_serde")]
    pub break_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            break_duration: Duration::from_secs(60),
        }
    }
}

struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Thread-safe fail-fast guard around a failing dependency.
///
/// Opens after `failure_threshold` consecutive matching failures; while
/// open every call is rejected with `CacheError::CircuitOpen`. After
/// `break_duration` a single trial call is admitted: its success closes
/// the circuit, its failure reopens it.
pub struct CircuitBreaker {
    scope: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(scope: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            scope: scope.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    /// Admit or reject a call. Marks the half-open trial as taken; the
    /// caller must follow up with `record_success`, `record_failure` or
    /// `abort_trial`.
    pub fn check(&self) -> CacheResult<()> {
        let mut inner = self.inner.lock();
        self.maybe_half_open(&mut inner);

        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => Err(CacheError::CircuitOpen(self.scope.clone())),
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    Err(CacheError::CircuitOpen(self.scope.clone()))
                } else {
                    inner.trial_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.trial_in_flight = false;
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                info!("circuit '{}' closed after successful trial", self.scope);
            }
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.trial_in_flight = false;
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    warn!(
                        "circuit '{}' opened after {} consecutive failure(s)",
                        self.scope, inner.consecutive_failures
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                warn!("circuit '{}' reopened by failed trial", self.scope);
            }
            CircuitState::Open => {}
        }
    }

    /// Release a half-open trial slot without judging the dependency
    /// (used when the call never reached it)
    pub fn abort_trial(&self) {
        self.inner.lock().trial_in_flight = false;
    }

    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.maybe_half_open(&mut inner);
        inner.state
    }

    fn maybe_half_open(&self, inner: &mut BreakerInner) {
        if inner.state == CircuitState::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= self.config.break_duration {
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = false;
                    info!("circuit '{}' half-open, admitting a trial", self.scope);
                }
            }
        }
    }
}

/// Options for the circuit breaker decorators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerOptions {
    /// Consecutive matching failures before the circuit opens
    pub failure_threshold: u32,

    /// How long calls fail fast before a trial is admitted
    #[serde(with = "humantime_serde")]
    pub break_duration: Duration,

    /// Cadence of the background loop re-establishing a failed
    /// subscription
    #[serde(with = "humantime_serde")]
    pub subscribe_retry_interval: Duration,
}

impl Default for CircuitBreakerOptions {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            break_duration: Duration::from_secs(60),
            subscribe_retry_interval: Duration::from_secs(5),
        }
    }
}

impl CircuitBreakerOptions {
    fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            break_duration: self.break_duration,
        }
    }
}

/// Provider decorator failing fast once the backing store keeps erroring.
///
/// Lazy construction and operations are guarded by separate breakers, so
/// a store that cannot even be constructed opens its own circuit without
/// polluting the operation statistics.
pub struct CircuitBreakerProvider {
    name: String,
    inner: Arc<LazyHolder<dyn CachingProvider>>,
    init_breaker: CircuitBreaker,
    exec_breaker: CircuitBreaker,
    filter: ErrorFilter,
}

impl CircuitBreakerProvider {
    fn resolve(&self) -> CacheResult<Arc<dyn CachingProvider>> {
        self.init_breaker.check()?;
        match self.inner.get() {
            Ok(provider) => {
                self.init_breaker.record_success();
                Ok(provider)
            }
            Err(err) => {
                if filters::matches(&self.filter, &err) {
                    self.init_breaker.record_failure();
                } else {
                    self.init_breaker.abort_trial();
                }
                Err(err)
            }
        }
    }

    async fn guard<T, F, Fut>(&self, op: F) -> CacheResult<T>
    where
        F: FnOnce(Arc<dyn CachingProvider>) -> Fut,
        Fut: Future<Output = CacheResult<T>>,
    {
        self.exec_breaker.check()?;

        let provider = match self.resolve() {
            Ok(provider) => provider,
            Err(err) => {
                self.exec_breaker.abort_trial();
                return Err(err);
            }
        };

        match op(provider).await {
            Ok(value) => {
                self.exec_breaker.record_success();
                Ok(value)
            }
            Err(err) => {
                if filters::matches(&self.filter, &err) {
                    self.exec_breaker.record_failure();
                } else {
                    self.exec_breaker.abort_trial();
                }
                Err(err)
            }
        }
    }
}

#[async_trait]
impl CachingProvider for CircuitBreakerProvider {
    fn info(&self) -> ProviderInfo {
        match self.inner.get() {
            Ok(provider) => provider.info(),
            Err(_) => ProviderInfo::deferred(&self.name),
        }
    }

    async fn get(&self, key: &str) -> CacheResult<CacheValue<Vec<u8>>> {
        self.guard(|p| async move { p.get(key).await }).await
    }

    async fn set(&self, key: &str, value: CacheValue<Vec<u8>>, ttl: Duration) -> CacheResult<()> {
        self.guard(|p| async move { p.set(key, value, ttl).await })
            .await
    }

    async fn set_all(
        &self,
        entries: Vec<(String, CacheValue<Vec<u8>>)>,
        ttl: Duration,
    ) -> CacheResult<()> {
        self.guard(|p| async move { p.set_all(entries, ttl).await })
            .await
    }

    async fn remove(&self, key: &str) -> CacheResult<()> {
        self.guard(|p| async move { p.remove(key).await }).await
    }

    async fn remove_all(&self, keys: &[String]) -> CacheResult<()> {
        self.guard(|p| async move { p.remove_all(keys).await }).await
    }

    async fn remove_by_prefix(&self, prefix: &str) -> CacheResult<()> {
        self.guard(|p| async move { p.remove_by_prefix(prefix).await })
            .await
    }

    async fn count(&self, prefix: &str) -> CacheResult<usize> {
        self.guard(|p| async move { p.count(prefix).await }).await
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        self.guard(|p| async move { p.exists(key).await }).await
    }

    async fn expiration(&self, key: &str) -> CacheResult<Option<Duration>> {
        self.guard(|p| async move { p.expiration(key).await }).await
    }

    async fn flush(&self) -> CacheResult<()> {
        self.guard(|p| async move { p.flush().await }).await
    }

    async fn stats(&self) -> CacheResult<CacheStats> {
        self.inner.get()?.stats().await
    }
}

/// Bus decorator failing fast on the publish path.
///
/// Subscription is long-lived rather than per-call, so a failed subscribe
/// is not routed through the breaker: a background loop keeps retrying it
/// on a fixed interval regardless of circuit state.
pub struct CircuitBreakerBus {
    name: String,
    inner: Arc<LazyHolder<dyn CacheBus>>,
    init_breaker: CircuitBreaker,
    exec_breaker: CircuitBreaker,
    options: CircuitBreakerOptions,
    filter: ErrorFilter,
}

impl CircuitBreakerBus {
    fn resolve(&self) -> CacheResult<Arc<dyn CacheBus>> {
        self.init_breaker.check()?;
        match self.inner.get() {
            Ok(bus) => {
                self.init_breaker.record_success();
                Ok(bus)
            }
            Err(err) => {
                if filters::matches(&self.filter, &err) {
                    self.init_breaker.record_failure();
                } else {
                    self.init_breaker.abort_trial();
                }
                Err(err)
            }
        }
    }

    fn spawn_resubscribe(&self, topic: String, handler: Arc<dyn MessageHandler>) {
        let inner = Arc::clone(&self.inner);
        let interval = self.options.subscribe_retry_interval;
        let name = self.name.clone();

        tokio::spawn(async move {
            loop {
                sleep(interval).await;

                let result = match inner.get() {
                    Ok(bus) => bus.subscribe(&topic, Arc::clone(&handler)).await,
                    Err(err) => Err(err),
                };

                match result {
                    Ok(()) => {
                        info!("bus '{}': subscription to '{}' established", name, topic);
                        break;
                    }
                    Err(err) => {
                        warn!("bus '{}': resubscribe to '{}' failed: {}", name, topic, err);
                    }
                }
            }
        });
    }
}

#[async_trait]
impl CacheBus for CircuitBreakerBus {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(
        &self,
        topic: &str,
        message: &CacheMessage,
        token: &CancellationToken,
    ) -> CacheResult<()> {
        self.exec_breaker.check()?;

        let bus = match self.resolve() {
            Ok(bus) => bus,
            Err(err) => {
                self.exec_breaker.abort_trial();
                return Err(err);
            }
        };

        match bus.publish(topic, message, token).await {
            Ok(()) => {
                self.exec_breaker.record_success();
                Ok(())
            }
            Err(err) => {
                if filters::matches(&self.filter, &err) {
                    self.exec_breaker.record_failure();
                } else {
                    self.exec_breaker.abort_trial();
                }
                Err(err)
            }
        }
    }

    /// Never fails: a subscribe that cannot be established immediately is
    /// handed to the background retry loop.
    async fn subscribe(&self, topic: &str, handler: Arc<dyn MessageHandler>) -> CacheResult<()> {
        let attempt = match self.inner.get() {
            Ok(bus) => bus.subscribe(topic, Arc::clone(&handler)).await,
            Err(err) => Err(err),
        };

        if let Err(err) = attempt {
            warn!(
                "bus '{}': subscribe to '{}' failed ({}), retrying in background every {:?}",
                self.name, topic, err, self.options.subscribe_retry_interval
            );
            self.spawn_resubscribe(topic.to_string(), handler);
        }
        Ok(())
    }
}

/// Decoration failing provider calls fast once the store keeps erroring
pub fn circuit_breaker_provider(
    options: CircuitBreakerOptions,
    filter: ErrorFilter,
) -> ProviderDecoration {
    Box::new(move |name: &str, inner: ProviderFactory| {
        let name = name.to_string();
        let options = options.clone();
        let filter = filter.clone();
        let inner = Arc::new(inner);

        Box::new(move || {
            let inner = Arc::clone(&inner);
            Ok(Arc::new(CircuitBreakerProvider {
                init_breaker: CircuitBreaker::new(
                    format!("provider '{}' init", name),
                    options.breaker_config(),
                ),
                exec_breaker: CircuitBreaker::new(
                    format!("provider '{}'", name),
                    options.breaker_config(),
                ),
                name: name.clone(),
                inner: Arc::new(LazyHolder::new(move || (inner)())),
                filter: filter.clone(),
            }) as Arc<dyn CachingProvider>)
        })
    })
}

/// Decoration failing bus publishes fast and re-establishing failed
/// subscriptions in the background
pub fn circuit_breaker_bus(options: CircuitBreakerOptions, filter: ErrorFilter) -> BusDecoration {
    Box::new(move |name: &str, inner: BusFactory| {
        let name = name.to_string();
        let options = options.clone();
        let filter = filter.clone();
        let inner = Arc::new(inner);

        Box::new(move || {
            let inner = Arc::clone(&inner);
            Ok(Arc::new(CircuitBreakerBus {
                init_breaker: CircuitBreaker::new(
                    format!("bus '{}' init", name),
                    options.breaker_config(),
                ),
                exec_breaker: CircuitBreaker::new(
                    format!("bus '{}'", name),
                    options.breaker_config(),
                ),
                name: name.clone(),
                inner: Arc::new(LazyHolder::new(move || (inner)())),
                options: options.clone(),
                filter: filter.clone(),
            }) as Arc<dyn CacheBus>)
        })
    })
}
