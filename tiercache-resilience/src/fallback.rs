//! Fallback decorators: swallow publish failures, reroute provider calls

use async_trait::async_trait;
use log::warn;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use tiercache_core::{
    BusDecoration, BusFactory, CacheBus, CacheMessage, CacheResult, CacheStats, CacheValue,
    CachingProvider, LazyHolder, MessageHandler, ProviderDecoration, ProviderFactory, ProviderInfo,
};

use crate::filters::{self, ErrorFilter};

/// Bus decorator that turns matching publish failures into success.
///
/// A publish carries an invalidation notice, not data: the distributed
/// write it follows has already succeeded, so losing the notice only
/// delays convergence of other instances. Swallowed failures are logged.
/// Subscribe passes through untouched.
pub struct PublishFallbackBus {
    name: String,
    inner: Arc<LazyHolder<dyn CacheBus>>,
    filter: ErrorFilter,
}

#[async_trait]
impl CacheBus for PublishFallbackBus {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(
        &self,
        topic: &str,
        message: &CacheMessage,
        token: &CancellationToken,
    ) -> CacheResult<()> {
        let result = match self.inner.get() {
            Ok(bus) => bus.publish(topic, message, token).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => Ok(()),
            Err(err) if filters::matches(&self.filter, &err) => {
                warn!(
                    "bus '{}': publish to '{}' swallowed after failure: {}",
                    self.name, topic, err
                );
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn subscribe(&self, topic: &str, handler: Arc<dyn MessageHandler>) -> CacheResult<()> {
        self.inner.get()?.subscribe(topic, handler).await
    }
}

/// Decoration swallowing matching publish failures
pub fn publish_fallback_bus(filter: ErrorFilter) -> BusDecoration {
    Box::new(move |name: &str, inner: BusFactory| {
        let name = name.to_string();
        let filter = filter.clone();
        let inner = Arc::new(inner);

        Box::new(move || {
            let inner = Arc::clone(&inner);
            Ok(Arc::new(PublishFallbackBus {
                name: name.clone(),
                inner: Arc::new(LazyHolder::new(move || (inner)())),
                filter: filter.clone(),
            }) as Arc<dyn CacheBus>)
        })
    })
}

/// Provider decorator rerouting matching failures to a fallback store.
///
/// The fallback is constructed lazily on first use and kept; a failed
/// fallback construction is retried on the next rerouted call. The
/// reroute is transparent to the caller.
pub struct FallbackProvider {
    name: String,
    primary: Arc<LazyHolder<dyn CachingProvider>>,
    fallback: Arc<LazyHolder<dyn CachingProvider>>,
    filter: ErrorFilter,
}

impl FallbackProvider {
    async fn route<T, F, Fut>(&self, op: F) -> CacheResult<T>
    where
        F: Fn(Arc<dyn CachingProvider>) -> Fut,
        Fut: Future<Output = CacheResult<T>>,
    {
        let primary_result = match self.primary.get() {
            Ok(provider) => op(provider).await,
            Err(err) => Err(err),
        };

        match primary_result {
            Err(err) if filters::matches(&self.filter, &err) => {
                warn!(
                    "provider '{}': primary failed ({}), rerouting to fallback",
                    self.name, err
                );
                let fallback = self.fallback.get()?;
                op(fallback).await
            }
            other => other,
        }
    }
}

#[async_trait]
impl CachingProvider for FallbackProvider {
    fn info(&self) -> ProviderInfo {
        match self.primary.get() {
            Ok(provider) => provider.info(),
            Err(_) => ProviderInfo::deferred(&self.name),
        }
    }

    async fn get(&self, key: &str) -> CacheResult<CacheValue<Vec<u8>>> {
        self.route(|p| async move { p.get(key).await }).await
    }

    async fn set(&self, key: &str, value: CacheValue<Vec<u8>>, ttl: Duration) -> CacheResult<()> {
        self.route(|p| {
            let value = value.clone();
            async move { p.set(key, value, ttl).await }
        })
        .await
    }

    async fn set_all(
        &self,
        entries: Vec<(String, CacheValue<Vec<u8>>)>,
        ttl: Duration,
    ) -> CacheResult<()> {
        self.route(|p| {
            let entries = entries.clone();
            async move { p.set_all(entries, ttl).await }
        })
        .await
    }

    async fn remove(&self, key: &str) -> CacheResult<()> {
        self.route(|p| async move { p.remove(key).await }).await
    }

    async fn remove_all(&self, keys: &[String]) -> CacheResult<()> {
        self.route(|p| async move { p.remove_all(keys).await })
            .await
    }

    async fn remove_by_prefix(&self, prefix: &str) -> CacheResult<()> {
        self.route(|p| async move { p.remove_by_prefix(prefix).await })
            .await
    }

    async fn count(&self, prefix: &str) -> CacheResult<usize> {
        self.route(|p| async move { p.count(prefix).await }).await
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        self.route(|p| async move { p.exists(key).await }).await
    }

    async fn expiration(&self, key: &str) -> CacheResult<Option<Duration>> {
        self.route(|p| async move { p.expiration(key).await }).await
    }

    async fn flush(&self) -> CacheResult<()> {
        self.route(|p| async move { p.flush().await }).await
    }

    async fn stats(&self) -> CacheResult<CacheStats> {
        self.route(|p| async move { p.stats().await }).await
    }
}

/// Decoration rerouting matching provider failures to a fallback store
pub fn fallback_provider(fallback: ProviderFactory, filter: ErrorFilter) -> ProviderDecoration {
    let fallback = Arc::new(fallback);

    Box::new(move |name: &str, inner: ProviderFactory| {
        let name = name.to_string();
        let filter = filter.clone();
        let inner = Arc::new(inner);
        let fallback = Arc::clone(&fallback);

        Box::new(move || {
            let inner = Arc::clone(&inner);
            let fallback = Arc::clone(&fallback);
            Ok(Arc::new(FallbackProvider {
                name: name.clone(),
                primary: Arc::new(LazyHolder::new(move || (inner)())),
                fallback: Arc::new(LazyHolder::new(move || (fallback)())),
                filter: filter.clone(),
            }) as Arc<dyn CachingProvider>)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::transient_errors;
    use crate::retry::{retry_bus_with, RetryPolicy};
    use crate::backoff::BackoffStrategy;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tiercache_core::{BusDecorationChain, CacheError};

    struct DeadBus {
        publishes: AtomicU32,
    }

    #[async_trait]
    impl CacheBus for DeadBus {
        fn name(&self) -> &str {
            "dead"
        }

        async fn publish(
            &self,
            _topic: &str,
            _message: &CacheMessage,
            _token: &CancellationToken,
        ) -> CacheResult<()> {
            self.publishes.fetch_add(1, Ordering::SeqCst);
            Err(CacheError::Transport("broker unreachable".into()))
        }

        async fn subscribe(
            &self,
            _topic: &str,
            _handler: Arc<dyn MessageHandler>,
        ) -> CacheResult<()> {
            Ok(())
        }
    }

    fn fast_retry(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts: attempts,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(10),
            strategy: BackoffStrategy::Fixed,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn matching_publish_failures_are_swallowed() {
        let transport = Arc::new(DeadBus {
            publishes: AtomicU32::new(0),
        });
        let factory_bus = Arc::clone(&transport);

        let decorated = BusDecorationChain::new(
            "swallowing",
            Box::new(move || Ok(Arc::clone(&factory_bus) as Arc<dyn CacheBus>)),
        )
        .decorate(publish_fallback_bus(transient_errors()))
        .build();

        let bus = decorated.get().unwrap();
        let msg = CacheMessage::evict("node", vec!["k".into()]);
        bus.publish("t", &msg, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(transport.publishes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_matching_publish_failures_propagate() {
        struct RefusingBus;

        #[async_trait]
        impl CacheBus for RefusingBus {
            fn name(&self) -> &str {
                "refusing"
            }

            async fn publish(
                &self,
                _topic: &str,
                _message: &CacheMessage,
                _token: &CancellationToken,
            ) -> CacheResult<()> {
                Err(CacheError::Serialization("bad payload".into()))
            }

            async fn subscribe(
                &self,
                _topic: &str,
                _handler: Arc<dyn MessageHandler>,
            ) -> CacheResult<()> {
                Ok(())
            }
        }

        let decorated = BusDecorationChain::new(
            "swallowing",
            Box::new(|| Ok(Arc::new(RefusingBus) as Arc<dyn CacheBus>)),
        )
        .decorate(publish_fallback_bus(transient_errors()))
        .build();

        let bus = decorated.get().unwrap();
        let msg = CacheMessage::evict("node", vec!["k".into()]);
        let err = bus
            .publish("t", &msg, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Serialization(_)));
    }

    // Retry innermost, publish-fallback outermost: the retries are
    // exhausted against the dead transport, then the exhausted failure is
    // swallowed on its way out.
    #[tokio::test]
    async fn retry_inside_fallback_retries_then_swallows() {
        let transport = Arc::new(DeadBus {
            publishes: AtomicU32::new(0),
        });
        let factory_bus = Arc::clone(&transport);

        let decorated = BusDecorationChain::new(
            "resilient",
            Box::new(move || Ok(Arc::clone(&factory_bus) as Arc<dyn CacheBus>)),
        )
        .decorate(retry_bus_with(fast_retry(3), transient_errors()))
        .decorate(publish_fallback_bus(transient_errors()))
        .build();

        let bus = decorated.get().unwrap();
        let msg = CacheMessage::evict("node", vec!["k".into()]);
        bus.publish("t", &msg, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(transport.publishes.load(Ordering::SeqCst), 3);
    }

    // Reversed registration puts the fallback innermost: it swallows each
    // failure before the retry layer ever observes one, so the transport
    // is attempted exactly once. Same caller-visible success, different
    // effective behavior: composition order matters.
    #[tokio::test]
    async fn fallback_inside_retry_hides_failures_from_the_retry_layer() {
        let transport = Arc::new(DeadBus {
            publishes: AtomicU32::new(0),
        });
        let factory_bus = Arc::clone(&transport);

        let decorated = BusDecorationChain::new(
            "inverted",
            Box::new(move || Ok(Arc::clone(&factory_bus) as Arc<dyn CacheBus>)),
        )
        .decorate(publish_fallback_bus(transient_errors()))
        .decorate(retry_bus_with(fast_retry(3), transient_errors()))
        .build();

        let bus = decorated.get().unwrap();
        let msg = CacheMessage::evict("node", vec!["k".into()]);
        bus.publish("t", &msg, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(transport.publishes.load(Ordering::SeqCst), 1);
    }

    struct FailingStore;

    #[async_trait]
    impl CachingProvider for FailingStore {
        fn info(&self) -> ProviderInfo {
            ProviderInfo::deferred("failing")
        }

        async fn get(&self, _key: &str) -> CacheResult<CacheValue<Vec<u8>>> {
            Err(CacheError::Transport("primary down".into()))
        }

        async fn set(
            &self,
            _key: &str,
            _value: CacheValue<Vec<u8>>,
            _ttl: Duration,
        ) -> CacheResult<()> {
            Err(CacheError::Transport("primary down".into()))
        }

        async fn set_all(
            &self,
            _entries: Vec<(String, CacheValue<Vec<u8>>)>,
            _ttl: Duration,
        ) -> CacheResult<()> {
            Err(CacheError::Transport("primary down".into()))
        }

        async fn remove(&self, _key: &str) -> CacheResult<()> {
            Err(CacheError::Transport("primary down".into()))
        }

        async fn remove_all(&self, _keys: &[String]) -> CacheResult<()> {
            Err(CacheError::Transport("primary down".into()))
        }

        async fn remove_by_prefix(&self, _prefix: &str) -> CacheResult<()> {
            Err(CacheError::Transport("primary down".into()))
        }

        async fn count(&self, _prefix: &str) -> CacheResult<usize> {
            Err(CacheError::Transport("primary down".into()))
        }

        async fn exists(&self, _key: &str) -> CacheResult<bool> {
            Err(CacheError::Transport("primary down".into()))
        }

        async fn expiration(&self, _key: &str) -> CacheResult<Option<Duration>> {
            Err(CacheError::Transport("primary down".into()))
        }

        async fn flush(&self) -> CacheResult<()> {
            Err(CacheError::Transport("primary down".into()))
        }

        async fn stats(&self) -> CacheResult<CacheStats> {
            Err(CacheError::Transport("primary down".into()))
        }
    }

    struct StaticStore {
        payload: Vec<u8>,
    }

    #[async_trait]
    impl CachingProvider for StaticStore {
        fn info(&self) -> ProviderInfo {
            ProviderInfo::deferred("static")
        }

        async fn get(&self, _key: &str) -> CacheResult<CacheValue<Vec<u8>>> {
            Ok(CacheValue::new(self.payload.clone()))
        }

        async fn set(
            &self,
            _key: &str,
            _value: CacheValue<Vec<u8>>,
            _ttl: Duration,
        ) -> CacheResult<()> {
            Ok(())
        }

        async fn set_all(
            &self,
            _entries: Vec<(String, CacheValue<Vec<u8>>)>,
            _ttl: Duration,
        ) -> CacheResult<()> {
            Ok(())
        }

        async fn remove(&self, _key: &str) -> CacheResult<()> {
            Ok(())
        }

        async fn remove_all(&self, _keys: &[String]) -> CacheResult<()> {
            Ok(())
        }

        async fn remove_by_prefix(&self, _prefix: &str) -> CacheResult<()> {
            Ok(())
        }

        async fn count(&self, _prefix: &str) -> CacheResult<usize> {
            Ok(1)
        }

        async fn exists(&self, _key: &str) -> CacheResult<bool> {
            Ok(true)
        }

        async fn expiration(&self, _key: &str) -> CacheResult<Option<Duration>> {
            Ok(None)
        }

        async fn flush(&self) -> CacheResult<()> {
            Ok(())
        }

        async fn stats(&self) -> CacheResult<CacheStats> {
            Ok(CacheStats::default())
        }
    }

    #[tokio::test]
    async fn primary_failures_are_served_from_the_fallback() {
        use tiercache_core::ProviderDecorationChain;

        let constructions = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&constructions);

        let decorated = ProviderDecorationChain::new(
            "with-fallback",
            Box::new(|| Ok(Arc::new(FailingStore) as Arc<dyn CachingProvider>)),
        )
        .decorate(fallback_provider(
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(StaticStore {
                    payload: b"from fallback".to_vec(),
                }) as Arc<dyn CachingProvider>)
            }),
            transient_errors(),
        ))
        .build();

        let provider = decorated.get().unwrap();

        let value = provider.get("any").await.unwrap();
        assert_eq!(
            value.value().map(Vec::as_slice),
            Some(&b"from fallback"[..])
        );

        // Fallback instance is constructed once and reused
        provider.get("other").await.unwrap();
        provider.exists("other").await.unwrap();
        assert_eq!(constructions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_matching_primary_errors_skip_the_fallback() {
        use tiercache_core::ProviderDecorationChain;

        struct PickyStore;

        #[async_trait]
        impl CachingProvider for PickyStore {
            fn info(&self) -> ProviderInfo {
                ProviderInfo::deferred("picky")
            }

            async fn get(&self, _key: &str) -> CacheResult<CacheValue<Vec<u8>>> {
                Err(CacheError::InvalidArgument("bad key".into()))
            }

            async fn set(
                &self,
                _key: &str,
                _value: CacheValue<Vec<u8>>,
                _ttl: Duration,
            ) -> CacheResult<()> {
                Ok(())
            }

            async fn set_all(
                &self,
                _entries: Vec<(String, CacheValue<Vec<u8>>)>,
                _ttl: Duration,
            ) -> CacheResult<()> {
                Ok(())
            }

            async fn remove(&self, _key: &str) -> CacheResult<()> {
                Ok(())
            }

            async fn remove_all(&self, _keys: &[String]) -> CacheResult<()> {
                Ok(())
            }

            async fn remove_by_prefix(&self, _prefix: &str) -> CacheResult<()> {
                Ok(())
            }

            async fn count(&self, _prefix: &str) -> CacheResult<usize> {
                Ok(0)
            }

            async fn exists(&self, _key: &str) -> CacheResult<bool> {
                Ok(false)
            }

            async fn expiration(&self, _key: &str) -> CacheResult<Option<Duration>> {
                Ok(None)
            }

            async fn flush(&self) -> CacheResult<()> {
                Ok(())
            }

            async fn stats(&self) -> CacheResult<CacheStats> {
                Ok(CacheStats::default())
            }
        }

        let decorated = ProviderDecorationChain::new(
            "picky",
            Box::new(|| Ok(Arc::new(PickyStore) as Arc<dyn CachingProvider>)),
        )
        .decorate(fallback_provider(
            Box::new(|| -> CacheResult<Arc<dyn CachingProvider>> {
                panic!("fallback must not be constructed for a logical error")
            }),
            transient_errors(),
        ))
        .build();

        let provider = decorated.get().unwrap();
        let err = provider.get("k").await.unwrap_err();
        assert!(matches!(err, CacheError::InvalidArgument(_)));
    }
}
