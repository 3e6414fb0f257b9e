//! Named-instance registry populated during bootstrap

use std::collections::HashMap;
use std::sync::Arc;

use crate::bus::CacheBus;
use crate::decorate::{BusDecorationChain, DecoratedBus, DecoratedProvider, ProviderDecorationChain};
use crate::provider::CachingProvider;
use crate::serializer::Serializer;
use crate::{CacheError, CacheResult};

/// Explicit map from instance name to provider/bus/serializer.
///
/// Populated once at startup through [`CacheRegistryBuilder`]; lookups by
/// name happen at the factory boundary, never inside the engine. Several
/// independently-configured instances of the same backend kind can coexist
/// under different names. A lookup miss is a typed
/// [`CacheError::NotConfigured`] naming the missing instance.
pub struct CacheRegistry {
    providers: HashMap<String, DecoratedProvider>,
    buses: HashMap<String, DecoratedBus>,
    serializers: HashMap<String, Arc<dyn Serializer>>,
}

impl CacheRegistry {
    pub fn builder() -> CacheRegistryBuilder {
        CacheRegistryBuilder::default()
    }

    /// Resolve a provider by name, constructing its decoration chain on
    /// first access
    pub fn provider(&self, name: &str) -> CacheResult<Arc<dyn CachingProvider>> {
        self.providers
            .get(name)
            .ok_or_else(|| CacheError::not_configured("provider", name))?
            .get()
    }

    /// Resolve a bus by name, constructing its decoration chain on first
    /// access
    pub fn bus(&self, name: &str) -> CacheResult<Arc<dyn CacheBus>> {
        self.buses
            .get(name)
            .ok_or_else(|| CacheError::not_configured("bus", name))?
            .get()
    }

    pub fn serializer(&self, name: &str) -> CacheResult<Arc<dyn Serializer>> {
        self.serializers
            .get(name)
            .cloned()
            .ok_or_else(|| CacheError::not_configured("serializer", name))
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }
}

/// Collects named chains and serializers, then freezes them into a registry
#[derive(Default)]
pub struct CacheRegistryBuilder {
    providers: HashMap<String, DecoratedProvider>,
    buses: HashMap<String, DecoratedBus>,
    serializers: HashMap<String, Arc<dyn Serializer>>,
}

impl CacheRegistryBuilder {
    /// Register a provider under its chain name; a later registration under
    /// the same name replaces the earlier one
    pub fn provider(mut self, chain: ProviderDecorationChain) -> Self {
        let decorated = chain.build();
        self.providers.insert(decorated.name().to_string(), decorated);
        self
    }

    /// Register a bus under its chain name
    pub fn bus(mut self, chain: BusDecorationChain) -> Self {
        let decorated = chain.build();
        self.buses.insert(decorated.name().to_string(), decorated);
        self
    }

    /// Register a serializer under its own reported name
    pub fn serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializers
            .insert(serializer.name().to_string(), serializer);
        self
    }

    pub fn build(self) -> CacheRegistry {
        CacheRegistry {
            providers: self.providers,
            buses: self.buses,
            serializers: self.serializers,
        }
    }
}
