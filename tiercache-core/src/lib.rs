//! Capability interfaces and shared model for tiercache
//!
//! This crate defines the contracts every concrete store and transport
//! implements, the value/message model exchanged between engine instances,
//! and the decorator framework that layers cross-cutting behavior onto
//! either capability interface without the engine knowing decoration
//! exists.

pub mod bus;
pub mod decorate;
pub mod errors;
pub mod lock;
pub mod message;
pub mod provider;
pub mod registry;
pub mod serializer;
pub mod stats;
pub mod value;

// Re-export main types
pub use bus::{CacheBus, MessageHandler};
pub use decorate::{
    BusDecoration, BusDecorationChain, BusFactory, DecoratedBus, DecoratedProvider, LazyHolder,
    ProviderDecoration, ProviderDecorationChain, ProviderFactory,
};
pub use errors::{CacheError, CacheResult};
pub use lock::DistributedLock;
pub use message::CacheMessage;
pub use provider::{
    validate_key, validate_ttl, CachingProvider, ProviderExt, ProviderInfo, ProviderKind,
    ValueFactory,
};
pub use registry::{CacheRegistry, CacheRegistryBuilder};
pub use serializer::{JsonSerializer, Serializer};
pub use stats::{CacheStats, SharedStatsCollector, StatsCollector};
pub use value::CacheValue;
