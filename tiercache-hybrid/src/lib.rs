//! Hybrid cache consistency engine
//!
//! Combines a fast local provider with a shared distributed provider and
//! keeps the local tiers of every process instance coherent through
//! invalidation messages on a bus.

mod engine;
mod options;

pub use engine::HybridCache;
pub use options::HybridCacheOptions;
