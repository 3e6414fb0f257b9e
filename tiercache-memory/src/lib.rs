//! In-memory cache provider
//!
//! Serves as the local tier of the hybrid engine and as a standalone
//! provider. Entries expire lazily: an expired entry is evicted by the
//! next operation that touches it.

mod provider;

pub use provider::{InMemoryOptions, InMemoryProvider};
