//! Bus transports
//!
//! Concrete transports behind the [`tiercache_core::CacheBus`] interface:
//! an in-process broadcast bus for tests and single-host multi-engine
//! deployments, and a no-op bus for running without propagation.

mod inprocess;
mod null;

pub use inprocess::InProcessBus;
pub use null::NullBus;
