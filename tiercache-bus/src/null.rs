//! No-op transport for running without propagation

use async_trait::async_trait;
use log::debug;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use tiercache_core::{CacheBus, CacheMessage, CacheResult, MessageHandler};

/// Accepts every publish and delivers nothing.
///
/// The default transport for single-instance deployments where no other
/// process holds a local cache to invalidate.
#[derive(Debug, Default)]
pub struct NullBus;

impl NullBus {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CacheBus for NullBus {
    fn name(&self) -> &str {
        "null"
    }

    async fn publish(
        &self,
        topic: &str,
        message: &CacheMessage,
        _token: &CancellationToken,
    ) -> CacheResult<()> {
        debug!("null bus: dropping message {} for '{}'", message.id, topic);
        Ok(())
    }

    async fn subscribe(&self, _topic: &str, _handler: Arc<dyn MessageHandler>) -> CacheResult<()> {
        Ok(())
    }
}
