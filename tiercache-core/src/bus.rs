//! Bus capability interface

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::{CacheMessage, CacheResult};

/// Receives every inbound message on a subscribed topic, including
/// messages published by the same process.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: CacheMessage);
}

/// Publish/subscribe transport carrying invalidation messages between
/// engine instances. Delivery is at-most-once best effort.
#[async_trait]
pub trait CacheBus: Send + Sync {
    /// Registered transport name
    fn name(&self) -> &str;

    /// Publish a message to a topic. Observes `token` promptly; a
    /// cancelled publish surfaces `CacheError::Cancelled`.
    async fn publish(
        &self,
        topic: &str,
        message: &CacheMessage,
        token: &CancellationToken,
    ) -> CacheResult<()>;

    /// Deliver every inbound message on `topic` to `handler`. Safe to call
    /// multiple times for different topics; the consumer loop runs on a
    /// dedicated background task until the transport closes.
    async fn subscribe(&self, topic: &str, handler: Arc<dyn MessageHandler>) -> CacheResult<()>;
}
