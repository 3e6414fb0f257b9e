//! In-process broadcast transport

use async_trait::async_trait;
use log::{debug, warn};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use tiercache_core::{CacheBus, CacheError, CacheMessage, CacheResult, MessageHandler};

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Broadcast bus delivering messages to every subscriber in the same
/// process, including the publisher itself.
///
/// One broadcast channel per topic; each `subscribe` call spawns a
/// dedicated consumer task that loops until the channel closes. A slow
/// consumer that lags past the channel capacity drops the overrun
/// messages, which is acceptable for invalidation traffic (the worst case
/// is a stale local read until the next distributed fetch).
pub struct InProcessBus {
    name: String,
    capacity: usize,
    channels: RwLock<HashMap<String, broadcast::Sender<CacheMessage>>>,
}

impl InProcessBus {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_capacity(name, DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            capacity,
            channels: RwLock::new(HashMap::new()),
        }
    }

    fn sender_for(&self, topic: &str) -> broadcast::Sender<CacheMessage> {
        if let Some(sender) = self.channels.read().get(topic) {
            return sender.clone();
        }
        let mut channels = self.channels.write();
        channels
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

#[async_trait]
impl CacheBus for InProcessBus {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(
        &self,
        topic: &str,
        message: &CacheMessage,
        token: &CancellationToken,
    ) -> CacheResult<()> {
        if token.is_cancelled() {
            return Err(CacheError::Cancelled);
        }

        let sender = self.sender_for(topic);
        match sender.send(message.clone()) {
            Ok(receivers) => {
                debug!(
                    "bus '{}': delivered message {} to {} subscriber(s) on '{}'",
                    self.name, message.id, receivers, topic
                );
            }
            Err(_) => {
                // No subscriber on the topic yet; nothing to converge
                debug!(
                    "bus '{}': no subscribers on '{}', message {} dropped",
                    self.name, topic, message.id
                );
            }
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str, handler: Arc<dyn MessageHandler>) -> CacheResult<()> {
        let mut receiver = self.sender_for(topic).subscribe();
        let bus_name = self.name.clone();
        let topic = topic.to_string();

        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(message) => handler.handle(message).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(
                            "bus '{}': consumer on '{}' lagged, {} message(s) dropped",
                            bus_name, topic, skipped
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(())
    }
}
