//! Distributed lock capability implemented by lock-capable stores

use async_trait::async_trait;
use std::time::Duration;

use crate::CacheResult;

/// Cross-process mutual exclusion offered by stores that support it.
///
/// The engine itself never locks; callers that need atomic
/// read-modify-write across instances acquire one of these around their
/// cache operations. Implementations tag the lock value with a unique id
/// and must only release locks they still own.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Try to acquire the lock, waiting at most `timeout`.
    /// Returns `false` when the lock is held elsewhere.
    async fn lock(&self, timeout: Duration) -> CacheResult<bool>;

    /// Release the lock if still held by this instance
    async fn release(&self) -> CacheResult<()>;
}
