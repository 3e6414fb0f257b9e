//! Resilience decorators for tiercache
//!
//! Retry, circuit breaker and fallback behavior layered onto providers
//! and buses through the decoration chains in `tiercache-core`. Every
//! decorator implements the full capability interface it wraps and
//! reaches its inner instance through a lazily-initialized holder whose
//! construction failures are retried, never cached.

pub mod backoff;
pub mod circuit_breaker;
pub mod fallback;
pub mod filters;
pub mod retry;

// Re-export commonly used types
pub use backoff::{BackoffCalculator, BackoffStrategy};
pub use circuit_breaker::{
    circuit_breaker_bus, circuit_breaker_provider, CircuitBreaker, CircuitBreakerConfig,
    CircuitBreakerOptions, CircuitState,
};
pub use fallback::{fallback_provider, publish_fallback_bus, FallbackProvider, PublishFallbackBus};
pub use filters::{transient_errors, ErrorFilter};
pub use retry::{
    retry_bus, retry_bus_with, retry_provider, retry_provider_with, RetryExecutor, RetryPolicy,
    DEFAULT_PUBLISH_ATTEMPTS,
};
