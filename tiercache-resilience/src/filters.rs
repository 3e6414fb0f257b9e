//! Error classification for decorators

use std::sync::Arc;

use tiercache_core::CacheError;

/// Predicate deciding which errors a decorator acts on.
///
/// Supplied per decoration rather than hardcoded, so deployments can widen
/// or narrow what counts as retryable for their backend.
pub type ErrorFilter = Arc<dyn Fn(&CacheError) -> bool + Send + Sync>;

/// The default filter: connectivity-shaped errors only
pub fn transient_errors() -> ErrorFilter {
    Arc::new(CacheError::is_transient)
}

/// Whether a decorator may act on `err` at all.
///
/// Logical errors, missing-configuration errors and cancellations always
/// bypass decoration and propagate on the first occurrence, whatever the
/// supplied filter says.
pub fn matches(filter: &ErrorFilter, err: &CacheError) -> bool {
    if matches!(
        err,
        CacheError::InvalidArgument(_) | CacheError::NotConfigured { .. } | CacheError::Cancelled
    ) {
        return false;
    }
    filter(err)
}
