//! Cache error types

use thiserror::Error;

/// Result type for cache and bus operations
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Errors surfaced by providers, buses and the hybrid engine
#[derive(Debug, Error)]
pub enum CacheError {
    /// A required argument was missing or out of range; never retried
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No instance registered under the requested name
    #[error("No {kind} registered under name '{name}'")]
    NotConfigured { kind: &'static str, name: String },

    /// Store or broker unreachable
    #[error("Transport error: {0}")]
    Transport(String),

    /// Store or broker did not answer in time
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,

    /// Rejected fast by an open circuit breaker
    #[error("Circuit open: {0}")]
    CircuitOpen(String),

    /// Value could not be encoded for storage or transport
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Stored or received payload could not be decoded
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CacheError {
    /// Whether the error is connectivity-shaped and worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, CacheError::Transport(_) | CacheError::Timeout(_))
    }

    /// Shorthand for a missing-instance lookup error
    pub fn not_configured(kind: &'static str, name: impl Into<String>) -> Self {
        CacheError::NotConfigured {
            kind,
            name: name.into(),
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() {
            CacheError::Deserialization(err.to_string())
        } else {
            CacheError::Serialization(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_kinds() {
        assert!(CacheError::Transport("down".into()).is_transient());
        assert!(CacheError::Timeout("slow".into()).is_transient());
        assert!(!CacheError::InvalidArgument("key".into()).is_transient());
        assert!(!CacheError::CircuitOpen("bus".into()).is_transient());
        assert!(!CacheError::Cancelled.is_transient());
    }

    #[test]
    fn not_configured_message_names_the_missing_instance() {
        let err = CacheError::not_configured("serializer", "msgpack");
        assert_eq!(
            err.to_string(),
            "No serializer registered under name 'msgpack'"
        );
    }
}
