//! Error types for ramcache operations

use std::time::Duration;
use thiserror::Error;

/// Durable-store errors.
///
/// Raised by `InvalidationStore` implementations in ramcache-storage. The
/// cache never surfaces them to request handlers: reconciliation and
/// invalidation turn them into logged, typed outcomes instead.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Durable store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Durable store call timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    #[error("Transaction failed: {reason}")]
    Transaction { reason: String },

    #[error("Corrupt record at key {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Serialization error: {reason}")]
    Serialization { reason: String },
}

impl StoreError {
    /// Whether retrying the same call could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unavailable { .. } | Self::Timeout { .. } | Self::Transaction { .. }
        )
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Could not parse environment variable {var}={value}")]
    Unparseable { var: String, value: String },
}

/// Master error type for all ramcache errors.
#[derive(Debug, Clone, Error)]
pub enum RamCacheError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for ramcache operations.
pub type RamCacheResult<T> = Result<T, RamCacheError>;

/// Result type alias for durable-store calls.
pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display_timeout() {
        let err = StoreError::Timeout {
            elapsed: Duration::from_millis(1500),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("timed out"));
        assert!(msg.contains("1.5s"));
    }

    #[test]
    fn test_store_error_display_corrupt() {
        let err = StoreError::Corrupt {
            key: "SharedInvalidate".to_string(),
            reason: "truncated".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("SharedInvalidate"));
        assert!(msg.contains("truncated"));
    }

    #[test]
    fn test_store_error_transience() {
        assert!(StoreError::Unavailable {
            reason: "down".to_string()
        }
        .is_transient());
        assert!(StoreError::Timeout {
            elapsed: Duration::from_secs(1)
        }
        .is_transient());
        assert!(!StoreError::Corrupt {
            key: "k".to_string(),
            reason: "bad".to_string()
        }
        .is_transient());
        assert!(!StoreError::Serialization {
            reason: "bad".to_string()
        }
        .is_transient());
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "max_entries".to_string(),
            value: "0".to_string(),
            reason: "must be positive".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("max_entries"));
        assert!(msg.contains("must be positive"));
    }

    #[test]
    fn test_ramcache_error_from_store_error() {
        let err: RamCacheError = StoreError::Unavailable {
            reason: "connection reset".to_string(),
        }
        .into();
        let msg = format!("{}", err);
        assert!(msg.contains("Store error"));
        assert!(msg.contains("connection reset"));
    }

    #[test]
    fn test_ramcache_error_from_config_error() {
        let err: RamCacheError = ConfigError::Unparseable {
            var: "RAMCACHE_MAX_ENTRIES".to_string(),
            value: "lots".to_string(),
        }
        .into();
        assert!(matches!(err, RamCacheError::Config(_)));
        assert!(format!("{}", err).contains("RAMCACHE_MAX_ENTRIES"));
    }
}
