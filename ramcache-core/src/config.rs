//! Configuration types
//!
//! Configuration is read once at process startup and is not tunable at
//! runtime. Values come from environment variables with defaults suited to
//! a long-lived web process.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;

/// Default maximum number of entries held by one process.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Retry configuration for writes to the durable store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound for any single delay.
    pub max_backoff: Duration,
    pub backoff_multiplier: f32,
}

impl RetryConfig {
    /// No retries at all: a failed write is reported immediately.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Delay to wait before retry number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let max_nanos = self.max_backoff.as_nanos() as f64;
        let mut delay = self.initial_backoff;
        for _ in 1..attempt {
            let next = delay.as_nanos() as f64 * f64::from(self.backoff_multiplier);
            if !next.is_finite() || next >= max_nanos {
                return self.max_backoff;
            }
            delay = Duration::from_nanos(next.round() as u64);
        }
        delay.min(self.max_backoff)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(1),
            backoff_multiplier: 2.0,
        }
    }
}

/// Process-wide cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RamCacheConfig {
    /// Hard cap on the number of live entries.
    pub max_entries: usize,

    /// Upper bound on the durable-store read performed by reconciliation.
    /// A slower read skips reconciliation for that request.
    pub reconcile_timeout: Duration,

    /// Retry policy for invalidation writes.
    pub invalidate_retry: RetryConfig,

    /// Emit a hit-rate log line every this many lookups. Zero disables it.
    pub stats_log_interval: u64,
}

impl Default for RamCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            reconcile_timeout: Duration::from_secs(1),
            invalidate_retry: RetryConfig::default(),
            stats_log_interval: 1_000,
        }
    }
}

impl RamCacheConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config from environment variables.
    ///
    /// Environment variables:
    /// - `RAMCACHE_MAX_ENTRIES`: maximum entry count (default: 10000)
    /// - `RAMCACHE_RECONCILE_TIMEOUT_MS`: reconcile read timeout (default: 1000)
    /// - `RAMCACHE_INVALIDATE_RETRIES`: retries for invalidation writes (default: 2)
    /// - `RAMCACHE_STATS_LOG_INTERVAL`: lookups between hit-rate logs (default: 1000)
    ///
    /// Unset variables fall back to defaults; set but unparseable ones are
    /// rejected.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let max_entries =
            parse_var(&lookup, "RAMCACHE_MAX_ENTRIES")?.unwrap_or(defaults.max_entries);

        let reconcile_timeout = parse_var::<u64, _>(&lookup, "RAMCACHE_RECONCILE_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.reconcile_timeout);

        let mut invalidate_retry = defaults.invalidate_retry;
        if let Some(retries) = parse_var(&lookup, "RAMCACHE_INVALIDATE_RETRIES")? {
            invalidate_retry.max_retries = retries;
        }

        let stats_log_interval = parse_var(&lookup, "RAMCACHE_STATS_LOG_INTERVAL")?
            .unwrap_or(defaults.stats_log_interval);

        let config = Self {
            max_entries,
            reconcile_timeout,
            invalidate_retry,
            stats_log_interval,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check that the values are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_entries == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_entries".to_string(),
                value: "0".to_string(),
                reason: "cache must hold at least one entry".to_string(),
            });
        }
        if self.reconcile_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "reconcile_timeout".to_string(),
                value: "0ms".to_string(),
                reason: "a zero timeout would skip every reconciliation".to_string(),
            });
        }
        if self.invalidate_retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "invalidate_retry.backoff_multiplier".to_string(),
                value: self.invalidate_retry.backoff_multiplier.to_string(),
                reason: "must be at least 1.0".to_string(),
            });
        }
        Ok(())
    }

    /// Set the maximum entry count.
    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }

    /// Set the reconcile read timeout.
    pub fn with_reconcile_timeout(mut self, timeout: Duration) -> Self {
        self.reconcile_timeout = timeout;
        self
    }

    /// Set the invalidation retry policy.
    pub fn with_invalidate_retry(mut self, retry: RetryConfig) -> Self {
        self.invalidate_retry = retry;
        self
    }

    /// Set the hit-rate log interval.
    pub fn with_stats_log_interval(mut self, lookups: u64) -> Self {
        self.stats_log_interval = lookups;
        self
    }
}

fn parse_var<T, F>(lookup: &F, var: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => {
            let parsed = raw.trim().parse::<T>();
            match parsed {
                Ok(value) => Ok(Some(value)),
                Err(_) => Err(ConfigError::Unparseable {
                    var: var.to_string(),
                    value: raw,
                }),
            }
        }
    }
}
