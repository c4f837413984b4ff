//! ramcache Core - Shared Types
//!
//! Data types shared by every ramcache crate: the error taxonomy, the
//! configuration struct, and the clock abstraction used for entry expiry.
//! This crate performs no I/O.

pub mod clock;
pub mod config;
pub mod error;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{RamCacheConfig, RetryConfig, DEFAULT_MAX_ENTRIES};
pub use error::{ConfigError, RamCacheError, RamCacheResult, StoreError, StoreResult};

use chrono::{DateTime, Utc};

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Cache keys are opaque strings, unique within one process.
pub type CacheKey = String;
