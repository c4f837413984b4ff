//! ramcache Storage - Process Cache and Invalidation Protocol
//!
//! The per-process RAM cache and the shared-record protocol that keeps many
//! such caches eventually consistent with each other.

pub mod cache;
pub mod invalidation;

pub use cache::{CacheEntry, CacheMetrics, CacheStats, ProcessCache, RamCache};
pub use invalidation::{
    DeleteOutcome, InMemoryInvalidationStore, InvalidateOutcome, InvalidationRecord,
    InvalidationStore, LmdbInvalidationStore, LmdbStoreError, ReconcileOutcome,
    SHARED_INVALIDATE_KEY,
};

pub use ramcache_core::{
    Clock, ConfigError, ManualClock, RamCacheConfig, RamCacheError, RamCacheResult, RetryConfig,
    StoreError, StoreResult, SystemClock, Timestamp,
};
