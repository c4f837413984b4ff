//! Hit/miss instrumentation.
//!
//! Counters are lock-free atomics so recording a lookup never contends with
//! the cache lock. [`CacheStats`] is a plain snapshot for logging or for an
//! operator endpoint.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-lifetime counters.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    clears: AtomicU64,
    reconciles_skipped: AtomicU64,
    invalidations_published: AtomicU64,
    invalidations_lost: AtomicU64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a hit and return the total lookups so far.
    pub fn record_hit(&self) -> u64 {
        let hits = self.hits.fetch_add(1, Ordering::Relaxed) + 1;
        hits + self.misses.load(Ordering::Relaxed)
    }

    /// Record a miss and return the total lookups so far.
    pub fn record_miss(&self) -> u64 {
        let misses = self.misses.fetch_add(1, Ordering::Relaxed) + 1;
        misses + self.hits.load(Ordering::Relaxed)
    }

    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_expiration(&self) {
        self.expirations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_clear(&self) {
        self.clears.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconcile_skipped(&self) {
        self.reconciles_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidation_published(&self) {
        self.invalidations_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidation_lost(&self) {
        self.invalidations_lost.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot of all counters.
    pub fn snapshot(&self, entry_count: u64) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count,
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            clears: self.clears.load(Ordering::Relaxed),
            reconciles_skipped: self.reconciles_skipped.load(Ordering::Relaxed),
            invalidations_published: self.invalidations_published.load(Ordering::Relaxed),
            invalidations_lost: self.invalidations_lost.load(Ordering::Relaxed),
        }
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses, expired entries included.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Number of evictions due to capacity.
    pub evictions: u64,
    /// Number of entries dropped because their TTL ran out.
    pub expirations: u64,
    /// Number of whole-cache clears (reconciliation or bulk overflow).
    pub clears: u64,
    /// Reconciliations skipped because the durable store failed or was slow.
    pub reconciles_skipped: u64,
    /// Invalidation writes that reached the durable store.
    pub invalidations_published: u64,
    /// Invalidation writes given up on.
    pub invalidations_lost: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty_stats = CacheStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_record_returns_total_lookups() {
        let metrics = CacheMetrics::new();
        assert_eq!(metrics.record_hit(), 1);
        assert_eq!(metrics.record_miss(), 2);
        assert_eq!(metrics.record_hit(), 3);

        let stats = metrics.snapshot(7);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entry_count, 7);
    }

    #[test]
    fn test_snapshot_carries_every_counter() {
        let metrics = CacheMetrics::new();
        metrics.record_evictions(3);
        metrics.record_expiration();
        metrics.record_clear();
        metrics.record_reconcile_skipped();
        metrics.record_invalidation_published();
        metrics.record_invalidation_lost();

        let stats = metrics.snapshot(0);
        assert_eq!(stats.evictions, 3);
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.clears, 1);
        assert_eq!(stats.reconciles_skipped, 1);
        assert_eq!(stats.invalidations_published, 1);
        assert_eq!(stats.invalidations_lost, 1);
    }

    #[test]
    fn test_stats_serialize() {
        let stats = CacheStats {
            hits: 1,
            ..Default::default()
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["hits"], 1);
        assert_eq!(json["misses"], 0);
    }
}
