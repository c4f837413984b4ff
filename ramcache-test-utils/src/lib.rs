//! ramcache Test Utilities
//!
//! Shared test infrastructure for the ramcache workspace:
//! - A fault-injecting, call-counting invalidation store
//! - Proptest generators for keys, batches and TTLs
//! - Fixtures for simulating several processes on one shared store
//! - Assertions over protocol outcomes
//! - A tracing subscriber for test output

// Re-export the types tests reach for most
pub use ramcache_core::{
    Clock, ManualClock, RamCacheConfig, RetryConfig, StoreError, StoreResult, Timestamp,
};
pub use ramcache_storage::{
    DeleteOutcome, InMemoryInvalidationStore, InvalidateOutcome, InvalidationRecord,
    InvalidationStore, RamCache, ReconcileOutcome, SHARED_INVALIDATE_KEY,
};

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

// ============================================================================
// MOCK STORES
// ============================================================================

/// Invalidation store double wrapping an [`InMemoryInvalidationStore`].
///
/// Counts every call and can be told to fail the next N reads or writes, or
/// to stall reads, so tests can drive the recovered-error paths.
#[derive(Debug)]
pub struct FlakyStore {
    inner: InMemoryInvalidationStore,
    read_calls: AtomicU32,
    write_calls: AtomicU32,
    failing_reads: AtomicU32,
    failing_writes: AtomicU32,
    permanent_write_failure: AtomicU32,
    read_delay: Mutex<Option<Duration>>,
}

impl Default for FlakyStore {
    fn default() -> Self {
        Self::wrap(InMemoryInvalidationStore::new())
    }
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A flaky store whose healthy path stamps with `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::wrap(InMemoryInvalidationStore::with_clock(clock))
    }

    fn wrap(inner: InMemoryInvalidationStore) -> Self {
        Self {
            inner,
            read_calls: AtomicU32::new(0),
            write_calls: AtomicU32::new(0),
            failing_reads: AtomicU32::new(0),
            failing_writes: AtomicU32::new(0),
            permanent_write_failure: AtomicU32::new(0),
            read_delay: Mutex::new(None),
        }
    }

    /// Fail the next `n` reads with a transient error.
    pub fn fail_next_reads(&self, n: u32) {
        self.failing_reads.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` writes with a transient error.
    pub fn fail_next_writes(&self, n: u32) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` writes with a non-transient error, which the cache
    /// must not retry.
    pub fn corrupt_next_writes(&self, n: u32) {
        self.permanent_write_failure.store(n, Ordering::SeqCst);
    }

    /// Sleep this long before answering each read.
    pub fn delay_reads(&self, delay: Option<Duration>) {
        *self
            .read_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Number of `read_strong` calls, failed ones included.
    pub fn read_calls(&self) -> u32 {
        self.read_calls.load(Ordering::SeqCst)
    }

    /// Number of `write` calls, failed ones included.
    pub fn write_calls(&self) -> u32 {
        self.write_calls.load(Ordering::SeqCst)
    }

    /// The healthy store underneath, for seeding or inspecting state.
    pub fn inner(&self) -> &InMemoryInvalidationStore {
        &self.inner
    }

    fn take_one(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl InvalidationStore for FlakyStore {
    async fn read_strong(&self, key: &str) -> StoreResult<Option<InvalidationRecord>> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self
            .read_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if Self::take_one(&self.failing_reads) {
            return Err(StoreError::Unavailable {
                reason: "injected read failure".to_string(),
            });
        }
        self.inner.read_strong(key).await
    }

    async fn write(&self, key: &str) -> StoreResult<InvalidationRecord> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);

        if Self::take_one(&self.permanent_write_failure) {
            return Err(StoreError::Corrupt {
                key: key.to_string(),
                reason: "injected permanent failure".to_string(),
            });
        }
        if Self::take_one(&self.failing_writes) {
            return Err(StoreError::Unavailable {
                reason: "injected write failure".to_string(),
            });
        }
        self.inner.write(key).await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for cache inputs.

    use super::*;
    use proptest::prelude::*;

    /// Generate a short cache key. The alphabet is small on purpose so that
    /// generated batches overwrite each other often.
    pub fn arb_key() -> impl Strategy<Value = String> {
        "[a-f]{1,3}"
    }

    /// Generate an optional TTL, including the zero "no TTL" case.
    pub fn arb_ttl() -> impl Strategy<Value = Option<Duration>> {
        prop_oneof![
            Just(None),
            Just(Some(Duration::ZERO)),
            (1u64..3600).prop_map(|secs| Some(Duration::from_secs(secs))),
        ]
    }

    /// Generate a batch of entries for `set_multi`.
    pub fn arb_batch(max_len: usize) -> impl Strategy<Value = Vec<(String, u32)>> {
        prop::collection::vec((arb_key(), any::<u32>()), 0..=max_len)
    }

    /// One step of a random cache workload.
    #[derive(Debug, Clone)]
    pub enum CacheOp {
        Set(String, u32, Option<Duration>),
        SetMulti(Vec<(String, u32)>, Option<Duration>),
        Get(String),
        Remove(String),
        Advance(Duration),
    }

    /// Generate a workload step.
    pub fn arb_cache_op() -> impl Strategy<Value = CacheOp> {
        prop_oneof![
            4 => (arb_key(), any::<u32>(), arb_ttl()).prop_map(|(k, v, t)| CacheOp::Set(k, v, t)),
            1 => (arb_batch(12), arb_ttl()).prop_map(|(b, t)| CacheOp::SetMulti(b, t)),
            3 => arb_key().prop_map(CacheOp::Get),
            1 => arb_key().prop_map(CacheOp::Remove),
            1 => (1u64..120).prop_map(|secs| CacheOp::Advance(Duration::from_secs(secs))),
        ]
    }

    /// Generate a valid cache configuration.
    pub fn arb_valid_config() -> impl Strategy<Value = RamCacheConfig> {
        (1usize..64, 1u64..5000, 0u32..4, 0u64..100).prop_map(
            |(max_entries, timeout_ms, retries, log_interval)| {
                RamCacheConfig::new()
                    .with_max_entries(max_entries)
                    .with_reconcile_timeout(Duration::from_millis(timeout_ms))
                    .with_invalidate_retry(RetryConfig {
                        max_retries: retries,
                        ..RetryConfig::default()
                    })
                    .with_stats_log_interval(log_interval)
            },
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common scenarios.

    use super::*;
    use chrono::TimeZone;

    /// A fixed instant for clocks in tests.
    pub fn epoch() -> Timestamp {
        chrono::Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_else(chrono::Utc::now)
    }

    /// Config with small capacity and fast retries.
    pub fn fast_config(max_entries: usize) -> RamCacheConfig {
        RamCacheConfig::new()
            .with_max_entries(max_entries)
            .with_reconcile_timeout(Duration::from_millis(200))
            .with_invalidate_retry(RetryConfig {
                max_retries: 2,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(4),
                backoff_multiplier: 2.0,
            })
    }

    /// Several simulated processes sharing one store and one manual clock.
    pub struct Cluster<S> {
        pub store: Arc<S>,
        pub clock: ManualClock,
        pub processes: Vec<RamCache<u32, S>>,
    }

    /// Build `n` processes on a shared [`FlakyStore`].
    pub fn flaky_cluster(n: usize, config: RamCacheConfig) -> Cluster<FlakyStore> {
        let clock = ManualClock::new(epoch());
        let store = Arc::new(FlakyStore::with_clock(Arc::new(clock.clone())));
        let processes = (0..n)
            .map(|_| {
                RamCache::with_clock(Arc::clone(&store), config.clone(), Arc::new(clock.clone()))
            })
            .collect::<Result<Vec<_>, _>>()
            .unwrap_or_else(|e| panic!("fixture config must be valid: {}", e));
        Cluster {
            store,
            clock,
            processes,
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over protocol outcomes.

    use super::*;

    /// Assert that a reconcile dropped the cache, returning the adopted
    /// timestamp.
    #[track_caller]
    pub fn assert_cleared(outcome: &ReconcileOutcome) -> Timestamp {
        match outcome {
            ReconcileOutcome::Cleared { observed, .. } => *observed,
            other => panic!("Expected Cleared, got: {:?}", other),
        }
    }

    /// Assert that a reconcile left the cache alone.
    #[track_caller]
    pub fn assert_untouched(outcome: &ReconcileOutcome) {
        match outcome {
            ReconcileOutcome::Unchanged | ReconcileOutcome::NeverInvalidated => {}
            ReconcileOutcome::Skipped(_) => {}
            other => panic!("Expected the cache to be left alone, got: {:?}", other),
        }
    }

    /// Assert that an invalidation reached the store, returning its stamp.
    #[track_caller]
    pub fn assert_published(outcome: &InvalidateOutcome) -> Timestamp {
        match outcome {
            InvalidateOutcome::Published(at) => *at,
            other => panic!("Expected Published, got: {:?}", other),
        }
    }

    /// Assert that an invalidation was given up on.
    #[track_caller]
    pub fn assert_lost(outcome: &InvalidateOutcome) {
        match outcome {
            InvalidateOutcome::Lost(_) => {}
            other => panic!("Expected Lost, got: {:?}", other),
        }
    }
}

// ============================================================================
// TRACING
// ============================================================================

/// Install a test-friendly tracing subscriber once per test binary.
///
/// Honors `RUST_LOG`; defaults to debug output for the ramcache crates.
pub fn init_test_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ramcache_storage=debug,ramcache_core=debug,warn"));

    // A second call in the same binary finds a subscriber already set.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_flaky_store_fails_then_recovers() {
        let store = FlakyStore::new();
        store.fail_next_writes(1);

        assert!(store.write(SHARED_INVALIDATE_KEY).await.is_err());
        assert!(store.write(SHARED_INVALIDATE_KEY).await.is_ok());
        assert_eq!(store.write_calls(), 2);
    }

    #[tokio::test]
    async fn test_flaky_store_read_failures_are_transient() {
        let store = FlakyStore::new();
        store.fail_next_reads(2);

        let err = store.read_strong(SHARED_INVALIDATE_KEY).await.unwrap_err();
        assert!(err.is_transient());
        assert!(store.read_strong(SHARED_INVALIDATE_KEY).await.is_err());
        assert_eq!(store.read_strong(SHARED_INVALIDATE_KEY).await, Ok(None));
        assert_eq!(store.read_calls(), 3);
    }

    #[tokio::test]
    async fn test_flaky_store_permanent_failure() {
        let store = FlakyStore::new();
        store.corrupt_next_writes(1);

        let err = store.write(SHARED_INVALIDATE_KEY).await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_flaky_cluster_shares_store() {
        let cluster = fixtures::flaky_cluster(3, fixtures::fast_config(8));
        assert_eq!(cluster.processes.len(), 3);
        assert!(cluster.processes.iter().all(|p| p.config().max_entries == 8));
    }

    #[test]
    fn test_init_test_tracing_is_idempotent() {
        init_test_tracing();
        init_test_tracing();
    }
}
