//! The per-process cache service.
//!
//! [`RamCache`] is built once at process start and cloned into every request
//! handler. It pairs the local [`ProcessCache`] with the shared invalidation
//! record:
//!
//! - `reconcile` at the start of each request reads the record and drops the
//!   local cache if someone invalidated since the last look.
//! - `invalidate` (directly, or via `delete`/`flush_all`) stamps the record
//!   so every other process drops its cache on its next `reconcile`.
//!
//! Invalidation is coarse: the whole cache goes, not just the
//! affected keys. Nothing tracks which keys depend on which writes.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ramcache_core::{
    CacheKey, Clock, ConfigError, RamCacheConfig, RamCacheResult, StoreError, SystemClock,
    Timestamp,
};

use super::process_cache::ProcessCache;
use super::stats::CacheStats;
use crate::invalidation::{
    DeleteOutcome, InvalidateOutcome, InvalidationStore, LmdbInvalidationStore, ReconcileOutcome,
    SHARED_INVALIDATE_KEY,
};

/// Process-wide cache with cross-process invalidation.
///
/// # Type Parameters
///
/// - `V`: the cached value type. Use `Arc<T>` for values that are costly to
///   clone; the cache clones on every hit.
/// - `S`: the durable store holding the invalidation record.
///
/// # Example
///
/// ```ignore
/// let store = Arc::new(LmdbInvalidationStore::open(dir)?);
/// let cache: RamCache<Arc<FeatureList>, _> = RamCache::new(store, RamCacheConfig::from_env()?)?;
///
/// // At the top of every request:
/// let _ = cache.reconcile().await;
///
/// let features = cache.get_or_insert_with("features:all", None, || load_features());
///
/// // After a write to the system of record:
/// let _ = cache.flush_all().await;
/// ```
pub struct RamCache<V, S: ?Sized> {
    cache: Arc<ProcessCache<V>>,
    store: Arc<S>,
    config: RamCacheConfig,
}

impl<V, S: ?Sized> Clone for RamCache<V, S> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            store: Arc::clone(&self.store),
            config: self.config.clone(),
        }
    }
}

impl<V, S> RamCache<V, S>
where
    V: Clone,
    S: InvalidationStore + ?Sized,
{
    /// Create the cache service using the wall clock.
    pub fn new(store: Arc<S>, config: RamCacheConfig) -> Result<Self, ConfigError> {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Create the cache service reading time from `clock`.
    pub fn with_clock(
        store: Arc<S>,
        config: RamCacheConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let cache = ProcessCache::with_clock(config.max_entries, clock)
            .with_stats_log_interval(config.stats_log_interval);
        Ok(Self {
            cache: Arc::new(cache),
            store,
            config,
        })
    }

    // ========================================================================
    // INVALIDATION PROTOCOL
    // ========================================================================

    /// Bring the local cache in line with the shared invalidation record.
    ///
    /// Call once at the start of every request, before any cache read. The
    /// store read happens without holding the cache lock and is bounded by
    /// `reconcile_timeout`. A failed or slow read leaves the cache as it is.
    pub async fn reconcile(&self) -> ReconcileOutcome {
        let timeout = self.config.reconcile_timeout;
        let read = tokio::time::timeout(timeout, self.store.read_strong(SHARED_INVALIDATE_KEY)).await;

        let observed = match read {
            Ok(Ok(Some(record))) => record.updated_at,
            Ok(Ok(None)) => return ReconcileOutcome::NeverInvalidated,
            Ok(Err(e)) => return self.skip_reconcile(e),
            Err(_) => return self.skip_reconcile(StoreError::Timeout { elapsed: timeout }),
        };

        match self.cache.clear_if_stale(observed) {
            Some(dropped) => {
                tracing::debug!(dropped, observed = %observed, "Invalidation observed, cleared local cache");
                ReconcileOutcome::Cleared { dropped, observed }
            }
            None => ReconcileOutcome::Unchanged,
        }
    }

    fn skip_reconcile(&self, error: StoreError) -> ReconcileOutcome {
        self.cache.metrics().record_reconcile_skipped();
        tracing::warn!(error = %error, "Could not read invalidation record, skipping reconcile");
        ReconcileOutcome::Skipped(error)
    }

    /// Stamp the shared invalidation record so every process drops its
    /// cache on its next `reconcile`.
    ///
    /// This does not touch the local cache, the caller's included. Transient
    /// store failures are retried per `invalidate_retry`; if every attempt
    /// fails the outcome is [`InvalidateOutcome::Lost`], already logged.
    pub async fn invalidate(&self) -> InvalidateOutcome {
        let retry = &self.config.invalidate_retry;
        let mut attempt = 0u32;

        loop {
            match self.store.write(SHARED_INVALIDATE_KEY).await {
                Ok(record) => {
                    self.cache.metrics().record_invalidation_published();
                    tracing::debug!(updated_at = %record.updated_at, "Published invalidation");
                    return InvalidateOutcome::Published(record.updated_at);
                }
                Err(e) if e.is_transient() && attempt < retry.max_retries => {
                    attempt += 1;
                    let delay = retry.backoff_for(attempt);
                    tracing::warn!(
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Invalidation write failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    self.cache.metrics().record_invalidation_lost();
                    tracing::error!(
                        error = %e,
                        attempts = attempt + 1,
                        "Invalidation write lost, other processes keep their caches"
                    );
                    return InvalidateOutcome::Lost(e);
                }
            }
        }
    }

    // ========================================================================
    // CACHE OPERATIONS
    // ========================================================================

    /// Return the cached value for `key`, if present and unexpired.
    pub fn get(&self, key: &str) -> Option<V> {
        self.cache.get(key)
    }

    /// Insert or overwrite `key`, optionally expiring after `ttl`.
    pub fn set(&self, key: impl Into<CacheKey>, value: V, ttl: Option<Duration>) {
        self.cache.set(key, value, ttl)
    }

    /// Return the present, unexpired values among `keys`.
    pub fn get_multi<I, K>(&self, keys: I) -> HashMap<CacheKey, V>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        self.cache.get_multi(keys)
    }

    /// Insert or overwrite a batch of entries sharing one `ttl`.
    pub fn set_multi<I, K>(&self, entries: I, ttl: Option<Duration>)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<CacheKey>,
    {
        self.cache.set_multi(entries, ttl)
    }

    /// Remove `key` locally and, only if it was cached here, invalidate every
    /// other process.
    ///
    /// The local removal stands whatever happens to the invalidation write.
    pub async fn delete(&self, key: &str) -> DeleteOutcome {
        if !self.cache.remove(key) {
            return DeleteOutcome::Absent;
        }
        DeleteOutcome::Removed(self.invalidate().await)
    }

    /// Invalidate every process's cache.
    ///
    /// The local cache is left alone until this process next reconciles, so
    /// reads later in the same request may still see old entries.
    pub async fn flush_all(&self) -> InvalidateOutcome {
        self.invalidate().await
    }

    /// Return the cached value for `key`, or compute, cache and return it.
    pub fn get_or_insert_with<F>(&self, key: &str, ttl: Option<Duration>, compute: F) -> V
    where
        F: FnOnce() -> V,
    {
        if let Some(value) = self.cache.get(key) {
            return value;
        }
        let value = compute();
        self.cache.set(key, value.clone(), ttl);
        value
    }

    /// Async variant of [`get_or_insert_with`](Self::get_or_insert_with) for
    /// fallible computations. Errors are returned and nothing is cached.
    pub async fn try_get_or_insert_with<F, Fut, E>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        compute: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.cache.get(key) {
            return Ok(value);
        }
        let value = compute().await?;
        self.cache.set(key, value.clone(), ttl);
        Ok(value)
    }

    // ========================================================================
    // INTROSPECTION
    // ========================================================================

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// The invalidation timestamp last reconciled against, `None` if never.
    pub fn last_reconciled_at(&self) -> Option<Timestamp> {
        self.cache.last_reconciled_at()
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn config(&self) -> &RamCacheConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// The local cache, for callers that need to bypass the service.
    pub fn process_cache(&self) -> &ProcessCache<V> {
        &self.cache
    }
}

impl<V: Clone> RamCache<V, LmdbInvalidationStore> {
    /// Validate `config`, open the LMDB store in directory `path` and build
    /// the service on it.
    ///
    /// # Errors
    ///
    /// `RamCacheError::Config` for an invalid config (checked before touching
    /// the filesystem), `RamCacheError::Store` if the store cannot be opened.
    pub fn open_lmdb<P: AsRef<Path>>(path: P, config: RamCacheConfig) -> RamCacheResult<Self> {
        config.validate()?;
        let store = LmdbInvalidationStore::open(path).map_err(StoreError::from)?;
        Ok(Self::new(Arc::new(store), config)?)
    }
}
