//! The per-process cache.
//!
//! A single mutex guards the map and the last reconciled timestamp. Every
//! operation is a short critical section; nothing here blocks on I/O, so a
//! finer-grained scheme would buy nothing.
//!
//! Capacity is a safety valve, not a working-set policy: when a new key
//! arrives at capacity, one arbitrary entry is dropped. Everything cached is
//! recomputable, so losing the "wrong" entry only costs a recompute.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use ramcache_core::{CacheKey, Clock, SystemClock, Timestamp, DEFAULT_MAX_ENTRIES};

use super::entry::CacheEntry;
use super::stats::{CacheMetrics, CacheStats};

/// State guarded by the cache lock.
#[derive(Debug)]
struct ProcessState<V> {
    entries: HashMap<CacheKey, CacheEntry<V>>,
    /// `updated_at` of the shared invalidation record as last observed here.
    last_reconciled_at: Option<Timestamp>,
}

enum Lookup<V> {
    Hit(V),
    Miss,
    Expired,
}

impl<V: Clone> ProcessState<V> {
    fn lookup(&mut self, key: &str, now: Timestamp) -> Lookup<V> {
        let Some(entry) = self.entries.get(key) else {
            return Lookup::Miss;
        };
        if entry.is_expired(now) {
            self.entries.remove(key);
            return Lookup::Expired;
        }
        Lookup::Hit(entry.value().clone())
    }

    /// Insert one entry, evicting an arbitrary other one if the key is new
    /// and the map is full. Returns the number of evictions (0 or 1).
    fn insert_bounded(&mut self, key: CacheKey, entry: CacheEntry<V>, max_entries: usize) -> u64 {
        let mut evicted = 0;
        if !self.entries.contains_key(&key) && self.entries.len() >= max_entries {
            let victim = self.entries.keys().next().cloned();
            if let Some(victim) = victim {
                self.entries.remove(&victim);
                evicted = 1;
            }
        }
        self.entries.insert(key, entry);
        evicted
    }
}

/// Process-local key/value cache with bounded size and per-entry expiry.
///
/// Callers normally use it through [`RamCache`](super::RamCache), which adds
/// the cross-process invalidation protocol on top.
#[derive(Debug)]
pub struct ProcessCache<V> {
    state: Mutex<ProcessState<V>>,
    max_entries: usize,
    stats_log_interval: u64,
    clock: Arc<dyn Clock>,
    metrics: CacheMetrics,
}

impl<V: Clone> ProcessCache<V> {
    /// Create a cache holding at most `max_entries` entries, using the wall
    /// clock for expiry. A zero capacity is raised to one.
    pub fn new(max_entries: usize) -> Self {
        Self::with_clock(max_entries, Arc::new(SystemClock))
    }

    /// Create a cache that reads time from `clock`.
    pub fn with_clock(max_entries: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(ProcessState {
                entries: HashMap::new(),
                last_reconciled_at: None,
            }),
            max_entries: max_entries.max(1),
            stats_log_interval: 0,
            clock,
            metrics: CacheMetrics::new(),
        }
    }

    /// Log hit-rate figures every `lookups` lookups. Zero disables logging.
    pub fn with_stats_log_interval(mut self, lookups: u64) -> Self {
        self.stats_log_interval = lookups;
        self
    }

    // A panic while holding the lock cannot leave the map half-updated in a
    // way that matters: every entry is recomputable.
    fn lock(&self) -> MutexGuard<'_, ProcessState<V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the cached value for `key`, if present and unexpired.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let (lookup, entry_count) = {
            let mut state = self.lock();
            let lookup = state.lookup(key, now);
            (lookup, state.entries.len())
        };
        self.count_lookup(lookup, entry_count)
    }

    /// Return the present, unexpired values among `keys`. Missing keys are
    /// left out of the result.
    pub fn get_multi<I, K>(&self, keys: I) -> HashMap<CacheKey, V>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let now = self.clock.now();
        let (lookups, entry_count) = {
            let mut state = self.lock();
            let lookups: Vec<(K, Lookup<V>)> = keys
                .into_iter()
                .map(|key| {
                    let lookup = state.lookup(key.as_ref(), now);
                    (key, lookup)
                })
                .collect();
            (lookups, state.entries.len())
        };

        lookups
            .into_iter()
            .filter_map(|(key, lookup)| {
                self.count_lookup(lookup, entry_count)
                    .map(|value| (key.as_ref().to_string(), value))
            })
            .collect()
    }

    /// Insert or overwrite `key`. With a `ttl` the entry expires that long
    /// from now.
    pub fn set(&self, key: impl Into<CacheKey>, value: V, ttl: Option<Duration>) {
        let entry = CacheEntry::with_ttl(value, self.clock.now(), ttl);
        let evicted = self.lock().insert_bounded(key.into(), entry, self.max_entries);
        if evicted > 0 {
            self.metrics.record_evictions(evicted);
            tracing::trace!(max_entries = self.max_entries, "Evicted an entry at capacity");
        }
    }

    /// Insert or overwrite a batch of entries sharing one `ttl`.
    ///
    /// A batch that does not fit next to the current contents replaces them:
    /// the whole cache is cleared first. A batch larger than the capacity is
    /// cut down to the capacity.
    pub fn set_multi<I, K>(&self, entries: I, ttl: Option<Duration>)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<CacheKey>,
    {
        let now = self.clock.now();
        let mut batch: HashMap<CacheKey, CacheEntry<V>> = entries
            .into_iter()
            .map(|(key, value)| (key.into(), CacheEntry::with_ttl(value, now, ttl)))
            .collect();

        if batch.len() > self.max_entries {
            let dropped = batch.len() - self.max_entries;
            tracing::warn!(
                batch = batch.len(),
                max_entries = self.max_entries,
                dropped,
                "Bulk insert larger than cache capacity, dropping part of the batch"
            );
            let excess: Vec<CacheKey> = batch.keys().skip(self.max_entries).cloned().collect();
            for key in excess {
                batch.remove(&key);
            }
        }

        let cleared = {
            let mut state = self.lock();
            let new_keys = batch
                .keys()
                .filter(|key| !state.entries.contains_key(*key))
                .count();
            let overflow = state.entries.len() + new_keys > self.max_entries;
            let cleared = if overflow {
                let cleared = state.entries.len();
                state.entries.clear();
                Some(cleared)
            } else {
                None
            };
            state.entries.extend(batch);
            cleared
        };

        if let Some(cleared) = cleared {
            self.metrics.record_clear();
            self.metrics.record_evictions(cleared as u64);
            tracing::debug!(
                cleared,
                max_entries = self.max_entries,
                "Bulk insert would overflow, cleared the cache first"
            );
        }
    }

    /// Remove `key` from this process only. Returns whether it was present.
    pub fn remove(&self, key: &str) -> bool {
        self.lock().entries.remove(key).is_some()
    }

    /// Drop every entry in this process. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let dropped = {
            let mut state = self.lock();
            let dropped = state.entries.len();
            state.entries.clear();
            dropped
        };
        self.metrics.record_clear();
        dropped
    }

    /// Adopt `observed` as the latest invalidation timestamp.
    ///
    /// If it is newer than the last one seen here, or none has been seen yet,
    /// every entry is dropped and `Some(dropped)` is returned. Otherwise the
    /// cache is untouched and `None` is returned. The comparison and the
    /// clear happen under one lock, so the last reconciled timestamp never
    /// moves backwards under concurrent callers.
    pub fn clear_if_stale(&self, observed: Timestamp) -> Option<usize> {
        let dropped = {
            let mut state = self.lock();
            let stale = match state.last_reconciled_at {
                None => true,
                Some(last) => observed > last,
            };
            if !stale {
                return None;
            }
            let dropped = state.entries.len();
            state.entries.clear();
            state.last_reconciled_at = Some(observed);
            dropped
        };
        self.metrics.record_clear();
        Some(dropped)
    }

    /// The invalidation timestamp this process last reconciled against, or
    /// `None` if it never observed one.
    pub fn last_reconciled_at(&self) -> Option<Timestamp> {
        self.lock().last_reconciled_at
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    pub fn stats(&self) -> CacheStats {
        self.metrics.snapshot(self.len() as u64)
    }

    fn count_lookup(&self, lookup: Lookup<V>, entry_count: usize) -> Option<V> {
        let (lookups, value) = match lookup {
            Lookup::Hit(value) => (self.metrics.record_hit(), Some(value)),
            Lookup::Expired => {
                self.metrics.record_expiration();
                (self.metrics.record_miss(), None)
            }
            Lookup::Miss => (self.metrics.record_miss(), None),
        };

        if self.stats_log_interval > 0 && lookups % self.stats_log_interval == 0 {
            let stats = self.metrics.snapshot(entry_count as u64);
            tracing::debug!(
                hits = stats.hits,
                misses = stats.misses,
                hit_rate = stats.hit_rate(),
                entries = entry_count,
                "ramcache hit rate"
            );
        }

        value
    }
}

impl<V: Clone> Default for ProcessCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}
