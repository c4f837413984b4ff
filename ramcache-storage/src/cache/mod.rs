//! Process-local RAM cache with cross-instance invalidation.
//!
//! Every server process keeps its own cache. Processes never talk to each
//! other; they coordinate through one shared timestamp record in a durable
//! store (see [`crate::invalidation`]).
//!
//! # Freshness
//!
//! A process observes another process's invalidation the next time it calls
//! [`RamCache::reconcile`], which request dispatch does once per request.
//! Data can therefore be stale for at most one reconciliation interval, and
//! only when the writer remembered to invalidate.
//!
//! # Example
//!
//! ```ignore
//! let store = Arc::new(InMemoryInvalidationStore::new());
//! let cache: RamCache<Arc<Vec<Feature>>, _> = RamCache::new(store, RamCacheConfig::default())?;
//!
//! let _ = cache.reconcile().await;
//! if cache.get("features:open").is_none() {
//!     cache.set("features:open", Arc::new(load_open_features()), Some(Duration::from_secs(60)));
//! }
//! ```

pub mod entry;
pub mod process_cache;
pub mod ram_cache;
pub mod stats;

pub use entry::CacheEntry;
pub use process_cache::ProcessCache;
pub use ram_cache::RamCache;
pub use stats::{CacheMetrics, CacheStats};
