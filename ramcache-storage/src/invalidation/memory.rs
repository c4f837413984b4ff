//! In-memory invalidation store.
//!
//! One instance shared between several caches stands in for the durable
//! store: every cache holding an `Arc` to it behaves like a separate process
//! coordinating through the same record. Used by tests and by single-host
//! deployments where all workers live in one address space.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ramcache_core::{Clock, StoreResult, SystemClock};

use super::record::{next_stamp, InvalidationRecord, InvalidationStore};

/// Invalidation store backed by a map behind an async lock.
///
/// Reads take the same lock as writes, so a read always sees the latest
/// completed write.
#[derive(Debug)]
pub struct InMemoryInvalidationStore {
    records: tokio::sync::RwLock<HashMap<String, InvalidationRecord>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryInvalidationStore {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl InMemoryInvalidationStore {
    /// Create an empty store stamping with the wall clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store stamping with `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: tokio::sync::RwLock::new(HashMap::new()),
            clock,
        }
    }
}

#[async_trait]
impl InvalidationStore for InMemoryInvalidationStore {
    async fn read_strong(&self, key: &str) -> StoreResult<Option<InvalidationRecord>> {
        let records = self.records.read().await;
        Ok(records.get(key).copied())
    }

    async fn write(&self, key: &str) -> StoreResult<InvalidationRecord> {
        let mut records = self.records.write().await;
        let updated_at = next_stamp(self.clock.now(), records.get(key));
        let record = InvalidationRecord::new(updated_at);
        records.insert(key.to_string(), record);
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invalidation::SHARED_INVALIDATE_KEY;
    use chrono::{TimeZone, Utc};
    use ramcache_core::ManualClock;
    use std::time::Duration;

    #[tokio::test]
    async fn test_read_before_any_write_is_none() {
        let store = InMemoryInvalidationStore::new();
        let record = store
            .read_strong(SHARED_INVALIDATE_KEY)
            .await
            .expect("read_strong should succeed");
        assert!(record.is_none());
    }

    #[tokio::test]
    async fn test_write_creates_and_read_observes() {
        let start = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        let store = InMemoryInvalidationStore::with_clock(Arc::new(clock.clone()));

        let written = store
            .write(SHARED_INVALIDATE_KEY)
            .await
            .expect("write should succeed");
        assert_eq!(written.updated_at, start);

        let read = store
            .read_strong(SHARED_INVALIDATE_KEY)
            .await
            .expect("read_strong should succeed");
        assert_eq!(read, Some(written));
    }

    #[tokio::test]
    async fn test_stamps_strictly_increase_with_frozen_clock() {
        let clock = ManualClock::default();
        let store = InMemoryInvalidationStore::with_clock(Arc::new(clock.clone()));

        let w1 = store.write(SHARED_INVALIDATE_KEY).await.unwrap();
        let w2 = store.write(SHARED_INVALIDATE_KEY).await.unwrap();
        clock.advance(Duration::from_secs(1));
        let w3 = store.write(SHARED_INVALIDATE_KEY).await.unwrap();

        assert!(w2.is_newer_than(&w1));
        assert!(w3.is_newer_than(&w2));
        assert_eq!(w3.updated_at, clock.now());
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let store = InMemoryInvalidationStore::new();
        store.write("other").await.unwrap();
        assert!(store
            .read_strong(SHARED_INVALIDATE_KEY)
            .await
            .unwrap()
            .is_none());
    }
}
