//! The shared invalidation record and the durable store that holds it.
//!
//! Exactly one record exists system-wide, under [`SHARED_INVALIDATE_KEY`].
//! Its only field is the time of the most recent invalidation, stamped by
//! the store, never by the client. Processes compare that stamp against
//! the one they last saw to decide whether to drop their local caches.

use async_trait::async_trait;
use ramcache_core::{StoreResult, Timestamp};
use serde::{Deserialize, Serialize};

/// Well-known key of the single invalidation record.
pub const SHARED_INVALIDATE_KEY: &str = "SharedInvalidate";

/// The coordination record shared by every process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InvalidationRecord {
    /// Store-assigned time of the most recent invalidation.
    pub updated_at: Timestamp,
}

impl InvalidationRecord {
    pub fn new(updated_at: Timestamp) -> Self {
        Self { updated_at }
    }

    /// Check if this record was written after `other`.
    pub fn is_newer_than(&self, other: &InvalidationRecord) -> bool {
        self.updated_at > other.updated_at
    }
}

/// Durable store holding the invalidation record.
///
/// This is the whole contract with the storage collaborator: one strongly
/// consistent point read and one write whose timestamp the store assigns.
///
/// # Implementation Requirements
///
/// - `read_strong` must observe every write that completed before it
///   started. A replica or eventually-consistent read could hide an
///   invalidation indefinitely.
/// - `write` must stamp a time no earlier than any stamp it has already
///   returned for the same key, creating the record if it is absent.
/// - Implementations must be `Send + Sync` for use from concurrent request
///   handlers.
#[async_trait]
pub trait InvalidationStore: Send + Sync {
    /// Read the record at `key`, or `None` if no invalidation was ever
    /// written.
    async fn read_strong(&self, key: &str) -> StoreResult<Option<InvalidationRecord>>;

    /// Stamp the record at `key` with a fresh store-assigned time and return
    /// it.
    async fn write(&self, key: &str) -> StoreResult<InvalidationRecord>;
}

/// Next stamp for a record: the store's clock, nudged forward if needed so
/// stamps for one key strictly increase even when the clock stalls or
/// steps back.
pub(crate) fn next_stamp(now: Timestamp, previous: Option<&InvalidationRecord>) -> Timestamp {
    match previous {
        Some(previous) if now <= previous.updated_at => {
            previous.updated_at + chrono::Duration::microseconds(1)
        }
        _ => now,
    }
}
