//! Cached values and their expiry.

use std::time::Duration;

use ramcache_core::Timestamp;

/// A value held by the process cache.
///
/// Every hit returns a clone of `value`. Store `Arc<T>` when values are
/// large or must be shared without copying.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    value: V,
    expires_at: Option<Timestamp>,
}

impl<V> CacheEntry<V> {
    /// An entry with no TTL. It lives until evicted, deleted, or cleared by
    /// reconciliation.
    pub fn new(value: V) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    /// An entry that expires `ttl` after `now`.
    ///
    /// A zero TTL means "no TTL", as with memcache. A TTL too large to
    /// represent also means "no TTL".
    pub fn with_ttl(value: V, now: Timestamp, ttl: Option<Duration>) -> Self {
        let expires_at = ttl
            .filter(|ttl| !ttl.is_zero())
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .and_then(|ttl| now.checked_add_signed(ttl));
        Self { value, expires_at }
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn into_value(self) -> V {
        self.value
    }

    pub fn expires_at(&self) -> Option<Timestamp> {
        self.expires_at
    }

    /// An entry is expired from its expiry instant onwards.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        matches!(self.expires_at, Some(expires_at) if now >= expires_at)
    }
}
