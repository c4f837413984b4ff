//! Typed results of the invalidation protocol.
//!
//! Store failures never reach request handlers as `Err`. They come back as
//! one of these outcomes, already logged, so a caller can look at them when
//! it cares and ignore them otherwise.

use ramcache_core::{StoreError, Timestamp};

/// What a call to `reconcile` did.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// No invalidation has ever been written anywhere; nothing to do.
    NeverInvalidated,
    /// The shared record has not moved since this process last looked.
    Unchanged,
    /// A newer invalidation was observed and the local cache was dropped.
    Cleared {
        /// Entries dropped from this process.
        dropped: usize,
        /// The timestamp now adopted as the last reconciled one.
        observed: Timestamp,
    },
    /// The store could not be read in time; the cache was left as is.
    Skipped(StoreError),
}

impl ReconcileOutcome {
    pub fn is_cleared(&self) -> bool {
        matches!(self, Self::Cleared { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped(_))
    }
}

/// What a call to `invalidate` did.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidateOutcome {
    /// The shared record now carries this timestamp.
    Published(Timestamp),
    /// Every attempt failed; other processes keep serving what they have
    /// until the next successful invalidation.
    Lost(StoreError),
}

impl InvalidateOutcome {
    pub fn is_published(&self) -> bool {
        matches!(self, Self::Published(_))
    }

    pub fn timestamp(&self) -> Option<Timestamp> {
        match self {
            Self::Published(at) => Some(*at),
            Self::Lost(_) => None,
        }
    }
}

/// What a call to `delete` did.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The key was not cached here; no invalidation was sent.
    Absent,
    /// The key was removed locally and an invalidation was attempted.
    Removed(InvalidateOutcome),
}

impl DeleteOutcome {
    /// Whether the key was present and removed locally. This is true even
    /// when the invalidation itself was lost.
    pub fn was_removed(&self) -> bool {
        matches!(self, Self::Removed(_))
    }
}
