//! Cross-process invalidation through a shared timestamp record.
//!
//! The protocol needs exactly two things from durable storage: a strongly
//! consistent read of one record and a write that stamps it with a
//! store-assigned time. [`InvalidationStore`] is that contract; this module
//! ships an in-memory implementation and an LMDB one.

pub mod lmdb;
pub mod memory;
pub mod outcome;
pub mod record;

pub use lmdb::{LmdbInvalidationStore, LmdbStoreError};
pub use memory::InMemoryInvalidationStore;
pub use outcome::{DeleteOutcome, InvalidateOutcome, ReconcileOutcome};
pub use record::{InvalidationRecord, InvalidationStore, SHARED_INVALIDATE_KEY};
