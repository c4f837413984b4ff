//! LMDB-backed invalidation store.
//!
//! Uses the heed crate (Rust bindings for LMDB). An LMDB environment can be
//! opened by many processes on the same host at once, which makes a single
//! small LMDB file a workable durable store for the invalidation record.
//!
//! # Consistency
//!
//! - Writes run in a write transaction. LMDB serialises writers across
//!   processes, so reading the previous stamp and writing the next one is
//!   atomic and stamps strictly increase.
//! - Reads open a fresh read transaction, which sees every transaction
//!   committed before it began. That is the strong read reconciliation
//!   depends on.
//!
//! Records are stored as JSON under their key. Every LMDB call runs on
//! tokio's blocking pool, so a writer queued behind another process's lock
//! never stalls the async runtime and a caller's timeout still fires.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions};
use ramcache_core::{Clock, StoreError, StoreResult, SystemClock};

use super::record::{next_stamp, InvalidationRecord, InvalidationStore};

/// Name of the LMDB sub-database holding invalidation records.
const DB_NAME: &str = "ramcache_invalidation";

/// The record is tiny; this only needs room for LMDB's own bookkeeping.
const MAP_SIZE_BYTES: usize = 1024 * 1024;

/// Error type for opening the LMDB store.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for StoreError {
    fn from(e: LmdbStoreError) -> Self {
        StoreError::Unavailable {
            reason: e.to_string(),
        }
    }
}

/// Invalidation store persisted in an LMDB environment.
///
/// # Example
///
/// ```ignore
/// let store = Arc::new(LmdbInvalidationStore::open("/var/run/app/ramcache")?);
/// let cache: RamCache<Arc<Page>, _> = RamCache::new(store, RamCacheConfig::from_env()?)?;
/// ```
pub struct LmdbInvalidationStore {
    env: Env,
    db: Database<Str, Bytes>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for LmdbInvalidationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbInvalidationStore")
            .field("path", &self.env.path())
            .finish()
    }
}

impl LmdbInvalidationStore {
    /// Open (creating if needed) the store in directory `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LmdbStoreError> {
        Self::open_with_clock(path, Arc::new(SystemClock))
    }

    /// Open the store, stamping writes with `clock`.
    pub fn open_with_clock<P: AsRef<Path>>(
        path: P,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is only accessed through heed's
        // transactional API, and every process opens it with the same flags.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(MAP_SIZE_BYTES)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;

        let db: Database<Str, Bytes> = env
            .create_database(&mut wtxn, Some(DB_NAME))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;

        tracing::info!(path = %path.as_ref().display(), "Opened LMDB invalidation store");

        Ok(Self { env, db, clock })
    }
}

fn decode(key: &str, bytes: &[u8]) -> StoreResult<InvalidationRecord> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

fn transaction_error(e: heed::Error) -> StoreError {
    StoreError::Transaction {
        reason: e.to_string(),
    }
}

fn join_error(e: tokio::task::JoinError) -> StoreError {
    StoreError::Unavailable {
        reason: format!("LMDB task failed: {}", e),
    }
}

fn read_record(
    env: &Env,
    db: Database<Str, Bytes>,
    key: &str,
) -> StoreResult<Option<InvalidationRecord>> {
    let rtxn = env.read_txn().map_err(transaction_error)?;

    match db.get(&rtxn, key).map_err(transaction_error)? {
        Some(bytes) => decode(key, bytes).map(Some),
        None => Ok(None),
    }
}

fn write_record(
    env: &Env,
    db: Database<Str, Bytes>,
    clock: &dyn Clock,
    key: &str,
) -> StoreResult<InvalidationRecord> {
    // Blocks until no other process holds the LMDB writer lock.
    let mut wtxn = env.write_txn().map_err(transaction_error)?;

    let previous = match db.get(&wtxn, key).map_err(transaction_error)? {
        Some(bytes) => match decode(key, bytes) {
            Ok(record) => Some(record),
            Err(e) => {
                // Overwriting is the repair: any fresh stamp is a valid
                // invalidation signal.
                tracing::warn!(key, error = %e, "Replacing unreadable invalidation record");
                None
            }
        },
        None => None,
    };

    let record = InvalidationRecord::new(next_stamp(clock.now(), previous.as_ref()));
    let bytes = serde_json::to_vec(&record).map_err(|e| StoreError::Serialization {
        reason: e.to_string(),
    })?;

    db.put(&mut wtxn, key, &bytes).map_err(transaction_error)?;
    wtxn.commit().map_err(transaction_error)?;

    Ok(record)
}

// LMDB calls block (a writer waits on the cross-process writer lock), so both
// run on the blocking pool. A dropped future leaves the call to finish there.
#[async_trait]
impl InvalidationStore for LmdbInvalidationStore {
    async fn read_strong(&self, key: &str) -> StoreResult<Option<InvalidationRecord>> {
        let env = self.env.clone();
        let db = self.db;
        let key = key.to_string();

        tokio::task::spawn_blocking(move || read_record(&env, db, &key))
            .await
            .map_err(join_error)?
    }

    async fn write(&self, key: &str) -> StoreResult<InvalidationRecord> {
        let env = self.env.clone();
        let db = self.db;
        let clock = Arc::clone(&self.clock);
        let key = key.to_string();

        tokio::task::spawn_blocking(move || write_record(&env, db, clock.as_ref(), &key))
            .await
            .map_err(join_error)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invalidation::SHARED_INVALIDATE_KEY;
    use ramcache_core::ManualClock;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::mpsc;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn create_test_store() -> (LmdbInvalidationStore, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let store =
            LmdbInvalidationStore::open(temp_dir.path()).expect("store creation should succeed");
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_read_before_write_is_none() {
        let (store, _dir) = create_test_store();
        let record = store
            .read_strong(SHARED_INVALIDATE_KEY)
            .await
            .expect("read_strong should succeed");
        assert!(record.is_none());
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let (store, _dir) = create_test_store();
        let written = store
            .write(SHARED_INVALIDATE_KEY)
            .await
            .expect("write should succeed");
        let read = store
            .read_strong(SHARED_INVALIDATE_KEY)
            .await
            .expect("read_strong should succeed");
        assert_eq!(read, Some(written));
    }

    #[tokio::test]
    async fn test_stamps_strictly_increase_with_frozen_clock() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let clock = ManualClock::default();
        let store = LmdbInvalidationStore::open_with_clock(temp_dir.path(), Arc::new(clock))
            .expect("store creation should succeed");

        let w1 = store.write(SHARED_INVALIDATE_KEY).await.unwrap();
        let w2 = store.write(SHARED_INVALIDATE_KEY).await.unwrap();
        assert!(w2.is_newer_than(&w1));
    }

    #[tokio::test]
    async fn test_record_survives_reopen() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let written = {
            let store = LmdbInvalidationStore::open(temp_dir.path())
                .expect("store creation should succeed");
            store.write(SHARED_INVALIDATE_KEY).await.unwrap()
        };

        let reopened =
            LmdbInvalidationStore::open(temp_dir.path()).expect("reopen should succeed");
        let read = reopened.read_strong(SHARED_INVALIDATE_KEY).await.unwrap();
        assert_eq!(read, Some(written));
    }

    #[tokio::test]
    async fn test_corrupt_record_is_reported_and_repaired_by_write() {
        let (store, _dir) = create_test_store();
        {
            let mut wtxn = store.env.write_txn().unwrap();
            store
                .db
                .put(&mut wtxn, SHARED_INVALIDATE_KEY, b"not json")
                .unwrap();
            wtxn.commit().unwrap();
        }

        let err = store.read_strong(SHARED_INVALIDATE_KEY).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));

        let written = store.write(SHARED_INVALIDATE_KEY).await.unwrap();
        let read = store.read_strong(SHARED_INVALIDATE_KEY).await.unwrap();
        assert_eq!(read, Some(written));
    }

    #[tokio::test]
    async fn test_held_writer_lock_does_not_stall_runtime() {
        let (store, _dir) = create_test_store();
        let env = store.env.clone();
        let (locked_tx, locked_rx) = mpsc::channel();

        let holder = std::thread::spawn(move || {
            let wtxn = env.write_txn().expect("write_txn should succeed");
            locked_tx.send(()).expect("test still waiting");
            std::thread::sleep(Duration::from_millis(500));
            drop(wtxn);
        });
        locked_rx.recv().expect("holder should take the writer lock");

        let ticks = Arc::new(AtomicU32::new(0));
        let ticker = {
            let ticks = Arc::clone(&ticks);
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        let started = Instant::now();
        let result =
            tokio::time::timeout(Duration::from_millis(100), store.write(SHARED_INVALIDATE_KEY))
                .await;

        assert!(result.is_err(), "write should still be waiting on the lock");
        assert!(started.elapsed() < Duration::from_millis(400));
        assert!(ticks.load(Ordering::SeqCst) > 0);

        ticker.abort();
        holder.join().expect("holder thread should not panic");

        store
            .write(SHARED_INVALIDATE_KEY)
            .await
            .expect("write should succeed once the lock is free");
    }

    #[test]
    fn test_open_error_converts_to_store_error() {
        let err: StoreError = LmdbStoreError::EnvOpen("permission denied".to_string()).into();
        assert!(matches!(err, StoreError::Unavailable { ref reason } if reason.contains("permission denied")));
    }
}
