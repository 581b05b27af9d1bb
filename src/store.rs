//! Durable persistence for the encrypted vault blob
//!
//! Two stores cooperate. The *primary* store is a flat key/value surface
//! holding the current blob (base64 text) and its metadata record - small,
//! always-present, the first thing consulted on load. The *secondary*
//! store is an indexed layer of seven logical object stores carrying the
//! current blob, its version history, backup snapshots, recovery codes,
//! the operation journal and the sync status row.
//!
//! [`DualStore`] drives the write path: checksum, secondary write, version
//! append, primary write, read-back verification, sync-status update and
//! version pruning, in that order.

mod dual;
mod kv;
mod records;

pub use dual::{DualStore, LoadSource, LoadedDatabase, PersistOutcome, SecondaryStore, StoreHealth};
pub use kv::{FileStore, KeyValueStore, MemoryStore};
pub use records::{
    CurrentDatabaseRecord, DatabaseMetadata, IntegrityStatus, JournalRecord, OperationStatus,
    PersistReason, RecoveryCodeRecord, SnapshotReason, SnapshotRecord, SyncStatusRecord,
    VersionRecord, KEY_CURRENT_DATABASE, KEY_CURRENT_RECOVERY, KEY_SYNC_STATUS,
    PRIMARY_BLOB_KEY, PRIMARY_META_KEY, STORE_BACKUP_SNAPSHOTS, STORE_DATABASES,
    STORE_DATABASE_VERSIONS, STORE_INCOMPLETE_OPERATIONS, STORE_RECOVERY_CODES,
    STORE_STATE_JOURNAL, STORE_SYNC_STATUS,
};

use thiserror::Error;

#[derive(Debug, Error)]
/// Failures raised by the persistence layer
pub enum StoreError {
    /// Underlying filesystem failure
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A persisted record could not be encoded or decoded
    #[error("Store record corrupt: {0}")]
    Record(#[from] serde_json::Error),
    /// A stored blob was not valid base64 text
    #[error("Stored blob is not valid base64: {0}")]
    BlobEncoding(#[from] base64::DecodeError),
    /// The backend rejected the operation
    #[error("Store backend failure: {0}")]
    Backend(String),
    /// The requested record does not exist
    #[error("Not found: {0}")]
    NotFound(String),
}
