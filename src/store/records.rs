use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Primary store key for the base64-encoded blob text
pub const PRIMARY_BLOB_KEY: &str = "kdbx_database";
/// Primary store key for the metadata record
pub const PRIMARY_META_KEY: &str = "kdbx_meta";

/// Secondary object store holding the current database row
pub const STORE_DATABASES: &str = "databases";
/// Secondary object store holding the retained version history
pub const STORE_DATABASE_VERSIONS: &str = "database_versions";
/// Secondary object store holding backup snapshots
pub const STORE_BACKUP_SNAPSHOTS: &str = "backup_snapshots";
/// Secondary object store holding recovery codes
pub const STORE_RECOVERY_CODES: &str = "recovery_codes";
/// Secondary object store holding the operation journal
pub const STORE_STATE_JOURNAL: &str = "state_journal";
/// Secondary object store mirroring unterminated journal records
pub const STORE_INCOMPLETE_OPERATIONS: &str = "incomplete_operations";
/// Secondary object store holding the sync status row
pub const STORE_SYNC_STATUS: &str = "sync_status";

/// All seven logical secondary stores
pub(crate) const ALL_STORES: [&str; 7] = [
    STORE_DATABASES,
    STORE_DATABASE_VERSIONS,
    STORE_BACKUP_SNAPSHOTS,
    STORE_RECOVERY_CODES,
    STORE_STATE_JOURNAL,
    STORE_INCOMPLETE_OPERATIONS,
    STORE_SYNC_STATUS,
];

/// Fixed key of the current database row
pub const KEY_CURRENT_DATABASE: &str = "db:current";
/// Fixed key of the recovery code row
pub const KEY_CURRENT_RECOVERY: &str = "recovery:current";
/// Fixed key of the sync status row
pub const KEY_SYNC_STATUS: &str = "sync:status";

pub(crate) mod blob_b64 {
    use base64::prelude::{Engine, BASE64_STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(blob: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64_STANDARD.encode(blob))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        BASE64_STANDARD
            .decode(text.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// User-facing information about the stored database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseMetadata {
    /// Database display name
    pub name: String,
    /// Last modification timestamp
    pub last_modified: DateTime<Utc>,
    /// Number of entries outside the recycle bin
    pub entry_count: usize,
}

/// Why a blob was persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistReason {
    /// A user mutation
    Edit,
    /// A database import
    Import,
    /// Restoration from a snapshot or version
    Recovery,
}

/// The `databases["db:current"]` row
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentDatabaseRecord {
    /// Encrypted database blob
    #[serde(with = "blob_b64")]
    pub blob: Vec<u8>,
    /// Lowercase hex SHA-256 of the blob
    pub checksum: String,
    /// When this row was written
    pub timestamp: DateTime<Utc>,
    /// Monotonically increasing version
    pub version: u64,
    /// Metadata at the time of the write
    pub metadata: DatabaseMetadata,
    /// What caused the write
    pub source: PersistReason,
}

/// A `database_versions` row
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionRecord {
    /// Encrypted database blob
    #[serde(with = "blob_b64")]
    pub blob: Vec<u8>,
    /// Lowercase hex SHA-256 of the blob
    pub checksum: String,
    /// When this version was written
    pub timestamp: DateTime<Utc>,
    /// Metadata at the time of the write
    pub metadata: DatabaseMetadata,
    /// Tag describing this version's role
    pub reason: String,
}

/// Why a backup snapshot was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotReason {
    /// Wall-clock driven snapshot
    Hourly,
    /// Snapshot after the edit-count threshold
    EditThreshold,
    /// Explicitly requested snapshot
    Manual,
}

/// A `backup_snapshots` row, keyed by its creation timestamp
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRecord {
    /// Encrypted database blob
    #[serde(with = "blob_b64")]
    pub blob: Vec<u8>,
    /// Lowercase hex SHA-256 of the blob
    pub checksum: String,
    /// When this snapshot was taken
    pub timestamp: DateTime<Utc>,
    /// Database version the snapshot was taken at
    pub version: u64,
    /// Metadata at the time of the snapshot
    pub metadata: DatabaseMetadata,
    /// What triggered the snapshot
    pub reason: SnapshotReason,
    /// Edit counter value when the snapshot was taken
    pub edit_count: u32,
    /// Whether the scheduler (not the user) initiated the snapshot
    pub auto_snapshot: bool,
}

/// Durable-store integrity as measured by the last read-back check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityStatus {
    /// Read-back checksum matched
    Healthy,
    /// Read-back checksum mismatched or the primary write failed
    Degraded,
    /// Stored data failed validation on load
    Corrupted,
}

/// The `sync_status["sync:status"]` row
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusRecord {
    /// When the last persist finished
    pub last_sync: DateTime<Utc>,
    /// Checksum of the last persisted blob
    pub last_checksum: String,
    /// Outcome of the last read-back verification
    pub integrity: IntegrityStatus,
}

/// Lifecycle state of a journaled operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Begun but not yet terminated
    Started,
    /// Terminated successfully
    Completed,
    /// Terminated by rollback
    RolledBack,
}

/// A `state_journal` row tracking one atomic mutation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalRecord {
    /// Operation id, `op:<ms-timestamp>:<uuid-v4>`
    pub id: String,
    /// Request type that started the operation
    pub op_type: String,
    /// Sanitised operation context; never secret material
    pub payload: serde_json::Value,
    /// Current lifecycle state
    pub status: OperationStatus,
    /// When the operation began
    pub started_at: DateTime<Utc>,
    /// When the operation terminated, if it has
    pub completed_at: Option<DateTime<Utc>>,
    /// Blob checksum observed at begin time, or `"unknown"`
    pub database_checksum: String,
    /// Blob checksum the operation intended to produce
    pub result_checksum: Option<String>,
    /// Recovery attempts made for this record
    pub attempts: u32,
    /// Rollback cause, when rolled back
    pub error: Option<String>,
}

/// The `recovery_codes["recovery:current"]` row.
///
/// Only a digest of the code is persisted; the cleartext code is shown
/// to the user once at issue time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryCodeRecord {
    /// Lowercase hex SHA-256 of the issued code
    pub code_hash: String,
    /// When the code was issued
    pub created_at: DateTime<Utc>,
}
