use base64::prelude::{Engine, BASE64_STANDARD};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::kv::KeyValueStore;
use super::records::{
    CurrentDatabaseRecord, DatabaseMetadata, IntegrityStatus, PersistReason, SyncStatusRecord,
    VersionRecord, ALL_STORES, KEY_CURRENT_DATABASE, KEY_SYNC_STATUS, PRIMARY_BLOB_KEY,
    PRIMARY_META_KEY, STORE_DATABASES, STORE_DATABASE_VERSIONS, STORE_SYNC_STATUS,
};
use super::StoreError;
use crate::utils::sha256_hex;

/// Typed view over the secondary backend's seven logical object stores.
///
/// Rows are JSON documents addressed by `<store>/<key>`.
pub struct SecondaryStore {
    inner: Box<dyn KeyValueStore>,
}

impl SecondaryStore {
    /// Wrap a key/value backend
    pub fn new(inner: Box<dyn KeyValueStore>) -> SecondaryStore {
        SecondaryStore { inner }
    }

    fn row_key(store: &str, key: &str) -> String {
        format!("{}/{}", store, key)
    }

    /// Read one typed row
    pub fn get<T: DeserializeOwned>(
        &self,
        store: &str,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        match self.inner.get(&Self::row_key(store, key))? {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    /// Write one typed row
    pub fn put<T: Serialize>(&mut self, store: &str, key: &str, row: &T) -> Result<(), StoreError> {
        let text = serde_json::to_string(row)?;
        self.inner.put(&Self::row_key(store, key), &text)
    }

    /// Delete one row; absent rows are not an error
    pub fn delete(&mut self, store: &str, key: &str) -> Result<(), StoreError> {
        self.inner.remove(&Self::row_key(store, key))
    }

    /// All keys in one logical store, ascending
    pub fn keys(&self, store: &str) -> Result<Vec<String>, StoreError> {
        let prefix = format!("{}/", store);
        Ok(self
            .inner
            .keys_with_prefix(&prefix)?
            .into_iter()
            .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }

    /// All rows in one logical store as `(key, row)` pairs, ascending by key
    pub fn list<T: DeserializeOwned>(&self, store: &str) -> Result<Vec<(String, T)>, StoreError> {
        let mut rows = Vec::new();
        for key in self.keys(store)? {
            if let Some(row) = self.get(store, &key)? {
                rows.push((key, row));
            }
        }
        Ok(rows)
    }

    /// Remove every row of one logical store
    pub fn clear_store(&mut self, store: &str) -> Result<(), StoreError> {
        for key in self.keys(store)? {
            self.delete(store, &key)?;
        }
        Ok(())
    }

    /// Approximate stored size in bytes
    pub fn bytes_in_use(&self) -> u64 {
        self.inner.bytes_in_use()
    }
}

/// Where a loaded blob came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadSource {
    /// The flat primary store
    Primary,
    /// The indexed secondary store
    Secondary,
}

/// Result of a successful [`DualStore::load`]
#[derive(Debug, Clone)]
pub struct LoadedDatabase {
    /// Encrypted database blob
    pub blob: Vec<u8>,
    /// Metadata stored alongside the blob
    pub metadata: DatabaseMetadata,
    /// Which store satisfied the read
    pub source: LoadSource,
    /// Version of the blob, 0 when only the primary row exists
    pub version: u64,
    /// Lowercase hex SHA-256 recomputed over the returned blob
    pub checksum: String,
}

/// Outcome of one [`DualStore::persist`] pass
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistOutcome {
    /// Version assigned to this write
    pub version: u64,
    /// Checksum of the persisted blob
    pub checksum: String,
    /// Whether the primary write and read-back succeeded
    pub primary_ok: bool,
    /// Whether the secondary writes succeeded
    pub secondary_ok: bool,
    /// Whether the primary read-back matched the checksum
    pub checksum_match: bool,
    /// Human-readable notes about partial failures
    pub warnings: Vec<String>,
}

impl PersistOutcome {
    /// A persist succeeds when both stores acknowledged the write
    pub fn success(&self) -> bool {
        self.primary_ok && self.secondary_ok
    }
}

/// Health report over both stores
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreHealth {
    /// Bytes used by the primary store
    pub primary_bytes_in_use: u64,
    /// Approximate bytes used by the secondary store
    pub secondary_bytes_in_use: u64,
    /// When the last persist finished
    pub last_sync: Option<DateTime<Utc>>,
    /// Checksum of the last persisted blob
    pub last_checksum: Option<String>,
    /// Number of retained versions
    pub version_count: usize,
    /// Highest retained version
    pub latest_version: Option<u64>,
    /// Integrity as of the last read-back verification
    pub integrity: IntegrityStatus,
    /// Accumulated warnings
    pub warnings: Vec<String>,
}

/// Durable persistence driver over the primary and secondary stores.
///
/// See the [module documentation][crate::store] for the write-path
/// ordering guarantees.
pub struct DualStore {
    primary: Box<dyn KeyValueStore>,
    secondary: SecondaryStore,
    max_versions: usize,
}

impl DualStore {
    /// Assemble a dual store over two backends
    pub fn new(
        primary: Box<dyn KeyValueStore>,
        secondary: Box<dyn KeyValueStore>,
        max_versions: usize,
    ) -> DualStore {
        DualStore {
            primary,
            secondary: SecondaryStore::new(secondary),
            max_versions,
        }
    }

    /// Direct access to the secondary store for the journal and the
    /// backup scheduler
    pub fn secondary_mut(&mut self) -> &mut SecondaryStore {
        &mut self.secondary
    }

    /// Read-only access to the secondary store
    pub fn secondary(&self) -> &SecondaryStore {
        &self.secondary
    }

    fn version_key(version: u64) -> String {
        // Zero padded so lexicographic key order is numeric order
        format!("{:010}", version)
    }

    /// Checksum of the currently persisted blob, if any
    pub fn current_checksum(&self) -> Option<String> {
        self.secondary
            .get::<CurrentDatabaseRecord>(STORE_DATABASES, KEY_CURRENT_DATABASE)
            .ok()
            .flatten()
            .map(|record| record.checksum)
    }

    /// Persist a blob to both stores.
    ///
    /// Runs the full write path in order: checksum, secondary current row,
    /// version append, primary write, read-back verification, sync status,
    /// version pruning. Failures along the way are captured in the
    /// returned [`PersistOutcome`] rather than aborting the pass, so the
    /// caller can decide whether partial success is acceptable.
    pub fn persist(
        &mut self,
        blob: &[u8],
        metadata: &DatabaseMetadata,
        reason: PersistReason,
        now: DateTime<Utc>,
    ) -> PersistOutcome {
        let checksum = sha256_hex(blob);
        let mut warnings = Vec::new();

        let previous_version = self
            .secondary
            .get::<CurrentDatabaseRecord>(STORE_DATABASES, KEY_CURRENT_DATABASE)
            .unwrap_or_else(|e| {
                warnings.push(format!("could not read current version: {}", e));
                None
            })
            .map(|record| record.version)
            .unwrap_or(0);
        let version = previous_version + 1;

        let mut secondary_ok = true;
        let current = CurrentDatabaseRecord {
            blob: blob.to_vec(),
            checksum: checksum.clone(),
            timestamp: now,
            version,
            metadata: metadata.clone(),
            source: reason,
        };
        if let Err(e) = self
            .secondary
            .put(STORE_DATABASES, KEY_CURRENT_DATABASE, &current)
        {
            secondary_ok = false;
            warnings.push(format!("secondary current write failed: {}", e));
        }

        let version_row = VersionRecord {
            blob: blob.to_vec(),
            checksum: checksum.clone(),
            timestamp: now,
            metadata: metadata.clone(),
            reason: "current".to_string(),
        };
        if let Err(e) = self.secondary.put(
            STORE_DATABASE_VERSIONS,
            &Self::version_key(version),
            &version_row,
        ) {
            secondary_ok = false;
            warnings.push(format!("version append failed: {}", e));
        }

        let (mut primary_ok, mut checksum_match) =
            self.write_primary_verified(blob, metadata, &checksum, &mut warnings);
        if primary_ok && !checksum_match {
            // One in-place retry before flagging degraded integrity
            warnings.push("primary read-back mismatched, retrying".to_string());
            let (retry_ok, retry_match) =
                self.write_primary_verified(blob, metadata, &checksum, &mut warnings);
            primary_ok = retry_ok;
            checksum_match = retry_match;
        }

        let integrity = if primary_ok && checksum_match {
            IntegrityStatus::Healthy
        } else {
            IntegrityStatus::Degraded
        };
        let status = SyncStatusRecord {
            last_sync: now,
            last_checksum: checksum.clone(),
            integrity,
        };
        if let Err(e) = self
            .secondary
            .put(STORE_SYNC_STATUS, KEY_SYNC_STATUS, &status)
        {
            warnings.push(format!("sync status update failed: {}", e));
        }

        if let Err(e) = self.prune_versions() {
            warnings.push(format!("version pruning failed: {}", e));
        }

        for warning in &warnings {
            warn!("persist v{}: {}", version, warning);
        }
        debug!(
            "persisted v{} ({} bytes, checksum {})",
            version,
            blob.len(),
            &checksum[0..8]
        );

        PersistOutcome {
            version,
            checksum,
            primary_ok,
            secondary_ok,
            checksum_match,
            warnings,
        }
    }

    fn write_primary_verified(
        &mut self,
        blob: &[u8],
        metadata: &DatabaseMetadata,
        checksum: &str,
        warnings: &mut Vec<String>,
    ) -> (bool, bool) {
        let blob_text = BASE64_STANDARD.encode(blob);
        let meta_text = match serde_json::to_string(metadata) {
            Ok(text) => text,
            Err(e) => {
                warnings.push(format!("metadata encoding failed: {}", e));
                return (false, false);
            }
        };
        if let Err(e) = self.primary.put(PRIMARY_BLOB_KEY, &blob_text) {
            warnings.push(format!("primary blob write failed: {}", e));
            return (false, false);
        }
        if let Err(e) = self.primary.put(PRIMARY_META_KEY, &meta_text) {
            warnings.push(format!("primary metadata write failed: {}", e));
            return (false, false);
        }

        match self.primary.get(PRIMARY_BLOB_KEY) {
            Ok(Some(read_back)) => match BASE64_STANDARD.decode(read_back.as_bytes()) {
                Ok(decoded) => (true, sha256_hex(&decoded) == checksum),
                Err(e) => {
                    warnings.push(format!("primary read-back not decodable: {}", e));
                    (true, false)
                }
            },
            Ok(None) => {
                warnings.push("primary read-back found no blob".to_string());
                (true, false)
            }
            Err(e) => {
                warnings.push(format!("primary read-back failed: {}", e));
                (true, false)
            }
        }
    }

    fn prune_versions(&mut self) -> Result<(), StoreError> {
        let mut versions: Vec<u64> = self
            .secondary
            .keys(STORE_DATABASE_VERSIONS)?
            .into_iter()
            .filter_map(|key| key.parse().ok())
            .collect();
        versions.sort_unstable();
        while versions.len() > self.max_versions {
            let oldest = versions.remove(0);
            self.secondary
                .delete(STORE_DATABASE_VERSIONS, &Self::version_key(oldest))?;
            debug!("pruned database version {}", oldest);
        }
        Ok(())
    }

    /// Load the current blob, preferring the primary store and falling
    /// back to the secondary current row. Returns `None` when neither
    /// store has a database.
    pub fn load(&self) -> Result<Option<LoadedDatabase>, StoreError> {
        match self.load_primary() {
            Ok(Some(loaded)) => return Ok(Some(loaded)),
            Ok(None) => {}
            Err(e) => warn!("primary load failed, trying secondary: {}", e),
        }

        let record = self
            .secondary
            .get::<CurrentDatabaseRecord>(STORE_DATABASES, KEY_CURRENT_DATABASE)?;
        Ok(record.map(|record| {
            let checksum = sha256_hex(&record.blob);
            LoadedDatabase {
                blob: record.blob,
                metadata: record.metadata,
                source: LoadSource::Secondary,
                version: record.version,
                checksum,
            }
        }))
    }

    fn load_primary(&self) -> Result<Option<LoadedDatabase>, StoreError> {
        let blob_text = match self.primary.get(PRIMARY_BLOB_KEY)? {
            Some(text) => text,
            None => return Ok(None),
        };
        let meta_text = self
            .primary
            .get(PRIMARY_META_KEY)?
            .ok_or_else(|| StoreError::NotFound("primary metadata".to_string()))?;
        let blob = BASE64_STANDARD.decode(blob_text.as_bytes())?;
        let metadata: DatabaseMetadata = serde_json::from_str(&meta_text)?;
        let checksum = sha256_hex(&blob);
        let version = self
            .secondary
            .get::<CurrentDatabaseRecord>(STORE_DATABASES, KEY_CURRENT_DATABASE)
            .ok()
            .flatten()
            .map(|record| record.version)
            .unwrap_or(0);
        Ok(Some(LoadedDatabase {
            blob,
            metadata,
            source: LoadSource::Primary,
            version,
            checksum,
        }))
    }

    /// Fetch a blob from the retained version history.
    ///
    /// Falls back to the secondary current row when the requested version
    /// has been pruned; fails with [`StoreError::NotFound`] otherwise.
    pub fn recover(&self, version: u64) -> Result<Vec<u8>, StoreError> {
        if let Some(row) = self
            .secondary
            .get::<VersionRecord>(STORE_DATABASE_VERSIONS, &Self::version_key(version))?
        {
            return Ok(row.blob);
        }
        if let Some(current) = self
            .secondary
            .get::<CurrentDatabaseRecord>(STORE_DATABASES, KEY_CURRENT_DATABASE)?
        {
            warn!(
                "version {} missing, recovering from current v{}",
                version, current.version
            );
            return Ok(current.blob);
        }
        Err(StoreError::NotFound(format!("version {}", version)))
    }

    /// Report sizes, sync status and version inventory
    pub fn health(&self) -> StoreHealth {
        let mut warnings = Vec::new();
        let status = self
            .secondary
            .get::<SyncStatusRecord>(STORE_SYNC_STATUS, KEY_SYNC_STATUS)
            .unwrap_or_else(|e| {
                warnings.push(format!("sync status unreadable: {}", e));
                None
            });
        let versions = self
            .secondary
            .keys(STORE_DATABASE_VERSIONS)
            .unwrap_or_else(|e| {
                warnings.push(format!("version listing failed: {}", e));
                Vec::new()
            });
        let latest_version = versions
            .iter()
            .filter_map(|key| key.parse::<u64>().ok())
            .max();

        StoreHealth {
            primary_bytes_in_use: self.primary.bytes_in_use(),
            secondary_bytes_in_use: self.secondary.bytes_in_use(),
            last_sync: status.as_ref().map(|s| s.last_sync),
            last_checksum: status.as_ref().map(|s| s.last_checksum.clone()),
            version_count: versions.len(),
            latest_version,
            integrity: status
                .map(|s| s.integrity)
                .unwrap_or(IntegrityStatus::Healthy),
            warnings,
        }
    }

    /// Remove every trace of the database from both stores
    pub fn destroy(&mut self) -> Result<(), StoreError> {
        self.primary.remove(PRIMARY_BLOB_KEY)?;
        self.primary.remove(PRIMARY_META_KEY)?;
        for store in ALL_STORES {
            self.secondary.clear_store(store)?;
        }
        Ok(())
    }

    /// Deliberately drop the primary copy, for fallback testing
    #[doc(hidden)]
    pub fn clear_primary_for_test(&mut self) -> Result<(), StoreError> {
        self.primary.remove(PRIMARY_BLOB_KEY)?;
        self.primary.remove(PRIMARY_META_KEY)?;
        Ok(())
    }
}

impl std::fmt::Debug for DualStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DualStore")
            .field("max_versions", &self.max_versions)
            .finish_non_exhaustive()
    }
}
