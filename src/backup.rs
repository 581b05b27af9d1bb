//! Scheduled and threshold-triggered snapshots of the encrypted blob
//!
//! Snapshots are rows in the secondary store's `backup_snapshots`, keyed
//! by a sortable creation timestamp. Three triggers exist: a wall-clock
//! hourly tick (driven by the keeper's alarm host), every tenth
//! successful edit, and explicit requests. Retention keeps the newest ten
//! plus anything younger than thirty days.

use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use serde::Serialize;

use crate::store::{
    DatabaseMetadata, SecondaryStore, SnapshotReason, SnapshotRecord, StoreError,
    STORE_BACKUP_SNAPSHOTS,
};
use crate::utils::sha256_hex;

/// Snapshot keys sort chronologically in this fixed-width format
const SNAPSHOT_KEY_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Row key for a snapshot taken at `timestamp`
pub fn snapshot_key(timestamp: DateTime<Utc>) -> String {
    timestamp.format(SNAPSHOT_KEY_FORMAT).to_string()
}

/// Snapshot policy knobs
#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// Wall-clock distance between automatic snapshots
    pub interval: Duration,
    /// Edits between threshold snapshots
    pub edit_threshold: u32,
    /// Count-based retention bound
    pub max_snapshots: usize,
    /// Age-based retention bound
    pub max_age: Duration,
}

impl Default for BackupConfig {
    fn default() -> BackupConfig {
        BackupConfig {
            interval: Duration::seconds(3600),
            edit_threshold: 10,
            max_snapshots: 10,
            max_age: Duration::days(30),
        }
    }
}

/// One row of the backup history, newest first
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotInfo {
    /// When the snapshot was taken; also its row key
    pub timestamp: DateTime<Utc>,
    /// Database version the snapshot was taken at
    pub version: u64,
    /// What triggered the snapshot
    pub reason: SnapshotReason,
    /// Blob size in bytes
    pub size: usize,
}

/// Tracks the edit counter and drives snapshot creation, pruning and
/// history queries.
#[derive(Debug)]
pub struct BackupScheduler {
    config: BackupConfig,
    edit_count: u32,
}

impl BackupScheduler {
    /// A scheduler with the given policy
    pub fn new(config: BackupConfig) -> BackupScheduler {
        BackupScheduler {
            config,
            edit_count: 0,
        }
    }

    /// Current edit counter value
    pub fn edit_count(&self) -> u32 {
        self.edit_count
    }

    /// Record one successful edit-persist.
    ///
    /// Returns true when the threshold is reached; the counter resets and
    /// the caller is expected to take an `edit_threshold` snapshot.
    pub fn note_edit(&mut self) -> bool {
        self.edit_count += 1;
        if self.edit_count >= self.config.edit_threshold {
            self.edit_count = 0;
            true
        } else {
            false
        }
    }

    /// Write a snapshot row and prune by the retention policy.
    pub fn snapshot(
        &self,
        store: &mut SecondaryStore,
        blob: &[u8],
        version: u64,
        metadata: &DatabaseMetadata,
        reason: SnapshotReason,
        now: DateTime<Utc>,
    ) -> Result<SnapshotInfo, StoreError> {
        let record = SnapshotRecord {
            blob: blob.to_vec(),
            checksum: sha256_hex(blob),
            timestamp: now,
            version,
            metadata: metadata.clone(),
            reason,
            edit_count: self.edit_count,
            auto_snapshot: reason != SnapshotReason::Manual,
        };
        store.put(STORE_BACKUP_SNAPSHOTS, &snapshot_key(now), &record)?;
        info!("snapshot taken ({:?}, v{})", reason, version);
        self.prune(store, now)?;
        Ok(SnapshotInfo {
            timestamp: now,
            version,
            reason,
            size: blob.len(),
        })
    }

    /// Drop snapshots that fail both retention rules: outside the newest
    /// `max_snapshots` and older than `max_age`.
    pub fn prune(&self, store: &mut SecondaryStore, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut rows: Vec<(String, SnapshotRecord)> = store.list(STORE_BACKUP_SNAPSHOTS)?;
        // Ascending key order is chronological; newest last
        let total = rows.len();
        let cutoff = now - self.config.max_age;
        let keep_from = total.saturating_sub(self.config.max_snapshots);
        let mut dropped = 0usize;
        for (index, (key, record)) in rows.drain(..).enumerate() {
            let in_newest = index >= keep_from;
            let young_enough = record.timestamp > cutoff;
            if !in_newest && !young_enough {
                store.delete(STORE_BACKUP_SNAPSHOTS, &key)?;
                dropped += 1;
            }
        }
        if dropped > 0 {
            debug!("pruned {} snapshots", dropped);
        }
        Ok(())
    }

    /// Backup history, newest first, bounded by `limit`.
    pub fn history(
        &self,
        store: &SecondaryStore,
        limit: usize,
    ) -> Result<Vec<SnapshotInfo>, StoreError> {
        let rows: Vec<(String, SnapshotRecord)> = store.list(STORE_BACKUP_SNAPSHOTS)?;
        Ok(rows
            .into_iter()
            .rev()
            .take(limit)
            .map(|(_, record)| SnapshotInfo {
                timestamp: record.timestamp,
                version: record.version,
                reason: record.reason,
                size: record.blob.len(),
            })
            .collect())
    }

    /// Fetch the blob of the snapshot taken at `timestamp`.
    pub fn fetch(
        &self,
        store: &SecondaryStore,
        timestamp: DateTime<Utc>,
    ) -> Result<SnapshotRecord, StoreError> {
        store
            .get(STORE_BACKUP_SNAPSHOTS, &snapshot_key(timestamp))?
            .ok_or_else(|| StoreError::NotFound(format!("snapshot {}", timestamp)))
    }

    /// Timestamp of the newest snapshot of any kind.
    pub fn latest_snapshot_at(
        &self,
        store: &SecondaryStore,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let rows: Vec<(String, SnapshotRecord)> = store.list(STORE_BACKUP_SNAPSHOTS)?;
        Ok(rows.into_iter().map(|(_, r)| r.timestamp).max())
    }

    /// When the next wall-clock snapshot is due.
    ///
    /// Computed from the newest snapshot of any kind, so the tick is
    /// robust to host restarts; with no snapshots at all the first tick is
    /// one interval from `now`.
    pub fn next_hourly_due(
        &self,
        store: &SecondaryStore,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, StoreError> {
        let rows: Vec<(String, SnapshotRecord)> = store.list(STORE_BACKUP_SNAPSHOTS)?;
        let newest = rows.into_iter().map(|(_, r)| r.timestamp).max();
        Ok(match newest {
            Some(ts) => (ts + self.config.interval).max(now),
            None => now + self.config.interval,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{KeyValueStore, MemoryStore};

    fn secondary() -> SecondaryStore {
        SecondaryStore::new(Box::new(MemoryStore::new()) as Box<dyn KeyValueStore>)
    }

    fn metadata() -> DatabaseMetadata {
        DatabaseMetadata {
            name: "Test".into(),
            last_modified: Utc::now(),
            entry_count: 0,
        }
    }

    #[test]
    fn edit_counter_fires_at_threshold() {
        let mut scheduler = BackupScheduler::new(BackupConfig::default());
        for _ in 0..9 {
            assert!(!scheduler.note_edit());
        }
        assert!(scheduler.note_edit());
        assert_eq!(scheduler.edit_count(), 0);
    }

    #[test]
    fn history_is_newest_first_and_bounded() {
        let scheduler = BackupScheduler::new(BackupConfig::default());
        let mut store = secondary();
        let base = Utc::now();
        for i in 0..5i64 {
            scheduler
                .snapshot(
                    &mut store,
                    b"blob",
                    i as u64 + 1,
                    &metadata(),
                    SnapshotReason::Manual,
                    base + Duration::seconds(i),
                )
                .unwrap();
        }
        let history = scheduler.history(&store, 3).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].version, 5);
        assert_eq!(history[2].version, 3);
    }

    #[test]
    fn retention_keeps_newest_ten_or_young() {
        let config = BackupConfig {
            max_snapshots: 2,
            max_age: Duration::days(1),
            ..BackupConfig::default()
        };
        let scheduler = BackupScheduler::new(config);
        let mut store = secondary();
        let now = Utc::now();

        // Two old snapshots beyond the age bound, then three fresh ones
        for i in 0..2i64 {
            scheduler
                .snapshot(
                    &mut store,
                    b"old",
                    i as u64 + 1,
                    &metadata(),
                    SnapshotReason::Hourly,
                    now - Duration::days(10) + Duration::seconds(i),
                )
                .unwrap();
        }
        for i in 0..3i64 {
            scheduler
                .snapshot(
                    &mut store,
                    b"new",
                    i as u64 + 3,
                    &metadata(),
                    SnapshotReason::Hourly,
                    now + Duration::seconds(i),
                )
                .unwrap();
        }
        scheduler.prune(&mut store, now).unwrap();

        // The three young ones survive the age rule even though only two
        // fit the count rule; the stale pair is gone
        let history = scheduler.history(&store, 10).unwrap();
        assert_eq!(history.len(), 3);
        assert!(history.iter().all(|s| s.timestamp > now - Duration::days(1)));
    }

    #[test]
    fn hourly_due_recomputes_from_newest_snapshot() {
        let scheduler = BackupScheduler::new(BackupConfig::default());
        let mut store = secondary();
        let now = Utc::now();

        // No snapshots: one interval out
        let due = scheduler.next_hourly_due(&store, now).unwrap();
        assert_eq!(due, now + Duration::seconds(3600));

        // Recent snapshot: due an hour after it
        let taken = now - Duration::seconds(600);
        scheduler
            .snapshot(&mut store, b"blob", 1, &metadata(), SnapshotReason::Manual, taken)
            .unwrap();
        let due = scheduler.next_hourly_due(&store, now).unwrap();
        assert_eq!(due, taken + Duration::seconds(3600));

        // Stale snapshot: due immediately (clamped to now)
        let mut store = secondary();
        scheduler
            .snapshot(
                &mut store,
                b"blob",
                1,
                &metadata(),
                SnapshotReason::Manual,
                now - Duration::seconds(7200),
            )
            .unwrap();
        let due = scheduler.next_hourly_due(&store, now).unwrap();
        assert_eq!(due, now);
    }

    #[test]
    fn fetch_finds_by_timestamp() {
        let scheduler = BackupScheduler::new(BackupConfig::default());
        let mut store = secondary();
        let when = Utc::now();
        scheduler
            .snapshot(&mut store, b"blob", 7, &metadata(), SnapshotReason::Manual, when)
            .unwrap();

        let record = scheduler.fetch(&store, when).unwrap();
        assert_eq!(record.version, 7);
        assert!(matches!(
            scheduler.fetch(&store, when + Duration::seconds(1)),
            Err(StoreError::NotFound(_))
        ));
    }
}
