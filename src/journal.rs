//! Atomic-operation journal and crash recovery
//!
//! Every mutation the dispatcher runs is bracketed by [`begin`] and one of
//! [`complete`] / [`rollback`]. Records live in the secondary store's
//! `state_journal`; unterminated records are mirrored into
//! `incomplete_operations` so a restart can enumerate exactly the
//! operations that never terminated and resolve them with [`recover`].

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use uuid::Uuid;

use crate::store::{
    JournalRecord, OperationStatus, SecondaryStore, StoreError, STORE_INCOMPLETE_OPERATIONS,
    STORE_STATE_JOURNAL,
};

/// Maximum retained journal records
pub const JOURNAL_CAP: usize = 500;
/// Recovery attempts before an unterminated operation is abandoned
pub const MAX_RECOVERY_ATTEMPTS: u32 = 3;

const EXCEEDED_RETRIES: &str = "exceeded_retries";

/// Summary of one startup recovery pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoverySummary {
    /// Unterminated operations found
    pub incomplete: usize,
    /// Operations kept for another recovery attempt
    pub failed: usize,
    /// Operations promoted to completed because their write landed
    pub recovered: usize,
    /// Operations rolled back
    pub rolled_back: usize,
}

/// Open a journal record for a mutation and mirror it as incomplete.
///
/// Returns the operation id, `op:<ms-timestamp>:<uuid-v4>`. The payload
/// must already be sanitised - identifiers and titles, never secrets.
pub fn begin(
    store: &mut SecondaryStore,
    now: DateTime<Utc>,
    op_type: &str,
    payload: serde_json::Value,
    database_checksum: Option<String>,
) -> Result<String, StoreError> {
    let op_id = format!("op:{}:{}", now.timestamp_millis(), Uuid::new_v4());
    let record = JournalRecord {
        id: op_id.clone(),
        op_type: op_type.to_string(),
        payload,
        status: OperationStatus::Started,
        started_at: now,
        completed_at: None,
        database_checksum: database_checksum.unwrap_or_else(|| "unknown".to_string()),
        result_checksum: None,
        attempts: 0,
        error: None,
    };
    store.put(STORE_STATE_JOURNAL, &op_id, &record)?;
    store.put(STORE_INCOMPLETE_OPERATIONS, &op_id, &record)?;
    debug!("journal begin {} ({})", op_id, op_type);
    Ok(op_id)
}

/// Terminate an operation successfully, recording the checksum its write
/// produced.
pub fn complete(
    store: &mut SecondaryStore,
    now: DateTime<Utc>,
    op_id: &str,
    result_checksum: &str,
) -> Result<(), StoreError> {
    let mut record: JournalRecord = store
        .get(STORE_STATE_JOURNAL, op_id)?
        .ok_or_else(|| StoreError::NotFound(format!("journal record {}", op_id)))?;
    record.status = OperationStatus::Completed;
    record.completed_at = Some(now);
    record.result_checksum = Some(result_checksum.to_string());
    store.put(STORE_STATE_JOURNAL, op_id, &record)?;
    store.delete(STORE_INCOMPLETE_OPERATIONS, op_id)?;
    debug!("journal complete {}", op_id);
    Ok(())
}

/// Terminate an operation by rollback, recording the failure cause.
pub fn rollback(
    store: &mut SecondaryStore,
    now: DateTime<Utc>,
    op_id: &str,
    error: &str,
) -> Result<(), StoreError> {
    let mut record: JournalRecord = store
        .get(STORE_STATE_JOURNAL, op_id)?
        .ok_or_else(|| StoreError::NotFound(format!("journal record {}", op_id)))?;
    record.status = OperationStatus::RolledBack;
    record.completed_at = Some(now);
    record.error = Some(error.to_string());
    store.put(STORE_STATE_JOURNAL, op_id, &record)?;
    store.delete(STORE_INCOMPLETE_OPERATIONS, op_id)?;
    warn!("journal rollback {}: {}", op_id, error);
    Ok(())
}

/// Resolve operations left unterminated by an unclean shutdown.
///
/// A record whose `result_checksum` matches the current on-disk checksum
/// had its write land and is promoted to completed. Records under the
/// attempt limit are retained for the next pass; the rest are rolled back
/// with cause `exceeded_retries`.
pub fn recover(
    store: &mut SecondaryStore,
    now: DateTime<Utc>,
    current_checksum: Option<&str>,
) -> Result<RecoverySummary, StoreError> {
    let mut summary = RecoverySummary::default();
    let pending: Vec<(String, JournalRecord)> = store.list(STORE_INCOMPLETE_OPERATIONS)?;
    summary.incomplete = pending.len();

    for (op_id, mut record) in pending {
        let landed = match (record.result_checksum.as_deref(), current_checksum) {
            (Some(expected), Some(actual)) if !expected.is_empty() => expected == actual,
            _ => false,
        };
        if landed {
            record.status = OperationStatus::Completed;
            record.completed_at = Some(now);
            store.put(STORE_STATE_JOURNAL, &op_id, &record)?;
            store.delete(STORE_INCOMPLETE_OPERATIONS, &op_id)?;
            summary.recovered += 1;
            info!("recovered landed operation {}", op_id);
        } else if record.attempts < MAX_RECOVERY_ATTEMPTS {
            record.attempts += 1;
            store.put(STORE_STATE_JOURNAL, &op_id, &record)?;
            store.put(STORE_INCOMPLETE_OPERATIONS, &op_id, &record)?;
            summary.failed += 1;
        } else {
            record.status = OperationStatus::RolledBack;
            record.completed_at = Some(now);
            record.error = Some(EXCEEDED_RETRIES.to_string());
            store.put(STORE_STATE_JOURNAL, &op_id, &record)?;
            store.delete(STORE_INCOMPLETE_OPERATIONS, &op_id)?;
            summary.rolled_back += 1;
            warn!("abandoned operation {} after retries", op_id);
        }
    }

    if summary.incomplete > 0 {
        info!(
            "journal recovery: {} incomplete, {} recovered, {} retained, {} rolled back",
            summary.incomplete, summary.recovered, summary.failed, summary.rolled_back
        );
    }
    Ok(summary)
}

/// Cap the journal at `cap` records, dropping the oldest first.
pub fn prune(store: &mut SecondaryStore, cap: usize) -> Result<(), StoreError> {
    let mut rows: Vec<(String, JournalRecord)> = store.list(STORE_STATE_JOURNAL)?;
    if rows.len() <= cap {
        return Ok(());
    }
    rows.sort_by_key(|(_, record)| record.started_at);
    let excess = rows.len() - cap;
    for (op_id, _) in rows.into_iter().take(excess) {
        store.delete(STORE_STATE_JOURNAL, &op_id)?;
    }
    debug!("pruned {} journal records", excess);
    Ok(())
}

/// Empty the journal and the incomplete-operation mirror.
pub fn clear(store: &mut SecondaryStore) -> Result<(), StoreError> {
    store.clear_store(STORE_STATE_JOURNAL)?;
    store.clear_store(STORE_INCOMPLETE_OPERATIONS)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{KeyValueStore, MemoryStore};

    fn secondary() -> SecondaryStore {
        SecondaryStore::new(Box::new(MemoryStore::new()) as Box<dyn KeyValueStore>)
    }

    fn count(store: &SecondaryStore, name: &str) -> usize {
        store.keys(name).unwrap().len()
    }

    #[test]
    fn begin_then_complete_closes_the_record() {
        let mut store = secondary();
        let op_id = begin(
            &mut store,
            Utc::now(),
            "CREATE_ENTRY",
            serde_json::json!({"title": "Gmail"}),
            Some("aabb".into()),
        )
        .unwrap();
        assert_eq!(count(&store, STORE_INCOMPLETE_OPERATIONS), 1);

        complete(&mut store, Utc::now(), &op_id, "ccdd").unwrap();
        assert_eq!(count(&store, STORE_INCOMPLETE_OPERATIONS), 0);

        let record: JournalRecord = store.get(STORE_STATE_JOURNAL, &op_id).unwrap().unwrap();
        assert_eq!(record.status, OperationStatus::Completed);
        assert_eq!(record.result_checksum.as_deref(), Some("ccdd"));
        assert!(record.completed_at.is_some());
    }

    #[test]
    fn rollback_records_the_error() {
        let mut store = secondary();
        let op_id = begin(
            &mut store,
            Utc::now(),
            "UPDATE_ENTRY",
            serde_json::Value::Null,
            None,
        )
        .unwrap();
        rollback(&mut store, Utc::now(), &op_id, "primary store offline").unwrap();

        let record: JournalRecord = store.get(STORE_STATE_JOURNAL, &op_id).unwrap().unwrap();
        assert_eq!(record.status, OperationStatus::RolledBack);
        assert_eq!(record.error.as_deref(), Some("primary store offline"));
        assert_eq!(count(&store, STORE_INCOMPLETE_OPERATIONS), 0);
    }

    #[test]
    fn recovery_promotes_landed_writes() {
        let mut store = secondary();
        let op_id = begin(
            &mut store,
            Utc::now(),
            "CREATE_ENTRY",
            serde_json::Value::Null,
            None,
        )
        .unwrap();
        // Simulate the write landing before the crash
        let mut record: JournalRecord = store.get(STORE_STATE_JOURNAL, &op_id).unwrap().unwrap();
        record.result_checksum = Some("landed".into());
        store.put(STORE_STATE_JOURNAL, &op_id, &record).unwrap();
        store
            .put(STORE_INCOMPLETE_OPERATIONS, &op_id, &record)
            .unwrap();

        let summary = recover(&mut store, Utc::now(), Some("landed")).unwrap();
        assert_eq!(summary.incomplete, 1);
        assert_eq!(summary.recovered, 1);
        assert_eq!(summary.rolled_back, 0);

        let record: JournalRecord = store.get(STORE_STATE_JOURNAL, &op_id).unwrap().unwrap();
        assert_eq!(record.status, OperationStatus::Completed);
    }

    #[test]
    fn recovery_rolls_back_after_exhausted_attempts() {
        let mut store = secondary();
        begin(
            &mut store,
            Utc::now(),
            "DELETE_ENTRY",
            serde_json::Value::Null,
            Some("before".into()),
        )
        .unwrap();

        // Three passes keep the record, the fourth abandons it
        for _ in 0..3 {
            let pass = recover(&mut store, Utc::now(), Some("after")).unwrap();
            assert_eq!(pass.failed, 1);
        }
        let last = recover(&mut store, Utc::now(), Some("after")).unwrap();
        assert_eq!(last.rolled_back, 1);

        assert_eq!(count(&store, STORE_INCOMPLETE_OPERATIONS), 0);
        let rows: Vec<(String, JournalRecord)> = store.list(STORE_STATE_JOURNAL).unwrap();
        assert_eq!(rows[0].1.error.as_deref(), Some("exceeded_retries"));
    }

    #[test]
    fn prune_caps_at_limit_dropping_oldest() {
        let mut store = secondary();
        let base = Utc::now();
        for i in 0..10 {
            begin(
                &mut store,
                base + chrono::Duration::milliseconds(i),
                "CREATE_ENTRY",
                serde_json::Value::Null,
                None,
            )
            .unwrap();
        }
        prune(&mut store, 4).unwrap();
        let rows: Vec<(String, JournalRecord)> = store.list(STORE_STATE_JOURNAL).unwrap();
        assert_eq!(rows.len(), 4);
        let oldest = rows.iter().map(|(_, r)| r.started_at).min().unwrap();
        assert!(oldest >= base + chrono::Duration::milliseconds(6));
    }

    #[test]
    fn clear_empties_both_stores() {
        let mut store = secondary();
        begin(
            &mut store,
            Utc::now(),
            "CREATE_ENTRY",
            serde_json::Value::Null,
            None,
        )
        .unwrap();
        clear(&mut store).unwrap();
        assert_eq!(count(&store, STORE_STATE_JOURNAL), 0);
        assert_eq!(count(&store, STORE_INCOMPLETE_OPERATIONS), 0);
    }
}
