//! Durability, fallback and crash-recovery flows
//!
//! A keeper "restart" is modeled by building a fresh keeper over the same
//! shared store backends and token store, exactly as a host process
//! restart leaves the persisted state behind.

use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};
use serde_json::{json, Value};

use kdbx_keeper::codec::Codec;
use kdbx_keeper::crypto::{argon2_kdf, Argon2Request};
use kdbx_keeper::host::{Clock, ManualClock, MemoryClipboard, MemoryTokenStore, RecordingAlarms};
use kdbx_keeper::journal;
use kdbx_keeper::messages::Request;
use kdbx_keeper::store::{
    JournalRecord, KeyValueStore, MemoryStore, OperationStatus, SecondaryStore, StoreError,
};
use kdbx_keeper::Keeper;

const MASTER_PASSWORD: &str = "s3cret-pass";

fn codec() -> Codec {
    Codec::with_kdf(Box::new(|request| {
        argon2_kdf(&Argon2Request {
            secret: request.secret,
            salt: request.salt,
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
            hash_length: request.hash_length,
            variant: request.variant,
            version: request.version,
        })
    }))
}

/// Store backend shared between keeper "processes"
#[derive(Clone, Default)]
struct SharedKv {
    inner: Arc<Mutex<MemoryStore>>,
}

impl SharedKv {
    fn new() -> SharedKv {
        SharedKv::default()
    }

    fn fail_writes(&self, fail: bool) {
        self.inner.lock().unwrap().set_fail_writes(fail);
    }
}

impl KeyValueStore for SharedKv {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.lock().unwrap().get(key)
    }

    fn put(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.inner.lock().unwrap().put(key, value)
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        self.inner.lock().unwrap().remove(key)
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.inner.lock().unwrap().keys_with_prefix(prefix)
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        self.inner.lock().unwrap().clear()
    }

    fn bytes_in_use(&self) -> u64 {
        self.inner.lock().unwrap().bytes_in_use()
    }
}

struct Host {
    primary: SharedKv,
    secondary: SharedKv,
    tokens: MemoryTokenStore,
    clock: ManualClock,
}

impl Host {
    fn new() -> Host {
        Host {
            primary: SharedKv::new(),
            secondary: SharedKv::new(),
            tokens: MemoryTokenStore::new(),
            clock: ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap()),
        }
    }

    /// A keeper over this host's persistent state, as after a restart
    fn start_keeper(&self) -> Keeper {
        Keeper::builder()
            .codec(codec())
            .primary_store(Box::new(self.primary.clone()))
            .secondary_store(Box::new(self.secondary.clone()))
            .token_store(Box::new(self.tokens.clone()))
            .clock(Box::new(self.clock.clone()))
            .alarms(Box::new(RecordingAlarms::new()))
            .clipboard(Box::new(MemoryClipboard::new()))
            .build()
    }

    fn journal_rows(&self) -> Vec<(String, JournalRecord)> {
        let store = SecondaryStore::new(Box::new(self.secondary.clone()));
        store.list("state_journal").unwrap()
    }

    fn incomplete_count(&self) -> usize {
        let store = SecondaryStore::new(Box::new(self.secondary.clone()));
        store.keys("incomplete_operations").unwrap().len()
    }
}

fn send(keeper: &mut Keeper, message: Value) -> Value {
    let request: Request = serde_json::from_value(message).expect("well-formed request");
    serde_json::to_value(keeper.dispatch(request)).expect("serializable envelope")
}

fn create_database(keeper: &mut Keeper) {
    let reply = send(
        keeper,
        json!({"type": "CREATE_DATABASE", "payload": {"name": "Durable", "password": MASTER_PASSWORD}}),
    );
    assert_eq!(reply["success"], true, "create failed: {}", reply);
}

fn create_entry(keeper: &mut Keeper, title: &str) -> Value {
    let reply = send(
        keeper,
        json!({"type": "CREATE_ENTRY", "payload": {
            "title": title, "username": "u", "password": "p", "url": "example.com"
        }}),
    );
    reply
}

#[test]
fn token_survives_restart_and_unlocks_transparently() {
    let host = Host::new();
    {
        let mut keeper = host.start_keeper();
        create_database(&mut keeper);
        assert_eq!(create_entry(&mut keeper, "Gmail")["success"], true);
    }

    // New process, same persisted state and volatile token store
    let mut keeper = host.start_keeper();
    let reply = send(&mut keeper, json!({"type": "GET_ENTRIES"}));
    assert_eq!(reply["success"], true, "auto-unlock failed: {}", reply);
    assert_eq!(reply["data"].as_array().unwrap().len(), 1);
}

#[test]
fn expired_token_leaves_the_session_locked() {
    let host = Host::new();
    {
        let mut keeper = host.start_keeper();
        create_database(&mut keeper);
    }

    // Past the one hour token TTL
    host.clock.advance(chrono::Duration::seconds(3700));
    let mut keeper = host.start_keeper();
    let reply = send(&mut keeper, json!({"type": "GET_ENTRIES"}));
    assert_eq!(reply["success"], false);
    assert_eq!(reply["error"], "NOT_UNLOCKED");
    let state = send(&mut keeper, json!({"type": "GET_STATE"}));
    assert_eq!(state["data"]["status"], "locked");
}

#[test]
fn primary_loss_falls_back_to_secondary() {
    let host = Host::new();
    {
        let mut keeper = host.start_keeper();
        create_database(&mut keeper);
        assert_eq!(create_entry(&mut keeper, "Gmail")["success"], true);
    }

    // Wipe the primary copy; the secondary current row must satisfy loads
    host.primary.inner.lock().unwrap().clear().unwrap();

    let mut keeper = host.start_keeper();
    let reply = send(&mut keeper, json!({"type": "GET_ENTRIES"}));
    assert_eq!(reply["success"], true, "fallback failed: {}", reply);
    assert_eq!(reply["data"].as_array().unwrap().len(), 1);
}

#[test]
fn journal_closes_every_successful_mutation() {
    let host = Host::new();
    let mut keeper = host.start_keeper();
    create_database(&mut keeper);
    for i in 0..3 {
        assert_eq!(create_entry(&mut keeper, &format!("Entry {}", i))["success"], true);
    }

    assert_eq!(host.incomplete_count(), 0);
    let rows = host.journal_rows();
    // CREATE_DATABASE plus three entry creations
    assert_eq!(rows.len(), 4);
    assert!(rows
        .iter()
        .all(|(_, r)| r.status == OperationStatus::Completed));
    assert!(rows.iter().all(|(_, r)| r.result_checksum.is_some()));
}

#[test]
fn failed_primary_write_rolls_back_the_mutation() {
    let host = Host::new();
    let mut keeper = host.start_keeper();
    create_database(&mut keeper);
    assert_eq!(create_entry(&mut keeper, "Kept")["success"], true);

    // Fail the write path between the secondary and primary stores
    host.primary.fail_writes(true);
    let reply = create_entry(&mut keeper, "Lost");
    assert_eq!(reply["success"], false);
    host.primary.fail_writes(false);

    // The in-memory vault was reverted
    let reply = send(&mut keeper, json!({"type": "GET_ENTRIES"}));
    let titles: Vec<&str> = reply["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["title"].as_str().unwrap())
        .collect();
    assert_eq!(titles, vec!["Kept"]);

    // The journal shows the operation rolled back, nothing dangling
    assert_eq!(host.incomplete_count(), 0);
    let rows = host.journal_rows();
    let rolled: Vec<_> = rows
        .iter()
        .filter(|(_, r)| r.status == OperationStatus::RolledBack)
        .collect();
    assert_eq!(rolled.len(), 1);
    assert_eq!(rolled[0].1.op_type, "CREATE_ENTRY");

    // After a restart the half-written entry is still absent
    let mut keeper = host.start_keeper();
    let reply = send(&mut keeper, json!({"type": "GET_ENTRIES"}));
    let titles: Vec<&str> = reply["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["title"].as_str().unwrap())
        .collect();
    assert_eq!(titles, vec!["Kept"]);
}

#[test]
fn startup_promotes_landed_writes_and_abandons_dead_ones() {
    let host = Host::new();
    let mut keeper = host.start_keeper();
    create_database(&mut keeper);
    assert_eq!(create_entry(&mut keeper, "Gmail")["success"], true);
    drop(keeper);

    // Forge the unclean-shutdown shape: two started records, one whose
    // write landed (checksum matches the current blob) and one whose
    // write never happened
    let current_checksum = {
        let store = SecondaryStore::new(Box::new(host.secondary.clone()));
        store
            .get::<kdbx_keeper::store::CurrentDatabaseRecord>("databases", "db:current")
            .unwrap()
            .unwrap()
            .checksum
    };
    {
        let mut store = SecondaryStore::new(Box::new(host.secondary.clone()));
        let now = host.clock.now();
        let landed = journal::begin(
            &mut store,
            now,
            "UPDATE_ENTRY",
            serde_json::Value::Null,
            None,
        )
        .unwrap();
        let mut record: JournalRecord = store.get("state_journal", &landed).unwrap().unwrap();
        record.result_checksum = Some(current_checksum);
        store.put("state_journal", &landed, &record).unwrap();
        store.put("incomplete_operations", &landed, &record).unwrap();

        journal::begin(
            &mut store,
            now,
            "DELETE_ENTRY",
            serde_json::Value::Null,
            None,
        )
        .unwrap();
    }
    assert_eq!(host.incomplete_count(), 2);

    // First restart: the landed write is promoted, the dead one retained
    let mut keeper = host.start_keeper();
    send(&mut keeper, json!({"type": "GET_STATE"}));
    assert_eq!(host.incomplete_count(), 1);
    drop(keeper);

    // Three more restarts exhaust the dead record's attempts
    for _ in 0..3 {
        let mut keeper = host.start_keeper();
        send(&mut keeper, json!({"type": "GET_STATE"}));
    }
    assert_eq!(host.incomplete_count(), 0);

    let rows = host.journal_rows();
    let landed_row = rows
        .iter()
        .find(|(_, r)| r.op_type == "UPDATE_ENTRY")
        .unwrap();
    assert_eq!(landed_row.1.status, OperationStatus::Completed);
    let dead_row = rows
        .iter()
        .find(|(_, r)| r.op_type == "DELETE_ENTRY")
        .unwrap();
    assert_eq!(dead_row.1.status, OperationStatus::RolledBack);
    assert_eq!(dead_row.1.error.as_deref(), Some("exceeded_retries"));
}

#[test]
fn delete_database_wipes_all_persistent_state() {
    let host = Host::new();
    let mut keeper = host.start_keeper();
    create_database(&mut keeper);
    create_entry(&mut keeper, "Gmail");

    let reply = send(&mut keeper, json!({"type": "DELETE_DATABASE"}));
    assert_eq!(reply["success"], true);

    assert_eq!(host.primary.inner.lock().unwrap().bytes_in_use(), 0);
    assert_eq!(host.secondary.inner.lock().unwrap().bytes_in_use(), 0);

    // A restarted keeper sees a blank slate
    let mut keeper = host.start_keeper();
    let state = send(&mut keeper, json!({"type": "GET_STATE"}));
    assert_eq!(state["data"]["status"], "no_database");
}
