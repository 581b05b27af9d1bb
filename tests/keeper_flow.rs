//! End-to-end request flows through the dispatcher

use chrono::{Duration, TimeZone, Utc};
use serde_json::{json, Value};

use kdbx_keeper::codec::Codec;
use kdbx_keeper::crypto::{argon2_kdf, Argon2Request};
use kdbx_keeper::host::{AlarmKind, Clock, ManualClock, MemoryClipboard, RecordingAlarms};
use kdbx_keeper::messages::Request;
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

struct Harness {
    keeper: Keeper,
    clock: ManualClock,
    alarms: RecordingAlarms,
    clipboard: MemoryClipboard,
}

fn harness() -> Harness {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap());
    let alarms = RecordingAlarms::new();
    let clipboard = MemoryClipboard::new();
    let keeper = Keeper::builder()
        .codec(codec())
        .clock(Box::new(clock.clone()))
        .alarms(Box::new(alarms.clone()))
        .clipboard(Box::new(clipboard.clone()))
        .build();
    Harness {
        keeper,
        clock,
        alarms,
        clipboard,
    }
}

fn send(keeper: &mut Keeper, message: Value) -> Value {
    let request: Request = serde_json::from_value(message).expect("well-formed request");
    serde_json::to_value(keeper.dispatch(request)).expect("serializable envelope")
}

fn create_database(keeper: &mut Keeper, name: &str) {
    let reply = send(
        keeper,
        json!({"type": "CREATE_DATABASE", "payload": {"name": name, "password": MASTER_PASSWORD}}),
    );
    assert_eq!(reply["success"], true, "create failed: {}", reply);
}

fn create_entry(keeper: &mut Keeper, title: &str, url: &str) -> Value {
    let reply = send(
        keeper,
        json!({"type": "CREATE_ENTRY", "payload": {
            "title": title,
            "username": "u@x",
            "password": "p",
            "url": url,
            "tags": ["mail"]
        }}),
    );
    assert_eq!(reply["success"], true, "create entry failed: {}", reply);
    reply["data"].clone()
}

#[test]
fn create_then_read_state_and_export_name() {
    let mut h = harness();
    create_database(&mut h.keeper, "My Work Passwords");

    let state = send(&mut h.keeper, json!({"type": "GET_STATE"}));
    assert_eq!(state["success"], true);
    assert_eq!(state["data"]["status"], "unlocked");
    assert_eq!(state["data"]["meta"]["name"], "My Work Passwords");
    assert_eq!(state["data"]["meta"]["entryCount"], 0);

    let export = send(&mut h.keeper, json!({"type": "EXPORT_DATABASE"}));
    assert_eq!(export["success"], true);
    assert_eq!(
        export["data"]["fileName"],
        "My Work Passwords-2024-05-10.kdbx"
    );
    assert!(export["data"]["data"].as_str().unwrap().len() > 0);
}

#[test]
fn add_persist_lock_unlock_reads_back() {
    let mut h = harness();
    create_database(&mut h.keeper, "My Work Passwords");
    let created = create_entry(&mut h.keeper, "Gmail", "gmail.com");
    let id = created["id"].as_str().unwrap().to_string();

    let reply = send(&mut h.keeper, json!({"type": "LOCK"}));
    assert_eq!(reply["data"]["status"], "locked");

    let reply = send(
        &mut h.keeper,
        json!({"type": "UNLOCK", "payload": {"password": MASTER_PASSWORD}}),
    );
    assert_eq!(reply["success"], true);
    assert_eq!(reply["data"]["status"], "unlocked");

    let reply = send(
        &mut h.keeper,
        json!({"type": "GET_ENTRY", "payload": {"id": id}}),
    );
    assert_eq!(reply["success"], true);
    assert_eq!(reply["data"]["title"], "Gmail");
    assert_eq!(reply["data"]["username"], "u@x");
    assert_eq!(reply["data"]["password"], "p");
    assert_eq!(reply["data"]["url"], "gmail.com");
    assert_eq!(reply["data"]["tags"], json!(["mail"]));
}

#[test]
fn wrong_password_keeps_the_session_locked() {
    let mut h = harness();
    create_database(&mut h.keeper, "My Work Passwords");
    create_entry(&mut h.keeper, "Gmail", "gmail.com");
    send(&mut h.keeper, json!({"type": "LOCK"}));

    let reply = send(
        &mut h.keeper,
        json!({"type": "UNLOCK", "payload": {"password": "wrong"}}),
    );
    assert_eq!(reply["success"], false);
    assert_eq!(reply["error"], "Wrong password. Try again.");

    let state = send(&mut h.keeper, json!({"type": "GET_STATE"}));
    assert_eq!(state["data"]["status"], "locked");
}

#[test]
fn data_operations_require_unlock() {
    let mut h = harness();
    create_database(&mut h.keeper, "My Work Passwords");
    send(&mut h.keeper, json!({"type": "LOCK"}));

    // Locking clears the auto-unlock token, so the guard fires
    let reply = send(&mut h.keeper, json!({"type": "GET_ENTRIES"}));
    assert_eq!(reply["success"], false);
    assert_eq!(reply["error"], "NOT_UNLOCKED");
}

#[test]
fn host_lookup_matches_subdomains_not_strangers() {
    let mut h = harness();
    create_database(&mut h.keeper, "My Work Passwords");
    create_entry(&mut h.keeper, "Italki", "italki.com");

    let reply = send(
        &mut h.keeper,
        json!({"type": "GET_ENTRIES_FOR_URL", "payload": {"url": "https://www.italki.com/lesson/42"}}),
    );
    assert_eq!(reply["success"], true);
    let entries = reply["data"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["title"], "Italki");

    let reply = send(
        &mut h.keeper,
        json!({"type": "GET_ENTRIES_FOR_URL", "payload": {"url": "https://example.org"}}),
    );
    assert_eq!(reply["data"].as_array().unwrap().len(), 0);
}

#[test]
fn host_lookup_while_locked_returns_empty_not_error() {
    let mut h = harness();
    create_database(&mut h.keeper, "My Work Passwords");
    create_entry(&mut h.keeper, "Italki", "italki.com");
    send(&mut h.keeper, json!({"type": "LOCK"}));

    let reply = send(
        &mut h.keeper,
        json!({"type": "GET_ENTRIES_FOR_URL", "payload": {"url": "https://italki.com"}}),
    );
    assert_eq!(reply["success"], true);
    assert_eq!(reply["data"].as_array().unwrap().len(), 0);
}

#[test]
fn fill_in_tab_resolves_credentials() {
    let mut h = harness();
    create_database(&mut h.keeper, "My Work Passwords");
    create_entry(&mut h.keeper, "Gmail", "gmail.com");

    let reply = send(
        &mut h.keeper,
        json!({"type": "FILL_IN_TAB", "payload": {"url": "https://gmail.com/inbox"}}),
    );
    assert_eq!(reply["success"], true);
    assert_eq!(reply["data"]["username"], "u@x");
    assert_eq!(reply["data"]["password"], "p");

    let reply = send(
        &mut h.keeper,
        json!({"type": "FILL_IN_TAB", "payload": {"url": "https://nomatch.net"}}),
    );
    assert_eq!(reply["success"], true);
    assert!(reply["data"].is_null());
}

#[test]
fn edit_threshold_snapshot_then_restore_revives_deleted_entry() {
    let mut h = harness();
    create_database(&mut h.keeper, "My Work Passwords");

    let mut last_id = String::new();
    for i in 0..10 {
        h.clock.advance(Duration::seconds(1));
        let created = create_entry(&mut h.keeper, &format!("Entry {}", i), "example.com");
        last_id = created["id"].as_str().unwrap().to_string();
    }

    let reply = send(&mut h.keeper, json!({"type": "GET_BACKUP_HISTORY"}));
    assert_eq!(reply["success"], true);
    let history = reply["data"].as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["reason"], "edit_threshold");
    let timestamp = history[0]["timestamp"].as_str().unwrap().to_string();

    let reply = send(
        &mut h.keeper,
        json!({"type": "DELETE_ENTRY", "payload": {"id": last_id}}),
    );
    assert_eq!(reply["data"]["deleted"], true);
    let reply = send(
        &mut h.keeper,
        json!({"type": "GET_ENTRIES", "payload": {"search": "Entry 9"}}),
    );
    assert_eq!(reply["data"].as_array().unwrap().len(), 0);

    let reply = send(
        &mut h.keeper,
        json!({"type": "RESTORE_FROM_BACKUP", "payload": {
            "timestamp": timestamp,
            "password": MASTER_PASSWORD
        }}),
    );
    assert_eq!(reply["success"], true, "restore failed: {}", reply);

    let reply = send(
        &mut h.keeper,
        json!({"type": "GET_ENTRIES", "payload": {"search": "Entry 9"}}),
    );
    assert_eq!(reply["data"].as_array().unwrap().len(), 1);
}

#[test]
fn auto_lock_fires_and_clears_the_session() {
    let mut h = harness();
    create_database(&mut h.keeper, "My Work Passwords");
    create_entry(&mut h.keeper, "Gmail", "gmail.com");

    let deadline = h.alarms.deadline(AlarmKind::AutoLock).unwrap();
    assert_eq!(deadline - h.clock.now(), Duration::minutes(15));

    h.clock.set(deadline);
    h.keeper.handle_alarm(AlarmKind::AutoLock);

    let state = send(&mut h.keeper, json!({"type": "GET_STATE"}));
    assert_eq!(state["data"]["status"], "locked");

    // The token was cleared with the vault, so data ops hit the guard
    let reply = send(&mut h.keeper, json!({"type": "GET_ENTRIES"}));
    assert_eq!(reply["error"], "NOT_UNLOCKED");
}

#[test]
fn data_operations_rearm_the_auto_lock_timer() {
    let mut h = harness();
    create_database(&mut h.keeper, "My Work Passwords");

    h.clock.advance(Duration::minutes(10));
    send(&mut h.keeper, json!({"type": "GET_ENTRIES"}));
    let deadline = h.alarms.deadline(AlarmKind::AutoLock).unwrap();
    assert_eq!(deadline, h.clock.now() + Duration::minutes(15));
}

#[test]
fn clipboard_copy_arms_timed_clear() {
    let mut h = harness();
    create_database(&mut h.keeper, "My Work Passwords");
    let created = create_entry(&mut h.keeper, "Gmail", "gmail.com");
    let id = created["id"].as_str().unwrap();

    let reply = send(
        &mut h.keeper,
        json!({"type": "COPY_TO_CLIPBOARD", "payload": {"entryId": id}}),
    );
    assert_eq!(reply["success"], true);
    assert_eq!(h.clipboard.contents(), "p");

    let deadline = h.alarms.deadline(AlarmKind::ClipboardClear).unwrap();
    assert_eq!(deadline - h.clock.now(), Duration::seconds(15));

    h.clock.set(deadline);
    h.keeper.handle_alarm(AlarmKind::ClipboardClear);
    assert_eq!(h.clipboard.contents(), "");
}

#[test]
fn hourly_snapshot_fires_from_the_alarm_tick() {
    let mut h = harness();
    create_database(&mut h.keeper, "My Work Passwords");
    create_entry(&mut h.keeper, "Gmail", "gmail.com");

    h.clock.advance(Duration::seconds(3601));
    h.keeper.handle_alarm(AlarmKind::HourlySnapshot);

    let reply = send(&mut h.keeper, json!({"type": "GET_BACKUP_HISTORY"}));
    let history = reply["data"].as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["reason"], "hourly");

    // The tick re-arms itself an hour past the new snapshot
    let deadline = h.alarms.deadline(AlarmKind::HourlySnapshot).unwrap();
    assert_eq!(deadline, h.clock.now() + Duration::seconds(3600));
}

#[test]
fn generate_password_respects_config_and_reports_strength() {
    let mut h = harness();
    let reply = send(
        &mut h.keeper,
        json!({"type": "GENERATE_PASSWORD", "payload": {
            "length": 24,
            "includeUpper": true,
            "includeLower": true,
            "includeDigits": true,
            "includeSpecial": false,
            "excludeAmbiguous": true
        }}),
    );
    assert_eq!(reply["success"], true);
    let password = reply["data"]["password"].as_str().unwrap();
    assert_eq!(password.chars().count(), 24);
    assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
    assert!(password.chars().all(|c| !"O0l1I".contains(c)));
    assert!(reply["data"]["strength"].as_u64().unwrap() >= 3);

    let reply = send(
        &mut h.keeper,
        json!({"type": "GENERATE_PASSWORD", "payload": {"length": 70}}),
    );
    assert_eq!(reply["success"], false);
}

#[test]
fn storage_health_and_recovery_status_are_reported() {
    let mut h = harness();
    create_database(&mut h.keeper, "My Work Passwords");
    create_entry(&mut h.keeper, "Gmail", "gmail.com");

    let reply = send(&mut h.keeper, json!({"type": "GET_STORAGE_HEALTH"}));
    assert_eq!(reply["success"], true);
    assert_eq!(reply["data"]["integrity"], "healthy");
    assert_eq!(reply["data"]["latestVersion"], 2);
    assert_eq!(reply["data"]["versionCount"], 2);

    let reply = send(&mut h.keeper, json!({"type": "GET_RECOVERY_STATUS"}));
    assert_eq!(reply["success"], true);
    assert_eq!(reply["data"]["summary"]["incomplete"], 0);
    assert_eq!(reply["data"]["integrity"], "healthy");
}

#[test]
fn delete_database_returns_to_no_database() {
    let mut h = harness();
    create_database(&mut h.keeper, "My Work Passwords");
    create_entry(&mut h.keeper, "Gmail", "gmail.com");

    let reply = send(&mut h.keeper, json!({"type": "DELETE_DATABASE"}));
    assert_eq!(reply["success"], true);
    assert_eq!(reply["data"]["status"], "no_database");

    let reply = send(&mut h.keeper, json!({"type": "GET_ENTRIES"}));
    assert_eq!(reply["success"], false);
    assert_eq!(reply["error"], "No database found");
}

#[test]
fn version_retention_holds_at_five() {
    let mut h = harness();
    create_database(&mut h.keeper, "My Work Passwords");
    for i in 0..8 {
        create_entry(&mut h.keeper, &format!("Entry {}", i), "example.com");
    }

    let reply = send(&mut h.keeper, json!({"type": "GET_STORAGE_HEALTH"}));
    assert_eq!(reply["data"]["versionCount"], 5);
    assert_eq!(reply["data"]["latestVersion"], 9);
}

#[test]
fn update_entry_pushes_history_and_survives_relock() {
    let mut h = harness();
    create_database(&mut h.keeper, "My Work Passwords");
    let created = create_entry(&mut h.keeper, "Gmail", "gmail.com");
    let id = created["id"].as_str().unwrap().to_string();

    h.clock.advance(Duration::seconds(30));
    let reply = send(
        &mut h.keeper,
        json!({"type": "UPDATE_ENTRY", "payload": {"id": id, "title": "Gmail Work"}}),
    );
    assert_eq!(reply["success"], true);
    assert_eq!(reply["data"]["title"], "Gmail Work");
    assert_eq!(reply["data"]["username"], "u@x");

    send(&mut h.keeper, json!({"type": "LOCK"}));
    send(
        &mut h.keeper,
        json!({"type": "UNLOCK", "payload": {"password": MASTER_PASSWORD}}),
    );
    let reply = send(
        &mut h.keeper,
        json!({"type": "GET_ENTRY", "payload": {"id": id}}),
    );
    assert_eq!(reply["data"]["title"], "Gmail Work");
}
