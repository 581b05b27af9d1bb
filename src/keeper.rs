//! The persistent keeper: session state machine and request dispatcher
//!
//! A [`Keeper`] owns the decrypted vault (when unlocked), the dual store,
//! the operation journal and the backup scheduler, and exposes exactly one
//! ingress: [`Keeper::dispatch`]. Handlers run to completion one at a
//! time on the caller's task; mutations are serialized by the exclusive
//! borrow the dispatcher takes.
//!
//! ## Session states
//!
//! ```text
//!             create / import                unlock
//!    NoDatabase ─────────────▶ Unlocked ◀───────── Locked
//!         ▲                        │ │                │
//!         │       delete           │ │ lock / timeout │
//!         └────────────────────────┘ └────────────────┘
//! ```
//!
//! Every mutation is bracketed by a journal record and acknowledged only
//! after the dual store has verified the write by checksum read-back.

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::json;

use crate::backup::{BackupConfig, BackupScheduler, SnapshotInfo};
use crate::binary::{Kdbx, Unlocked};
use crate::codec::Codec;
use crate::database::{EntryDraft, EntryFilter, EntryPatch, Vault};
use crate::errors::KeeperError;
use crate::generator;
use crate::host::{
    AlarmHost, AlarmKind, Clipboard, Clock, MemoryTokenStore, NoAlarms, SystemClipboard,
    SystemClock, TokenStore, UnlockToken,
};
use crate::journal::{self, RecoverySummary};
use crate::messages::{
    CopyField, CopyPayload, CreateDatabasePayload, Envelope, EntryIdPayload, ExportFile,
    FillCredentials, GeneratedPassword, HistoryLimitPayload, ImportDatabasePayload,
    RecoveryStatus, Request, ResponseData, RestorePayload, SessionStatus, StateView,
    UnlockPayload, UrlPayload,
};
use crate::protected::ProtectedValue;
use crate::store::{
    DatabaseMetadata, DualStore, KeyValueStore, MemoryStore, PersistOutcome, PersistReason,
    RecoveryCodeRecord, SnapshotReason, KEY_CURRENT_RECOVERY, STORE_RECOVERY_CODES,
};
use crate::utils::sha256_hex;

/// Keeper policy knobs with their documented defaults
#[derive(Debug, Clone)]
pub struct KeeperConfig {
    /// Idle time before the session auto-locks
    pub auto_lock: Duration,
    /// Time before a copied secret is cleared from the clipboard
    pub clipboard_clear: Duration,
    /// Wall-clock distance between automatic snapshots
    pub snapshot_interval: Duration,
    /// Edits between threshold snapshots
    pub edit_threshold: u32,
    /// Retained version history depth
    pub max_versions: usize,
    /// Count-based snapshot retention bound
    pub max_snapshots: usize,
    /// Age-based snapshot retention bound
    pub snapshot_max_age: Duration,
    /// Retained journal records
    pub journal_cap: usize,
    /// Auto-unlock token lifetime
    pub token_ttl: Duration,
}

impl Default for KeeperConfig {
    fn default() -> KeeperConfig {
        KeeperConfig {
            auto_lock: Duration::minutes(15),
            clipboard_clear: Duration::seconds(15),
            snapshot_interval: Duration::seconds(3600),
            edit_threshold: 10,
            max_versions: 5,
            max_snapshots: 10,
            snapshot_max_age: Duration::days(30),
            journal_cap: 500,
            token_ttl: Duration::seconds(3600),
        }
    }
}

/// Result of the one-time storage initialization
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitReport {
    /// Outcome of the journal recovery pass
    pub recovery: RecoverySummary,
    /// Session status after initialization
    pub status: SessionStatus,
}

enum Session {
    NoDatabase,
    Locked {
        meta: DatabaseMetadata,
    },
    Unlocked {
        archive: Kdbx<Unlocked>,
        meta: DatabaseMetadata,
    },
}

/// Builder assembling a [`Keeper`] from host facilities and store
/// backends. Every component has a default so tests can replace only
/// what they drive.
pub struct KeeperBuilder {
    config: KeeperConfig,
    codec: Codec,
    primary: Box<dyn KeyValueStore>,
    secondary: Box<dyn KeyValueStore>,
    clock: Box<dyn Clock>,
    alarms: Box<dyn AlarmHost>,
    clipboard: Box<dyn Clipboard>,
    tokens: Box<dyn TokenStore>,
}

impl Default for KeeperBuilder {
    fn default() -> KeeperBuilder {
        KeeperBuilder {
            config: KeeperConfig::default(),
            codec: Codec::new(),
            primary: Box::new(MemoryStore::new()),
            secondary: Box::new(MemoryStore::new()),
            clock: Box::new(SystemClock),
            alarms: Box::new(NoAlarms),
            clipboard: Box::new(SystemClipboard),
            tokens: Box::new(MemoryTokenStore::new()),
        }
    }
}

impl KeeperBuilder {
    /// Replace the policy knobs
    pub fn config(mut self, config: KeeperConfig) -> KeeperBuilder {
        self.config = config;
        self
    }

    /// Replace the codec (e.g. to supply a custom Argon2 callback)
    pub fn codec(mut self, codec: Codec) -> KeeperBuilder {
        self.codec = codec;
        self
    }

    /// Replace the primary store backend
    pub fn primary_store(mut self, store: Box<dyn KeyValueStore>) -> KeeperBuilder {
        self.primary = store;
        self
    }

    /// Replace the secondary store backend
    pub fn secondary_store(mut self, store: Box<dyn KeyValueStore>) -> KeeperBuilder {
        self.secondary = store;
        self
    }

    /// Replace the clock
    pub fn clock(mut self, clock: Box<dyn Clock>) -> KeeperBuilder {
        self.clock = clock;
        self
    }

    /// Replace the alarm host
    pub fn alarms(mut self, alarms: Box<dyn AlarmHost>) -> KeeperBuilder {
        self.alarms = alarms;
        self
    }

    /// Replace the clipboard surface
    pub fn clipboard(mut self, clipboard: Box<dyn Clipboard>) -> KeeperBuilder {
        self.clipboard = clipboard;
        self
    }

    /// Replace the token store
    pub fn token_store(mut self, tokens: Box<dyn TokenStore>) -> KeeperBuilder {
        self.tokens = tokens;
        self
    }

    /// Assemble the keeper
    pub fn build(self) -> Keeper {
        let backup = BackupScheduler::new(BackupConfig {
            interval: self.config.snapshot_interval,
            edit_threshold: self.config.edit_threshold,
            max_snapshots: self.config.max_snapshots,
            max_age: self.config.snapshot_max_age,
        });
        let store = DualStore::new(self.primary, self.secondary, self.config.max_versions);
        Keeper {
            config: self.config,
            codec: self.codec,
            store,
            backup,
            clock: self.clock,
            alarms: self.alarms,
            clipboard: self.clipboard,
            tokens: self.tokens,
            session: Session::NoDatabase,
            init_report: None,
            last_recovery: RecoverySummary::default(),
        }
    }
}

/// The keeper process state: session, stores, journal and timers.
///
/// See the [module documentation][crate::keeper] for the state machine.
pub struct Keeper {
    config: KeeperConfig,
    codec: Codec,
    store: DualStore,
    backup: BackupScheduler,
    clock: Box<dyn Clock>,
    alarms: Box<dyn AlarmHost>,
    clipboard: Box<dyn Clipboard>,
    tokens: Box<dyn TokenStore>,
    session: Session,
    init_report: Option<InitReport>,
    last_recovery: RecoverySummary,
}

impl Keeper {
    /// Start assembling a keeper
    pub fn builder() -> KeeperBuilder {
        KeeperBuilder::default()
    }

    /// Sole ingress: route one typed request and produce its envelope.
    ///
    /// Storage initialization runs before the first request is handled;
    /// handler failures are converted into `success: false` envelopes and
    /// never escape.
    pub fn dispatch(&mut self, request: Request) -> Envelope {
        self.init();
        Envelope::from(self.route(request))
    }

    /// Wire-format convenience over [`Keeper::dispatch`]: JSON envelope
    /// in, JSON envelope out.
    pub fn dispatch_json(&mut self, request: &str) -> String {
        let envelope = match serde_json::from_str::<Request>(request) {
            Ok(request) => self.dispatch(request),
            Err(e) => Envelope::err(format!("Invalid request: {}", e)),
        };
        serde_json::to_string(&envelope)
            .unwrap_or_else(|e| format!(r#"{{"success":false,"error":"{}"}}"#, e))
    }

    /// Initialize storage, run journal recovery and arm the snapshot
    /// tick. Idempotent; returns the report of the first run.
    pub fn init(&mut self) -> InitReport {
        if let Some(report) = &self.init_report {
            return report.clone();
        }
        let now = self.clock.now();

        let loaded = match self.store.load() {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!("storage init could not load database: {}", e);
                None
            }
        };
        let current_checksum = loaded.as_ref().map(|l| l.checksum.clone());
        self.session = match &loaded {
            Some(loaded) => Session::Locked {
                meta: loaded.metadata.clone(),
            },
            None => Session::NoDatabase,
        };

        let recovery = journal::recover(
            self.store.secondary_mut(),
            now,
            current_checksum.as_deref(),
        )
        .unwrap_or_else(|e| {
            warn!("journal recovery failed: {}", e);
            RecoverySummary::default()
        });
        if let Err(e) = journal::prune(self.store.secondary_mut(), self.config.journal_cap) {
            warn!("journal pruning failed: {}", e);
        }
        if loaded.is_some() {
            self.arm_hourly(now);
        }

        self.last_recovery = recovery.clone();
        let report = InitReport {
            recovery,
            status: self.status(),
        };
        info!("keeper initialized ({:?})", report.status);
        self.init_report = Some(report.clone());
        report
    }

    /// React to a host alarm firing.
    pub fn handle_alarm(&mut self, kind: AlarmKind) {
        self.init();
        let now = self.clock.now();
        match kind {
            AlarmKind::AutoLock => {
                info!("idle timeout, locking session");
                self.lock_session();
            }
            AlarmKind::ClipboardClear => {
                if let Err(e) = self.clipboard.set_text("") {
                    warn!("clipboard clear failed: {}", e);
                }
                self.alarms.clear(AlarmKind::ClipboardClear);
            }
            AlarmKind::HourlySnapshot => {
                let newest = match self.backup.latest_snapshot_at(self.store.secondary()) {
                    Ok(newest) => newest,
                    Err(e) => {
                        warn!("hourly snapshot scheduling failed: {}", e);
                        return;
                    }
                };
                let elapsed = newest
                    .map(|ts| now - ts >= self.config.snapshot_interval)
                    .unwrap_or(true);
                if elapsed {
                    match self.take_snapshot(SnapshotReason::Hourly, now) {
                        // take_snapshot re-arms the tick; Ok(None) means no
                        // database exists and nothing needs scheduling
                        Ok(_) => {}
                        Err(e) => {
                            warn!("hourly snapshot failed: {}", e);
                            self.arm_hourly(now);
                        }
                    }
                } else {
                    self.arm_hourly(now);
                }
            }
        }
    }

    fn route(&mut self, request: Request) -> Result<ResponseData, KeeperError> {
        match request {
            Request::GetState => self.get_state(),
            Request::CreateDatabase(payload) => self.create_database(payload),
            Request::ImportDatabase(payload) => self.import_database(payload),
            Request::Unlock(payload) => self.unlock(payload),
            Request::Lock => {
                self.lock_session();
                Ok(ResponseData::State(self.state_view()))
            }
            Request::GetEntries(filter) => self.get_entries(filter.unwrap_or_default()),
            Request::GetEntry(payload) => self.get_entry(payload),
            Request::CreateEntry(draft) => self.create_entry(draft),
            Request::UpdateEntry(patch) => self.update_entry(patch),
            Request::DeleteEntry(payload) => self.delete_entry(payload),
            Request::GetGroups => self.get_groups(),
            Request::GeneratePassword(config) => {
                let config = config.unwrap_or_default();
                let password = generator::generate(&config)?;
                let strength = generator::strength(&password);
                Ok(ResponseData::Password(GeneratedPassword {
                    password,
                    strength,
                }))
            }
            Request::CopyToClipboard(payload) => self.copy_to_clipboard(payload),
            Request::ExportDatabase | Request::DownloadExport => self.export_database(),
            Request::GetEntriesForUrl(payload) => self.entries_for_url(payload),
            Request::FillInTab(payload) => self.fill_in_tab(payload),
            Request::GetBackupHistory(payload) => self.backup_history(payload),
            Request::RestoreFromBackup(payload) => self.restore_from_backup(payload),
            Request::GetStorageHealth => Ok(ResponseData::Health(self.store.health())),
            Request::GetRecoveryStatus => self.recovery_status(),
            Request::DeleteDatabase => self.delete_database(),
        }
    }

    // ---- session state -------------------------------------------------

    fn status(&self) -> SessionStatus {
        match self.session {
            Session::NoDatabase => SessionStatus::NoDatabase,
            Session::Locked { .. } => SessionStatus::Locked,
            Session::Unlocked { .. } => SessionStatus::Unlocked,
        }
    }

    fn state_view(&self) -> StateView {
        let meta = match &self.session {
            Session::NoDatabase => None,
            Session::Locked { meta } => Some(meta.clone()),
            Session::Unlocked { meta, .. } => Some(meta.clone()),
        };
        StateView {
            status: self.status(),
            meta,
        }
    }

    fn get_state(&mut self) -> Result<ResponseData, KeeperError> {
        if matches!(self.session, Session::Locked { .. }) {
            // Transparent re-unlock after a host restart
            let _ = self.try_auto_unlock();
        }
        Ok(ResponseData::State(self.state_view()))
    }

    fn install_unlocked(&mut self, archive: Kdbx<Unlocked>, now: DateTime<Utc>) {
        let meta = DatabaseMetadata {
            name: archive.vault().name().to_string(),
            last_modified: now,
            entry_count: archive.vault().entry_count(),
        };
        self.session = Session::Unlocked { archive, meta };
        self.arm_auto_lock(now);
    }

    fn lock_session(&mut self) {
        let meta = match std::mem::replace(&mut self.session, Session::NoDatabase) {
            Session::Unlocked { archive, meta } => {
                // Key material and protected values zeroize on drop
                drop(archive);
                Some(meta)
            }
            Session::Locked { meta } => Some(meta),
            Session::NoDatabase => None,
        };
        self.session = match meta {
            Some(meta) => Session::Locked { meta },
            None => Session::NoDatabase,
        };
        self.tokens.clear();
        self.alarms.clear(AlarmKind::AutoLock);
    }

    fn issue_token(&mut self, passphrase: &str, now: DateTime<Utc>) {
        self.tokens.store(UnlockToken {
            token: ProtectedValue::wrap(passphrase),
            created_at: now,
            expires_at: now + self.config.token_ttl,
        });
    }

    fn try_auto_unlock(&mut self) -> Result<(), KeeperError> {
        let now = self.clock.now();
        let token = match self.tokens.load() {
            Some(token) => token,
            None => return Err(KeeperError::NotUnlocked),
        };
        if !token.valid_at(now) {
            debug!("auto-unlock token expired");
            self.tokens.clear();
            return Err(KeeperError::NotUnlocked);
        }
        let loaded = match self.store.load() {
            Ok(Some(loaded)) => loaded,
            _ => {
                self.tokens.clear();
                return Err(KeeperError::NotUnlocked);
            }
        };
        let passphrase = token.token.reveal();
        match self.codec.load(&loaded.blob, &passphrase) {
            Ok(archive) => {
                info!("session auto-unlocked from token");
                self.install_unlocked(archive, now);
                Ok(())
            }
            Err(e) => {
                debug!("auto-unlock failed: {}", e);
                self.tokens.clear();
                Err(KeeperError::NotUnlocked)
            }
        }
    }

    fn ensure_unlocked(&mut self) -> Result<(), KeeperError> {
        match self.status() {
            SessionStatus::Unlocked => Ok(()),
            SessionStatus::NoDatabase => {
                Err(KeeperError::NotFound("No database found".to_string()))
            }
            SessionStatus::Locked => self
                .try_auto_unlock()
                .map_err(|_| KeeperError::NotUnlocked),
        }
    }

    // ---- timers --------------------------------------------------------

    fn arm_auto_lock(&mut self, now: DateTime<Utc>) {
        self.alarms
            .set(AlarmKind::AutoLock, now + self.config.auto_lock);
    }

    fn arm_hourly(&mut self, now: DateTime<Utc>) {
        match self.backup.next_hourly_due(self.store.secondary(), now) {
            Ok(due) => self.alarms.set(AlarmKind::HourlySnapshot, due),
            Err(e) => warn!("could not schedule snapshot tick: {}", e),
        }
    }

    // ---- durable write plumbing ---------------------------------------

    fn vault_snapshot(&self) -> Option<Vault> {
        match &self.session {
            Session::Unlocked { archive, .. } => Some(archive.vault().clone()),
            _ => None,
        }
    }

    fn restore_vault(&mut self, prior: Option<Vault>) {
        if let (Some(prior), Session::Unlocked { archive, .. }) = (prior, &mut self.session) {
            *archive.vault_mut() = prior;
        }
    }

    /// Serialize the unlocked vault and run the dual-store write path.
    ///
    /// The session is only considered persisted when both stores
    /// acknowledged the write and the primary read-back checksum matched.
    fn persist_session(
        &mut self,
        reason: PersistReason,
        now: DateTime<Utc>,
    ) -> Result<PersistOutcome, KeeperError> {
        let (blob, metadata) = match &self.session {
            Session::Unlocked { archive, .. } => {
                let blob = self.codec.save(archive)?;
                let vault = archive.vault();
                let metadata = DatabaseMetadata {
                    name: vault.name().to_string(),
                    last_modified: now,
                    entry_count: vault.entry_count(),
                };
                (blob, metadata)
            }
            _ => return Err(KeeperError::NotUnlocked),
        };

        let outcome = self.store.persist(&blob, &metadata, reason, now);
        if !outcome.success() {
            return Err(KeeperError::StorageSyncFailed(
                outcome.warnings.join("; "),
            ));
        }
        if !outcome.checksum_match {
            return Err(KeeperError::ChecksumMismatch);
        }
        if let Session::Unlocked { meta, .. } = &mut self.session {
            *meta = metadata;
        }
        Ok(outcome)
    }

    fn journal_begin(
        &mut self,
        op_type: &str,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<String, KeeperError> {
        let checksum = self.store.current_checksum();
        Ok(journal::begin(
            self.store.secondary_mut(),
            now,
            op_type,
            payload,
            checksum,
        )?)
    }

    fn journal_complete(&mut self, op_id: &str, checksum: &str, now: DateTime<Utc>) {
        if let Err(e) = journal::complete(self.store.secondary_mut(), now, op_id, checksum) {
            warn!("journal completion failed for {}: {}", op_id, e);
        }
    }

    fn journal_rollback(&mut self, op_id: &str, error: &KeeperError, now: DateTime<Utc>) {
        if let Err(e) =
            journal::rollback(self.store.secondary_mut(), now, op_id, &error.to_string())
        {
            warn!("journal rollback failed for {}: {}", op_id, e);
        }
    }

    fn after_persist_success(
        &mut self,
        op_id: &str,
        outcome: &PersistOutcome,
        reason: PersistReason,
        now: DateTime<Utc>,
    ) {
        self.journal_complete(op_id, &outcome.checksum, now);
        if reason == PersistReason::Edit && self.backup.note_edit() {
            if let Err(e) = self.take_snapshot(SnapshotReason::EditThreshold, now) {
                warn!("edit-threshold snapshot failed: {}", e);
            }
        }
        if let Err(e) = journal::prune(self.store.secondary_mut(), self.config.journal_cap) {
            warn!("journal pruning failed: {}", e);
        }
        self.arm_auto_lock(now);
    }

    fn take_snapshot(
        &mut self,
        reason: SnapshotReason,
        now: DateTime<Utc>,
    ) -> Result<Option<SnapshotInfo>, KeeperError> {
        let loaded = match self.store.load()? {
            Some(loaded) => loaded,
            None => return Ok(None),
        };
        let info = self.backup.snapshot(
            self.store.secondary_mut(),
            &loaded.blob,
            loaded.version,
            &loaded.metadata,
            reason,
            now,
        )?;
        self.arm_hourly(now);
        Ok(Some(info))
    }

    // ---- database lifecycle -------------------------------------------

    fn create_database(
        &mut self,
        payload: CreateDatabasePayload,
    ) -> Result<ResponseData, KeeperError> {
        if !matches!(self.session, Session::NoDatabase) {
            return Err(KeeperError::InvalidRequest(
                "A database already exists".to_string(),
            ));
        }
        let now = self.clock.now();
        let op_id =
            self.journal_begin("CREATE_DATABASE", json!({ "name": payload.name.clone() }), now)?;

        let archive = match self.codec.create(&payload.name, &payload.password) {
            Ok(archive) => archive,
            Err(e) => {
                let error = KeeperError::from(e);
                self.journal_rollback(&op_id, &error, now);
                return Err(error);
            }
        };
        self.install_unlocked(archive, now);

        // The initial write is not a user edit; it must not advance the
        // edit-threshold counter
        match self.persist_session(PersistReason::Import, now) {
            Ok(outcome) => {
                self.after_persist_success(&op_id, &outcome, PersistReason::Import, now);
                self.issue_token(&payload.password, now);
                self.issue_recovery_code(now);
                self.arm_hourly(now);
                Ok(ResponseData::State(self.state_view()))
            }
            Err(e) => {
                self.session = Session::NoDatabase;
                self.tokens.clear();
                self.journal_rollback(&op_id, &e, now);
                Err(e)
            }
        }
    }

    /// Mint a one-time recovery code for the new database; only its
    /// digest is persisted.
    fn issue_recovery_code(&mut self, now: DateTime<Utc>) {
        let config = generator::GeneratorConfig {
            length: 24,
            include_special: false,
            exclude_ambiguous: true,
            ..generator::GeneratorConfig::default()
        };
        let code = match generator::generate(&config) {
            Ok(code) => code,
            Err(e) => {
                warn!("recovery code generation failed: {}", e);
                return;
            }
        };
        let record = RecoveryCodeRecord {
            code_hash: sha256_hex(code.as_bytes()),
            created_at: now,
        };
        if let Err(e) =
            self.store
                .secondary_mut()
                .put(STORE_RECOVERY_CODES, KEY_CURRENT_RECOVERY, &record)
        {
            warn!("recovery code persistence failed: {}", e);
        }
    }

    fn import_database(
        &mut self,
        payload: ImportDatabasePayload,
    ) -> Result<ResponseData, KeeperError> {
        use base64::prelude::{Engine, BASE64_STANDARD};

        let now = self.clock.now();
        let bytes = BASE64_STANDARD
            .decode(payload.data.as_bytes())
            .map_err(|e| KeeperError::InvalidRequest(format!("import data: {}", e)))?;
        let op_id = self.journal_begin(
            "IMPORT_DATABASE",
            json!({ "size": bytes.len() }),
            now,
        )?;

        let archive = match self.codec.load(&bytes, &payload.password) {
            Ok(archive) => archive,
            Err(e) => {
                let error = KeeperError::from(e);
                self.journal_rollback(&op_id, &error, now);
                return Err(error);
            }
        };

        let prior = std::mem::replace(&mut self.session, Session::NoDatabase);
        self.install_unlocked(archive, now);

        match self.persist_session(PersistReason::Import, now) {
            Ok(outcome) => {
                self.after_persist_success(&op_id, &outcome, PersistReason::Import, now);
                self.issue_token(&payload.password, now);
                self.arm_hourly(now);
                Ok(ResponseData::State(self.state_view()))
            }
            Err(e) => {
                self.session = prior;
                self.journal_rollback(&op_id, &e, now);
                Err(e)
            }
        }
    }

    fn unlock(&mut self, payload: UnlockPayload) -> Result<ResponseData, KeeperError> {
        let now = self.clock.now();
        if matches!(self.session, Session::Unlocked { .. }) {
            return Ok(ResponseData::State(self.state_view()));
        }
        let loaded = self
            .store
            .load()?
            .ok_or_else(|| KeeperError::NotFound("No database found".to_string()))?;

        let archive = self.codec.load(&loaded.blob, &payload.password)?;
        self.install_unlocked(archive, now);
        self.issue_token(&payload.password, now);
        Ok(ResponseData::State(self.state_view()))
    }

    fn delete_database(&mut self) -> Result<ResponseData, KeeperError> {
        self.store.destroy()?;
        self.session = Session::NoDatabase;
        self.tokens.clear();
        self.alarms.clear(AlarmKind::AutoLock);
        self.alarms.clear(AlarmKind::HourlySnapshot);
        info!("database deleted");
        Ok(ResponseData::State(self.state_view()))
    }

    // ---- entry operations ---------------------------------------------

    fn get_entries(&mut self, filter: EntryFilter) -> Result<ResponseData, KeeperError> {
        self.ensure_unlocked()?;
        let now = self.clock.now();
        let views = match &self.session {
            Session::Unlocked { archive, .. } => archive.vault().list_entries(&filter),
            _ => return Err(KeeperError::NotUnlocked),
        };
        self.arm_auto_lock(now);
        Ok(ResponseData::Entries(views))
    }

    fn get_entry(&mut self, payload: EntryIdPayload) -> Result<ResponseData, KeeperError> {
        self.ensure_unlocked()?;
        let now = self.clock.now();
        let view = match &self.session {
            Session::Unlocked { archive, .. } => archive.vault().get_entry(payload.id),
            _ => return Err(KeeperError::NotUnlocked),
        };
        self.arm_auto_lock(now);
        view.map(ResponseData::Entry)
            .ok_or_else(|| KeeperError::NotFound("Entry not found".to_string()))
    }

    fn create_entry(&mut self, draft: EntryDraft) -> Result<ResponseData, KeeperError> {
        self.ensure_unlocked()?;
        let now = self.clock.now();
        let op_id = self.journal_begin(
            "CREATE_ENTRY",
            json!({ "title": draft.title.clone(), "groupId": draft.group_id }),
            now,
        )?;

        let prior = self.vault_snapshot();
        let view = match &mut self.session {
            Session::Unlocked { archive, .. } => {
                archive.vault_mut().create_entry(draft, now.naive_utc())
            }
            _ => return Err(KeeperError::NotUnlocked),
        };

        match self.persist_session(PersistReason::Edit, now) {
            Ok(outcome) => {
                self.after_persist_success(&op_id, &outcome, PersistReason::Edit, now);
                Ok(ResponseData::Entry(view))
            }
            Err(e) => {
                self.restore_vault(prior);
                self.journal_rollback(&op_id, &e, now);
                Err(e)
            }
        }
    }

    fn update_entry(&mut self, patch: EntryPatch) -> Result<ResponseData, KeeperError> {
        self.ensure_unlocked()?;
        let now = self.clock.now();
        let op_id = self.journal_begin("UPDATE_ENTRY", json!({ "id": patch.id }), now)?;

        let prior = self.vault_snapshot();
        let view = match &mut self.session {
            Session::Unlocked { archive, .. } => {
                archive.vault_mut().update_entry(patch, now.naive_utc())
            }
            _ => return Err(KeeperError::NotUnlocked),
        };
        let view = match view {
            Some(view) => view,
            None => {
                let error = KeeperError::NotFound("Entry not found".to_string());
                self.journal_rollback(&op_id, &error, now);
                return Err(error);
            }
        };

        match self.persist_session(PersistReason::Edit, now) {
            Ok(outcome) => {
                self.after_persist_success(&op_id, &outcome, PersistReason::Edit, now);
                Ok(ResponseData::Entry(view))
            }
            Err(e) => {
                self.restore_vault(prior);
                self.journal_rollback(&op_id, &e, now);
                Err(e)
            }
        }
    }

    fn delete_entry(&mut self, payload: EntryIdPayload) -> Result<ResponseData, KeeperError> {
        self.ensure_unlocked()?;
        let now = self.clock.now();
        let op_id = self.journal_begin("DELETE_ENTRY", json!({ "id": payload.id }), now)?;

        let prior = self.vault_snapshot();
        let deleted = match &mut self.session {
            Session::Unlocked { archive, .. } => {
                archive.vault_mut().delete_entry(payload.id, now.naive_utc())
            }
            _ => return Err(KeeperError::NotUnlocked),
        };
        if !deleted {
            // Nothing changed; close the record against the current blob
            let checksum = self.store.current_checksum().unwrap_or_default();
            self.journal_complete(&op_id, &checksum, now);
            self.arm_auto_lock(now);
            return Ok(ResponseData::Deleted { deleted: false });
        }

        match self.persist_session(PersistReason::Edit, now) {
            Ok(outcome) => {
                self.after_persist_success(&op_id, &outcome, PersistReason::Edit, now);
                Ok(ResponseData::Deleted { deleted: true })
            }
            Err(e) => {
                self.restore_vault(prior);
                self.journal_rollback(&op_id, &e, now);
                Err(e)
            }
        }
    }

    fn get_groups(&mut self) -> Result<ResponseData, KeeperError> {
        self.ensure_unlocked()?;
        let now = self.clock.now();
        let views = match &self.session {
            Session::Unlocked { archive, .. } => archive.vault().list_groups(),
            _ => return Err(KeeperError::NotUnlocked),
        };
        self.arm_auto_lock(now);
        Ok(ResponseData::Groups(views))
    }

    // ---- host page queries --------------------------------------------

    fn entries_for_url(&mut self, payload: UrlPayload) -> Result<ResponseData, KeeperError> {
        // Host pages get an empty result, never an unlock error
        if self.ensure_unlocked().is_err() {
            return Ok(ResponseData::Entries(Vec::new()));
        }
        let now = self.clock.now();
        let views = match &self.session {
            Session::Unlocked { archive, .. } => archive.vault().entries_for_host(&payload.url),
            _ => Vec::new(),
        };
        self.arm_auto_lock(now);
        Ok(ResponseData::Entries(views))
    }

    fn fill_in_tab(&mut self, payload: UrlPayload) -> Result<ResponseData, KeeperError> {
        if self.ensure_unlocked().is_err() {
            return Ok(ResponseData::Fill(None));
        }
        let now = self.clock.now();
        let best = match &self.session {
            Session::Unlocked { archive, .. } => archive
                .vault()
                .entries_for_host(&payload.url)
                .into_iter()
                .next(),
            _ => None,
        };
        self.arm_auto_lock(now);
        Ok(ResponseData::Fill(best.map(|view| FillCredentials {
            username: view.username,
            password: view.password,
        })))
    }

    // ---- clipboard -----------------------------------------------------

    fn copy_to_clipboard(&mut self, payload: CopyPayload) -> Result<ResponseData, KeeperError> {
        self.ensure_unlocked()?;
        let now = self.clock.now();
        let view = match &self.session {
            Session::Unlocked { archive, .. } => archive.vault().get_entry(payload.entry_id),
            _ => return Err(KeeperError::NotUnlocked),
        }
        .ok_or_else(|| KeeperError::NotFound("Entry not found".to_string()))?;

        let text = match payload.field {
            CopyField::Username => view.username,
            CopyField::Password => view.password,
        };
        self.clipboard.set_text(&text).map_err(|e| {
            KeeperError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
        })?;
        self.alarms.set(
            AlarmKind::ClipboardClear,
            now + self.config.clipboard_clear,
        );
        self.arm_auto_lock(now);
        Ok(ResponseData::Acknowledged)
    }

    // ---- export and backups -------------------------------------------

    fn export_file_name(&self, now: DateTime<Utc>) -> String {
        let date = now.format("%Y-%m-%d");
        let name = match &self.session {
            Session::Unlocked { archive, .. } => archive.vault().name().to_string(),
            Session::Locked { meta } => meta.name.clone(),
            Session::NoDatabase => String::new(),
        };
        if name.is_empty() {
            format!("keepass-export-{}.kdbx", date)
        } else {
            format!("{}-{}.kdbx", name, date)
        }
    }

    fn export_database(&mut self) -> Result<ResponseData, KeeperError> {
        use base64::prelude::{Engine, BASE64_STANDARD};

        self.ensure_unlocked()?;
        let now = self.clock.now();
        let blob = match &self.session {
            Session::Unlocked { archive, .. } => self.codec.save(archive)?,
            _ => return Err(KeeperError::NotUnlocked),
        };
        let file_name = self.export_file_name(now);
        self.arm_auto_lock(now);
        Ok(ResponseData::Export(ExportFile {
            file_name,
            data: BASE64_STANDARD.encode(blob),
        }))
    }

    fn backup_history(
        &mut self,
        payload: Option<HistoryLimitPayload>,
    ) -> Result<ResponseData, KeeperError> {
        self.ensure_unlocked()?;
        let now = self.clock.now();
        let limit = payload.map(|p| p.limit).unwrap_or(20);
        let history = self.backup.history(self.store.secondary(), limit)?;
        self.arm_auto_lock(now);
        Ok(ResponseData::BackupHistory(history))
    }

    fn restore_from_backup(
        &mut self,
        payload: RestorePayload,
    ) -> Result<ResponseData, KeeperError> {
        let now = self.clock.now();
        let op_id = self.journal_begin(
            "RESTORE_FROM_BACKUP",
            json!({ "timestamp": payload.timestamp }),
            now,
        )?;

        let snapshot = match self.backup.fetch(self.store.secondary(), payload.timestamp) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                let error = KeeperError::from(e);
                self.journal_rollback(&op_id, &error, now);
                return Err(error);
            }
        };
        let archive = match self.codec.load(&snapshot.blob, &payload.password) {
            Ok(archive) => archive,
            Err(e) => {
                let error = KeeperError::from(e);
                self.journal_rollback(&op_id, &error, now);
                return Err(error);
            }
        };

        let prior = std::mem::replace(&mut self.session, Session::NoDatabase);
        self.install_unlocked(archive, now);

        match self.persist_session(PersistReason::Recovery, now) {
            Ok(outcome) => {
                self.after_persist_success(&op_id, &outcome, PersistReason::Recovery, now);
                self.issue_token(&payload.password, now);
                info!("restored snapshot from {}", payload.timestamp);
                Ok(ResponseData::State(self.state_view()))
            }
            Err(e) => {
                self.session = prior;
                self.journal_rollback(&op_id, &e, now);
                Err(e)
            }
        }
    }

    fn recovery_status(&mut self) -> Result<ResponseData, KeeperError> {
        let health = self.store.health();
        let recovery_code_present = self
            .store
            .secondary()
            .get::<RecoveryCodeRecord>(STORE_RECOVERY_CODES, KEY_CURRENT_RECOVERY)
            .unwrap_or(None)
            .is_some();
        Ok(ResponseData::Recovery(RecoveryStatus {
            summary: self.last_recovery.clone(),
            integrity: health.integrity,
            last_sync: health.last_sync,
            recovery_code_present,
        }))
    }
}

impl std::fmt::Debug for Keeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keeper")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
