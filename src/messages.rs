//! Typed request/response surface of the dispatcher
//!
//! Wire envelopes are `{"type": ..., "payload": ...}` in and
//! `{"success": true, "data": ...}` / `{"success": false, "error": ...}`
//! out. The error string `"NOT_UNLOCKED"` is a sentinel the UI routes to
//! its unlock screen.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backup::SnapshotInfo;
use crate::database::{EntryDraft, EntryFilter, EntryPatch, EntryView, GroupView};
use crate::errors::KeeperError;
use crate::generator::GeneratorConfig;
use crate::journal::RecoverySummary;
use crate::store::{DatabaseMetadata, IntegrityStatus, StoreHealth};

/// Sentinel error string for the unlock-screen redirect
pub const NOT_UNLOCKED: &str = "NOT_UNLOCKED";

/// One typed request into the keeper
#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Request {
    /// Current session state
    GetState,
    /// Create a fresh database and unlock it
    CreateDatabase(CreateDatabasePayload),
    /// Import an existing `.kdbx` archive and unlock it
    ImportDatabase(ImportDatabasePayload),
    /// Unlock the stored database
    Unlock(UnlockPayload),
    /// Lock the session, clearing key material
    Lock,
    /// Enumerate entries, optionally filtered
    GetEntries(Option<EntryFilter>),
    /// Fetch one entry by id
    GetEntry(EntryIdPayload),
    /// Create an entry
    CreateEntry(EntryDraft),
    /// Update an entry
    UpdateEntry(EntryPatch),
    /// Delete an entry
    DeleteEntry(EntryIdPayload),
    /// Enumerate groups
    GetGroups,
    /// Generate a passphrase
    GeneratePassword(Option<GeneratorConfig>),
    /// Copy an entry field to the clipboard with timed clear
    CopyToClipboard(CopyPayload),
    /// Serialize the database for export
    ExportDatabase,
    /// Entries matching a page URL
    GetEntriesForUrl(UrlPayload),
    /// Credentials for filling a page form
    FillInTab(UrlPayload),
    /// Snapshot history
    GetBackupHistory(Option<HistoryLimitPayload>),
    /// Restore a snapshot as the current database
    RestoreFromBackup(RestorePayload),
    /// Store sizes and integrity
    GetStorageHealth,
    /// Journal recovery summary from the last startup
    GetRecoveryStatus,
    /// Remove the database and every trace of it
    DeleteDatabase,
    /// Serialize the database for download
    DownloadExport,
}

/// Payload of [`Request::CreateDatabase`]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDatabasePayload {
    /// Database display name
    pub name: String,
    /// Master passphrase
    pub password: String,
}

/// Payload of [`Request::ImportDatabase`]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportDatabasePayload {
    /// Archive bytes, base64 encoded
    pub data: String,
    /// Master passphrase of the imported archive
    pub password: String,
}

/// Payload of [`Request::Unlock`]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockPayload {
    /// Master passphrase
    pub password: String,
}

/// Payload addressing one entry
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryIdPayload {
    /// Entry identifier
    pub id: Uuid,
}

/// Which entry field a clipboard copy targets
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CopyField {
    /// The username field
    Username,
    /// The password field
    #[default]
    Password,
}

/// Payload of [`Request::CopyToClipboard`]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyPayload {
    /// Entry to copy from
    pub entry_id: Uuid,
    /// Field to copy
    #[serde(default)]
    pub field: CopyField,
}

/// Payload carrying a page URL
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlPayload {
    /// The page URL
    pub url: String,
}

/// Payload of [`Request::GetBackupHistory`]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryLimitPayload {
    /// Maximum rows returned
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

fn default_history_limit() -> usize {
    20
}

/// Payload of [`Request::RestoreFromBackup`]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestorePayload {
    /// Creation timestamp of the snapshot to restore
    pub timestamp: DateTime<Utc>,
    /// Master passphrase of the snapshot
    pub password: String,
}

/// Session status rendered to the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No database is stored
    NoDatabase,
    /// A database is stored but no keys are in memory
    Locked,
    /// A decrypted vault is held in memory
    Unlocked,
}

/// Session state plus database metadata
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateView {
    /// Current session status
    pub status: SessionStatus,
    /// Metadata of the stored database, when one exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<DatabaseMetadata>,
}

/// Result of [`Request::GeneratePassword`]
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedPassword {
    /// The generated passphrase
    pub password: String,
    /// Estimated strength, 0..=4
    pub strength: u8,
}

/// Result of the export requests
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportFile {
    /// Suggested file name
    pub file_name: String,
    /// Archive bytes, base64 encoded
    pub data: String,
}

/// Credentials resolved for a page form
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FillCredentials {
    /// Account username
    pub username: String,
    /// Account password
    pub password: String,
}

/// Result of [`Request::GetRecoveryStatus`]
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryStatus {
    /// Journal recovery summary from the last startup
    pub summary: RecoverySummary,
    /// Current durable-store integrity
    pub integrity: IntegrityStatus,
    /// When the last persist finished
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
    /// Whether a recovery code has been issued for this database
    pub recovery_code_present: bool,
}

/// One response body; the variant depends on the request kind
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ResponseData {
    /// Session state
    State(StateView),
    /// Entry collection
    Entries(Vec<EntryView>),
    /// Single entry
    Entry(EntryView),
    /// Deletion acknowledgement
    Deleted {
        /// Whether an entry was removed or recycled
        deleted: bool,
    },
    /// Group collection
    Groups(Vec<GroupView>),
    /// Generated passphrase
    Password(GeneratedPassword),
    /// Export bytes and file name
    Export(ExportFile),
    /// Credentials for a page form, absent when nothing matches
    Fill(Option<FillCredentials>),
    /// Snapshot history
    BackupHistory(Vec<SnapshotInfo>),
    /// Store health report
    Health(StoreHealth),
    /// Journal recovery status
    Recovery(RecoveryStatus),
    /// Operation acknowledged with no data
    Acknowledged,
}

/// Uniform response envelope
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Whether the request succeeded
    pub success: bool,
    /// Response body on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseData>,
    /// Error string on failure; `"NOT_UNLOCKED"` is a sentinel
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    /// A success envelope wrapping `data`
    pub fn ok(data: ResponseData) -> Envelope {
        Envelope {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// A failure envelope with a rendered message
    pub fn err(message: impl Into<String>) -> Envelope {
        Envelope {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

impl From<Result<ResponseData, KeeperError>> for Envelope {
    fn from(result: Result<ResponseData, KeeperError>) -> Envelope {
        match result {
            Ok(data) => Envelope::ok(data),
            Err(e) => Envelope::err(render_error(&e)),
        }
    }
}

/// Render a keeper error into its user-facing envelope string
pub fn render_error(error: &KeeperError) -> String {
    match error {
        KeeperError::NotUnlocked => NOT_UNLOCKED.to_string(),
        KeeperError::InvalidKey => "Wrong password. Try again.".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_parse_from_wire_envelopes() {
        let request: Request = serde_json::from_str(r#"{"type": "GET_STATE"}"#).unwrap();
        assert!(matches!(request, Request::GetState));

        let request: Request = serde_json::from_str(
            r#"{"type": "CREATE_DATABASE", "payload": {"name": "My Work Passwords", "password": "s3cret-pass"}}"#,
        )
        .unwrap();
        match request {
            Request::CreateDatabase(payload) => {
                assert_eq!(payload.name, "My Work Passwords");
                assert_eq!(payload.password, "s3cret-pass");
            }
            other => panic!("unexpected request {:?}", other),
        }

        let request: Request = serde_json::from_str(
            r#"{"type": "GET_ENTRIES", "payload": {"search": "mail"}}"#,
        )
        .unwrap();
        match request {
            Request::GetEntries(Some(filter)) => {
                assert_eq!(filter.search.as_deref(), Some("mail"))
            }
            other => panic!("unexpected request {:?}", other),
        }

        let request: Request = serde_json::from_str(r#"{"type": "GET_ENTRIES"}"#).unwrap();
        assert!(matches!(request, Request::GetEntries(None)));
    }

    #[test]
    fn envelopes_serialize_success_and_error_shapes() {
        let ok = Envelope::ok(ResponseData::Deleted { deleted: true });
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["deleted"], true);
        assert!(json.get("error").is_none());

        let result: Result<ResponseData, KeeperError> = Err(KeeperError::NotUnlocked);
        let err = Envelope::from(result);
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "NOT_UNLOCKED");
    }

    #[test]
    fn wrong_password_renders_user_facing_message() {
        assert_eq!(
            render_error(&KeeperError::InvalidKey),
            "Wrong password. Try again."
        );
    }
}
