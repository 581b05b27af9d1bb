//! Host facilities the keeper depends on but does not own
//!
//! Wall-clock time, persistent alarms, the clipboard and the volatile
//! token store are all injected behind traits so the keeper can run
//! against the real host in production and deterministic fakes in tests.
//! Timers are modeled as absolute deadlines handed to an [`AlarmHost`];
//! the keeper never sleeps.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::protected::ProtectedValue;

/// Source of wall-clock time
pub trait Clock {
    /// The current instant
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock reading the system time
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Hand-advanced clock for deterministic tests
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// A clock frozen at `start`
    pub fn new(start: DateTime<Utc>) -> ManualClock {
        ManualClock {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: chrono::Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now = *now + by;
        }
    }

    /// Jump the clock to an absolute instant
    pub fn set(&self, to: DateTime<Utc>) {
        if let Ok(mut now) = self.now.lock() {
            *now = to;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
            .lock()
            .map(|now| *now)
            .unwrap_or_else(|_| Utc::now())
    }
}

/// The keeper's named timers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlarmKind {
    /// Idle auto-lock deadline
    AutoLock,
    /// Clipboard clear deadline
    ClipboardClear,
    /// Wall-clock snapshot tick
    HourlySnapshot,
}

/// Host-provided persistent alarm facility.
///
/// Implementations are expected to call the keeper's
/// [`handle_alarm`][crate::Keeper::handle_alarm] when a deadline passes,
/// and to survive process restarts where the platform allows.
pub trait AlarmHost {
    /// Arm (or re-arm) an alarm for an absolute deadline
    fn set(&mut self, kind: AlarmKind, at: DateTime<Utc>);
    /// Disarm an alarm; unarmed kinds are not an error
    fn clear(&mut self, kind: AlarmKind);
}

/// Alarm host for platforms without one; deadlines are dropped
#[derive(Debug, Default)]
pub struct NoAlarms;

impl AlarmHost for NoAlarms {
    fn set(&mut self, _kind: AlarmKind, _at: DateTime<Utc>) {}
    fn clear(&mut self, _kind: AlarmKind) {}
}

/// Records armed deadlines so tests can fire them by hand
#[derive(Debug, Clone, Default)]
pub struct RecordingAlarms {
    armed: Arc<Mutex<Vec<(AlarmKind, DateTime<Utc>)>>>,
}

impl RecordingAlarms {
    /// A fresh recorder with nothing armed
    pub fn new() -> RecordingAlarms {
        RecordingAlarms::default()
    }

    /// The currently armed deadline for `kind`
    pub fn deadline(&self, kind: AlarmKind) -> Option<DateTime<Utc>> {
        self.armed
            .lock()
            .ok()?
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, at)| *at)
    }
}

impl AlarmHost for RecordingAlarms {
    fn set(&mut self, kind: AlarmKind, at: DateTime<Utc>) {
        if let Ok(mut armed) = self.armed.lock() {
            armed.retain(|(k, _)| *k != kind);
            armed.push((kind, at));
        }
    }

    fn clear(&mut self, kind: AlarmKind) {
        if let Ok(mut armed) = self.armed.lock() {
            armed.retain(|(k, _)| *k != kind);
        }
    }
}

#[derive(Debug, Error)]
/// Clipboard failures; callers treat the clipboard as best-effort
pub enum ClipboardError {
    /// The host clipboard rejected the write
    #[error("Clipboard unavailable: {0}")]
    Unavailable(String),
}

/// Host clipboard surface
pub trait Clipboard {
    /// Replace the clipboard contents
    fn set_text(&mut self, text: &str) -> Result<(), ClipboardError>;
}

/// System clipboard backed by `arboard`
#[derive(Debug, Default)]
pub struct SystemClipboard;

impl Clipboard for SystemClipboard {
    fn set_text(&mut self, text: &str) -> Result<(), ClipboardError> {
        let mut clipboard =
            arboard::Clipboard::new().map_err(|e| ClipboardError::Unavailable(e.to_string()))?;
        clipboard
            .set_text(text.to_string())
            .map_err(|e| ClipboardError::Unavailable(e.to_string()))
    }
}

/// In-memory clipboard for tests and headless hosts
#[derive(Debug, Clone, Default)]
pub struct MemoryClipboard {
    contents: Arc<Mutex<String>>,
}

impl MemoryClipboard {
    /// A clipboard holding the empty string
    pub fn new() -> MemoryClipboard {
        MemoryClipboard::default()
    }

    /// Current clipboard contents
    pub fn contents(&self) -> String {
        self.contents
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }
}

impl Clipboard for MemoryClipboard {
    fn set_text(&mut self, text: &str) -> Result<(), ClipboardError> {
        if let Ok(mut contents) = self.contents.lock() {
            *contents = text.to_string();
        }
        Ok(())
    }
}

/// Auto-unlock credential with its validity window.
///
/// The credential material is the session passphrase held in the same
/// masked representation as protected fields. It never reaches the
/// durable stores.
#[derive(Debug, Clone)]
pub struct UnlockToken {
    /// Masked credential material
    pub token: ProtectedValue,
    /// When the token was issued
    pub created_at: DateTime<Utc>,
    /// When the token stops being accepted
    pub expires_at: DateTime<Utc>,
}

impl UnlockToken {
    /// Whether the token is still inside its validity window
    pub fn valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Volatile storage for the auto-unlock token.
///
/// Survives a host process restart where the platform provides such
/// storage, but is always cleared when the host session ends.
pub trait TokenStore {
    /// The stored token, if any
    fn load(&self) -> Option<UnlockToken>;
    /// Replace the stored token
    fn store(&mut self, token: UnlockToken);
    /// Drop the stored token
    fn clear(&mut self);
}

/// Token store held in process memory
#[derive(Debug, Clone, Default)]
pub struct MemoryTokenStore {
    token: Arc<Mutex<Option<UnlockToken>>>,
}

impl MemoryTokenStore {
    /// An empty token store
    pub fn new() -> MemoryTokenStore {
        MemoryTokenStore::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Option<UnlockToken> {
        self.token.lock().ok()?.clone()
    }

    fn store(&mut self, token: UnlockToken) {
        if let Ok(mut slot) = self.token.lock() {
            *slot = Some(token);
        }
    }

    fn clear(&mut self) {
        if let Ok(mut slot) = self.token.lock() {
            *slot = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(Utc::now());
        let before = clock.now();
        clock.advance(chrono::Duration::seconds(90));
        assert_eq!(clock.now() - before, chrono::Duration::seconds(90));
    }

    #[test]
    fn recording_alarms_replace_by_kind() {
        let mut alarms = RecordingAlarms::new();
        let t1 = Utc::now();
        let t2 = t1 + chrono::Duration::minutes(15);
        alarms.set(AlarmKind::AutoLock, t1);
        alarms.set(AlarmKind::AutoLock, t2);
        assert_eq!(alarms.deadline(AlarmKind::AutoLock), Some(t2));
        alarms.clear(AlarmKind::AutoLock);
        assert_eq!(alarms.deadline(AlarmKind::AutoLock), None);
    }

    #[test]
    fn token_expiry_window() {
        let now = Utc::now();
        let token = UnlockToken {
            token: ProtectedValue::wrap("pass"),
            created_at: now,
            expires_at: now + chrono::Duration::seconds(3600),
        };
        assert!(token.valid_at(now));
        assert!(!token.valid_at(now + chrono::Duration::seconds(3601)));
    }
}
