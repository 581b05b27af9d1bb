//! Error types for kdbx-keeper
//!
//! The codec and store layers carry their own detailed error enums;
//! [`KeeperError`] is the tagged set the dispatcher routes on and renders
//! into envelope error strings.

pub use crate::binary::errors::{HeaderError, OpenError, UnlockError, WriteError};
pub use crate::codec::CodecError;
pub use crate::crypto::KeyGenerationError;
pub use crate::generator::GeneratorError;
pub use crate::store::StoreError;
pub use crate::xml::{ParseError as XmlReadError, SerializeError as XmlWriteError};
use thiserror::Error;

#[derive(Error, Debug)]
/// Keeper-level failures, one variant per user-visible error kind
pub enum KeeperError {
    /// The supplied passphrase does not authenticate the database
    #[error("Wrong master password")]
    InvalidKey,
    /// Stored data failed structural or integrity validation
    #[error("Corrupt database: {0}")]
    Corrupt(String),
    /// The database uses a format feature this build does not support
    #[error("Unsupported database: {0}")]
    Unsupported(String),
    /// The referenced object does not exist
    #[error("{0}")]
    NotFound(String),
    /// A durable write could not be acknowledged by both stores
    #[error("Storage sync failed: {0}")]
    StorageSyncFailed(String),
    /// The read-back verification after a write did not match
    #[error("Storage verification failed: read-back checksum mismatch")]
    ChecksumMismatch,
    /// A data operation arrived while no vault is unlocked
    #[error("NOT_UNLOCKED")]
    NotUnlocked,
    /// The request payload was malformed
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    /// Generic I/O fallback
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CodecError> for KeeperError {
    fn from(e: CodecError) -> KeeperError {
        match e {
            CodecError::InvalidKey => KeeperError::InvalidKey,
            CodecError::Corrupt(msg) => KeeperError::Corrupt(msg),
            CodecError::Unsupported(msg) => KeeperError::Unsupported(msg),
            CodecError::Io(inner) => KeeperError::Io(inner),
        }
    }
}

impl From<StoreError> for KeeperError {
    fn from(e: StoreError) -> KeeperError {
        match e {
            StoreError::NotFound(what) => KeeperError::NotFound(format!("{} not found", what)),
            other => KeeperError::StorageSyncFailed(other.to_string()),
        }
    }
}

impl From<GeneratorError> for KeeperError {
    fn from(e: GeneratorError) -> KeeperError {
        KeeperError::InvalidRequest(e.to_string())
    }
}
