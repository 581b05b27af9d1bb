//! High level codec surface over the binary container
//!
//! Wraps the [`binary`][crate::binary] typestates in the three operations
//! the keeper needs - create, load, save - and folds the layered container
//! errors into the four [`CodecError`] kinds the rest of the system
//! routes on. The Argon2 primitive is injected as a callback; the codec
//! itself performs no key derivation.

use std::io;

use thiserror::Error;

use crate::binary::{errors, from_reader, Kdbx, Unlocked};
use crate::crypto::{self, Argon2Request, CompositeKey, KeyGenerationError};
use crate::database::Vault;

/// Owned Argon2 callback, see [`crypto::Argon2Kdf`]
pub type Argon2Callback =
    Box<dyn Fn(&Argon2Request<'_>) -> Result<Vec<u8>, KeyGenerationError> + Send + Sync>;

#[derive(Debug, Error)]
/// Codec failures, tagged for routing at the dispatcher boundary
pub enum CodecError {
    /// Authentication failed - the passphrase does not match
    #[error("Invalid credentials for database")]
    InvalidKey,
    /// The container failed structural or integrity checks
    #[error("Corrupt database: {0}")]
    Corrupt(String),
    /// The container uses a version, cipher or KDF this build does not support
    #[error("Unsupported database: {0}")]
    Unsupported(String),
    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<errors::OpenError> for CodecError {
    fn from(e: errors::OpenError) -> CodecError {
        match e {
            errors::OpenError::UnsupportedMajorVersion(v) => {
                CodecError::Unsupported(format!("kdbx version {}", v))
            }
            errors::OpenError::NonKeepassFormat | errors::OpenError::UnsupportedFileFormat => {
                CodecError::Corrupt(e.to_string())
            }
            errors::OpenError::InvalidHeader(inner) => CodecError::Corrupt(inner.to_string()),
            errors::OpenError::Io(inner) => CodecError::Io(inner),
        }
    }
}

impl From<errors::UnlockError> for CodecError {
    fn from(e: errors::UnlockError) -> CodecError {
        match e {
            errors::UnlockError::HmacInvalid => CodecError::InvalidKey,
            errors::UnlockError::KeyGen(inner) => CodecError::Unsupported(inner.to_string()),
            errors::UnlockError::Decrypt(inner) => match inner.kind() {
                // Unsupported cipher or compression surfaces as InvalidInput
                io::ErrorKind::InvalidInput => CodecError::Unsupported(inner.to_string()),
                _ => CodecError::Corrupt(inner.to_string()),
            },
            errors::UnlockError::InvalidInnerHeader(inner) => {
                CodecError::Corrupt(inner.to_string())
            }
            errors::UnlockError::InvalidXml(inner) => CodecError::Corrupt(inner.to_string()),
        }
    }
}

impl From<errors::WriteError> for CodecError {
    fn from(e: errors::WriteError) -> CodecError {
        match e {
            errors::WriteError::Io(inner) => match inner.kind() {
                io::ErrorKind::InvalidInput => CodecError::Unsupported(inner.to_string()),
                _ => CodecError::Io(inner),
            },
            errors::WriteError::XmlWrite(inner) => CodecError::Corrupt(inner.to_string()),
            errors::WriteError::MissingKeys => {
                CodecError::Corrupt("archive has no key material".into())
            }
        }
    }
}

impl From<KeyGenerationError> for CodecError {
    fn from(e: KeyGenerationError) -> CodecError {
        CodecError::Unsupported(e.to_string())
    }
}

/// Translates between `.kdbx` byte streams and in-memory vaults.
///
/// Construction attaches the Argon2 callback used for every key
/// derivation this codec performs.
pub struct Codec {
    kdf: Argon2Callback,
}

impl Default for Codec {
    fn default() -> Codec {
        Codec::new()
    }
}

impl Codec {
    /// A codec backed by the default `rust-argon2` callback
    pub fn new() -> Codec {
        Codec {
            kdf: Box::new(crypto::argon2_kdf),
        }
    }

    /// A codec with a caller-supplied Argon2 primitive
    pub fn with_kdf(kdf: Argon2Callback) -> Codec {
        Codec { kdf }
    }

    /// Construct a fresh archive around an empty vault, keyed with
    /// `passphrase` and default encryption settings.
    pub fn create(&self, name: &str, passphrase: &str) -> Result<Kdbx<Unlocked>, CodecError> {
        let vault = Vault::new(name);
        let mut archive = Kdbx::from_vault(vault);
        archive.set_key(&CompositeKey::from_password(passphrase), &*self.kdf)?;
        Ok(archive)
    }

    /// Parse and decrypt an archive.
    ///
    /// Fails with [`CodecError::InvalidKey`] when authentication fails,
    /// [`CodecError::Corrupt`] on structural or integrity failures and
    /// [`CodecError::Unsupported`] for version, cipher or KDF combinations
    /// outside the supported matrix.
    pub fn load(&self, bytes: &[u8], passphrase: &str) -> Result<Kdbx<Unlocked>, CodecError> {
        let locked = from_reader(bytes)?;
        locked
            .unlock(&CompositeKey::from_password(passphrase), &*self.kdf)
            .map_err(|failed| CodecError::from(failed.1))
    }

    /// Serialize an archive with the cipher and KDF parameters currently
    /// attached to it.
    pub fn save(&self, archive: &Kdbx<Unlocked>) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::new();
        archive.write(&mut buf)?;
        Ok(buf)
    }
}

impl std::fmt::Debug for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Codec").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_kdf() -> Codec {
        // Full-cost Argon2 makes unit tests needlessly slow
        Codec::with_kdf(Box::new(|request| {
            crypto::argon2_kdf(&Argon2Request {
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

    #[test]
    fn create_then_save_then_load_round_trips() {
        let codec = fast_kdf();
        let mut archive = codec.create("Homelab", "s3cret-pass").unwrap();
        archive.vault_mut().create_entry(
            crate::database::EntryDraft {
                title: "Router".into(),
                username: "admin".into(),
                password: "hunter2".into(),
                url: "192.168.0.1".into(),
                ..Default::default()
            },
            chrono::Utc::now().naive_utc(),
        );

        let bytes = codec.save(&archive).unwrap();
        let reloaded = codec.load(&bytes, "s3cret-pass").unwrap();
        assert_eq!(reloaded.vault().name(), "Homelab");
        let entry = reloaded.vault().find_entry(|e| e.title() == Some("Router"));
        let entry = entry.unwrap();
        assert_eq!(entry.username(), Some("admin"));
        assert_eq!(&*entry.password().unwrap(), "hunter2");
    }

    #[test]
    fn wrong_passphrase_is_invalid_key() {
        let codec = fast_kdf();
        let archive = codec.create("Homelab", "correct").unwrap();
        let bytes = codec.save(&archive).unwrap();
        match codec.load(&bytes, "wrong") {
            Err(CodecError::InvalidKey) => {}
            other => panic!("expected InvalidKey, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn truncated_input_is_not_invalid_key() {
        let codec = fast_kdf();
        let archive = codec.create("Homelab", "correct").unwrap();
        let bytes = codec.save(&archive).unwrap();
        match codec.load(&bytes[0..16], "correct") {
            Err(CodecError::InvalidKey) => panic!("truncation must not map to InvalidKey"),
            Err(_) => {}
            Ok(_) => panic!("truncated archive unexpectedly loaded"),
        }
    }
}
