//! Key material and key derivation for the KDBX container
//!
//! The codec itself does not embed an Argon2 implementation. Key derivation
//! goes through an [`Argon2Kdf`] callback; [`argon2_kdf`] is the default
//! implementation backed by the `rust-argon2` crate. The callback is the
//! only place where secret material is fed to the KDF.

use crate::binary;

use hmac::digest::CtOutput;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;
use zeroize::Zeroize;

type HmacSha256 = Hmac<Sha256>;

/// Argon2 variant selector as stored in the KDBX KDF parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Argon2Variant {
    /// Argon2d (data-dependent addressing)
    Argon2d = 0,
    /// Argon2id (hybrid addressing)
    Argon2id = 2,
}

/// One key-derivation request handed to the Argon2 callback.
pub struct Argon2Request<'a> {
    /// Secret input. For KDBX this is the composed credential hash,
    /// not the raw passphrase.
    pub secret: &'a [u8],
    /// Random salt from the container header.
    pub salt: &'a [u8],
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Number of passes.
    pub iterations: u32,
    /// Lane count.
    pub parallelism: u32,
    /// Requested output length in bytes.
    pub hash_length: u32,
    /// Argon2d or Argon2id.
    pub variant: Argon2Variant,
    /// Argon2 version (0x13 for current databases).
    pub version: u32,
}

/// Caller-supplied Argon2 primitive.
///
/// Must return exactly `hash_length` bytes of derived material.
pub type Argon2Kdf = dyn Fn(&Argon2Request<'_>) -> Result<Vec<u8>, KeyGenerationError> + Send + Sync;

/// Default Argon2 callback backed by the `rust-argon2` crate.
pub fn argon2_kdf(request: &Argon2Request<'_>) -> Result<Vec<u8>, KeyGenerationError> {
    let variant = match request.variant {
        Argon2Variant::Argon2d => argon2::Variant::Argon2d,
        Argon2Variant::Argon2id => argon2::Variant::Argon2id,
    };
    let config = argon2::Config {
        variant,
        version: argon2::Version::from_u32(request.version)
            .map_err(|e| KeyGenerationError::KeyGeneration(e.to_string()))?,
        lanes: request.parallelism,
        mem_cost: request.memory_kib,
        time_cost: request.iterations,
        hash_length: request.hash_length,
        ..Default::default()
    };
    argon2::hash_raw(request.secret, request.salt, &config)
        .map_err(|e| KeyGenerationError::KeyGeneration(e.to_string()))
}

/// Credentials needed to unlock the database
///
/// The keeper uses a single master passphrase:
///
/// ```
/// # use kdbx_keeper::CompositeKey;
/// CompositeKey::from_password("abcdef");
/// ```
pub struct CompositeKey {
    pw: String,
}

impl CompositeKey {
    /// Create credentials from a master passphrase
    pub fn from_password(pw: &str) -> CompositeKey {
        CompositeKey { pw: pw.into() }
    }

    pub(crate) fn composed(&self) -> ComposedKey {
        let mut buffer = Vec::new();
        buffer.extend(Sha256::digest(self.pw.as_bytes()));

        ComposedKey(Sha256::digest(&buffer).iter().cloned().collect())
    }
}

impl Drop for CompositeKey {
    fn drop(&mut self) {
        self.pw.zeroize();
    }
}

/// Hashed combined input credentials used as KDF input
pub struct ComposedKey(Vec<u8>);

impl ComposedKey {
    /// Generate a master key used to derive all other keys
    pub fn master_key(
        &self,
        kdf_options: &binary::KdfParams,
        kdf: &Argon2Kdf,
    ) -> Result<MasterKey, KeyGenerationError> {
        match kdf_options {
            binary::KdfParams::Argon2 {
                algorithm,
                memory_bytes,
                version,
                iterations,
                lanes,
                salt,
            } => {
                let variant = match algorithm {
                    binary::KdfAlgorithm::Argon2d => Argon2Variant::Argon2d,
                    binary::KdfAlgorithm::Argon2id => Argon2Variant::Argon2id,
                    other => {
                        return Err(KeyGenerationError::UnsupportedKdfOptions(format!(
                            "{:?}",
                            other
                        )))
                    }
                };
                let request = Argon2Request {
                    secret: &self.0,
                    salt,
                    memory_kib: (memory_bytes / 1024) as u32,
                    iterations: *iterations as u32,
                    parallelism: *lanes,
                    hash_length: 32,
                    variant,
                    version: *version,
                };
                let hash = kdf(&request)?;
                if hash.len() != 32 {
                    return Err(KeyGenerationError::KeyGeneration(format!(
                        "KDF callback returned {} bytes, expected 32",
                        hash.len()
                    )));
                }
                Ok(MasterKey(hash))
            }
            binary::KdfParams::Unknown { uuid, .. } => Err(
                KeyGenerationError::UnsupportedKdfOptions(uuid.to_string()),
            ),
        }
    }
}

impl std::fmt::Debug for ComposedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ComposedKey(****)")
    }
}

impl Drop for ComposedKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Master key - generated from the composed key, used to derive all other keys
pub struct MasterKey(Vec<u8>);

impl MasterKey {
    /// Obtain a key to use for data integrity checks
    pub(crate) fn hmac_key(&self, seed: &[u8]) -> HmacKey {
        let mut data_to_hash = Vec::new();
        data_to_hash.extend(seed.iter());
        data_to_hash.extend(self.0.iter());
        data_to_hash.push(1);

        HmacKey(Sha512::digest(&data_to_hash).iter().cloned().collect())
    }

    /// Obtain a key to initialise a cipher
    pub(crate) fn cipher_key(&self, seed: &[u8]) -> CipherKey {
        let mut data_to_hash = Vec::new();
        data_to_hash.extend(seed.iter());
        data_to_hash.extend(self.0.iter());

        CipherKey(Sha256::digest(&data_to_hash).iter().cloned().collect())
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(****)")
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Used to initialise the encryption/decryption cipher
pub(crate) struct CipherKey(pub(crate) Vec<u8>);

impl Drop for CipherKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Base key for all HMAC data integrity checks
pub(crate) struct HmacKey(Vec<u8>);

impl HmacKey {
    /// Obtain a key to verify a single block
    pub(crate) fn block_key(&self, block_idx: u64) -> HmacBlockKey {
        let mut block_key_hash = Sha512::new();
        block_key_hash.update(block_idx.to_le_bytes());
        block_key_hash.update(&*self.0);
        HmacBlockKey(block_idx, block_key_hash.finalize().to_vec())
    }
}

impl Drop for HmacKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Key to perform data integrity checks on a specific block
pub(crate) struct HmacBlockKey(u64, Vec<u8>);

impl HmacBlockKey {
    /// Verify that a block in the data section is valid
    pub(crate) fn verify_data_block(&self, hmac: &[u8], data: &[u8]) -> bool {
        let mut calc_hmac = match HmacSha256::new_from_slice(&self.1) {
            Ok(mac) => mac,
            Err(_) => return false,
        };
        calc_hmac.update(&self.0.to_le_bytes());
        calc_hmac.update(&(data.len() as u32).to_le_bytes());
        calc_hmac.update(data);
        calc_hmac.verify_slice(hmac).is_ok()
    }

    /// Calculate a HMAC for a block in the data section
    pub(crate) fn calculate_data_hmac(
        &self,
        data: &[u8],
    ) -> Result<CtOutput<HmacSha256>, cipher::InvalidLength> {
        let mut calc_hmac = HmacSha256::new_from_slice(&self.1)?;
        calc_hmac.update(&self.0.to_le_bytes());
        calc_hmac.update(&(data.len() as u32).to_le_bytes());
        calc_hmac.update(data);
        Ok(calc_hmac.finalize())
    }

    /// Calculate a HMAC for a block in the header section
    pub(crate) fn calculate_header_hmac(
        &self,
        data: &[u8],
    ) -> Result<CtOutput<HmacSha256>, cipher::InvalidLength> {
        let mut calc_hmac = HmacSha256::new_from_slice(&self.1)?;
        calc_hmac.update(data);
        Ok(calc_hmac.finalize())
    }

    /// Verify that the header block is valid
    pub(crate) fn verify_header_block(&self, hmac: &[u8], data: &[u8]) -> bool {
        let mut calc_hmac = match HmacSha256::new_from_slice(&self.1) {
            Ok(mac) => mac,
            Err(_) => return false,
        };
        calc_hmac.update(data);
        calc_hmac.verify_slice(hmac).is_ok()
    }
}

/// Confirm the hash of a given block of data for data corruption detection
pub(crate) fn verify_sha256(data: &[u8], expected_sha: &[u8]) -> bool {
    expected_sha == &*Sha256::digest(data)
}

pub(crate) fn sha256(data: &[u8]) -> Vec<u8> {
    Sha256::digest(data).as_slice().to_vec()
}

#[derive(Debug, Error)]
/// Errors encountered generating crypto keys
pub enum KeyGenerationError {
    /// Unexpected error when generating a key
    #[error("Could not generate key: {0}")]
    KeyGeneration(String),
    /// KDF options are not supported by this library
    #[error("Key generation for KDF {0} not supported")]
    UnsupportedKdfOptions(String),
}
