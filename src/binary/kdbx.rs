use super::{errors, header};
use crate::database::Vault;
use crate::{crypto, stream};
use std::io::{Read, Write};
use std::ops::{Deref, DerefMut};

pub trait KdbxState: std::fmt::Debug {
    fn header(&self) -> &header::KdbxHeader;
    fn header_mut(&mut self) -> &mut header::KdbxHeader;
    fn major_version(&self) -> u16;
    fn minor_version(&self) -> u16;
    fn write<W: Write>(&self, output: W) -> Result<(), errors::WriteError>;
}

#[derive(Debug)]
/// A KeePass 2 archive wrapping a password vault
///
/// Most methods are available on a specific state like `Kdbx<Locked>`
/// or `Kdbx<Unlocked>`.
///
/// An archive is obtained in one of two ways. You may read an existing
/// archive using [`binary::open`][crate::binary::open] or
/// [`binary::from_reader`][crate::binary::from_reader].
///
/// You can also create a password vault using [`Vault`][crate::Vault],
/// then turn it into an archive using [`Kdbx::from_vault`].
pub struct Kdbx<S>
where
    S: KdbxState,
{
    pub(super) state: S,
}

impl<T: KdbxState> Kdbx<T> {
    /// Encryption configuration and unencrypted custom data
    pub fn header(&self) -> &header::KdbxHeader {
        self.state.header()
    }

    /// Mutable encryption configuration and unencrypted custom data
    pub fn header_mut(&mut self) -> &mut header::KdbxHeader {
        self.state.header_mut()
    }

    /// Major archive version
    pub fn major_version(&self) -> u16 {
        self.state.major_version()
    }

    /// Minor archive version
    pub fn minor_version(&self) -> u16 {
        self.state.minor_version()
    }

    /// Write this archive to the given output stream
    pub fn write<W: Write>(&self, output: W) -> Result<(), errors::WriteError> {
        self.state.write(output)?;
        Ok(())
    }
}

/// Represents a failed attempt at unlocking an archive
///
/// Includes the locked archive and the reason the unlock failed.
/// This allows keeping the archive for interactive use and
/// e.g. prompting the user for a new password if the error is key related.
///
/// For unscripted use, `FailedUnlock` implements
/// `Into<`[`errors::UnlockError`]`>` for easy use with the `?` operator.
pub struct FailedUnlock(pub Kdbx<Locked>, pub errors::UnlockError);

impl From<FailedUnlock> for errors::UnlockError {
    fn from(funlock: FailedUnlock) -> errors::UnlockError {
        funlock.1
    }
}

#[derive(Debug)]
/// An unlocked archive, allowing access to stored credentials
pub struct Unlocked {
    /// Header data of the archive, includes unencrypted metadata
    pub(crate) header: header::KdbxHeader,
    /// Inner header data that is stored encrypted
    pub(crate) inner_header: header::KdbxInnerHeader,
    /// Major version of the database file format
    pub(crate) major_version: u16,
    /// Minor version of the database file format
    pub(crate) minor_version: u16,
    /// Master key used to derive all other keys
    pub(crate) master_key: Option<crypto::MasterKey>,
    /// Actual password vault data
    pub(crate) vault: Vault,
}

impl Unlocked {
    fn encrypt_inner(&self, key: &crypto::MasterKey) -> Result<Vec<u8>, errors::WriteError> {
        let mut encrypted_buf = Vec::new();
        let mut encrypted_stream = stream::payload_write_stream(
            &mut encrypted_buf,
            key.hmac_key(&self.header.master_seed),
            key.cipher_key(&self.header.master_seed),
            self.header.cipher,
            &self.header.encryption_iv,
            self.header.compression_type,
        )?;
        self.inner_header.write(&mut encrypted_stream)?;
        let mut stream_cipher = self
            .inner_header
            .inner_stream_cipher
            .stream_cipher(&self.inner_header.inner_stream_key)
            .map_err(|e| {
                errors::WriteError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    e.to_string(),
                ))
            })?;
        crate::xml::write_xml(&mut encrypted_stream, &self.vault, stream_cipher.as_mut())?;

        encrypted_stream.finish()?;
        Ok(encrypted_buf)
    }
}

impl KdbxState for Unlocked {
    fn header(&self) -> &header::KdbxHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut header::KdbxHeader {
        &mut self.header
    }

    fn major_version(&self) -> u16 {
        self.major_version
    }

    fn minor_version(&self) -> u16 {
        self.minor_version
    }

    fn write<W: Write>(&self, mut output: W) -> Result<(), errors::WriteError> {
        let master_key = self
            .master_key
            .as_ref()
            .ok_or(errors::WriteError::MissingKeys)?;
        let mut header_buf = Vec::new();
        let header_writer = &mut header_buf as &mut dyn Write;
        header_writer.write_all(&super::KEEPASS_MAGIC_NUMBER.to_le_bytes())?;
        header_writer.write_all(&super::KDBX_MAGIC_NUMBER.to_le_bytes())?;
        header_writer.write_all(&self.minor_version.to_le_bytes())?;
        header_writer.write_all(&self.major_version.to_le_bytes())?;
        self.header.write(&mut header_buf)?;
        output.write_all(&header_buf)?;
        output.write_all(&crypto::sha256(&header_buf))?;
        let hmac_key = master_key.hmac_key(&self.header.master_seed);
        let hmac = hmac_key
            .block_key(u64::MAX)
            .calculate_header_hmac(&header_buf)
            .map_err(|_| errors::WriteError::MissingKeys)?;
        output.write_all(&hmac.into_bytes())?;
        let encrypted_payload = self.encrypt_inner(master_key)?;
        output.write_all(&encrypted_payload)?;
        Ok(())
    }
}

impl Kdbx<Unlocked> {
    /// Encrypted binaries and vault options
    pub fn inner_header(&self) -> &header::KdbxInnerHeader {
        &self.state.inner_header
    }

    /// Use the given composite key to encrypt the vault.
    ///
    /// Key derivation is delegated to the supplied Argon2 callback.
    pub fn set_key(
        &mut self,
        key: &crypto::CompositeKey,
        kdf: &crypto::Argon2Kdf,
    ) -> Result<(), crypto::KeyGenerationError> {
        let composed = key.composed();
        self.state.master_key = Some(composed.master_key(&self.header().kdf_params, kdf)?);
        Ok(())
    }

    /// Password vault stored in this archive
    pub fn vault(&self) -> &Vault {
        &self.state.vault
    }

    /// Mutable password vault stored in this archive
    pub fn vault_mut(&mut self) -> &mut Vault {
        &mut self.state.vault
    }

    /// Discard key material and decrypted data, keeping only the
    /// unencrypted header information.
    ///
    /// Dropping the returned value is how the keeper forgets the vault on
    /// lock; zeroization of keys and protected values happens in their
    /// own `Drop` impls.
    pub fn into_vault(self) -> Vault {
        self.state.vault
    }

    /// Generate a new archive from the given vault
    ///
    /// Uses OS randomness provided by the `rand` crate's `OsRng` to
    /// generate all required seeds and IVs.
    ///
    /// Note that you need to set a key with [`Kdbx::set_key`]
    /// to be able to write the archive.
    pub fn from_vault(vault: Vault) -> Kdbx<Unlocked> {
        let header = header::KdbxHeader::from_os_random();
        let inner_header = header::KdbxInnerHeader::from_os_random();
        let unlocked = Unlocked {
            header,
            inner_header,
            major_version: 4,
            minor_version: 0,
            master_key: None,
            vault,
        };
        Kdbx { state: unlocked }
    }
}

impl Deref for Kdbx<Unlocked> {
    type Target = Vault;

    fn deref(&self) -> &Vault {
        &self.state.vault
    }
}

impl DerefMut for Kdbx<Unlocked> {
    fn deref_mut(&mut self) -> &mut Vault {
        &mut self.state.vault
    }
}

#[derive(Debug, PartialEq, Eq)]
/// A locked archive, use `unlock(key, kdf)` to unlock
pub struct Locked {
    /// Header data of the archive, includes unencrypted metadata
    pub(crate) header: header::KdbxHeader,
    /// Raw bytes of header data, used for the integrity checks
    pub(crate) header_data: Vec<u8>,
    /// Major version of the database file format
    pub(crate) major_version: u16,
    /// Minor version of the database file format
    pub(crate) minor_version: u16,
    /// hmac code to verify keys and header integrity
    pub(crate) hmac: Vec<u8>,
    /// Encrypted vault data
    pub(crate) encrypted_data: Vec<u8>,
}

impl KdbxState for Locked {
    fn header(&self) -> &header::KdbxHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut header::KdbxHeader {
        &mut self.header
    }

    fn major_version(&self) -> u16 {
        self.major_version
    }

    fn minor_version(&self) -> u16 {
        self.minor_version
    }

    fn write<W: Write>(&self, mut output: W) -> Result<(), errors::WriteError> {
        let mut header_buf = Vec::new();
        let header_writer = &mut header_buf as &mut dyn Write;
        header_writer.write_all(&super::KEEPASS_MAGIC_NUMBER.to_le_bytes())?;
        header_writer.write_all(&super::KDBX_MAGIC_NUMBER.to_le_bytes())?;
        header_writer.write_all(&self.minor_version.to_le_bytes())?;
        header_writer.write_all(&self.major_version.to_le_bytes())?;
        self.header.write(&mut header_buf)?;
        output.write_all(&header_buf)?;
        output.write_all(&crypto::sha256(&header_buf))?;
        output.write_all(&self.hmac)?;
        output.write_all(&self.encrypted_data)?;
        Ok(())
    }
}

impl Kdbx<Locked> {
    fn decrypt(
        &self,
        master_key: &crypto::MasterKey,
    ) -> Result<(header::KdbxInnerHeader, Vec<u8>), errors::UnlockError> {
        let hmac_key = master_key.hmac_key(&self.state.header.master_seed);
        let cipher_key = master_key.cipher_key(&self.state.header.master_seed);
        let mut input_stream = stream::payload_read_stream(
            &*self.state.encrypted_data,
            hmac_key,
            cipher_key,
            self.state.header.cipher,
            &self.state.header.encryption_iv,
            self.state.header.compression_type,
        )?;
        let inner_header = header::KdbxInnerHeader::read(&mut input_stream)?;
        let mut output_buffer = Vec::new();
        input_stream.read_to_end(&mut output_buffer)?;
        Ok((inner_header, output_buffer))
    }

    /// Unlocks the archive
    ///
    /// If unlock fails, returns the locked archive along with the error
    pub fn unlock(
        self,
        key: &crypto::CompositeKey,
        kdf: &crypto::Argon2Kdf,
    ) -> Result<Kdbx<Unlocked>, FailedUnlock> {
        let composed_key = key.composed();
        let master_key = match composed_key.master_key(&self.header().kdf_params, kdf) {
            Ok(master_key) => master_key,
            Err(e) => return Err(FailedUnlock(self, errors::UnlockError::from(e))),
        };
        let hmac_key = master_key.hmac_key(&self.state.header.master_seed);
        let header_block_key = hmac_key.block_key(u64::MAX);

        if !header_block_key.verify_header_block(&self.state.hmac, &self.state.header_data) {
            return Err(FailedUnlock(self, errors::UnlockError::HmacInvalid));
        }

        let parsed = self.decrypt(&master_key).and_then(|(inner_header, data)| {
            let mut stream_cipher = inner_header
                .inner_stream_cipher
                .stream_cipher(inner_header.inner_stream_key.as_ref())
                .map_err(|e| {
                    errors::UnlockError::Decrypt(std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        e.to_string(),
                    ))
                })?;
            let parsed = crate::xml::parse_xml(data.as_slice(), stream_cipher.as_mut())?;
            Ok((inner_header, parsed))
        });

        match parsed {
            Ok((inner_header, vault)) => Ok(Kdbx {
                state: Unlocked {
                    inner_header,
                    header: self.state.header,
                    major_version: self.state.major_version,
                    minor_version: self.state.minor_version,
                    master_key: Some(master_key),
                    vault,
                },
            }),
            Err(e) => Err(FailedUnlock(self, e)),
        }
    }
}
