//! Small helpers shared across the keeper

use std::fmt::Write;
use std::io;
use uuid::Uuid;

pub(crate) fn value_from_uuid_table<T: Clone>(
    table: &[(&str, T)],
    lookup: uuid::Uuid,
) -> Option<T> {
    for (uuid_str, ref value) in table.iter() {
        let item_uuid = Uuid::parse_str(uuid_str).ok()?;
        if item_uuid == lookup {
            return Some(value.clone());
        }
    }
    None
}

pub(crate) fn uuid_from_uuid_table<T: Clone + PartialEq>(
    table: &[(&str, T)],
    lookup: T,
) -> Option<uuid::Uuid> {
    for (uuid_str, ref value) in table.iter() {
        let item_uuid = Uuid::parse_str(uuid_str).ok()?;
        if value.clone() == lookup {
            return Some(item_uuid);
        }
    }
    None
}

pub(crate) fn buffer(len: usize) -> Vec<u8> {
    let mut v = Vec::with_capacity(len);
    v.resize_with(len, Default::default);
    v
}

/// SHA-256 of `data` as a lowercase hex string.
///
/// This is the checksum format used everywhere durable state is verified:
/// the dual store's read-back check, journal records and snapshot rows.
pub fn sha256_hex(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};

    let digest = Sha256::digest(data);
    let mut output = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(output, "{:02x}", byte);
    }
    output
}

pub(crate) struct CachingReader<'a, I>
where
    I: io::Read,
{
    data: Vec<u8>,
    inner: &'a mut I,
}

impl<'a, I: io::Read> io::Read for CachingReader<'a, I> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let size = self.inner.read(buf)?;
        self.data.extend(buf[0..size].iter().cloned());
        Ok(size)
    }
}

impl<'a, I: io::Read> CachingReader<'a, I> {
    pub(crate) fn new(inner: &'a mut I) -> CachingReader<'a, I> {
        CachingReader {
            data: Vec::new(),
            inner,
        }
    }

    pub(crate) fn into_inner(self) -> (Vec<u8>, &'a mut I) {
        (self.data, self.inner)
    }
}

/// No-op stream cipher that does no encryption or decryption
pub struct NullStreamCipher;

impl cipher::StreamCipher for NullStreamCipher {
    fn try_apply_keystream_inout(
        &mut self,
        _buf: cipher::inout::InOutBuf<'_, '_, u8>,
    ) -> Result<(), cipher::StreamCipherError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn sha256_hex_is_lowercase_and_padded() {
        let hex = sha256_hex(b"");
        assert_eq!(hex.len(), 64);
        assert!(hex
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
