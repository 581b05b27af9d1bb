//! Masked in-memory representation for secret field values
//!
//! A [`ProtectedValue`] keeps its cleartext XORed with a ChaCha20 keystream
//! derived from per-instance random key material. The cleartext is only
//! materialised by [`ProtectedValue::reveal`], which hands back a
//! [`Zeroizing`] buffer so the copy is wiped when it goes out of scope.
//!
//! Debug formatting and error paths never show the cleartext, so a
//! protected value can flow through logs and journal payloads safely.

use chacha20::ChaCha20;
use cipher::{KeyIvInit, StreamCipher};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, Zeroizing};

const MASK_KEY_LEN: usize = 32;
const MASK_NONCE_LEN: usize = 12;

/// A secret string masked while held in memory.
pub struct ProtectedValue {
    ciphertext: Vec<u8>,
    mask_key: [u8; MASK_KEY_LEN],
    mask_nonce: [u8; MASK_NONCE_LEN],
}

impl ProtectedValue {
    /// Wrap a cleartext string, generating fresh mask material from the OS RNG.
    pub fn wrap(cleartext: &str) -> ProtectedValue {
        ProtectedValue::wrap_bytes(cleartext.as_bytes())
    }

    /// Wrap raw secret bytes, generating fresh mask material from the OS RNG.
    pub fn wrap_bytes(cleartext: &[u8]) -> ProtectedValue {
        let mut mask_key = [0u8; MASK_KEY_LEN];
        let mut mask_nonce = [0u8; MASK_NONCE_LEN];
        OsRng.fill_bytes(&mut mask_key);
        OsRng.fill_bytes(&mut mask_nonce);

        let mut ciphertext = cleartext.to_vec();
        let mut cipher = ChaCha20::new(&mask_key.into(), &mask_nonce.into());
        cipher.apply_keystream(&mut ciphertext);

        ProtectedValue {
            ciphertext,
            mask_key,
            mask_nonce,
        }
    }

    /// Materialise the cleartext.
    ///
    /// The returned buffer is zeroed when dropped. Callers should keep its
    /// lifetime as short as possible and must not clone it into places that
    /// outlive the need for the secret.
    pub fn reveal(&self) -> Zeroizing<String> {
        let bytes = self.reveal_bytes();
        Zeroizing::new(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Materialise the cleartext as raw bytes.
    pub fn reveal_bytes(&self) -> Zeroizing<Vec<u8>> {
        let mut buf = Zeroizing::new(self.ciphertext.clone());
        let mut cipher = ChaCha20::new(&self.mask_key.into(), &self.mask_nonce.into());
        cipher.apply_keystream(buf.as_mut());
        buf
    }

    /// Byte length of the masked secret.
    pub fn len(&self) -> usize {
        self.ciphertext.len()
    }

    /// Whether the wrapped secret is the empty string.
    pub fn is_empty(&self) -> bool {
        self.ciphertext.is_empty()
    }
}

impl Clone for ProtectedValue {
    fn clone(&self) -> ProtectedValue {
        // Re-mask under fresh material so two instances never share a pad
        ProtectedValue::wrap_bytes(&self.reveal_bytes())
    }
}

impl std::fmt::Debug for ProtectedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ProtectedValue(****)")
    }
}

impl PartialEq for ProtectedValue {
    fn eq(&self, other: &ProtectedValue) -> bool {
        self.reveal_bytes().as_slice() == other.reveal_bytes().as_slice()
    }
}

impl Eq for ProtectedValue {}

impl Drop for ProtectedValue {
    fn drop(&mut self) {
        self.ciphertext.zeroize();
        self.mask_key.zeroize();
        self.mask_nonce.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reveal_round_trips() {
        let value = ProtectedValue::wrap("hunter2");
        assert_eq!(&*value.reveal(), "hunter2");
    }

    #[test]
    fn masked_bytes_differ_from_cleartext() {
        let value = ProtectedValue::wrap("correct horse battery staple");
        assert_ne!(value.ciphertext, b"correct horse battery staple");
    }

    #[test]
    fn debug_never_prints_cleartext() {
        let value = ProtectedValue::wrap("s3cret-pass");
        let rendered = format!("{:?}", value);
        assert!(!rendered.contains("s3cret"));
    }

    #[test]
    fn clones_compare_equal_with_fresh_masks() {
        let value = ProtectedValue::wrap("abc");
        let copy = value.clone();
        assert_eq!(value, copy);
        assert_ne!(value.mask_key, copy.mask_key);
    }
}
