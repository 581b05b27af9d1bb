//! The outer KDBX 4 container format
//!
//! An archive moves between two typestates. Reading a byte stream with
//! [`from_reader`] or [`open`] produces a `Kdbx<Locked>`; providing a
//! [`CompositeKey`][crate::CompositeKey] to [`Kdbx::unlock`] yields a
//! `Kdbx<Unlocked>` with access to the decrypted vault. A fresh archive is
//! produced from an in-memory vault with [`Kdbx::from_vault`].

pub(crate) mod errors;
mod header;
mod header_fields;
mod kdbx;
mod read;
mod variant_dict;

pub use header::{InnerHeaderId, KdbxHeader, KdbxInnerHeader, OuterHeaderId};
pub use header_fields::{
    Cipher, CompressionType, InnerStreamCipherAlgorithm, KdfAlgorithm, KdfParams,
};
pub(crate) use header_fields::{KDBX_MAGIC_NUMBER, KEEPASS_MAGIC_NUMBER};
pub use kdbx::{FailedUnlock, Kdbx, Locked, Unlocked};
pub use read::{from_reader, open};
pub use variant_dict::{Value as VariantDictValue, VariantDict, VariantParseError};
