#![deny(missing_docs)]

//! Persistent keeper for a local, offline KeePass 2 (KDBX) password vault.
//!
//! The crate is organised around the keeper's data flow: typed requests
//! enter through the [`Keeper`] dispatcher, pass the session state
//! machine, mutate the in-memory [`Vault`], are serialized by the KDBX
//! [`codec`], and land in the durable [`store`] with an entry in the
//! operation [`journal`] and, periodically, a [`backup`] snapshot.
//!
//! ```
//! use kdbx_keeper::messages::Request;
//! use kdbx_keeper::Keeper;
//!
//! let mut keeper = Keeper::builder().build();
//! let state = keeper.dispatch(Request::GetState);
//! assert!(state.success);
//! ```
//!
//! Reading a standalone archive works without a keeper:
//!
//! ```no_run
//! # fn main() -> Result<(), kdbx_keeper::errors::OpenError> {
//! use kdbx_keeper::crypto::{argon2_kdf, CompositeKey};
//!
//! let archive = kdbx_keeper::binary::open("./vault.kdbx")?;
//! let key = CompositeKey::from_password("s3cret-pass");
//! let unlocked = archive.unlock(&key, &argon2_kdf);
//! # Ok(())
//! # }
//! ```

pub mod backup;
pub mod binary;
pub mod codec;
pub mod crypto;
pub mod database;
pub mod errors;
pub mod generator;
pub mod host;
pub mod journal;
pub mod keeper;
pub mod messages;
pub mod protected;
pub mod store;
mod stream;
mod utils;
pub mod xml;

pub use crate::codec::Codec;
pub use crate::crypto::CompositeKey;
pub use crate::database::Vault;
pub use crate::errors::KeeperError;
pub use crate::keeper::{Keeper, KeeperBuilder, KeeperConfig};
pub use crate::protected::ProtectedValue;
pub use crate::utils::{sha256_hex, NullStreamCipher};
