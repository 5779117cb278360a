//! Encryption layer for contextmesh snapshots.
//!
//! Snapshots are sealed with AES-256-GCM and written as the text envelope
//! `ivHex:authTagHex:cipherHex`. The key is either supplied explicitly or
//! derived from local machine identifiers.

mod cipher;
mod error;
mod key;
pub mod machine;

pub use cipher::{
    decrypt, decrypt_string, encrypt, encrypt_string, looks_like_envelope, EncryptedData, IV_SIZE,
    TAG_SIZE,
};
pub use error::{CryptoError, CryptoResult};
pub use key::{SnapshotKey, KEY_SIZE};
pub use machine::MachineIdentity;
