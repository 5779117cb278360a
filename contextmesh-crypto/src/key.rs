//! Snapshot key material.
//!
//! Keys come from one of three places: an explicit passphrase (hashed with
//! SHA-256), raw hex key bytes, or the local machine's identifiers (see
//! [`crate::machine`]). Key bytes are zeroized on drop.

use crate::error::{CryptoError, CryptoResult};
use crate::machine::MachineIdentity;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of encryption keys in bytes (256 bits for AES-256).
pub const KEY_SIZE: usize = 32;

/// An AES-256 key with automatic zeroization on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SnapshotKey {
    bytes: [u8; KEY_SIZE],
}

impl SnapshotKey {
    /// Creates a key from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Derives a key by hashing a passphrase with SHA-256.
    pub fn from_passphrase(passphrase: &str) -> CryptoResult<Self> {
        if passphrase.is_empty() {
            return Err(CryptoError::KeyDerivation(
                "passphrase must not be empty".to_string(),
            ));
        }
        Ok(Self::from_bytes(sha256(passphrase.as_bytes())))
    }

    /// Parses a key from 64 hex characters.
    pub fn from_hex(encoded: &str) -> CryptoResult<Self> {
        let bytes = hex::decode(encoded.trim())
            .map_err(|e| CryptoError::KeyDerivation(format!("invalid key hex: {e}")))?;
        let actual = bytes.len();
        let bytes: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual,
            })?;
        Ok(Self::from_bytes(bytes))
    }

    /// Derives a key from stable identifiers of the local machine.
    ///
    /// This key is only as secret as the identifiers themselves: anyone who
    /// can read the hostname, platform, CPU model and username of the machine
    /// can rebuild it.
    pub fn machine_derived() -> Self {
        Self::from_identity(&MachineIdentity::collect())
    }

    /// Derives a key from an explicit machine identity.
    pub fn from_identity(identity: &MachineIdentity) -> Self {
        Self::from_bytes(sha256(identity.fingerprint_material().as_bytes()))
    }

    /// Generates a random key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self::from_bytes(bytes)
    }

    /// Returns the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for SnapshotKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

fn sha256(input: &[u8]) -> [u8; KEY_SIZE] {
    let mut hasher = Sha256::new();
    hasher.update(input);
    hasher.finalize().into()
}
