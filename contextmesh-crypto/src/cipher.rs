//! Snapshot encryption using AES-256-GCM.
//!
//! Provides authenticated encryption. The on-disk form is the text envelope
//! `ivHex:authTagHex:cipherHex`, with a fresh 96-bit IV per encryption.

use crate::error::{CryptoError, CryptoResult};
use crate::key::SnapshotKey;
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;

/// Size of the IV in bytes (96 bits for AES-GCM).
pub const IV_SIZE: usize = 12;

/// Size of the authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Encrypted data split into its three envelope parts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedData {
    /// The IV used for encryption (unique per encryption).
    pub iv: [u8; IV_SIZE],
    /// The GCM authentication tag.
    pub auth_tag: [u8; TAG_SIZE],
    /// The ciphertext without the tag.
    pub ciphertext: Vec<u8>,
}

impl EncryptedData {
    /// Encodes as `ivHex:authTagHex:cipherHex`.
    pub fn to_envelope(&self) -> String {
        format!(
            "{}:{}:{}",
            hex::encode(self.iv),
            hex::encode(self.auth_tag),
            hex::encode(&self.ciphertext)
        )
    }

    /// Decodes an `ivHex:authTagHex:cipherHex` envelope.
    pub fn from_envelope(envelope: &str) -> CryptoResult<Self> {
        let mut parts = envelope.trim().splitn(3, ':');
        let (Some(iv_hex), Some(tag_hex), Some(cipher_hex)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(CryptoError::Envelope(
                "expected three ':'-separated parts".to_string(),
            ));
        };

        let iv = decode_fixed::<IV_SIZE>(iv_hex, "iv")?;
        let auth_tag = decode_fixed::<TAG_SIZE>(tag_hex, "auth tag")?;
        let ciphertext = hex::decode(cipher_hex)
            .map_err(|e| CryptoError::Envelope(format!("invalid ciphertext hex: {e}")))?;

        Ok(Self {
            iv,
            auth_tag,
            ciphertext,
        })
    }
}

fn decode_fixed<const N: usize>(part: &str, what: &str) -> CryptoResult<[u8; N]> {
    let bytes =
        hex::decode(part).map_err(|e| CryptoError::Envelope(format!("invalid {what} hex: {e}")))?;
    bytes.try_into().map_err(|bytes: Vec<u8>| {
        CryptoError::Envelope(format!("{what} must be {N} bytes, got {}", bytes.len()))
    })
}

/// Returns true if `text` has the shape of an encryption envelope.
///
/// Used to tell encrypted snapshots from plain JSON ones.
pub fn looks_like_envelope(text: &str) -> bool {
    let text = text.trim();
    let parts: Vec<&str> = text.splitn(3, ':').collect();
    parts.len() == 3
        && parts[0].len() == IV_SIZE * 2
        && parts[1].len() == TAG_SIZE * 2
        && parts
            .iter()
            .all(|p| p.bytes().all(|b| b.is_ascii_hexdigit()))
}

/// Encrypts plaintext using AES-256-GCM.
pub fn encrypt(key: &SnapshotKey, plaintext: &[u8]) -> CryptoResult<EncryptedData> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    let mut iv = [0u8; IV_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut iv);

    let mut sealed = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    // aes-gcm appends the tag to the ciphertext
    let split = sealed.len() - TAG_SIZE;
    let mut auth_tag = [0u8; TAG_SIZE];
    auth_tag.copy_from_slice(&sealed[split..]);
    sealed.truncate(split);

    Ok(EncryptedData {
        iv,
        auth_tag,
        ciphertext: sealed,
    })
}

/// Decrypts data produced by [`encrypt`].
pub fn decrypt(key: &SnapshotKey, encrypted: &EncryptedData) -> CryptoResult<Vec<u8>> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    let mut sealed = Vec::with_capacity(encrypted.ciphertext.len() + TAG_SIZE);
    sealed.extend_from_slice(&encrypted.ciphertext);
    sealed.extend_from_slice(&encrypted.auth_tag);

    cipher
        .decrypt(Nonce::from_slice(&encrypted.iv), sealed.as_ref())
        .map_err(|_| {
            CryptoError::Decryption("decryption failed (wrong key or tampered data)".to_string())
        })
}

/// Encrypts a string and returns the text envelope.
pub fn encrypt_string(key: &SnapshotKey, plaintext: &str) -> CryptoResult<String> {
    Ok(encrypt(key, plaintext.as_bytes())?.to_envelope())
}

/// Decrypts a text envelope back into a string.
pub fn decrypt_string(key: &SnapshotKey, envelope: &str) -> CryptoResult<String> {
    let encrypted = EncryptedData::from_envelope(envelope)?;
    let plaintext = decrypt(key, &encrypted)?;
    String::from_utf8(plaintext)
        .map_err(|e| CryptoError::Decryption(format!("invalid UTF-8: {}", e)))
}
