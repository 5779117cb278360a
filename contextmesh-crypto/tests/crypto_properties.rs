//! Property-based tests for snapshot encryption.
//!
//! - Encryption is reversible with the correct key for any UTF-8 payload
//! - Wrong keys fail decryption
//! - Tampering with any envelope part is detected

use contextmesh_crypto::{
    decrypt, decrypt_string, encrypt, encrypt_string, EncryptedData, SnapshotKey,
};
use proptest::prelude::*;

fn key_strategy() -> impl Strategy<Value = SnapshotKey> {
    prop::array::uniform32(any::<u8>()).prop_map(SnapshotKey::from_bytes)
}

proptest! {
    #[test]
    fn string_roundtrip_preserves_utf8(key in key_strategy(), plaintext in any::<String>()) {
        let envelope = encrypt_string(&key, &plaintext).unwrap();
        let decrypted = decrypt_string(&key, &envelope).unwrap();
        prop_assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn byte_roundtrip(key in key_strategy(), plaintext in prop::collection::vec(any::<u8>(), 0..4096)) {
        let encrypted = encrypt(&key, &plaintext).unwrap();
        prop_assert_eq!(decrypt(&key, &encrypted).unwrap(), plaintext);
    }

    #[test]
    fn envelope_parse_is_inverse(key in key_strategy(), plaintext in prop::collection::vec(any::<u8>(), 0..512)) {
        let encrypted = encrypt(&key, &plaintext).unwrap();
        let parsed = EncryptedData::from_envelope(&encrypted.to_envelope()).unwrap();
        prop_assert_eq!(parsed, encrypted);
    }

    #[test]
    fn wrong_key_fails(k1 in key_strategy(), k2 in key_strategy(), plaintext in any::<String>()) {
        prop_assume!(k1.as_bytes() != k2.as_bytes());
        let envelope = encrypt_string(&k1, &plaintext).unwrap();
        prop_assert!(decrypt_string(&k2, &envelope).is_err());
    }

    #[test]
    fn bit_flip_detected(key in key_strategy(), plaintext in prop::collection::vec(any::<u8>(), 1..256), idx in any::<prop::sample::Index>()) {
        let mut encrypted = encrypt(&key, &plaintext).unwrap();
        let i = idx.index(encrypted.ciphertext.len());
        encrypted.ciphertext[i] ^= 0x80;
        prop_assert!(decrypt(&key, &encrypted).is_err());
    }
}
