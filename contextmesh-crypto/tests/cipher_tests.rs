use contextmesh_crypto::{
    decrypt, decrypt_string, encrypt, encrypt_string, looks_like_envelope, EncryptedData,
    SnapshotKey, IV_SIZE, TAG_SIZE,
};

#[test]
fn encrypt_decrypt_roundtrip() {
    let key = SnapshotKey::generate();
    let plaintext = b"Hello, World!";
    let encrypted = encrypt(&key, plaintext).unwrap();
    let decrypted = decrypt(&key, &encrypted).unwrap();
    assert_eq!(decrypted, plaintext);
}

#[test]
fn encrypt_decrypt_empty() {
    let key = SnapshotKey::generate();
    let encrypted = encrypt(&key, b"").unwrap();
    assert!(encrypted.ciphertext.is_empty());
    assert_eq!(decrypt(&key, &encrypted).unwrap(), b"");
}

#[test]
fn ciphertext_length_matches_plaintext() {
    let key = SnapshotKey::generate();
    let encrypted = encrypt(&key, &[7u8; 333]).unwrap();
    assert_eq!(encrypted.ciphertext.len(), 333);
}

#[test]
fn wrong_key_fails_decryption() {
    let encrypted = encrypt(&SnapshotKey::generate(), b"Secret").unwrap();
    assert!(decrypt(&SnapshotKey::generate(), &encrypted).is_err());
}

#[test]
fn tampered_ciphertext_fails_decryption() {
    let key = SnapshotKey::generate();
    let mut encrypted = encrypt(&key, b"Secret").unwrap();
    encrypted.ciphertext[0] ^= 0xFF;
    assert!(decrypt(&key, &encrypted).is_err());
}

#[test]
fn tampered_tag_fails_decryption() {
    let key = SnapshotKey::generate();
    let mut encrypted = encrypt(&key, b"Secret").unwrap();
    encrypted.auth_tag[0] ^= 0x01;
    assert!(decrypt(&key, &encrypted).is_err());
}

#[test]
fn same_plaintext_produces_different_iv() {
    let key = SnapshotKey::generate();
    let e1 = encrypt(&key, b"Same").unwrap();
    let e2 = encrypt(&key, b"Same").unwrap();
    assert_ne!(e1.iv, e2.iv);
    assert_ne!(e1.ciphertext, e2.ciphertext);
}

// ── Envelope ─────────────────────────────────────────────────────

#[test]
fn envelope_has_three_hex_parts() {
    let key = SnapshotKey::generate();
    let envelope = encrypt(&key, b"[]").unwrap().to_envelope();
    let parts: Vec<&str> = envelope.split(':').collect();
    assert_eq!(parts.len(), 3);
    assert_eq!(parts[0].len(), IV_SIZE * 2);
    assert_eq!(parts[1].len(), TAG_SIZE * 2);
    assert_eq!(parts[2].len(), 4);
}

#[test]
fn envelope_roundtrip() {
    let key = SnapshotKey::generate();
    let encrypted = encrypt(&key, b"payload").unwrap();
    let parsed = EncryptedData::from_envelope(&encrypted.to_envelope()).unwrap();
    assert_eq!(parsed, encrypted);
}

#[test]
fn envelope_missing_parts_rejected() {
    assert!(EncryptedData::from_envelope("abcd:ef").is_err());
}

#[test]
fn envelope_bad_hex_rejected() {
    let bad = format!("{}:{}:zz", "0".repeat(24), "0".repeat(32));
    assert!(EncryptedData::from_envelope(&bad).is_err());
}

#[test]
fn envelope_wrong_iv_length_rejected() {
    let bad = format!("{}:{}:00", "0".repeat(10), "0".repeat(32));
    assert!(EncryptedData::from_envelope(&bad).is_err());
}

#[test]
fn envelope_detection() {
    let key = SnapshotKey::generate();
    let envelope = encrypt_string(&key, "[1,2,3]").unwrap();
    assert!(looks_like_envelope(&envelope));
    assert!(!looks_like_envelope("[1,2,3]"));
    assert!(!looks_like_envelope("{\"a\":\"b:c:d\"}"));
}

#[test]
fn string_roundtrip() {
    let key = SnapshotKey::generate();
    let envelope = encrypt_string(&key, "héllo wörld").unwrap();
    assert_eq!(decrypt_string(&key, &envelope).unwrap(), "héllo wörld");
}
