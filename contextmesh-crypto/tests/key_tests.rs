use contextmesh_crypto::{
    decrypt_string, encrypt_string, CryptoError, MachineIdentity, SnapshotKey, KEY_SIZE,
};

fn identity() -> MachineIdentity {
    MachineIdentity {
        hostname: "workstation".into(),
        platform: "linux".into(),
        arch: "x86_64".into(),
        cpu_model: "Some CPU @ 3.00GHz".into(),
        username: "alice".into(),
    }
}

#[test]
fn passphrase_derivation_is_deterministic() {
    let a = SnapshotKey::from_passphrase("correct horse").unwrap();
    let b = SnapshotKey::from_passphrase("correct horse").unwrap();
    assert_eq!(a.as_bytes(), b.as_bytes());
}

#[test]
fn different_passphrases_give_different_keys() {
    let a = SnapshotKey::from_passphrase("one").unwrap();
    let b = SnapshotKey::from_passphrase("two").unwrap();
    assert_ne!(a.as_bytes(), b.as_bytes());
}

#[test]
fn empty_passphrase_rejected() {
    assert!(matches!(
        SnapshotKey::from_passphrase(""),
        Err(CryptoError::KeyDerivation(_))
    ));
}

#[test]
fn hex_key_roundtrip() {
    let encoded = "11".repeat(KEY_SIZE);
    let key = SnapshotKey::from_hex(&encoded).unwrap();
    assert_eq!(key.as_bytes(), &[0x11u8; KEY_SIZE]);
}

#[test]
fn short_hex_key_rejected() {
    let err = SnapshotKey::from_hex("abcd").unwrap_err();
    assert!(matches!(
        err,
        CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: 2
        }
    ));
}

#[test]
fn identity_key_is_stable() {
    let a = SnapshotKey::from_identity(&identity());
    let b = SnapshotKey::from_identity(&identity());
    assert_eq!(a.as_bytes(), b.as_bytes());
}

#[test]
fn identity_key_changes_with_username() {
    let mut other = identity();
    other.username = "bob".into();
    let a = SnapshotKey::from_identity(&identity());
    let b = SnapshotKey::from_identity(&other);
    assert_ne!(a.as_bytes(), b.as_bytes());
}

#[test]
fn machine_key_decrypts_its_own_output() {
    let envelope = encrypt_string(&SnapshotKey::machine_derived(), "snapshot").unwrap();
    let plaintext = decrypt_string(&SnapshotKey::machine_derived(), &envelope).unwrap();
    assert_eq!(plaintext, "snapshot");
}

#[test]
fn fingerprint_material_joins_all_fields() {
    let material = identity().fingerprint_material();
    assert_eq!(material, "workstation|linux|x86_64|Some CPU @ 3.00GHz|alice");
}

#[test]
fn debug_redacts_key() {
    let key = SnapshotKey::generate();
    let debug = format!("{key:?}");
    assert!(debug.contains("REDACTED"));
}
