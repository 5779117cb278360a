//! Tests for snapshot persistence: encrypted and plain round-trips, filters,
//! urgency-triggered flushes.

use contextmesh_crypto::looks_like_envelope;
use contextmesh_store::{ContextStore, KeySource, PersistenceConfig, StoreConfig, StoreError};
use contextmesh_types::{NewContext, Timestamp};
use serde_json::json;
use std::path::Path;
use tempfile::TempDir;

fn config(path: &Path, encrypt: bool) -> StoreConfig {
    StoreConfig {
        persistence: PersistenceConfig {
            encrypt,
            key: KeySource::Passphrase("correct horse".to_string()),
            ..PersistenceConfig::at(path)
        },
        ..StoreConfig::default()
    }
}

fn ctx(source: &str, context_type: &str) -> NewContext {
    NewContext::new(source, context_type, json!({"from": source}))
}

#[tokio::test]
async fn encrypted_snapshot_round_trips() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ctx.snapshot");

    let store = ContextStore::new(config(&path, true)).unwrap();
    let a = store.add(ctx("camera", "visual.objects")).await.unwrap();
    let b = store.add(ctx("mic", "audio.speech")).await.unwrap();
    assert_eq!(store.flush().await.unwrap(), 2);

    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(looks_like_envelope(&raw));
    assert!(!raw.contains("visual.objects"));

    let restored = ContextStore::new(config(&path, true)).unwrap();
    assert_eq!(restored.load().await.unwrap(), 2);
    assert_eq!(restored.get(&a.id).await, Some(a));
    assert_eq!(restored.get(&b.id).await, Some(b));
}

#[tokio::test]
async fn plain_snapshot_is_json_array() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("ctx.json");

    let store = ContextStore::new(config(&path, false)).unwrap();
    store.add(ctx("camera", "visual.objects")).await.unwrap();
    store.flush().await.unwrap();

    let raw = std::fs::read_to_string(&path).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(parsed.as_array().map(Vec::len), Some(1));
    assert_eq!(parsed[0]["type"], "visual.objects");
}

#[tokio::test]
async fn wrong_key_fails_to_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ctx.snapshot");

    let store = ContextStore::new(config(&path, true)).unwrap();
    store.add(ctx("camera", "visual.objects")).await.unwrap();
    store.flush().await.unwrap();

    let mut other = config(&path, true);
    other.persistence.key = KeySource::Passphrase("wrong".to_string());
    let restored = ContextStore::new(other).unwrap();
    let err = restored.load().await.unwrap_err();
    assert!(matches!(err, StoreError::Crypto(_)));
}

#[tokio::test]
async fn missing_snapshot_loads_empty() {
    let dir = TempDir::new().unwrap();
    let store = ContextStore::new(config(&dir.path().join("absent"), true)).unwrap();
    assert_eq!(store.load().await.unwrap(), 0);
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn flush_applies_exclusion_filters() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ctx.json");
    let mut cfg = config(&path, false);
    cfg.persistence.excluded_sources = vec!["secret-source".to_string()];
    cfg.persistence.excluded_types = vec!["private.*".to_string()];
    cfg.persistence.min_confidence = 0.3;

    let store = ContextStore::new(cfg.clone()).unwrap();
    store.add(ctx("camera", "visual.objects")).await.unwrap();
    store
        .add(ctx("secret-source", "visual.objects"))
        .await
        .unwrap();
    store.add(ctx("camera", "private.notes")).await.unwrap();
    store
        .add(ctx("camera", "visual.faces").with_confidence(0.1))
        .await
        .unwrap();

    assert_eq!(store.flush().await.unwrap(), 1);

    let restored = ContextStore::new(cfg).unwrap();
    restored.load().await.unwrap();
    let types = restored.context_types().await;
    assert_eq!(types, vec!["visual.objects".to_string()]);
}

#[tokio::test]
async fn urgent_write_flushes_immediately() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ctx.json");
    let store = ContextStore::new(config(&path, false)).unwrap();

    store.add(ctx("camera", "visual.objects")).await.unwrap();
    assert!(!path.exists());
    assert!(store.is_dirty());

    store
        .add(ctx("camera", "visual.alerts").with_priority(8))
        .await
        .unwrap();
    assert!(path.exists());
    assert!(!store.is_dirty());

    let stats = store.stats().await;
    assert_eq!(stats.flush_count, 1);
    assert!(stats.last_flush.is_some());
}

#[tokio::test]
async fn high_confidence_write_flushes_immediately() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ctx.json");
    let store = ContextStore::new(config(&path, false)).unwrap();

    store
        .add(ctx("camera", "visual.objects").with_confidence(0.81))
        .await
        .unwrap();
    assert!(path.exists());
}

#[tokio::test]
async fn load_drops_entries_expired_while_offline() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ctx.json");
    let store = ContextStore::new(config(&path, false)).unwrap();
    store.add(ctx("camera", "visual.objects")).await.unwrap();

    // written by hand so the expiry is already in the past
    let stale = json!([{
        "id": "old",
        "source": "camera",
        "type": "visual.objects",
        "data": null,
        "timestamp": 1_000,
        "expiry_timestamp": 2_000,
        "priority": 5,
        "confidence": 0.5
    }, {
        "id": "fresh",
        "source": "camera",
        "type": "visual.objects",
        "data": null,
        "timestamp": Timestamp::now().as_millis(),
        "priority": 15,
        "confidence": 0.5
    }]);
    std::fs::write(&path, stale.to_string()).unwrap();

    let restored = ContextStore::new(config(&path, false)).unwrap();
    assert_eq!(restored.load().await.unwrap(), 1);
    let fresh = restored.get(&"fresh".into()).await.unwrap();
    assert_eq!(fresh.priority, 10);
}

#[tokio::test]
async fn persistence_without_path_is_rejected() {
    let cfg = StoreConfig {
        persistence: PersistenceConfig {
            enabled: true,
            ..PersistenceConfig::default()
        },
        ..StoreConfig::default()
    };
    assert!(matches!(
        ContextStore::new(cfg).unwrap_err(),
        StoreError::Config(_)
    ));
}

#[tokio::test]
async fn bad_hex_key_is_rejected_at_startup() {
    let dir = TempDir::new().unwrap();
    let mut cfg = config(&dir.path().join("ctx"), true);
    cfg.persistence.key = KeySource::Hex("abcd".to_string());
    assert!(matches!(
        ContextStore::new(cfg).unwrap_err(),
        StoreError::Crypto(_)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn writes_racing_a_flush_stay_dirty_or_persisted() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ctx.json");
    let store = std::sync::Arc::new(ContextStore::new(config(&path, false)).unwrap());

    let flusher = {
        let store = std::sync::Arc::clone(&store);
        tokio::spawn(async move {
            for _ in 0..50 {
                store.flush().await.unwrap();
                tokio::task::yield_now().await;
            }
        })
    };
    let writers: Vec<_> = (0..50)
        .map(|i| {
            let store = std::sync::Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .add(ctx("camera", "visual.objects").with_id(format!("c{i}")))
                    .await
                    .unwrap();
            })
        })
        .collect();
    for writer in writers {
        writer.await.unwrap();
    }
    flusher.await.unwrap();

    // anything not in the last snapshot must still be marked dirty
    if !store.is_dirty() {
        let restored = ContextStore::new(config(&path, false)).unwrap();
        assert_eq!(restored.load().await.unwrap(), 50);
    }
    store.flush().await.unwrap();
    assert!(!store.is_dirty());
}
