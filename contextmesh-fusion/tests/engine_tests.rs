//! Tests for the fusion engine: source registration, per-modality fusion,
//! unified results, publishing and store mirroring.

use contextmesh_fusion::{
    Contribution, FusionConfig, FusionEngine, FusionError, FusionStrategy, GroupFusion,
    TypeInput, FUSION_SOURCE,
};
use contextmesh_store::{ContextQuery, ContextStore, StoreConfig};
use contextmesh_types::NewContext;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::{json, Value};
use std::sync::Arc;

fn store() -> Arc<ContextStore> {
    Arc::new(ContextStore::new(StoreConfig::default()).unwrap())
}

fn engine() -> FusionEngine {
    FusionEngine::new(
        FusionConfig {
            publish_results: false,
            ..FusionConfig::default()
        },
        store(),
    )
    .unwrap()
}

fn types(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn transcript_fusion_picks_most_confident_source() {
    let engine = engine();
    engine
        .add_context_source("text.transcript", "whisper", json!("hello wrld"), 0.6)
        .await
        .unwrap();
    engine
        .add_context_source("text.transcript", "cloud-asr", json!("hello world"), 0.9)
        .await
        .unwrap();

    let outcome = engine
        .fuse_context(Some(&types(&["text.transcript"])))
        .await
        .unwrap();

    let value = outcome.value("text.transcript").unwrap();
    assert_eq!(value.data, json!("hello world"));
    assert_eq!(value.source, "cloud-asr");
    assert_eq!(engine.get_confidence_score("text.transcript").await, 0.9);
    assert!(outcome.unified.is_none());
}

#[tokio::test]
async fn unknown_type_scores_default() {
    let engine = engine();
    assert_eq!(engine.get_confidence_score("visual.objects").await, 0.5);
    assert!(!engine.has_score("visual.objects").await);
}

#[tokio::test]
async fn re_adding_a_source_replaces_in_place() {
    let engine = engine();
    engine
        .add_context_source("visual.objects", "a", json!(1), 0.5)
        .await
        .unwrap();
    engine
        .add_context_source("visual.objects", "b", json!(2), 0.5)
        .await
        .unwrap();
    engine
        .add_context_source("visual.objects", "a", json!(3), 0.5)
        .await
        .unwrap();

    let contributions = engine.contributions("visual.objects").await;
    let sources: Vec<&str> = contributions.iter().map(|c| c.source.as_str()).collect();
    assert_eq!(sources, vec!["a", "b"]);
    assert_eq!(contributions[0].data, json!(3));

    // equal confidence: the first registered source wins
    let outcome = engine.fuse_context(None).await.unwrap();
    assert_eq!(outcome.value("visual.objects").unwrap().source, "a");
}

#[tokio::test]
async fn remove_context_source() {
    let engine = engine();
    engine
        .add_context_source("visual.objects", "a", json!(1), 0.9)
        .await
        .unwrap();
    engine
        .add_context_source("visual.objects", "b", json!(2), 0.4)
        .await
        .unwrap();

    assert!(engine.remove_context_source("visual.objects", "a").await);
    assert!(!engine.remove_context_source("visual.objects", "a").await);
    let outcome = engine.fuse_context(None).await.unwrap();
    assert_eq!(outcome.value("visual.objects").unwrap().data, json!(2));

    assert!(engine.remove_context_source("visual.objects", "b").await);
    assert!(engine.contributed_types().await.is_empty());
}

#[tokio::test]
async fn rejects_bad_registrations() {
    let engine = engine();
    assert!(matches!(
        engine
            .add_context_source("not a type", "a", json!(1), 0.5)
            .await,
        Err(FusionError::InvalidContextType(_))
    ));
    assert!(matches!(
        engine
            .add_context_source("visual.objects", " ", json!(1), 0.5)
            .await,
        Err(FusionError::MissingSource)
    ));
}

#[tokio::test]
async fn confidence_is_clamped() {
    let engine = engine();
    engine
        .add_context_source("visual.objects", "a", json!(1), 7.0)
        .await
        .unwrap();
    engine.fuse_context(None).await.unwrap();
    assert_eq!(engine.get_confidence_score("visual.objects").await, 1.0);
}

#[tokio::test]
async fn unknown_modality_falls_back_to_text() {
    let engine = engine();
    engine
        .add_context_source("chat.message", "slack", json!("hi"), 0.7)
        .await
        .unwrap();
    engine
        .add_context_source("text.note", "notes", json!("there"), 0.5)
        .await
        .unwrap();

    let outcome = engine.fuse_context(None).await.unwrap();
    assert_eq!(outcome.per_modality.len(), 1);
    let text = &outcome.per_modality["text"];
    assert_eq!(text.strategy, "text_concatenation");
    assert_eq!(text.types, types(&["chat.message", "text.note"]));
    assert_eq!(text.data, json!("hi\nthere"));
}

#[tokio::test]
async fn several_modalities_produce_unified_result() {
    let engine = engine();
    engine
        .add_context_source("visual.objects", "cam", json!(["cup"]), 0.8)
        .await
        .unwrap();
    engine
        .add_context_source("audio.speech", "mic", json!("pour me a coffee"), 0.6)
        .await
        .unwrap();

    let outcome = engine.fuse_context(None).await.unwrap();
    let unified = outcome.unified.unwrap();
    assert_eq!(unified.modalities, types(&["audio", "visual"]));
    assert_eq!(
        unified.data,
        json!({"audio": "pour me a coffee", "visual": ["cup"]})
    );
    assert!((unified.confidence - 0.7).abs() < 1e-12);
}

#[tokio::test]
async fn unified_confidence_is_mean_of_all_recorded_scores() {
    let engine = engine();
    engine
        .add_context_source("location.gps", "phone", json!({"lat": 1}), 1.0)
        .await
        .unwrap();
    engine
        .fuse_context(Some(&types(&["location.gps"])))
        .await
        .unwrap();

    engine
        .add_context_source("visual.objects", "cam", json!(1), 0.4)
        .await
        .unwrap();
    engine
        .add_context_source("audio.speech", "mic", json!(2), 0.4)
        .await
        .unwrap();
    let outcome = engine
        .fuse_context(Some(&types(&["visual.objects", "audio.speech"])))
        .await
        .unwrap();

    // location.gps was scored by the earlier call and still counts
    let unified = outcome.unified.unwrap();
    assert!((unified.confidence - 0.6).abs() < 1e-12);
}

#[tokio::test]
async fn requested_types_without_contributions_are_skipped() {
    let engine = engine();
    let outcome = engine
        .fuse_context(Some(&types(&["visual.objects"])))
        .await
        .unwrap();
    assert!(outcome.per_type.is_empty());
    assert!(outcome.per_modality.is_empty());
}

struct Lowest;

impl FusionStrategy for Lowest {
    fn name(&self) -> &str {
        "lowest"
    }

    fn fuse(&self, inputs: &[TypeInput]) -> GroupFusion {
        let mut per_type = Vec::new();
        for input in inputs {
            let pick = input
                .contributions
                .iter()
                .min_by(|a, b| a.confidence.total_cmp(&b.confidence))
                .unwrap();
            per_type.push(contextmesh_fusion::FusedValue {
                context_type: input.context_type.clone(),
                source: pick.source.clone(),
                data: pick.data.clone(),
                confidence: pick.confidence,
                contributors: input.contributions.len(),
            });
        }
        GroupFusion {
            data: per_type[0].data.clone(),
            confidence: per_type[0].confidence,
            per_type,
        }
    }
}

#[tokio::test]
async fn custom_strategy_replaces_builtin() {
    let engine = engine();
    engine
        .register_fusion_strategy("visual", Arc::new(Lowest))
        .await;
    engine
        .add_context_source("visual.objects", "a", json!("hi-conf"), 0.9)
        .await
        .unwrap();
    engine
        .add_context_source("visual.objects", "b", json!("lo-conf"), 0.1)
        .await
        .unwrap();

    let outcome = engine.fuse_context(None).await.unwrap();
    assert_eq!(outcome.per_modality["visual"].strategy, "lowest");
    assert_eq!(outcome.value("visual.objects").unwrap().data, json!("lo-conf"));
}

#[tokio::test]
async fn results_are_published_to_store() {
    let store = store();
    let engine = FusionEngine::new(FusionConfig::default(), Arc::clone(&store)).unwrap();
    engine
        .add_context_source("visual.objects", "cam", json!(["cup"]), 0.7)
        .await
        .unwrap();
    engine
        .add_context_source("text.transcript", "mic", json!("hi"), 0.5)
        .await
        .unwrap();

    engine.fuse_context(None).await.unwrap();
    engine.fuse_context(None).await.unwrap();

    let published = store.query(&ContextQuery::of_type("fusion.*")).await;
    let mut published_types: Vec<&str> = published
        .iter()
        .map(|e| e.context_type.as_str())
        .collect();
    published_types.sort();
    assert_eq!(
        published_types,
        vec!["fusion.text", "fusion.unified", "fusion.visual"]
    );
    assert!(published.iter().all(|e| e.source == FUSION_SOURCE));
}

#[tokio::test]
async fn store_changes_are_mirrored_as_contributions() {
    let store = store();
    let engine = Arc::new(
        FusionEngine::new(
            FusionConfig {
                publish_results: false,
                ..FusionConfig::default()
            },
            Arc::clone(&store),
        )
        .unwrap(),
    );
    let mut events = store.subscribe();

    let entry = store
        .add(NewContext::new("cam", "visual.objects", json!(["cup"])).with_confidence(0.7))
        .await
        .unwrap();
    store
        .add(NewContext::new(FUSION_SOURCE, "fusion.visual", Value::Null))
        .await
        .unwrap();
    while let Some(event) = events.try_next() {
        engine.observe(&event).await;
    }

    assert_eq!(
        engine.contributions("visual.objects").await,
        vec![Contribution {
            source: "cam".to_string(),
            data: json!(["cup"]),
            confidence: 0.7,
            timestamp: entry.timestamp,
        }]
    );
    assert_eq!(engine.contributed_types().await, types(&["visual.objects"]));

    store.remove(&entry.id).await;
    while let Some(event) = events.try_next() {
        engine.observe(&event).await;
    }
    assert!(engine.contributed_types().await.is_empty());
}

#[tokio::test]
async fn background_tasks_follow_the_store() {
    let store = store();
    let engine = Arc::new(
        FusionEngine::new(
            FusionConfig {
                fusion_interval_ms: 10,
                ..FusionConfig::default()
            },
            Arc::clone(&store),
        )
        .unwrap(),
    );
    let tasks = engine.spawn();
    assert_eq!(tasks.len(), 2);

    store
        .add(NewContext::new("cam", "visual.objects", json!(1)).with_confidence(0.6))
        .await
        .unwrap();

    let mut fused = false;
    for _ in 0..200 {
        if engine.has_score("visual.objects").await {
            fused = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    tasks.shutdown().await;
    assert!(fused);
    assert_eq!(engine.get_confidence_score("visual.objects").await, 0.6);
}

#[test]
fn invalid_default_modality_is_rejected() {
    let config = FusionConfig {
        default_modality: "a.b".to_string(),
        ..FusionConfig::default()
    };
    assert!(matches!(
        FusionEngine::new(config, store()),
        Err(FusionError::Config(_))
    ));
}

proptest! {
    #[test]
    fn fused_value_comes_from_max_confidence(
        confidences in prop::collection::vec(0.0f64..=1.0, 1..12),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            let engine = engine();
            for (i, confidence) in confidences.iter().enumerate() {
                engine
                    .add_context_source("visual.objects", &format!("src-{i}"), json!(i), *confidence)
                    .await
                    .unwrap();
            }
            let outcome = engine.fuse_context(None).await.unwrap();
            let fused = outcome.value("visual.objects").unwrap();

            let max = confidences.iter().copied().fold(f64::MIN, f64::max);
            let first_max = confidences.iter().position(|c| *c == max).unwrap();
            prop_assert_eq!(&fused.data, &json!(first_max));
            prop_assert_eq!(fused.confidence, max);
            Ok(())
        })?;
    }
}
