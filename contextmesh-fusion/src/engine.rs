//! The fusion engine.
//!
//! Keeps every source's latest contribution per context type (a derived
//! cache, never persisted), groups types by modality and runs the modality's
//! strategy. The registration lock covers the contribution map; the score
//! lock covers recorded per-type confidences.

use crate::config::FusionConfig;
use crate::error::{FusionError, FusionResult};
use crate::strategy::{
    Contribution, FusedValue, FusionStrategy, HighestConfidence, TextConcatenation, TypeInput,
};
use contextmesh_store::{ContextStore, TaskHandle};
use contextmesh_types::{
    clamp_confidence, validate_context_type, ChangeOrigin, ContextEvent, NewContext,
    DEFAULT_CONFIDENCE,
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Source name on entries the engine publishes.
pub const FUSION_SOURCE: &str = "fusion-engine";

/// Type namespace of published results.
pub const FUSION_NAMESPACE: &str = "fusion";

/// Result of fusing one modality group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupResult {
    pub modality: String,
    pub strategy: String,
    pub types: Vec<String>,
    pub data: Value,
    pub confidence: f64,
}

/// Result of the cross-modality pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnifiedResult {
    pub modalities: Vec<String>,
    /// Object keyed by modality.
    pub data: Value,
    /// Mean of every per-type confidence recorded so far.
    pub confidence: f64,
}

/// Everything one `fuse_context` call produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FusionOutcome {
    pub per_type: BTreeMap<String, FusedValue>,
    pub per_modality: BTreeMap<String, GroupResult>,
    pub unified: Option<UnifiedResult>,
}

impl FusionOutcome {
    /// Fused value for one type.
    pub fn value(&self, context_type: &str) -> Option<&FusedValue> {
        self.per_type.get(context_type)
    }
}

#[derive(Default)]
struct Registry {
    contributions: BTreeMap<String, Vec<Contribution>>,
    changed: bool,
}

/// Merges same-type contributions from many sources.
pub struct FusionEngine {
    config: FusionConfig,
    store: Arc<ContextStore>,
    registration_lock: RwLock<Registry>,
    score_lock: RwLock<HashMap<String, f64>>,
    strategies: RwLock<HashMap<String, Arc<dyn FusionStrategy>>>,
}

impl std::fmt::Debug for FusionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FusionEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl FusionEngine {
    /// Creates an engine publishing into `store`, with the built-in
    /// strategies registered.
    pub fn new(config: FusionConfig, store: Arc<ContextStore>) -> FusionResult<Self> {
        config.validate()?;

        let mut strategies: HashMap<String, Arc<dyn FusionStrategy>> = HashMap::new();
        strategies.insert(config.default_modality.clone(), Arc::new(TextConcatenation));
        for modality in &config.confidence_modalities {
            strategies.insert(modality.clone(), Arc::new(HighestConfidence));
        }

        Ok(Self {
            config,
            store,
            registration_lock: RwLock::new(Registry::default()),
            score_lock: RwLock::new(HashMap::new()),
            strategies: RwLock::new(strategies),
        })
    }

    /// Engine configuration.
    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Records (or replaces) one source's contribution to a type.
    ///
    /// A source that already contributed keeps its registration position.
    pub async fn add_context_source(
        &self,
        context_type: &str,
        source: &str,
        data: Value,
        confidence: f64,
    ) -> FusionResult<()> {
        self.add_contribution(context_type, Contribution::new(source, data, confidence))
            .await
    }

    /// Records a contribution with an explicit timestamp.
    pub async fn add_contribution(
        &self,
        context_type: &str,
        mut contribution: Contribution,
    ) -> FusionResult<()> {
        validate_context_type(context_type)?;
        if contribution.source.trim().is_empty() {
            return Err(FusionError::MissingSource);
        }
        contribution.confidence = clamp_confidence(contribution.confidence);

        let mut registry = self.registration_lock.write().await;
        let slot = registry
            .contributions
            .entry(context_type.to_string())
            .or_default();
        match slot.iter_mut().find(|c| c.source == contribution.source) {
            Some(existing) => *existing = contribution,
            None => slot.push(contribution),
        }
        registry.changed = true;
        Ok(())
    }

    /// Drops a source's contribution. Returns true if there was one.
    pub async fn remove_context_source(&self, context_type: &str, source: &str) -> bool {
        let mut registry = self.registration_lock.write().await;
        let Some(slot) = registry.contributions.get_mut(context_type) else {
            return false;
        };
        let before = slot.len();
        slot.retain(|c| c.source != source);
        let removed = slot.len() != before;
        if slot.is_empty() {
            registry.contributions.remove(context_type);
        }
        if removed {
            registry.changed = true;
        }
        removed
    }

    /// Current contributions to a type, in registration order.
    pub async fn contributions(&self, context_type: &str) -> Vec<Contribution> {
        self.registration_lock
            .read()
            .await
            .contributions
            .get(context_type)
            .cloned()
            .unwrap_or_default()
    }

    /// Types with at least one contribution.
    pub async fn contributed_types(&self) -> Vec<String> {
        self.registration_lock
            .read()
            .await
            .contributions
            .keys()
            .cloned()
            .collect()
    }

    /// Registers (or replaces) the strategy for a modality key.
    pub async fn register_fusion_strategy(
        &self,
        modality: impl Into<String>,
        strategy: Arc<dyn FusionStrategy>,
    ) {
        let modality = modality.into();
        info!("Registered fusion strategy {} for {}", strategy.name(), modality);
        self.strategies.write().await.insert(modality, strategy);
    }

    /// Last recorded confidence for a type, or 0.5 if never fused.
    pub async fn get_confidence_score(&self, context_type: &str) -> f64 {
        self.score_lock
            .read()
            .await
            .get(context_type)
            .copied()
            .unwrap_or(DEFAULT_CONFIDENCE)
    }

    /// Returns true if the type has been fused at least once.
    pub async fn has_score(&self, context_type: &str) -> bool {
        self.score_lock.read().await.contains_key(context_type)
    }

    /// Fuses the given types, or every contributed type.
    ///
    /// Types are grouped by modality key. When more than one group took
    /// part, the group results are combined into a unified result.
    pub async fn fuse_context(&self, types: Option<&[String]>) -> FusionResult<FusionOutcome> {
        let inputs: Vec<TypeInput> = {
            let mut registry = self.registration_lock.write().await;
            registry.changed = false;
            let pick = |context_type: &String| {
                registry
                    .contributions
                    .get(context_type)
                    .filter(|c| !c.is_empty())
                    .map(|contributions| TypeInput {
                        context_type: context_type.clone(),
                        contributions: contributions.clone(),
                    })
            };
            match types {
                Some(types) => types.iter().filter_map(pick).collect(),
                None => registry.contributions.keys().filter_map(pick).collect(),
            }
        };

        let mut groups: BTreeMap<String, (Arc<dyn FusionStrategy>, Vec<TypeInput>)> =
            BTreeMap::new();
        {
            let strategies = self.strategies.read().await;
            for input in inputs {
                let prefix = modality_of(&input.context_type);
                let (key, strategy) = match strategies.get(prefix) {
                    Some(strategy) => (prefix.to_string(), Arc::clone(strategy)),
                    None => match strategies.get(&self.config.default_modality) {
                        Some(strategy) => (self.config.default_modality.clone(), Arc::clone(strategy)),
                        None => (
                            self.config.default_modality.clone(),
                            Arc::new(TextConcatenation) as Arc<dyn FusionStrategy>,
                        ),
                    },
                };
                groups
                    .entry(key)
                    .or_insert_with(|| (strategy, Vec::new()))
                    .1
                    .push(input);
            }
        }

        let mut outcome = FusionOutcome::default();
        for (modality, (strategy, inputs)) in groups {
            let fused = strategy.fuse(&inputs);
            debug!(
                "Fused {} types for modality {} with {}",
                inputs.len(),
                modality,
                strategy.name()
            );
            outcome.per_modality.insert(
                modality.clone(),
                GroupResult {
                    modality,
                    strategy: strategy.name().to_string(),
                    types: inputs.iter().map(|i| i.context_type.clone()).collect(),
                    data: fused.data,
                    confidence: fused.confidence,
                },
            );
            for value in fused.per_type {
                outcome.per_type.insert(value.context_type.clone(), value);
            }
        }

        let mean_score = {
            let mut scores = self.score_lock.write().await;
            for (context_type, value) in &outcome.per_type {
                scores.insert(context_type.clone(), value.confidence);
            }
            if scores.is_empty() {
                DEFAULT_CONFIDENCE
            } else {
                scores.values().sum::<f64>() / scores.len() as f64
            }
        };

        if outcome.per_modality.len() > 1 {
            let data: Map<String, Value> = outcome
                .per_modality
                .iter()
                .map(|(modality, group)| (modality.clone(), group.data.clone()))
                .collect();
            outcome.unified = Some(UnifiedResult {
                modalities: outcome.per_modality.keys().cloned().collect(),
                data: Value::Object(data),
                confidence: mean_score,
            });
        }

        if self.config.publish_results {
            self.publish(&outcome).await?;
        }
        Ok(outcome)
    }

    /// Writes group and unified results into the store under fixed ids, so
    /// each fusion replaces the previous result.
    async fn publish(&self, outcome: &FusionOutcome) -> FusionResult<()> {
        let mut published = Vec::new();
        for (modality, group) in &outcome.per_modality {
            published.push((
                format!("{FUSION_NAMESPACE}.{modality}"),
                group.data.clone(),
                group.confidence,
            ));
        }
        if let Some(unified) = &outcome.unified {
            published.push((
                format!("{FUSION_NAMESPACE}.unified"),
                unified.data.clone(),
                unified.confidence,
            ));
        }

        for (context_type, data, confidence) in published {
            let context = NewContext::new(FUSION_SOURCE, context_type.as_str(), data)
                .with_id(context_type.as_str())
                .with_confidence(confidence)
                .with_priority(self.config.result_priority);
            self.store
                .add_with_origin(context, ChangeOrigin::Local)
                .await
                .inspect_err(|e| warn!("Failed to publish {}: {}", context_type, e))?;
        }
        Ok(())
    }

    async fn has_pending_changes(&self) -> bool {
        self.registration_lock.read().await.changed
    }

    /// Mirrors a store change into the contribution map. Derived `fusion.*`
    /// entries are ignored.
    pub async fn observe(&self, event: &ContextEvent) {
        let entry = &event.entry;
        if modality_of(&entry.context_type) == FUSION_NAMESPACE {
            return;
        }
        match event.kind {
            kind if kind.is_upsert() => {
                let contribution = Contribution {
                    source: entry.source.clone(),
                    data: entry.data.clone(),
                    confidence: entry.confidence,
                    timestamp: entry.timestamp,
                };
                if let Err(e) = self.add_contribution(&entry.context_type, contribution).await {
                    warn!("Ignoring contribution for {}: {}", entry.context_type, e);
                }
            }
            kind if kind.is_removal() => {
                self.remove_context_source(&entry.context_type, &entry.source)
                    .await;
            }
            _ => {}
        }
    }

    /// Starts the store consumer and the periodic re-fusion pass.
    pub fn spawn(self: &Arc<Self>) -> TaskHandle {
        let mut tasks = TaskHandle::new("fusion-engine");

        let engine = Arc::clone(self);
        tasks.spawn_consumer("store-events", self.store.subscribe(), move |event| {
            let engine = Arc::clone(&engine);
            async move { engine.observe(&event).await }
        });

        let engine = Arc::clone(self);
        tasks.spawn_periodic("refuse", self.config.fusion_interval(), move || {
            let engine = Arc::clone(&engine);
            async move {
                if !engine.has_pending_changes().await {
                    return;
                }
                match engine.fuse_context(None).await {
                    Ok(outcome) => debug!(
                        "Background fusion covered {} types",
                        outcome.per_type.len()
                    ),
                    Err(e) => warn!("Background fusion failed: {}", e),
                }
            }
        });

        tasks
    }
}

/// Modality key of a type: its first dotted segment.
pub fn modality_of(context_type: &str) -> &str {
    context_type.split('.').next().unwrap_or(context_type)
}
