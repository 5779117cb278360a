//! The priority engine.
//!
//! Scores are a derived cache keyed by context type. They are recomputed when
//! the store reports an add, update or read of that type, and decayed on a
//! separate timer under `decay_lock`.

use crate::config::PriorityConfig;
use crate::error::{PriorityError, PriorityResult};
use contextmesh_fusion::FusionEngine;
use contextmesh_store::{ContextStore, TaskHandle};
use contextmesh_types::{ChangeKind, ContextEvent, Timestamp, DEFAULT_CONFIDENCE};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

/// Current importance of one context type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriorityScore {
    pub context_type: String,
    /// Decayed score, within the configured bounds.
    pub score: f64,
    /// Score at the last recomputation.
    pub base_score: f64,
    pub last_access: Timestamp,
    /// Per-type override of the decay rate.
    pub decay_rate: Option<f64>,
}

/// The four factors behind a score, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PriorityFactors {
    pub recency: f64,
    pub relevance: f64,
    pub confidence: f64,
    pub attention: f64,
}

#[derive(Debug, Default)]
struct Signals {
    relevance: HashMap<String, f64>,
    attention: HashMap<String, f64>,
    decay_rates: HashMap<String, f64>,
}

/// Computes and decays per-type priority scores.
#[derive(Debug)]
pub struct PriorityEngine {
    config: PriorityConfig,
    store: Arc<ContextStore>,
    fusion: Arc<FusionEngine>,
    score_lock: RwLock<HashMap<String, PriorityScore>>,
    signals: RwLock<Signals>,
    decay_lock: Mutex<()>,
}

fn check_unit(name: &'static str, value: f64) -> PriorityResult<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(PriorityError::InvalidSignal { name, value })
    }
}

impl PriorityEngine {
    pub fn new(
        config: PriorityConfig,
        store: Arc<ContextStore>,
        fusion: Arc<FusionEngine>,
    ) -> PriorityResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            fusion,
            score_lock: RwLock::new(HashMap::new()),
            signals: RwLock::new(Signals::default()),
            decay_lock: Mutex::new(()),
        })
    }

    /// Engine configuration.
    pub fn config(&self) -> &PriorityConfig {
        &self.config
    }

    /// Clamps a value into the configured score bounds.
    pub fn clamp_score(&self, score: f64) -> f64 {
        if score.is_nan() {
            return self.config.min_priority;
        }
        score.clamp(self.config.min_priority, self.config.max_priority)
    }

    /// `(1 - rate)^(elapsed / interval)`.
    fn decay_factor(&self, rate: f64, elapsed_ms: u64) -> f64 {
        let intervals = elapsed_ms as f64 / self.config.decay_interval_ms.max(1) as f64;
        (1.0 - rate).powf(intervals)
    }

    /// Decay rate in effect for a type.
    pub async fn effective_decay_rate(&self, context_type: &str) -> f64 {
        self.signals
            .read()
            .await
            .decay_rates
            .get(context_type)
            .copied()
            .unwrap_or(self.config.decay_rate)
    }

    /// Factor values for a type as of `now`, without touching its score.
    pub async fn factors_at(&self, context_type: &str, now: Timestamp) -> PriorityFactors {
        let (relevance, attention, rate) = {
            let signals = self.signals.read().await;
            (
                signals
                    .relevance
                    .get(context_type)
                    .copied()
                    .unwrap_or(self.config.default_relevance),
                signals
                    .attention
                    .get(context_type)
                    .copied()
                    .unwrap_or(self.config.default_attention),
                signals
                    .decay_rates
                    .get(context_type)
                    .copied()
                    .unwrap_or(self.config.decay_rate),
            )
        };

        let last_access = self
            .score_lock
            .read()
            .await
            .get(context_type)
            .map(|s| s.last_access);
        let recency = match last_access {
            Some(last) => self.decay_factor(rate, now.duration_since(last).as_millis() as u64),
            None => 1.0,
        };

        let confidence = if self.fusion.has_score(context_type).await {
            self.fusion.get_confidence_score(context_type).await
        } else {
            DEFAULT_CONFIDENCE
        };

        PriorityFactors {
            recency,
            relevance,
            confidence,
            attention,
        }
    }

    /// Weighted sum of the factors, clamped into the score bounds.
    pub fn combine(&self, factors: &PriorityFactors) -> f64 {
        let w = &self.config.weights;
        self.clamp_score(
            w.recency * factors.recency
                + w.relevance * factors.relevance
                + w.confidence * factors.confidence
                + w.attention * factors.attention,
        )
    }

    /// Recomputes a type's score and marks it accessed now.
    pub async fn calculate_priority_score(&self, context_type: &str) -> f64 {
        self.calculate_priority_score_at(context_type, Timestamp::now())
            .await
    }

    /// Recomputes a type's score as if the time were `now`.
    pub async fn calculate_priority_score_at(&self, context_type: &str, now: Timestamp) -> f64 {
        let factors = self.factors_at(context_type, now).await;
        let score = self.combine(&factors);
        let decay_rate = self
            .signals
            .read()
            .await
            .decay_rates
            .get(context_type)
            .copied();

        self.score_lock.write().await.insert(
            context_type.to_string(),
            PriorityScore {
                context_type: context_type.to_string(),
                score,
                base_score: score,
                last_access: now,
                decay_rate,
            },
        );
        debug!("Priority of {} is now {:.3}", context_type, score);
        score
    }

    /// Current score of a type, if it has one.
    pub async fn get_priority_score(&self, context_type: &str) -> Option<PriorityScore> {
        self.score_lock.read().await.get(context_type).cloned()
    }

    /// Every score, highest first.
    pub async fn get_all_priority_scores(&self) -> Vec<PriorityScore> {
        let mut scores: Vec<PriorityScore> =
            self.score_lock.read().await.values().cloned().collect();
        scores.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.context_type.cmp(&b.context_type))
        });
        scores
    }

    /// Sets how much the user is attending to a type, then rescores it.
    pub async fn update_user_attention(
        &self,
        context_type: &str,
        attention: f64,
    ) -> PriorityResult<f64> {
        check_unit("attention", attention)?;
        self.signals
            .write()
            .await
            .attention
            .insert(context_type.to_string(), attention);
        Ok(self.calculate_priority_score(context_type).await)
    }

    /// Sets how relevant a type is to the current task, then rescores it.
    pub async fn update_task_relevance(
        &self,
        context_type: &str,
        relevance: f64,
    ) -> PriorityResult<f64> {
        check_unit("relevance", relevance)?;
        self.signals
            .write()
            .await
            .relevance
            .insert(context_type.to_string(), relevance);
        Ok(self.calculate_priority_score(context_type).await)
    }

    /// Overrides the decay rate of one type.
    pub async fn set_temporal_decay_rate(
        &self,
        context_type: &str,
        rate: f64,
    ) -> PriorityResult<()> {
        if !(0.0..=1.0).contains(&rate) {
            return Err(PriorityError::InvalidDecayRate(rate));
        }
        self.signals
            .write()
            .await
            .decay_rates
            .insert(context_type.to_string(), rate);
        if let Some(score) = self.score_lock.write().await.get_mut(context_type) {
            score.decay_rate = Some(rate);
        }
        info!("Decay rate of {} set to {}", context_type, rate);
        Ok(())
    }

    /// Runs the decay pass at the current time.
    pub async fn apply_decay(&self) -> usize {
        self.apply_decay_at(Timestamp::now()).await
    }

    /// Decays every score to `base × (1 - rate)^(elapsed / interval)` as of
    /// `now`. Returns the number of scores visited.
    pub async fn apply_decay_at(&self, now: Timestamp) -> usize {
        let _pass = self.decay_lock.lock().await;
        let mut scores = self.score_lock.write().await;
        for score in scores.values_mut() {
            let rate = score.decay_rate.unwrap_or(self.config.decay_rate);
            let elapsed = now.duration_since(score.last_access).as_millis() as u64;
            score.score = self.clamp_score(score.base_score * self.decay_factor(rate, elapsed));
        }
        debug!("Decayed {} priority scores", scores.len());
        scores.len()
    }

    /// Rescores the type of an added, updated or read entry.
    pub async fn observe(&self, event: &ContextEvent) {
        if matches!(
            event.kind,
            ChangeKind::Added | ChangeKind::Updated | ChangeKind::Requested
        ) {
            self.calculate_priority_score(event.context_type()).await;
        }
    }

    /// Starts the store consumer and the decay loop.
    pub fn spawn(self: &Arc<Self>) -> TaskHandle {
        let mut tasks = TaskHandle::new("priority-engine");

        let engine = Arc::clone(self);
        tasks.spawn_consumer("store-events", self.store.subscribe(), move |event| {
            let engine = Arc::clone(&engine);
            async move { engine.observe(&event).await }
        });

        let engine = Arc::clone(self);
        tasks.spawn_periodic("decay", self.config.decay_pass_interval(), move || {
            let engine = Arc::clone(&engine);
            async move {
                engine.apply_decay().await;
            }
        });

        tasks
    }
}
