//! Priority engine configuration.

use crate::error::{PriorityError, PriorityResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Weights of the four score factors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityWeights {
    pub recency: f64,
    pub relevance: f64,
    pub confidence: f64,
    pub attention: f64,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            recency: 0.3,
            relevance: 0.4,
            confidence: 0.2,
            attention: 0.1,
        }
    }
}

impl PriorityWeights {
    fn validate(&self) -> PriorityResult<()> {
        for (name, weight) in [
            ("recency", self.recency),
            ("relevance", self.relevance),
            ("confidence", self.confidence),
            ("attention", self.attention),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(PriorityError::Config(format!(
                    "{name} weight must be a non-negative number, got {weight}"
                )));
            }
        }
        Ok(())
    }
}

/// Configuration for the priority engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityConfig {
    pub weights: PriorityWeights,
    /// Lower score bound.
    pub min_priority: f64,
    /// Upper score bound.
    pub max_priority: f64,
    /// Fraction lost per decay interval, unless overridden per type.
    pub decay_rate: f64,
    /// Length of one decay interval (ms).
    pub decay_interval_ms: u64,
    /// Relevance of types never given one.
    pub default_relevance: f64,
    /// Attention of types never given one.
    pub default_attention: f64,
    /// Period of the background decay pass (ms).
    pub decay_pass_interval_ms: u64,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            weights: PriorityWeights::default(),
            min_priority: 0.1,
            max_priority: 1.0,
            decay_rate: 0.05,
            decay_interval_ms: 60_000,
            default_relevance: 0.5,
            default_attention: 0.4,
            decay_pass_interval_ms: 60_000,
        }
    }
}

impl PriorityConfig {
    /// Decay interval as a duration.
    pub fn decay_interval(&self) -> Duration {
        Duration::from_millis(self.decay_interval_ms.max(1))
    }

    /// Decay pass period.
    pub fn decay_pass_interval(&self) -> Duration {
        Duration::from_millis(self.decay_pass_interval_ms.max(1))
    }

    /// Checks the configuration. Called by `PriorityEngine::new`.
    pub fn validate(&self) -> PriorityResult<()> {
        self.weights.validate()?;
        if !self.min_priority.is_finite()
            || !self.max_priority.is_finite()
            || self.min_priority > self.max_priority
        {
            return Err(PriorityError::Config(format!(
                "priority bounds [{}, {}] are not a valid range",
                self.min_priority, self.max_priority
            )));
        }
        if !(0.0..=1.0).contains(&self.decay_rate) {
            return Err(PriorityError::InvalidDecayRate(self.decay_rate));
        }
        for (name, value) in [
            ("default_relevance", self.default_relevance),
            ("default_attention", self.default_attention),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(PriorityError::InvalidSignal { name, value });
            }
        }
        Ok(())
    }
}
