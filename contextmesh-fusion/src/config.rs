//! Fusion engine configuration.

use crate::error::{FusionError, FusionResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the fusion engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Write fused results back to the store as `fusion.*` entries.
    pub publish_results: bool,
    /// Period of the background re-fusion pass (ms).
    pub fusion_interval_ms: u64,
    /// Modality key used for types whose prefix has no strategy.
    pub default_modality: String,
    /// Modalities fused by picking the most confident source.
    pub confidence_modalities: Vec<String>,
    /// Priority given to published `fusion.*` entries.
    pub result_priority: u8,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            publish_results: true,
            fusion_interval_ms: 5_000,
            default_modality: "text".to_string(),
            confidence_modalities: ["visual", "audio", "location", "sensor", "ui"]
                .into_iter()
                .map(String::from)
                .collect(),
            result_priority: 5,
        }
    }
}

impl FusionConfig {
    /// Re-fusion period.
    pub fn fusion_interval(&self) -> Duration {
        Duration::from_millis(self.fusion_interval_ms.max(1))
    }

    /// Checks the configuration. Called by `FusionEngine::new`.
    pub fn validate(&self) -> FusionResult<()> {
        if self.default_modality.is_empty() || self.default_modality.contains('.') {
            return Err(FusionError::Config(format!(
                "default_modality must be a single segment, got {:?}",
                self.default_modality
            )));
        }
        Ok(())
    }
}
