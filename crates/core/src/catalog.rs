//! Model catalog entries: pricing, availability, and generation stats.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::generation::GenerationType;
use crate::status::ModelStatus;

impl ModelStatus {
    /// Only `active` and `beta` models accept new jobs.
    pub fn is_dispatchable(self) -> bool {
        matches!(self, ModelStatus::Active | ModelStatus::Beta)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelPricing {
    pub cost_per_second: f64,
    pub cost_per_image: i64,
}

/// Success/failure counters and rolling latency for one model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelStats {
    pub total_generations: i64,
    pub successful_generations: i64,
    pub failed_generations: i64,
    /// Mean latency over successful generations.
    pub avg_latency_ms: f64,
}

impl ModelStats {
    /// Fold one terminal outcome into the counters.
    pub fn record(&mut self, outcome: GenerationOutcome) {
        self.total_generations += 1;
        match outcome {
            GenerationOutcome::Succeeded { latency_ms } => {
                self.avg_latency_ms = rolling_average(
                    self.avg_latency_ms,
                    self.successful_generations,
                    latency_ms as f64,
                );
                self.successful_generations += 1;
            }
            GenerationOutcome::Failed => self.failed_generations += 1,
        }
    }
}

/// Terminal outcome reported to the catalog exactly once per job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationOutcome {
    Succeeded { latency_ms: u64 },
    Failed,
}

/// A read-only catalog record plus its live stats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogModel {
    pub model_id: String,
    pub display_name: String,
    #[serde(rename = "type")]
    pub generation_type: GenerationType,
    pub pricing: ModelPricing,
    pub status: ModelStatus,
    #[serde(default)]
    pub stats: ModelStats,
}

/// Turn a catalog lookup into a dispatchable model or `ModelNotFound`.
///
/// A model of the wrong media type is a validation error, not a miss.
pub fn ensure_dispatchable(
    model_id: &str,
    found: Option<CatalogModel>,
    requested: GenerationType,
) -> Result<CatalogModel, CoreError> {
    let model = found
        .filter(|m| m.status.is_dispatchable())
        .ok_or_else(|| CoreError::ModelNotFound(model_id.to_string()))?;

    if model.generation_type != requested {
        return Err(CoreError::Validation(format!(
            "Model '{model_id}' generates {}, not {requested}",
            model.generation_type
        )));
    }
    Ok(model)
}

/// Incremental mean: `prev_avg` over `prev_count` samples plus `sample`.
pub fn rolling_average(prev_avg: f64, prev_count: i64, sample: f64) -> f64 {
    if prev_count <= 0 {
        return sample;
    }
    let n = prev_count as f64;
    (prev_avg * n + sample) / (n + 1.0)
}
