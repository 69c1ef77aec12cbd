//! Rows of the `ai_models` catalog table.

use lumora_core::catalog::{CatalogModel, ModelPricing, ModelStats};
use lumora_core::generation::GenerationType;
use lumora_core::status::{ModelStatus, StatusId};
use lumora_core::types::{DbId, Timestamp};
use sqlx::FromRow;

use crate::error::StoreError;

/// A row from the `ai_models` table.
#[derive(Debug, Clone, FromRow)]
pub struct AiModelRow {
    pub id: DbId,
    pub model_id: String,
    pub display_name: String,
    pub generation_type: String,
    pub cost_per_second: f64,
    pub cost_per_image: i64,
    pub status_id: StatusId,
    pub total_generations: i64,
    pub successful_generations: i64,
    pub failed_generations: i64,
    pub avg_latency_ms: f64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TryFrom<AiModelRow> for CatalogModel {
    type Error = StoreError;

    fn try_from(row: AiModelRow) -> Result<Self, Self::Error> {
        let generation_type = GenerationType::parse(&row.generation_type).ok_or_else(|| {
            StoreError::CorruptRow(format!(
                "model '{}' has unknown type '{}'",
                row.model_id, row.generation_type
            ))
        })?;
        let status = ModelStatus::from_id(row.status_id).ok_or_else(|| {
            StoreError::CorruptRow(format!(
                "model '{}' has unknown status id {}",
                row.model_id, row.status_id
            ))
        })?;
        Ok(CatalogModel {
            model_id: row.model_id,
            display_name: row.display_name,
            generation_type,
            pricing: ModelPricing {
                cost_per_second: row.cost_per_second,
                cost_per_image: row.cost_per_image,
            },
            status,
            stats: ModelStats {
                total_generations: row.total_generations,
                successful_generations: row.successful_generations,
                failed_generations: row.failed_generations,
                avg_latency_ms: row.avg_latency_ms,
            },
        })
    }
}
