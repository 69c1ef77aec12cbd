//! Rows of the `generation_jobs` table.

use lumora_core::generation::GenerationType;
use lumora_core::job::GenerationJob;
use lumora_core::status::{JobStatus, StatusId};
use lumora_core::types::{DbId, Timestamp};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::StoreError;

/// A row from the `generation_jobs` table.
#[derive(Debug, Clone, FromRow)]
pub struct GenerationJobRow {
    pub id: DbId,
    pub user_id: DbId,
    pub generation_type: String,
    pub prompt: String,
    pub model_id: String,
    pub aspect_ratio: Option<String>,
    pub duration_secs: Option<i32>,
    pub status_id: StatusId,
    pub progress: i16,
    pub cost_charged: i64,
    pub used_free_tier: bool,
    pub watermark: bool,
    pub reservation_id: Uuid,
    pub generation_id: Option<String>,
    pub local_file_path: Option<String>,
    pub remote_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub format: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

impl TryFrom<GenerationJobRow> for GenerationJob {
    type Error = StoreError;

    fn try_from(row: GenerationJobRow) -> Result<Self, Self::Error> {
        let generation_type = GenerationType::parse(&row.generation_type).ok_or_else(|| {
            StoreError::CorruptRow(format!(
                "generation job {} has unknown type '{}'",
                row.id, row.generation_type
            ))
        })?;
        let status = JobStatus::from_id(row.status_id).ok_or_else(|| {
            StoreError::CorruptRow(format!(
                "generation job {} has unknown status id {}",
                row.id, row.status_id
            ))
        })?;
        Ok(GenerationJob {
            id: row.id,
            user_id: row.user_id,
            generation_type,
            prompt: row.prompt,
            model_id: row.model_id,
            aspect_ratio: row.aspect_ratio,
            duration_secs: row.duration_secs,
            status,
            progress: row.progress,
            cost_charged: row.cost_charged,
            used_free_tier: row.used_free_tier,
            watermark: row.watermark,
            reservation_id: row.reservation_id,
            generation_id: row.generation_id,
            local_file_path: row.local_file_path,
            remote_url: row.remote_url,
            thumbnail_url: row.thumbnail_url,
            format: row.format,
            metadata: row.metadata,
            error: row.error,
            created_at: row.created_at,
            updated_at: row.updated_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}
