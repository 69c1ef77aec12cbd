//! Repository for the `ai_models` catalog.

use lumora_core::catalog::GenerationOutcome;
use lumora_core::status::{ModelStatus, StatusId};
use sqlx::PgPool;

use crate::models::ai_model::AiModelRow;

/// Column list for `ai_models` queries.
const COLUMNS: &str = "\
    id, model_id, display_name, generation_type, cost_per_second, cost_per_image, \
    status_id, total_generations, successful_generations, failed_generations, \
    avg_latency_ms, created_at, updated_at";

/// Statuses that accept new jobs.
const DISPATCHABLE_STATUSES: [StatusId; 2] =
    [ModelStatus::Active as StatusId, ModelStatus::Beta as StatusId];

pub struct AiModelRepo;

impl AiModelRepo {
    pub async fn find_by_model_id(
        pool: &PgPool,
        model_id: &str,
    ) -> Result<Option<AiModelRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM ai_models WHERE model_id = $1");
        sqlx::query_as::<_, AiModelRow>(&query)
            .bind(model_id)
            .fetch_optional(pool)
            .await
    }

    /// Active and beta models, optionally of one `generation_type`.
    pub async fn list_dispatchable(
        pool: &PgPool,
        generation_type: Option<&str>,
    ) -> Result<Vec<AiModelRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM ai_models \
             WHERE status_id = ANY($1) \
               AND ($2::TEXT IS NULL OR generation_type = $2) \
             ORDER BY generation_type, display_name"
        );
        sqlx::query_as::<_, AiModelRow>(&query)
            .bind(&DISPATCHABLE_STATUSES[..])
            .bind(generation_type)
            .fetch_all(pool)
            .await
    }

    /// Fold one terminal outcome into the model's counters.
    ///
    /// The latency average is updated in the same statement, reading the
    /// pre-update counters, so concurrent outcomes cannot interleave.
    pub async fn record_outcome(
        pool: &PgPool,
        model_id: &str,
        outcome: GenerationOutcome,
    ) -> Result<bool, sqlx::Error> {
        let result = match outcome {
            GenerationOutcome::Succeeded { latency_ms } => {
                sqlx::query(
                    "UPDATE ai_models \
                     SET total_generations = total_generations + 1, \
                         successful_generations = successful_generations + 1, \
                         avg_latency_ms = (avg_latency_ms * successful_generations + $2) \
                                          / (successful_generations + 1), \
                         updated_at = NOW() \
                     WHERE model_id = $1",
                )
                .bind(model_id)
                .bind(latency_ms as f64)
                .execute(pool)
                .await?
            }
            GenerationOutcome::Failed => {
                sqlx::query(
                    "UPDATE ai_models \
                     SET total_generations = total_generations + 1, \
                         failed_generations = failed_generations + 1, \
                         updated_at = NOW() \
                     WHERE model_id = $1",
                )
                .bind(model_id)
                .execute(pool)
                .await?
            }
        };
        Ok(result.rows_affected() == 1)
    }
}
