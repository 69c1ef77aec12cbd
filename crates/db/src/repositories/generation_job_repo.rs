//! Repository for the `generation_jobs` table.
//!
//! Every status-changing `UPDATE` carries a `status_id = ANY(...)` guard
//! listing the legal source statuses, so a terminal job is never modified
//! and a lost race shows up as zero rows affected.

use lumora_core::job::{CompletionPath, JobCompletion, NewGenerationJob};
use lumora_core::status::{JobStatus, StatusId};
use lumora_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use crate::models::generation_job::GenerationJobRow;

/// Column list for `generation_jobs` queries.
const COLUMNS: &str = "\
    id, user_id, generation_type, prompt, model_id, aspect_ratio, duration_secs, \
    status_id, progress, cost_charged, used_free_tier, watermark, reservation_id, \
    generation_id, local_file_path, remote_url, thumbnail_url, format, metadata, error, \
    created_at, updated_at, started_at, completed_at";

/// Maximum page size for job listing.
const MAX_LIMIT: i64 = 100;

/// Statuses that still accept progress and transitions.
const ACTIVE_STATUSES: [StatusId; 2] = [
    JobStatus::Pending as StatusId,
    JobStatus::Processing as StatusId,
];

fn source_ids(to: JobStatus, path: CompletionPath) -> Vec<StatusId> {
    JobStatus::legal_sources(to, path)
        .into_iter()
        .map(JobStatus::id)
        .collect()
}

pub struct GenerationJobRepo;

impl GenerationJobRepo {
    /// Insert a `pending` job.
    pub async fn create(
        pool: &PgPool,
        input: &NewGenerationJob,
    ) -> Result<GenerationJobRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO generation_jobs \
                 (user_id, generation_type, prompt, model_id, aspect_ratio, duration_secs, \
                  status_id, cost_charged, used_free_tier, watermark, reservation_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, GenerationJobRow>(&query)
            .bind(input.user_id)
            .bind(input.generation_type.as_str())
            .bind(&input.prompt)
            .bind(&input.model_id)
            .bind(&input.aspect_ratio)
            .bind(input.duration_secs)
            .bind(JobStatus::Pending.id())
            .bind(input.cost_charged)
            .bind(input.used_free_tier)
            .bind(input.watermark)
            .bind(input.reservation_id)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(
        pool: &PgPool,
        id: DbId,
    ) -> Result<Option<GenerationJobRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM generation_jobs WHERE id = $1");
        sqlx::query_as::<_, GenerationJobRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// A user's jobs, newest first.
    pub async fn list_for_user(
        pool: &PgPool,
        user_id: DbId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<GenerationJobRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM generation_jobs \
             WHERE user_id = $1 \
             ORDER BY created_at DESC, id DESC \
             LIMIT $2 OFFSET $3"
        );
        sqlx::query_as::<_, GenerationJobRow>(&query)
            .bind(user_id)
            .bind(limit.clamp(1, MAX_LIMIT))
            .bind(offset.max(0))
            .fetch_all(pool)
            .await
    }

    /// `pending -> processing`.
    pub async fn mark_processing(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE generation_jobs \
             SET status_id = $2, started_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND status_id = ANY($3)",
        )
        .bind(id)
        .bind(JobStatus::Processing.id())
        .bind(source_ids(JobStatus::Processing, CompletionPath::Standard))
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn update_progress(
        pool: &PgPool,
        id: DbId,
        progress: i16,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE generation_jobs SET progress = $2, updated_at = NOW() \
             WHERE id = $1 AND status_id = ANY($3)",
        )
        .bind(id)
        .bind(progress)
        .bind(&ACTIVE_STATUSES[..])
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn set_generation_id(
        pool: &PgPool,
        id: DbId,
        generation_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE generation_jobs SET generation_id = $2, updated_at = NOW() \
             WHERE id = $1 AND status_id = ANY($3)",
        )
        .bind(id)
        .bind(generation_id)
        .bind(&ACTIVE_STATUSES[..])
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Move to `completed`, persisting the normalized provider result.
    pub async fn complete(
        pool: &PgPool,
        id: DbId,
        completion: &JobCompletion,
        path: CompletionPath,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE generation_jobs \
             SET status_id = $2, progress = 100, generation_id = $3, remote_url = $4, \
                 local_file_path = COALESCE($5, local_file_path), thumbnail_url = $6, \
                 format = $7, metadata = $8, error = NULL, \
                 completed_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND status_id = ANY($9)",
        )
        .bind(id)
        .bind(JobStatus::Completed.id())
        .bind(&completion.generation_id)
        .bind(&completion.remote_url)
        .bind(&completion.local_file_path)
        .bind(&completion.thumbnail_url)
        .bind(&completion.format)
        .bind(&completion.metadata)
        .bind(source_ids(JobStatus::Completed, path))
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Move to `failed` with a client-safe message.
    pub async fn fail(pool: &PgPool, id: DbId, error: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE generation_jobs \
             SET status_id = $2, error = $3, completed_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND status_id = ANY($4)",
        )
        .bind(id)
        .bind(JobStatus::Failed.id())
        .bind(error)
        .bind(source_ids(JobStatus::Failed, CompletionPath::Standard))
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Cache repair on a completed job. Leaves `status_id` and
    /// `updated_at` untouched.
    pub async fn record_local_path(
        pool: &PgPool,
        id: DbId,
        path: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE generation_jobs SET local_file_path = $2 \
             WHERE id = $1 AND status_id = $3",
        )
        .bind(id)
        .bind(path)
        .bind(JobStatus::Completed.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Non-terminal jobs untouched since `older_than`, oldest first.
    pub async fn find_stale(
        pool: &PgPool,
        older_than: Timestamp,
    ) -> Result<Vec<GenerationJobRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM generation_jobs \
             WHERE status_id = ANY($1) AND updated_at < $2 \
             ORDER BY updated_at ASC"
        );
        sqlx::query_as::<_, GenerationJobRow>(&query)
            .bind(&ACTIVE_STATUSES[..])
            .bind(older_than)
            .fetch_all(pool)
            .await
    }
}
