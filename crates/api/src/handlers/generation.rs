//! Handlers for requesting generations and following their progress.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use lumora_core::error::CoreError;
use lumora_core::generation::{GenerationSpec, GenerationType};
use lumora_core::job::GenerationJob;
use lumora_core::rate_limit::RateLimitDecision;
use lumora_core::status::JobStatus;
use lumora_core::types::DbId;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationAccepted {
    pub job_id: DbId,
    pub status: JobStatus,
    pub credits_remaining: i64,
    pub free_generations_left: i32,
    pub watermark: bool,
    pub status_url: String,
    /// Set when the job finished inline.
    pub url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationStatus {
    pub job_id: DbId,
    #[serde(rename = "type")]
    pub generation_type: GenerationType,
    pub status: JobStatus,
    pub progress: i16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&GenerationJob> for GenerationStatus {
    fn from(job: &GenerationJob) -> Self {
        let thumbnail_url = match (job.generation_type, job.status) {
            (GenerationType::Video, JobStatus::Completed) => {
                Some(format!("/api/v1/stream/video/{}/thumbnail", job.id))
            }
            _ => None,
        };
        Self {
            job_id: job.id,
            generation_type: job.generation_type,
            status: job.status,
            progress: job.progress,
            url: job.delivery_url(),
            thumbnail_url,
            error: job.error.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EnhancePromptRequest {
    pub prompt: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancedPrompt {
    pub original: String,
    pub enhanced: String,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Load a job the caller may see. Someone else's job is reported as missing.
async fn find_owned_job(state: &AppState, user: &AuthUser, id: DbId) -> AppResult<GenerationJob> {
    state
        .stores
        .jobs
        .find(id)
        .await?
        .filter(|job| user.can_access(job.user_id))
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "GenerationJob",
            id,
        }))
}

async fn enforce_rate_limit(state: &AppState, user: &AuthUser) -> AppResult<()> {
    let key = format!("generate:{}", user.user_id);
    match state.rate_limiter.acquire(&key).await {
        RateLimitDecision::Allowed { .. } => Ok(()),
        RateLimitDecision::Limited { retry_after } => {
            tracing::info!(user_id = user.user_id, "Generation rate limit exceeded");
            Err(AppError::Core(CoreError::RateLimited {
                retry_after_secs: retry_after.as_secs().max(1),
            }))
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /generate
///
/// Reserves funds, creates the job, and returns 202 before the provider is
/// involved. Failures after this point are recorded on the job.
pub async fn request_generation(
    State(state): State<AppState>,
    user: AuthUser,
    Json(spec): Json<GenerationSpec>,
) -> AppResult<impl IntoResponse> {
    enforce_rate_limit(&state, &user).await?;

    let ticket = state
        .orchestrator
        .request_generation(user.user_id, spec)
        .await?;

    let job = &ticket.job;
    let accepted = GenerationAccepted {
        job_id: job.id,
        status: job.status,
        credits_remaining: ticket.credits_remaining,
        free_generations_left: ticket.free_generations_left,
        watermark: job.watermark,
        status_url: format!("/api/v1/generation/{}/status", job.id),
        url: job.delivery_url(),
    };
    Ok((StatusCode::ACCEPTED, Json(DataResponse { data: accepted })))
}

/// POST /generate/enhance-prompt
pub async fn enhance_prompt(
    State(state): State<AppState>,
    user: AuthUser,
    Json(input): Json<EnhancePromptRequest>,
) -> AppResult<Json<DataResponse<EnhancedPrompt>>> {
    let enhanced = state.orchestrator.enhance_prompt(&input.prompt).await?;
    tracing::debug!(user_id = user.user_id, "Prompt enhanced");
    Ok(Json(DataResponse {
        data: EnhancedPrompt {
            original: input.prompt,
            enhanced,
        },
    }))
}

/// GET /generation/{id}/status
pub async fn generation_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<GenerationStatus>>> {
    let job = find_owned_job(&state, &user, id).await?;
    Ok(Json(DataResponse {
        data: GenerationStatus::from(&job),
    }))
}

/// GET /generation/{id}
pub async fn get_generation(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<GenerationJob>>> {
    let job = find_owned_job(&state, &user, id).await?;
    Ok(Json(DataResponse { data: job }))
}

/// GET /generations?limit&offset
pub async fn list_generations(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<ListParams>,
) -> AppResult<Json<DataResponse<Vec<GenerationJob>>>> {
    let jobs = state
        .stores
        .jobs
        .list_for_user(
            user.user_id,
            params.limit.unwrap_or(20),
            params.offset.unwrap_or(0),
        )
        .await?;
    Ok(Json(DataResponse { data: jobs }))
}
