//! Generation job entity and its state machine.
//!
//! ```text
//! pending ──► processing ──► completed
//!    │             └───────► failed
//!    ├──────────────────────► failed      (interrupted before dispatch)
//!    └──────────────────────► completed   (synchronous mock provider only)
//! ```
//!
//! Terminal states are immutable. The only write a terminal job accepts is
//! the lazily discovered `local_file_path`, which is a cache repair and not a
//! state transition.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;
use crate::generation::GenerationType;
use crate::status::JobStatus;
use crate::types::{DbId, Timestamp};

/// How a job is allowed to reach `completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionPath {
    /// The background task moved the job through `processing`.
    Standard,
    /// A synchronous (mock) provider answered inline; `pending → completed`.
    Synchronous,
}

impl JobStatus {
    /// `completed` and `failed` accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether `self → to` is a legal transition.
    pub fn can_transition_to(self, to: JobStatus, path: CompletionPath) -> bool {
        match (self, to) {
            (JobStatus::Pending, JobStatus::Processing) => true,
            (JobStatus::Processing, JobStatus::Completed) => true,
            (JobStatus::Processing, JobStatus::Failed) => true,
            (JobStatus::Pending, JobStatus::Failed) => true,
            (JobStatus::Pending, JobStatus::Completed) => path == CompletionPath::Synchronous,
            _ => false,
        }
    }

    /// Statuses a job may be in immediately before moving to `to`.
    pub fn legal_sources(to: JobStatus, path: CompletionPath) -> Vec<JobStatus> {
        JobStatus::ALL
            .iter()
            .copied()
            .filter(|from| from.can_transition_to(to, path))
            .collect()
    }
}

/// Validate a transition, returning a `Conflict` naming both ends otherwise.
pub fn ensure_transition(
    job_id: DbId,
    from: JobStatus,
    to: JobStatus,
    path: CompletionPath,
) -> Result<(), CoreError> {
    if from.can_transition_to(to, path) {
        Ok(())
    } else {
        Err(CoreError::Conflict(format!(
            "Generation job {job_id} cannot move from {from} to {to}"
        )))
    }
}

/// Clamp a provider-reported progress value into `0..=100`.
pub fn clamp_progress(percent: i64) -> i16 {
    percent.clamp(0, 100) as i16
}

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// One generation request and everything known about its outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationJob {
    pub id: DbId,
    pub user_id: DbId,
    #[serde(rename = "type")]
    pub generation_type: GenerationType,
    pub prompt: String,
    pub model_id: String,
    pub aspect_ratio: Option<String>,
    pub duration_secs: Option<i32>,
    pub status: JobStatus,
    pub progress: i16,
    pub cost_charged: i64,
    pub used_free_tier: bool,
    pub watermark: bool,
    pub reservation_id: Uuid,
    /// Upstream id, set once the provider accepts the job.
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

impl GenerationJob {
    /// Public URL clients use to fetch the media once completed.
    pub fn delivery_url(&self) -> Option<String> {
        if self.status != JobStatus::Completed {
            return None;
        }
        Some(format!(
            "/api/v1/stream/{}/{}",
            self.generation_type.as_str(),
            self.id
        ))
    }
}

/// Input for creating a `pending` job.
#[derive(Debug, Clone)]
pub struct NewGenerationJob {
    pub user_id: DbId,
    pub generation_type: GenerationType,
    pub prompt: String,
    pub model_id: String,
    pub aspect_ratio: Option<String>,
    pub duration_secs: Option<i32>,
    pub cost_charged: i64,
    pub used_free_tier: bool,
    pub watermark: bool,
    pub reservation_id: Uuid,
}

/// Fields persisted with the `completed` transition.
#[derive(Debug, Clone, Default)]
pub struct JobCompletion {
    pub generation_id: String,
    pub remote_url: String,
    pub local_file_path: Option<String>,
    pub thumbnail_url: Option<String>,
    pub format: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
