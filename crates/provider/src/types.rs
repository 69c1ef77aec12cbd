//! Request and result shapes shared by every adapter.

use lumora_core::generation::{validate_prompt, GenerationType};
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// One generation as handed to an adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    pub generation_type: GenerationType,
    pub prompt: String,
    pub model_id: String,
    pub aspect_ratio: String,
    /// Seconds; `None` for images.
    pub duration_secs: Option<u32>,
    /// Free-tier output is watermarked upstream when the backend supports it.
    pub watermark: bool,
}

impl ProviderRequest {
    /// Cheap local checks run before anything is sent upstream.
    pub fn validate(&self) -> Result<(), ProviderError> {
        validate_prompt(&self.prompt).map_err(|e| ProviderError::Validation(e.to_string()))?;
        if self.model_id.trim().is_empty() {
            return Err(ProviderError::Validation("model id must not be empty".into()));
        }
        if self.generation_type == GenerationType::Video && self.duration_secs.is_none() {
            return Err(ProviderError::Validation(
                "video requests need a duration".into(),
            ));
        }
        Ok(())
    }
}

/// Opaque reference to an upstream job that must be polled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub generation_id: String,
    pub generation_type: GenerationType,
}

/// Uniform result shape regardless of which upstream served the job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedResult {
    pub remote_url: String,
    pub local_path: Option<String>,
    pub generation_id: String,
    pub format: String,
    pub thumbnail_url: Option<String>,
    /// Raw upstream payload, kept for support and debugging.
    pub metadata: Option<serde_json::Value>,
}

/// What a submission produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// The upstream answered with the finished asset.
    Ready(NormalizedResult),
    /// The upstream accepted the job; poll the handle for the outcome.
    Pending(JobHandle),
}

/// One poll of an upstream job.
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus {
    Pending { progress: Option<i64> },
    Completed(NormalizedResult),
    /// Explicit upstream failure. Never retried.
    Failed(String),
}
