//! Generation request shape, validation, and pricing.
//!
//! Everything here runs before any credit is reserved, so every failure is
//! a [`CoreError::Validation`] with no financial side effects.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::catalog::ModelPricing;
use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Generation type
// ---------------------------------------------------------------------------

/// Kind of media a job produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationType {
    Image,
    Video,
}

impl GenerationType {
    pub fn as_str(self) -> &'static str {
        match self {
            GenerationType::Image => "image",
            GenerationType::Video => "video",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "image" => Some(GenerationType::Image),
            "video" => Some(GenerationType::Video),
            _ => None,
        }
    }
}

impl std::fmt::Display for GenerationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Limits and defaults
// ---------------------------------------------------------------------------

/// Upper bound on prompt length, in characters.
pub const MAX_PROMPT_CHARS: usize = 2000;

/// Video duration used when the request omits one.
pub const DEFAULT_VIDEO_DURATION_SECS: u32 = 5;
/// Shortest video a request may ask for.
pub const MIN_VIDEO_DURATION_SECS: u32 = 1;
/// Longest video a request may ask for.
pub const MAX_VIDEO_DURATION_SECS: u32 = 20;

pub const DEFAULT_IMAGE_ASPECT_RATIO: &str = "1:1";
pub const DEFAULT_VIDEO_ASPECT_RATIO: &str = "16:9";

/// Aspect ratios accepted by every provider adapter.
pub const VALID_ASPECT_RATIOS: &[&str] = &["1:1", "16:9", "9:16", "4:3", "3:4", "21:9"];

// ---------------------------------------------------------------------------
// Request spec
// ---------------------------------------------------------------------------

/// A client's generation request as received on `POST /generate`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GenerationSpec {
    #[serde(rename = "type")]
    pub generation_type: GenerationType,
    #[validate(length(min = 1, max = 2000))]
    pub prompt: String,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub aspect_ratio: Option<String>,
    #[serde(default)]
    pub duration: Option<u32>,
}

impl GenerationSpec {
    /// Check prompt bounds, aspect ratio, and duration.
    ///
    /// Image requests ignore `duration`; it is not an error to send one.
    pub fn check(&self) -> Result<(), CoreError> {
        validate_prompt(&self.prompt)?;

        if let Some(ref ratio) = self.aspect_ratio {
            if !VALID_ASPECT_RATIOS.contains(&ratio.as_str()) {
                return Err(CoreError::Validation(format!(
                    "Invalid aspect ratio '{ratio}'. Must be one of: {}",
                    VALID_ASPECT_RATIOS.join(", ")
                )));
            }
        }

        if self.generation_type == GenerationType::Video {
            if let Some(d) = self.duration {
                if !(MIN_VIDEO_DURATION_SECS..=MAX_VIDEO_DURATION_SECS).contains(&d) {
                    return Err(CoreError::Validation(format!(
                        "duration must be between {MIN_VIDEO_DURATION_SECS} and \
                         {MAX_VIDEO_DURATION_SECS} seconds"
                    )));
                }
            }
        }

        self.validate()
            .map_err(|e| CoreError::Validation(e.to_string()))
    }

    /// Duration the job will be billed and generated for.
    ///
    /// `None` for images.
    pub fn effective_duration(&self) -> Option<u32> {
        match self.generation_type {
            GenerationType::Image => None,
            GenerationType::Video => Some(self.duration.unwrap_or(DEFAULT_VIDEO_DURATION_SECS)),
        }
    }

    pub fn effective_aspect_ratio(&self) -> &str {
        match (&self.aspect_ratio, self.generation_type) {
            (Some(r), _) => r.as_str(),
            (None, GenerationType::Image) => DEFAULT_IMAGE_ASPECT_RATIO,
            (None, GenerationType::Video) => DEFAULT_VIDEO_ASPECT_RATIO,
        }
    }
}

/// Validate that a prompt is non-blank and within [`MAX_PROMPT_CHARS`].
pub fn validate_prompt(prompt: &str) -> Result<(), CoreError> {
    if prompt.trim().is_empty() {
        return Err(CoreError::Validation("prompt must not be empty".to_string()));
    }
    let chars = prompt.chars().count();
    if chars > MAX_PROMPT_CHARS {
        return Err(CoreError::Validation(format!(
            "prompt is {chars} characters, maximum is {MAX_PROMPT_CHARS}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Pricing
// ---------------------------------------------------------------------------

/// Credits a job costs under `pricing`.
///
/// Video: `ceil(cost_per_second * duration)`. Image: `cost_per_image`.
/// The product is rounded to micro-credits before the ceiling so float
/// noise (`0.1 * 30 = 3.0000000000000004`) does not add a credit.
pub fn compute_cost(
    generation_type: GenerationType,
    pricing: &ModelPricing,
    duration_secs: Option<u32>,
) -> i64 {
    match generation_type {
        GenerationType::Image => pricing.cost_per_image.max(0),
        GenerationType::Video => {
            let duration = duration_secs.unwrap_or(DEFAULT_VIDEO_DURATION_SECS) as f64;
            let raw = pricing.cost_per_second.max(0.0) * duration;
            let micro = (raw * 1_000_000.0).round() / 1_000_000.0;
            micro.ceil() as i64
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
