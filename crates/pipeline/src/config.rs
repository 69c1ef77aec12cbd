use std::path::PathBuf;
use std::time::Duration;

use lumora_core::generation::GenerationType;
use lumora_core::ledger::DEFAULT_FREE_GENERATION_ALLOTMENT;

/// Orchestration and media cache settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub default_image_model: String,
    pub default_video_model: String,
    pub free_generation_allotment: i32,
    /// Background generations allowed to talk to the provider at once.
    pub max_concurrent_generations: usize,
    /// Hard bound on one background generation, provider waits included.
    pub generation_deadline: Duration,
    /// Non-terminal jobs untouched for this long are treated as orphaned.
    pub stale_job_after: Duration,
    pub media_dir: PathBuf,
    /// Download completed assets into `media_dir`.
    pub cache_downloads: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_image_model: "flux-schnell".into(),
            default_video_model: "kling-v1".into(),
            free_generation_allotment: DEFAULT_FREE_GENERATION_ALLOTMENT,
            max_concurrent_generations: 16,
            generation_deadline: Duration::from_secs(20 * 60),
            stale_job_after: Duration::from_secs(30 * 60),
            media_dir: PathBuf::from("storage/media"),
            cache_downloads: true,
        }
    }
}

impl PipelineConfig {
    /// Load from environment variables. `generation_deadline` is not read
    /// here; it is derived from the provider configuration by the caller.
    ///
    /// | Env Var                      | Default         |
    /// |------------------------------|-----------------|
    /// | `DEFAULT_IMAGE_MODEL`        | `flux-schnell`  |
    /// | `DEFAULT_VIDEO_MODEL`        | `kling-v1`      |
    /// | `FREE_GENERATION_ALLOTMENT`  | `3`             |
    /// | `MAX_CONCURRENT_GENERATIONS` | `16`            |
    /// | `STALE_JOB_AFTER_SECS`       | `1800`          |
    /// | `MEDIA_DIR`                  | `storage/media` |
    /// | `MEDIA_CACHE_DOWNLOAD`       | `true`          |
    ///
    /// # Panics
    ///
    /// Panics if a numeric or boolean variable cannot be parsed.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let free_generation_allotment: i32 = std::env::var("FREE_GENERATION_ALLOTMENT")
            .unwrap_or_else(|_| DEFAULT_FREE_GENERATION_ALLOTMENT.to_string())
            .parse()
            .expect("FREE_GENERATION_ALLOTMENT must be a valid i32");
        assert!(
            free_generation_allotment >= 0,
            "FREE_GENERATION_ALLOTMENT must not be negative"
        );

        let max_concurrent_generations: usize = std::env::var("MAX_CONCURRENT_GENERATIONS")
            .unwrap_or_else(|_| "16".into())
            .parse()
            .expect("MAX_CONCURRENT_GENERATIONS must be a valid usize");

        let stale_secs: u64 = std::env::var("STALE_JOB_AFTER_SECS")
            .unwrap_or_else(|_| "1800".into())
            .parse()
            .expect("STALE_JOB_AFTER_SECS must be a valid u64");

        let cache_downloads: bool = std::env::var("MEDIA_CACHE_DOWNLOAD")
            .unwrap_or_else(|_| "true".into())
            .parse()
            .expect("MEDIA_CACHE_DOWNLOAD must be true or false");

        Self {
            default_image_model: std::env::var("DEFAULT_IMAGE_MODEL")
                .unwrap_or(defaults.default_image_model),
            default_video_model: std::env::var("DEFAULT_VIDEO_MODEL")
                .unwrap_or(defaults.default_video_model),
            free_generation_allotment,
            max_concurrent_generations: max_concurrent_generations.max(1),
            generation_deadline: defaults.generation_deadline,
            stale_job_after: Duration::from_secs(stale_secs),
            media_dir: std::env::var("MEDIA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.media_dir),
            cache_downloads,
        }
    }

    /// Adopt the provider's overall deadline, keeping the stale threshold
    /// above it so the recovery sweep never fails a job that is still
    /// legitimately running.
    pub fn with_generation_deadline(mut self, deadline: Duration) -> Self {
        self.generation_deadline = deadline;
        let floor = deadline + Duration::from_secs(60);
        if self.stale_job_after < floor {
            tracing::warn!(
                configured_secs = self.stale_job_after.as_secs(),
                raised_to_secs = floor.as_secs(),
                "STALE_JOB_AFTER_SECS is below the generation deadline, raising it",
            );
            self.stale_job_after = floor;
        }
        self
    }

    pub fn default_model(&self, generation_type: GenerationType) -> &str {
        match generation_type {
            GenerationType::Image => &self.default_image_model,
            GenerationType::Video => &self.default_video_model,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_threshold_is_kept_above_deadline() {
        let config = PipelineConfig {
            stale_job_after: Duration::from_secs(60),
            ..Default::default()
        }
        .with_generation_deadline(Duration::from_secs(1200));
        assert_eq!(config.stale_job_after, Duration::from_secs(1260));
    }

    #[test]
    fn default_model_per_type() {
        let config = PipelineConfig::default();
        assert_eq!(config.default_model(GenerationType::Image), "flux-schnell");
        assert_eq!(config.default_model(GenerationType::Video), "kling-v1");
    }
}
