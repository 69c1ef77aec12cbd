//! Writes provider progress onto the job record.

use std::sync::atomic::{AtomicI16, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use lumora_core::job::clamp_progress;
use lumora_core::store::JobStore;
use lumora_core::types::DbId;
use lumora_provider::ProgressSink;

/// [`ProgressSink`] for one job.
///
/// Upstream callbacks are not ordered, so a value lower than the last one
/// written is dropped rather than moving the bar backwards. Store errors
/// are logged and swallowed: progress is advisory.
pub struct JobProgress {
    jobs: Arc<dyn JobStore>,
    job_id: DbId,
    last: AtomicI16,
}

impl JobProgress {
    pub fn new(jobs: Arc<dyn JobStore>, job_id: DbId) -> Self {
        Self {
            jobs,
            job_id,
            last: AtomicI16::new(0),
        }
    }
}

#[async_trait]
impl ProgressSink for JobProgress {
    async fn on_submitted(&self, generation_id: &str) {
        if let Err(e) = self.jobs.set_generation_id(self.job_id, generation_id).await {
            tracing::warn!(job_id = self.job_id, error = %e, "Failed to record generation id");
        }
    }

    async fn on_progress(&self, percent: i64) {
        let progress = clamp_progress(percent);
        if self.last.fetch_max(progress, Ordering::SeqCst) > progress {
            return;
        }
        match self.jobs.update_progress(self.job_id, progress).await {
            Ok(_) => tracing::debug!(job_id = self.job_id, progress, "Progress updated"),
            Err(e) => {
                tracing::warn!(job_id = self.job_id, error = %e, "Failed to write progress")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use lumora_core::generation::GenerationType;
    use lumora_core::job::NewGenerationJob;
    use uuid::Uuid;

    use super::*;
    use crate::memory::InMemoryStore;

    #[tokio::test]
    async fn regressions_are_dropped_and_values_clamped() {
        let store = Arc::new(InMemoryStore::new(3));
        let job = store
            .create(NewGenerationJob {
                user_id: 1,
                generation_type: GenerationType::Video,
                prompt: "p".into(),
                model_id: "kling-v1".into(),
                aspect_ratio: None,
                duration_secs: Some(5),
                cost_charged: 10,
                used_free_tier: false,
                watermark: false,
                reservation_id: Uuid::now_v7(),
            })
            .await
            .unwrap();
        let sink = JobProgress::new(store.clone(), job.id);

        sink.on_submitted("task-1").await;
        sink.on_progress(60).await;
        sink.on_progress(40).await;
        let current = store.find(job.id).await.unwrap().unwrap();
        assert_eq!(current.progress, 60);
        assert_eq!(current.generation_id.as_deref(), Some("task-1"));

        sink.on_progress(250).await;
        assert_eq!(store.find(job.id).await.unwrap().unwrap().progress, 100);
    }
}
