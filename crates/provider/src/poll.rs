//! Fixed-interval status polling.
//!
//! The loop distinguishes two kinds of bad news. A transient or garbled
//! response means "not yet" and polling continues. An explicit upstream
//! failure is permanent and returns at once. Running out of attempts is a
//! timeout.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::types::{JobHandle, NormalizedResult, PollStatus};
use crate::GenerationProvider;

#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Wait before each poll.
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_attempts: 60,
        }
    }
}

/// Receives progress while a generation runs.
///
/// Implementations must not block; they are awaited inline by the loop.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// The upstream accepted the job under `generation_id`.
    async fn on_submitted(&self, generation_id: &str);

    /// Upstream-reported progress, not necessarily monotonic.
    async fn on_progress(&self, percent: i64);
}

/// A sink that discards everything.
pub struct NoProgress;

#[async_trait]
impl ProgressSink for NoProgress {
    async fn on_submitted(&self, _generation_id: &str) {}
    async fn on_progress(&self, _percent: i64) {}
}

/// Poll `handle` until it completes, fails, or `config.max_attempts` runs out.
pub async fn poll_until_done(
    provider: &dyn GenerationProvider,
    handle: &JobHandle,
    config: &PollConfig,
    progress: &dyn ProgressSink,
) -> Result<NormalizedResult, ProviderError> {
    for attempt in 1..=config.max_attempts {
        tokio::time::sleep(config.interval).await;

        match provider.poll_status(handle).await {
            Ok(PollStatus::Completed(result)) => {
                tracing::debug!(
                    generation_id = %handle.generation_id,
                    attempt,
                    "Upstream generation completed",
                );
                return Ok(result);
            }
            Ok(PollStatus::Failed(reason)) => {
                tracing::warn!(
                    generation_id = %handle.generation_id,
                    attempt,
                    reason = %reason,
                    "Upstream generation failed",
                );
                return Err(ProviderError::PermanentFailure(reason));
            }
            Ok(PollStatus::Pending { progress: percent }) => {
                if let Some(percent) = percent {
                    progress.on_progress(percent).await;
                }
            }
            Err(e) if e.is_retryable() => {
                tracing::debug!(
                    generation_id = %handle.generation_id,
                    attempt,
                    error = %e,
                    "Status poll returned no usable answer, will retry",
                );
            }
            Err(e) => return Err(e),
        }
    }

    Err(ProviderError::Timeout(format!(
        "no result after {} polls at {}s intervals",
        config.max_attempts,
        config.interval.as_secs()
    )))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use assert_matches::assert_matches;
    use lumora_core::generation::GenerationType;

    use super::*;
    use crate::adapters::mock::{MockBehavior, MockProvider};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<i64>>);

    #[async_trait]
    impl ProgressSink for Recorder {
        async fn on_submitted(&self, _generation_id: &str) {}
        async fn on_progress(&self, percent: i64) {
            self.0.lock().unwrap().push(percent);
        }
    }

    fn handle() -> JobHandle {
        JobHandle {
            generation_id: "mock-1".into(),
            generation_type: GenerationType::Video,
        }
    }

    fn config(max_attempts: u32) -> PollConfig {
        PollConfig {
            interval: Duration::from_secs(10),
            max_attempts,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn completes_after_pending_polls_and_reports_progress() {
        let provider = MockProvider::new(MockBehavior::Polled { pending_polls: 2 });
        let recorder = Recorder::default();

        let result = poll_until_done(&provider, &handle(), &config(5), &recorder)
            .await
            .unwrap();

        assert_eq!(result.generation_id, "mock-1");
        assert_eq!(provider.polls(), 3);
        assert_eq!(recorder.0.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn garbled_responses_are_not_failures() {
        let provider = MockProvider::new(MockBehavior::GarbledThenComplete { garbled_polls: 3 });
        let result = poll_until_done(&provider, &handle(), &config(5), &NoProgress).await;
        assert!(result.is_ok());
        assert_eq!(provider.polls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_failure_stops_immediately() {
        let provider = MockProvider::new(MockBehavior::FailAfterPolls { pending_polls: 1 });
        let result = poll_until_done(&provider, &handle(), &config(60), &NoProgress).await;

        assert_matches!(result, Err(ProviderError::PermanentFailure(_)));
        assert_eq!(provider.polls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausting_attempts_is_a_timeout() {
        let provider = MockProvider::new(MockBehavior::NeverFinishes);
        let start = tokio::time::Instant::now();

        let result = poll_until_done(&provider, &handle(), &config(60), &NoProgress).await;

        assert_matches!(result, Err(ProviderError::Timeout(_)));
        assert_eq!(provider.polls(), 60);
        assert_eq!(start.elapsed(), Duration::from_secs(600));
    }
}
