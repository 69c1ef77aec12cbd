//! Composes retry, timeout, and polling around an adapter.

use std::sync::Arc;
use std::time::Duration;

use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::poll::{poll_until_done, PollConfig, ProgressSink};
use crate::retry::{with_retries, RetryConfig};
use crate::types::{NormalizedResult, ProviderRequest, Submission};
use crate::GenerationProvider;

/// Drives one generation from submission to a normalized result.
#[derive(Clone)]
pub struct ProviderRunner {
    provider: Arc<dyn GenerationProvider>,
    retry: RetryConfig,
    poll: PollConfig,
    request_timeout: Duration,
}

impl ProviderRunner {
    pub fn new(
        provider: Arc<dyn GenerationProvider>,
        retry: RetryConfig,
        poll: PollConfig,
        request_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            retry,
            poll,
            request_timeout,
        }
    }

    pub fn from_config(provider: Arc<dyn GenerationProvider>, config: &ProviderConfig) -> Self {
        Self::new(
            provider,
            config.retry_config(),
            config.poll_config(),
            config.request_timeout,
        )
    }

    pub fn provider(&self) -> &Arc<dyn GenerationProvider> {
        &self.provider
    }

    pub fn is_synchronous(&self) -> bool {
        self.provider.is_synchronous()
    }

    /// Validate, submit with retries, then poll if the upstream answered
    /// with a handle.
    pub async fn generate(
        &self,
        request: &ProviderRequest,
        progress: &dyn ProgressSink,
    ) -> Result<NormalizedResult, ProviderError> {
        request.validate()?;

        let provider = self.provider.as_ref();
        let timeout = self.request_timeout;
        let submission = with_retries(&self.retry, "submit", |attempt| async move {
            tracing::debug!(
                provider = provider.name(),
                model_id = %request.model_id,
                attempt,
                "Submitting generation",
            );
            match tokio::time::timeout(timeout, provider.submit(request)).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Transient(format!(
                    "submission exceeded {}s",
                    timeout.as_secs()
                ))),
            }
        })
        .await?;

        match submission {
            Submission::Ready(result) => {
                progress.on_submitted(&result.generation_id).await;
                Ok(result)
            }
            Submission::Pending(handle) => {
                progress.on_submitted(&handle.generation_id).await;
                poll_until_done(provider, &handle, &self.poll, progress).await
            }
        }
    }

    /// Prompt enhancement with the same submission retry policy.
    pub async fn enhance_prompt(&self, prompt: &str) -> Result<String, ProviderError> {
        lumora_core::generation::validate_prompt(prompt)
            .map_err(|e| ProviderError::Validation(e.to_string()))?;
        let provider = self.provider.as_ref();
        let timeout = self.request_timeout;
        with_retries(&self.retry, "enhance_prompt", |_| async move {
            match tokio::time::timeout(timeout, provider.enhance_prompt(prompt)).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Transient("prompt enhancement timed out".into())),
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use lumora_core::generation::GenerationType;

    use super::*;
    use crate::adapters::mock::{MockBehavior, MockProvider};
    use crate::poll::NoProgress;

    fn runner(provider: Arc<MockProvider>) -> ProviderRunner {
        ProviderRunner::new(
            provider,
            RetryConfig {
                max_retries: 2,
                jitter: 0.0,
                ..Default::default()
            },
            PollConfig {
                interval: Duration::from_secs(10),
                max_attempts: 6,
            },
            Duration::from_secs(120),
        )
    }

    fn video() -> ProviderRequest {
        ProviderRequest {
            generation_type: GenerationType::Video,
            prompt: "a fox in snow".into(),
            model_id: "kling-v1".into(),
            aspect_ratio: "16:9".into(),
            duration_secs: Some(4),
            watermark: false,
        }
    }

    #[derive(Default)]
    struct Recorder {
        submitted: Mutex<Option<String>>,
        progress: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl ProgressSink for Recorder {
        async fn on_submitted(&self, generation_id: &str) {
            *self.submitted.lock().unwrap() = Some(generation_id.to_string());
        }
        async fn on_progress(&self, percent: i64) {
            self.progress.lock().unwrap().push(percent);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn polled_generation_reports_handle_and_progress() {
        let provider = Arc::new(MockProvider::new(MockBehavior::Polled { pending_polls: 2 }));
        let recorder = Recorder::default();

        let result = runner(provider.clone())
            .generate(&video(), &recorder)
            .await
            .unwrap();

        assert_eq!(result.generation_id, "mock-1");
        assert_eq!(recorder.submitted.lock().unwrap().as_deref(), Some("mock-1"));
        assert_eq!(recorder.progress.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_request_never_reaches_upstream() {
        let provider = Arc::new(MockProvider::instant());
        let mut request = video();
        request.prompt = "   ".into();

        let result = runner(provider.clone()).generate(&request, &NoProgress).await;

        assert_matches!(result, Err(ProviderError::Validation(_)));
        assert_eq!(provider.submissions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_submission_is_retried() {
        let provider = Arc::new(MockProvider::new(MockBehavior::TransientSubmissions { times: 2 }));
        let result = runner(provider.clone()).generate(&video(), &NoProgress).await;
        assert!(result.is_ok());
        assert_eq!(provider.submissions(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_submission_is_not_retried() {
        let provider = Arc::new(MockProvider::new(MockBehavior::RejectSubmission));
        let result = runner(provider.clone()).generate(&video(), &NoProgress).await;
        assert_matches!(result, Err(ProviderError::Upstream { status: Some(400), .. }));
        assert_eq!(provider.submissions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn polling_never_retries_submission() {
        let provider = Arc::new(MockProvider::new(MockBehavior::NeverFinishes));
        let result = runner(provider.clone()).generate(&video(), &NoProgress).await;
        assert_matches!(result, Err(ProviderError::Timeout(_)));
        assert_eq!(provider.submissions(), 1);
        assert_eq!(provider.polls(), 6);
    }
}
