//! Provider abstraction for AI media backends.
//!
//! A [`GenerationProvider`] submits jobs and answers status polls for one
//! upstream. Retry, polling, and timeout policy are not the adapter's
//! concern; [`runner::ProviderRunner`] composes them around any adapter.

pub mod adapters;
pub mod config;
pub mod error;
pub mod normalize;
pub mod poll;
pub mod retry;
pub mod runner;
pub mod types;

use std::sync::Arc;

use async_trait::async_trait;

pub use config::{ProviderConfig, ProviderKind};
pub use error::ProviderError;
pub use poll::ProgressSink;
pub use runner::ProviderRunner;
pub use types::{JobHandle, NormalizedResult, PollStatus, ProviderRequest, Submission};

/// One upstream AI backend.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Whether `submit` always answers with a finished result. Only the
    /// in-process mock does; the orchestrator then completes the job
    /// inline without a background task.
    fn is_synchronous(&self) -> bool {
        false
    }

    /// Send one generation upstream. Called through the retry helper, so a
    /// single call must not retry on its own.
    async fn submit(&self, request: &ProviderRequest) -> Result<Submission, ProviderError>;

    /// Ask the upstream for the state of a previously submitted job.
    ///
    /// Unparseable or error-page responses must come back as
    /// [`ProviderError::Transient`] so the polling loop keeps waiting.
    async fn poll_status(&self, handle: &JobHandle) -> Result<PollStatus, ProviderError>;

    /// Rewrite a prompt into a more detailed one.
    async fn enhance_prompt(&self, prompt: &str) -> Result<String, ProviderError>;
}

/// Build the adapter selected by `config`.
pub fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn GenerationProvider>, ProviderError> {
    let provider: Arc<dyn GenerationProvider> = match config.kind {
        ProviderKind::Mock => Arc::new(adapters::mock::MockProvider::instant()),
        ProviderKind::CompetApi => Arc::new(adapters::competapi::CompetApiProvider::new(config)?),
        ProviderKind::OpenAi => Arc::new(adapters::openai::OpenAiProvider::new(config)?),
    };
    tracing::info!(provider = provider.name(), "Generation provider configured");
    Ok(provider)
}
