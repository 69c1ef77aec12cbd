//! Provider failure taxonomy.

/// Errors surfaced by a [`GenerationProvider`](crate::GenerationProvider)
/// and the retry/poll helpers around it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// The request itself is unacceptable. Nothing was sent upstream.
    #[error("Invalid generation request: {0}")]
    Validation(String),

    /// The upstream rejected the submission.
    #[error("Upstream error ({}): {message}", status_label(.status))]
    Upstream { status: Option<u16>, message: String },

    /// The upstream reported an explicit failure status for the job.
    #[error("Generation failed upstream: {0}")]
    PermanentFailure(String),

    /// Polling ran out of attempts or a wait exceeded its bound.
    #[error("Generation timed out: {0}")]
    Timeout(String),

    /// Network hiccup, 5xx, 429, or an unparseable body. Retried by the
    /// submission helper and treated as "not yet" by the polling loop.
    #[error("Transient upstream error: {0}")]
    Transient(String),
}

fn status_label(status: &Option<u16>) -> String {
    match status {
        Some(code) => code.to_string(),
        None => "network".to_string(),
    }
}

impl ProviderError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Transient(_) => true,
            ProviderError::Upstream { status: Some(s), .. } => *s == 429 || *s >= 500,
            ProviderError::Upstream { status: None, .. } => true,
            _ => false,
        }
    }

    /// Message safe to store on a job and show to its owner. Upstream
    /// bodies are never included.
    pub fn client_message(&self) -> &'static str {
        match self {
            ProviderError::Validation(_) => "The generation request was rejected as invalid",
            ProviderError::Upstream { .. } => "The generation service rejected the request",
            ProviderError::PermanentFailure(_) => "Generation failed",
            ProviderError::Timeout(_) => "Generation timed out",
            ProviderError::Transient(_) => "The generation service is unavailable",
        }
    }

    /// Short machine label for logs and events.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Validation(_) => "validation",
            ProviderError::Upstream { .. } => "upstream",
            ProviderError::PermanentFailure(_) => "permanent_failure",
            ProviderError::Timeout(_) => "timeout",
            ProviderError::Transient(_) => "transient",
        }
    }

    /// Collapse a retryable error that outlived its retries into the
    /// submission-rejected bucket.
    pub fn exhausted(self) -> Self {
        match self {
            ProviderError::Transient(message) => ProviderError::Upstream {
                status: None,
                message,
            },
            other => other,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return ProviderError::Transient(format!("unreadable response: {err}"));
        }
        match err.status() {
            Some(status) if status.is_client_error() && status.as_u16() != 429 => {
                ProviderError::Upstream {
                    status: Some(status.as_u16()),
                    message: err.to_string(),
                }
            }
            _ => ProviderError::Transient(err.to_string()),
        }
    }
}
