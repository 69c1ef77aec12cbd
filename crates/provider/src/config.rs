use std::time::Duration;

use crate::poll::PollConfig;
use crate::retry::RetryConfig;

/// Which upstream adapter to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    CompetApi,
    OpenAi,
    Mock,
}

impl ProviderKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "competapi" => Some(ProviderKind::CompetApi),
            "openai" => Some(ProviderKind::OpenAi),
            "mock" => Some(ProviderKind::Mock),
            _ => None,
        }
    }
}

/// Provider selection, credentials, and retry/poll tuning.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// Base URL of the upstream API, without a trailing slash.
    pub api_url: String,
    pub api_key: Option<String>,
    /// Chat model used by `enhance_prompt`.
    pub enhance_model: String,
    pub max_retries: u32,
    /// Delay before the first submission retry; doubled per attempt.
    pub retry_delay: Duration,
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
    /// Bound on a single submission call.
    pub request_timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Mock,
            api_url: "https://api.competapi.com".into(),
            api_key: None,
            enhance_model: "gpt-4o-mini".into(),
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            poll_interval: Duration::from_secs(10),
            max_poll_attempts: 60,
            request_timeout: Duration::from_secs(120),
        }
    }
}

impl ProviderConfig {
    /// Load provider configuration from environment variables.
    ///
    /// | Env Var                         | Default                     |
    /// |---------------------------------|-----------------------------|
    /// | `PROVIDER`                      | `mock`                      |
    /// | `PROVIDER_API_URL`              | `https://api.competapi.com` |
    /// | `PROVIDER_API_KEY`              | --                          |
    /// | `PROVIDER_ENHANCE_MODEL`        | `gpt-4o-mini`               |
    /// | `PROVIDER_MAX_RETRIES`          | `3`                         |
    /// | `PROVIDER_RETRY_DELAY_MS`       | `1000`                      |
    /// | `PROVIDER_POLL_INTERVAL_SECS`   | `10`                        |
    /// | `PROVIDER_MAX_POLL_ATTEMPTS`    | `60`                        |
    /// | `PROVIDER_REQUEST_TIMEOUT_SECS` | `120`                       |
    ///
    /// # Panics
    ///
    /// Panics on an unknown `PROVIDER`, on unparseable numbers, and when a
    /// real upstream is selected without `PROVIDER_API_KEY`.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let kind = match std::env::var("PROVIDER") {
            Ok(v) => ProviderKind::parse(&v)
                .unwrap_or_else(|| panic!("PROVIDER must be competapi, openai, or mock, got '{v}'")),
            Err(_) => defaults.kind,
        };

        let api_url = std::env::var("PROVIDER_API_URL")
            .map(|v| v.trim_end_matches('/').to_string())
            .unwrap_or(defaults.api_url);

        let api_key = std::env::var("PROVIDER_API_KEY")
            .ok()
            .filter(|k| !k.is_empty());
        if kind != ProviderKind::Mock {
            assert!(
                api_key.is_some(),
                "PROVIDER_API_KEY must be set when PROVIDER is not mock"
            );
        }

        let enhance_model =
            std::env::var("PROVIDER_ENHANCE_MODEL").unwrap_or(defaults.enhance_model);

        let max_retries: u32 = std::env::var("PROVIDER_MAX_RETRIES")
            .unwrap_or_else(|_| "3".into())
            .parse()
            .expect("PROVIDER_MAX_RETRIES must be a valid u32");

        let retry_delay_ms: u64 = std::env::var("PROVIDER_RETRY_DELAY_MS")
            .unwrap_or_else(|_| "1000".into())
            .parse()
            .expect("PROVIDER_RETRY_DELAY_MS must be a valid u64");

        let poll_interval_secs: u64 = std::env::var("PROVIDER_POLL_INTERVAL_SECS")
            .unwrap_or_else(|_| "10".into())
            .parse()
            .expect("PROVIDER_POLL_INTERVAL_SECS must be a valid u64");

        let max_poll_attempts: u32 = std::env::var("PROVIDER_MAX_POLL_ATTEMPTS")
            .unwrap_or_else(|_| "60".into())
            .parse()
            .expect("PROVIDER_MAX_POLL_ATTEMPTS must be a valid u32");

        let request_timeout_secs: u64 = std::env::var("PROVIDER_REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "120".into())
            .parse()
            .expect("PROVIDER_REQUEST_TIMEOUT_SECS must be a valid u64");

        Self {
            kind,
            api_url,
            api_key,
            enhance_model,
            max_retries,
            retry_delay: Duration::from_millis(retry_delay_ms),
            poll_interval: Duration::from_secs(poll_interval_secs),
            max_poll_attempts,
            request_timeout: Duration::from_secs(request_timeout_secs),
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            initial_delay: self.retry_delay,
            ..Default::default()
        }
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            interval: self.poll_interval,
            max_attempts: self.max_poll_attempts,
        }
    }

    /// Upper bound on one whole generation: every submission attempt, the
    /// backoff between them, and the full polling window.
    pub fn overall_deadline(&self) -> Duration {
        let retry = self.retry_config();
        let attempts = self.max_retries + 1;
        self.request_timeout * attempts
            + retry.max_delay * self.max_retries
            + self.poll_interval * self.max_poll_attempts
            + Duration::from_secs(30)
    }
}
