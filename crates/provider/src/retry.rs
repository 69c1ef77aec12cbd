//! Exponential backoff around provider submission.
//!
//! Only the submission call is wrapped. Polling has its own fixed-interval
//! loop in [`crate::poll`].

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::ProviderError;

/// Tunable parameters for submission retries.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt; `0` disables retrying.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    /// Fraction of each delay randomised up or down; `0.0` disables jitter.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

/// Calculate the next backoff delay, clamped to [`RetryConfig::max_delay`].
pub fn next_delay(current: Duration, config: &RetryConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

fn jittered(delay: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return delay;
    }
    let factor = rand::rng().random_range((1.0 - jitter)..=(1.0 + jitter));
    delay.mul_f64(factor.max(0.0))
}

/// Run `op` until it succeeds, fails permanently, or retries run out.
///
/// `op` receives the 1-based attempt number. A retryable error that
/// outlives every retry is returned as [`ProviderError::Upstream`].
pub async fn with_retries<T, F, Fut>(
    config: &RetryConfig,
    operation: &str,
    mut op: F,
) -> Result<T, ProviderError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut delay = config.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt <= config.max_retries => {
                let wait = jittered(delay, config.jitter);
                tracing::warn!(
                    operation,
                    attempt,
                    max_retries = config.max_retries,
                    delay_ms = wait.as_millis() as u64,
                    error = %e,
                    "Retrying after transient provider error",
                );
                tokio::time::sleep(wait).await;
                delay = next_delay(delay, config);
            }
            Err(e) => return Err(e.exhausted()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use assert_matches::assert_matches;

    use super::*;

    fn no_jitter(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            jitter: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn backoff_sequence_doubles_and_caps() {
        let config = RetryConfig::default();
        let mut delay = config.initial_delay;
        for expected_secs in [1, 2, 4, 8, 16, 30, 30] {
            assert_eq!(delay.as_secs(), expected_secs);
            delay = next_delay(delay, &config);
        }
    }

    #[test]
    fn jitter_stays_in_band() {
        for _ in 0..100 {
            let d = jittered(Duration::from_millis(1000), 0.2);
            assert!(d >= Duration::from_millis(800) && d <= Duration::from_millis(1200));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();

        let result = with_retries(&no_jitter(3), "submit", |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ProviderError::Transient("connection reset".into()))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s + 2s of backoff.
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retries(&no_jitter(2), "submit", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ProviderError::Transient("502 bad gateway".into())) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_matches!(result, Err(ProviderError::Upstream { status: None, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retries(&no_jitter(5), "submit", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(ProviderError::Upstream {
                    status: Some(400),
                    message: "bad prompt".into(),
                })
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_matches!(result, Err(ProviderError::Upstream { status: Some(400), .. }));
    }
}
