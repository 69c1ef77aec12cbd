//! Concrete [`GenerationProvider`](crate::GenerationProvider) adapters.

pub mod competapi;
pub mod mock;
pub mod openai;

use crate::error::ProviderError;

/// Read a response body, mapping non-2xx statuses onto the provider
/// taxonomy. 429 and 5xx are transient; any other 4xx is a rejection.
pub(crate) async fn read_body(response: reqwest::Response) -> Result<String, ProviderError> {
    let status = response.status();
    let body = response.text().await?;
    if status.is_success() {
        return Ok(body);
    }

    let preview: String = body.chars().take(200).collect();
    if status.as_u16() == 429 || status.is_server_error() {
        Err(ProviderError::Transient(format!("HTTP {status}: {preview}")))
    } else {
        Err(ProviderError::Upstream {
            status: Some(status.as_u16()),
            message: preview,
        })
    }
}

/// Build the shared HTTP client for a real upstream.
pub(crate) fn http_client(timeout: std::time::Duration) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::Validation(format!("HTTP client setup failed: {e}")))
}
