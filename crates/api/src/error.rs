use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use lumora_core::error::CoreError;
use lumora_provider::ProviderError;
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and adds HTTP-specific variants.
/// Every variant renders as `{ "error", "code" }` JSON.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `lumora_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A provider call made on the request path (prompt enhancement).
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Proxying media from the provider failed. Carries the upstream status
    /// when one was received.
    #[error("Upstream media error: {message}")]
    Proxy {
        status: Option<StatusCode>,
        message: String,
    },

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

fn internal() -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // --- CoreError variants ---
            AppError::Core(core) => match core {
                CoreError::NotFound { entity, id } => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("{entity} with id {id} not found"),
                ),
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
                CoreError::Unauthorized(msg) => {
                    (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone())
                }
                CoreError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone()),
                CoreError::InsufficientFunds(funds) => {
                    let body = json!({
                        "error": "Insufficient credits for this generation",
                        "code": "INSUFFICIENT_FUNDS",
                        "cost": funds.cost,
                        "currentBalance": funds.current_balance,
                        "freeGenerationsLeft": funds.free_generations_left,
                    });
                    return (StatusCode::FORBIDDEN, axum::Json(body)).into_response();
                }
                CoreError::ModelNotFound(model_id) => (
                    StatusCode::NOT_FOUND,
                    "MODEL_NOT_FOUND",
                    format!("Model '{model_id}' is not available"),
                ),
                CoreError::RateLimited { retry_after_secs } => {
                    let body = json!({
                        "error": format!("Too many requests, retry in {retry_after_secs}s"),
                        "code": "RATE_LIMITED",
                    });
                    let mut response =
                        (StatusCode::TOO_MANY_REQUESTS, axum::Json(body)).into_response();
                    response
                        .headers_mut()
                        .insert(header::RETRY_AFTER, HeaderValue::from(*retry_after_secs));
                    return response;
                }
                CoreError::Internal(msg) => {
                    tracing::error!(error = %msg, "Internal core error");
                    internal()
                }
            },

            // --- Provider errors ---
            AppError::Provider(err) => match err {
                ProviderError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                other => {
                    tracing::warn!(error = %other, kind = other.kind(), "Provider call failed");
                    let status = match other {
                        ProviderError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                        _ => StatusCode::BAD_GATEWAY,
                    };
                    (status, "UPSTREAM_ERROR", other.client_message().to_string())
                }
            },

            // --- HTTP-specific errors ---
            AppError::Proxy { status, message } => {
                tracing::warn!(upstream_status = ?status, error = %message, "Media proxy failed");
                match status {
                    Some(s) => (*s, "UPSTREAM_ERROR", "Media could not be fetched".to_string()),
                    None => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "UPSTREAM_ERROR",
                        "Media could not be fetched".to_string(),
                    ),
                }
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                internal()
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
