use axum::routing::{get, post};
use axum::Router;

use crate::handlers::generation;
use crate::state::AppState;

/// Generation request and job routes, mounted at the `/api/v1` root.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/generate", post(generation::request_generation))
        .route("/generate/enhance-prompt", post(generation::enhance_prompt))
        .route("/generation/{id}", get(generation::get_generation))
        .route("/generation/{id}/status", get(generation::generation_status))
        .route("/generations", get(generation::list_generations))
}
