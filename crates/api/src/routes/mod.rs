pub mod admin;
pub mod credits;
pub mod generation;
pub mod health;
pub mod models;
pub mod stream;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /generate                          request a generation (POST, auth)
/// /generate/enhance-prompt           rewrite a prompt (POST, auth)
/// /generation/{id}                   full job record (auth, owner)
/// /generation/{id}/status            status, progress, url, error (auth, owner)
/// /generations                       caller's jobs, newest first (auth)
///
/// /stream/image/{id}                 image bytes (public)
/// /stream/video/{id}                 video bytes, Range aware (public)
/// /stream/video/{id}/thumbnail       thumbnail or placeholder (public)
///
/// /credits                           caller's balance (auth)
/// /credits/history                   caller's ledger entries (auth)
///
/// /admin/credits/grant               add credits (POST, admin)
/// /admin/credits/revoke              refund a purchase (POST, admin)
///
/// /models                            dispatchable models (public)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(generation::router())
        .nest("/stream", stream::router())
        .nest("/credits", credits::router())
        .nest("/admin", admin::router())
        .nest("/models", models::router())
}
