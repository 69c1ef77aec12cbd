use axum::routing::get;
use axum::Router;

use crate::handlers::credits;
use crate::state::AppState;

/// Balance routes, mounted at `/api/v1/credits`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(credits::get_balance))
        .route("/history", get(credits::get_history))
}
