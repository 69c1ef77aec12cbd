use axum::routing::post;
use axum::Router;

use crate::handlers::credits;
use crate::state::AppState;

/// Admin routes, mounted at `/api/v1/admin`.
///
/// ```text
/// POST /credits/grant    grant credits
/// POST /credits/revoke   refund a purchase
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/credits/grant", post(credits::grant_credits))
        .route("/credits/revoke", post(credits::revoke_credits))
}
