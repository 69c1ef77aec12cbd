use axum::routing::get;
use axum::Router;

use crate::handlers::stream;
use crate::state::AppState;

/// Media delivery routes, mounted at `/api/v1/stream`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/image/{id}", get(stream::stream_image))
        .route("/video/{id}", get(stream::stream_video))
        .route("/video/{id}/thumbnail", get(stream::stream_thumbnail))
}
