use axum::extract::{Query, State};
use axum::Json;
use lumora_core::catalog::CatalogModel;
use lumora_core::error::CoreError;
use lumora_core::generation::GenerationType;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ModelParams {
    #[serde(rename = "type")]
    pub generation_type: Option<String>,
}

/// GET /models?type=
///
/// Dispatchable models (active and beta) with pricing and stats.
pub async fn list_models(
    State(state): State<AppState>,
    Query(params): Query<ModelParams>,
) -> AppResult<Json<DataResponse<Vec<CatalogModel>>>> {
    let filter = match params.generation_type.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(GenerationType::parse(raw).ok_or_else(|| {
            AppError::Core(CoreError::Validation(format!(
                "type must be image or video, got '{raw}'"
            )))
        })?),
    };
    let models = state.stores.catalog.list_dispatchable(filter).await?;
    Ok(Json(DataResponse { data: models }))
}
