//! Role-based access control extractors.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use lumora_core::error::CoreError;

use super::auth::AuthUser;
use crate::error::AppError;
use crate::state::AppState;

/// Requires [`Role::Admin`](lumora_core::roles::Role::Admin). Guards credit
/// grants and the cross-user ledger view. A plain user gets 403 Forbidden;
/// a missing token still gets 401.
///
/// ```ignore
/// async fn grant(RequireAdmin(admin): RequireAdmin) -> AppResult<Json<()>> {
///     tracing::info!(admin_id = admin.user_id, "granting credits");
///     Ok(Json(()))
/// }
/// ```
pub struct RequireAdmin(pub AuthUser);

impl FromRequestParts<AppState> for RequireAdmin {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            return Err(AppError::Core(CoreError::Forbidden(
                "Admin role required to manage credits".into(),
            )));
        }
        Ok(RequireAdmin(user))
    }
}
