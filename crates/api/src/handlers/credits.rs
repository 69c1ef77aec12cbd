//! Handlers for the caller's balance and ledger history, plus the admin
//! grant and revoke operations used by billing.

use axum::extract::{Query, State};
use axum::Json;
use lumora_core::error::CoreError;
use lumora_core::ledger::{BalanceSnapshot, LedgerEntry, LedgerEntryKind, RevokeOutcome};
use lumora_core::types::DbId;
use lumora_events::{event_types, DomainEvent};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::middleware::rbac::RequireAdmin;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantRequest {
    pub user_id: DbId,
    pub amount: i64,
    pub kind: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeRequest {
    pub user_id: DbId,
    pub amount: i64,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantResult {
    pub entry: LedgerEntry,
    pub balance: BalanceSnapshot,
}

/// GET /credits
pub async fn get_balance(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<DataResponse<BalanceSnapshot>>> {
    let balance = state.stores.ledger.balance(user.user_id).await?;
    Ok(Json(DataResponse { data: balance }))
}

/// GET /credits/history?limit&offset
pub async fn get_history(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<HistoryParams>,
) -> AppResult<Json<DataResponse<Vec<LedgerEntry>>>> {
    let entries = state
        .stores
        .ledger
        .history(
            user.user_id,
            params.limit.unwrap_or(50),
            params.offset.unwrap_or(0),
        )
        .await?;
    Ok(Json(DataResponse { data: entries }))
}

/// POST /admin/credits/grant
pub async fn grant_credits(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Json(input): Json<GrantRequest>,
) -> AppResult<Json<DataResponse<GrantResult>>> {
    let kind = LedgerEntryKind::parse(&input.kind).ok_or_else(|| {
        AppError::Core(CoreError::Validation(format!(
            "Unknown ledger entry kind '{}'",
            input.kind
        )))
    })?;
    let description = input
        .description
        .unwrap_or_else(|| format!("{} granted by admin {}", kind.as_str(), admin.user_id));

    let entry = state
        .stores
        .ledger
        .grant(input.user_id, input.amount, kind, &description)
        .await?;
    let balance = state.stores.ledger.balance(input.user_id).await?;

    tracing::info!(
        admin_id = admin.user_id,
        user_id = input.user_id,
        amount = input.amount,
        kind = kind.as_str(),
        "Credits granted",
    );
    state.event_bus.publish(
        DomainEvent::new(event_types::CREDITS_GRANTED)
            .with_user(input.user_id)
            .with_payload(serde_json::json!({
                "amount": input.amount,
                "kind": kind.as_str(),
                "adminId": admin.user_id,
            })),
    );

    Ok(Json(DataResponse {
        data: GrantResult { entry, balance },
    }))
}

/// POST /admin/credits/revoke
///
/// Takes back purchased credits, never below zero. Whatever the user has
/// already spent is reported as `shortfall`.
pub async fn revoke_credits(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Json(input): Json<RevokeRequest>,
) -> AppResult<Json<DataResponse<RevokeOutcome>>> {
    let description = input
        .description
        .unwrap_or_else(|| format!("Purchase refunded by admin {}", admin.user_id));

    let outcome = state
        .stores
        .ledger
        .revoke(input.user_id, input.amount, &description)
        .await?;

    if outcome.shortfall > 0 {
        tracing::warn!(
            admin_id = admin.user_id,
            user_id = input.user_id,
            requested = input.amount,
            revoked = outcome.revoked,
            shortfall = outcome.shortfall,
            "Partial revoke: credits already spent",
        );
    } else {
        tracing::info!(
            admin_id = admin.user_id,
            user_id = input.user_id,
            revoked = outcome.revoked,
            "Credits revoked",
        );
    }
    state.event_bus.publish(
        DomainEvent::new(event_types::CREDITS_REVOKED)
            .with_user(input.user_id)
            .with_payload(serde_json::json!({
                "requested": input.amount,
                "revoked": outcome.revoked,
                "shortfall": outcome.shortfall,
                "adminId": admin.user_id,
            })),
    );

    Ok(Json(DataResponse { data: outcome }))
}
