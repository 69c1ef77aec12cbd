//! Rows of `user_balances`, `credit_reservations`, and `credit_ledger_entries`.

use lumora_core::ledger::{BalanceSnapshot, LedgerEntry, LedgerEntryKind, Reservation};
use lumora_core::types::{DbId, Timestamp};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::StoreError;

/// A row from the `user_balances` table.
#[derive(Debug, Clone, FromRow)]
pub struct BalanceRow {
    pub user_id: DbId,
    pub credits: i64,
    pub free_generations_left: i32,
    pub free_generation_allotment: i32,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl BalanceRow {
    pub fn snapshot(&self) -> BalanceSnapshot {
        BalanceSnapshot {
            credits: self.credits,
            free_generations_left: self.free_generations_left,
            free_generation_allotment: self.free_generation_allotment,
        }
    }
}

/// A row from the `credit_reservations` table.
#[derive(Debug, Clone, FromRow)]
pub struct ReservationRow {
    pub id: Uuid,
    pub user_id: DbId,
    pub is_free: bool,
    pub cost: i64,
    pub credits_after: i64,
    pub free_generations_left_after: i32,
    pub committed_at: Timestamp,
    pub compensated_at: Option<Timestamp>,
    pub compensation_reason: Option<String>,
}

impl From<ReservationRow> for Reservation {
    fn from(row: ReservationRow) -> Self {
        Reservation {
            id: row.id,
            user_id: row.user_id,
            is_free: row.is_free,
            cost: row.cost,
            credits_after: row.credits_after,
            free_generations_left_after: row.free_generations_left_after,
        }
    }
}

/// A row from the `credit_ledger_entries` table.
#[derive(Debug, Clone, FromRow)]
pub struct LedgerEntryRow {
    pub id: DbId,
    pub user_id: DbId,
    pub amount: i64,
    pub kind: String,
    pub description: String,
    pub balance_after: i64,
    pub reservation_id: Option<Uuid>,
    pub created_at: Timestamp,
}

impl TryFrom<LedgerEntryRow> for LedgerEntry {
    type Error = StoreError;

    fn try_from(row: LedgerEntryRow) -> Result<Self, Self::Error> {
        let kind = LedgerEntryKind::parse(&row.kind).ok_or_else(|| {
            StoreError::CorruptRow(format!(
                "ledger entry {} has unknown kind '{}'",
                row.id, row.kind
            ))
        })?;
        Ok(LedgerEntry {
            id: row.id,
            user_id: row.user_id,
            amount: row.amount,
            kind,
            description: row.description,
            balance_after: row.balance_after,
            reservation_id: row.reservation_id,
            created_at: row.created_at,
        })
    }
}
