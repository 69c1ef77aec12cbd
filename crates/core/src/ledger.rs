//! Credit ledger rules.
//!
//! Stores (Postgres, in-memory) hold the balance rows and serialize
//! per-user mutation; the decisions about *what* to mutate live here so both
//! backends apply identical semantics.
//!
//! Conservation: the signed `amount`s of a user's ledger entries always sum
//! to their current `credits`. Free-tier bookkeeping appends zero-amount
//! entries so the audit trail shows it without disturbing the sum.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;
use crate::types::{DbId, Timestamp};

/// Free generations every new balance starts with.
pub const DEFAULT_FREE_GENERATION_ALLOTMENT: i32 = 3;

// ---------------------------------------------------------------------------
// Entry kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerEntryKind {
    Purchase,
    Refund,
    Generation,
    Usage,
}

impl LedgerEntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LedgerEntryKind::Purchase => "purchase",
            LedgerEntryKind::Refund => "refund",
            LedgerEntryKind::Generation => "generation",
            LedgerEntryKind::Usage => "usage",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "purchase" => Some(LedgerEntryKind::Purchase),
            "refund" => Some(LedgerEntryKind::Refund),
            "generation" => Some(LedgerEntryKind::Generation),
            "usage" => Some(LedgerEntryKind::Usage),
            _ => None,
        }
    }

    /// Kinds a billing-side caller may pass to `grant`.
    pub fn is_grantable(self) -> bool {
        matches!(self, LedgerEntryKind::Purchase | LedgerEntryKind::Refund)
    }
}

/// One immutable row of a user's credit history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: DbId,
    pub user_id: DbId,
    /// Signed credit delta.
    pub amount: i64,
    pub kind: LedgerEntryKind,
    pub description: String,
    pub balance_after: i64,
    pub reservation_id: Option<Uuid>,
    pub created_at: Timestamp,
}

/// Sum of signed amounts; equals `credits` for a consistent history.
pub fn replay_balance(entries: &[LedgerEntry]) -> i64 {
    entries.iter().map(|e| e.amount).sum()
}

// ---------------------------------------------------------------------------
// Balance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSnapshot {
    pub credits: i64,
    pub free_generations_left: i32,
    pub free_generation_allotment: i32,
}

impl BalanceSnapshot {
    pub fn fresh(allotment: i32) -> Self {
        Self {
            credits: 0,
            free_generations_left: allotment,
            free_generation_allotment: allotment,
        }
    }
}

/// Details carried by an `InsufficientFunds` rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsufficientFunds {
    pub cost: i64,
    pub current_balance: i64,
    pub free_generations_left: i32,
    pub shortfall: i64,
}

// ---------------------------------------------------------------------------
// Reservation
// ---------------------------------------------------------------------------

/// What `reserve` decided to take from a balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationPlan {
    /// Decrement `free_generations_left`; output is watermarked.
    Free,
    /// Debit `cost` credits.
    Paid { cost: i64 },
}

/// Decide how to pay for a job costing `cost` credits.
///
/// Free allowance is always consumed first.
pub fn plan_reservation(
    balance: &BalanceSnapshot,
    cost: i64,
) -> Result<ReservationPlan, InsufficientFunds> {
    if balance.free_generations_left > 0 {
        return Ok(ReservationPlan::Free);
    }
    if balance.credits >= cost {
        return Ok(ReservationPlan::Paid { cost });
    }
    Err(InsufficientFunds {
        cost,
        current_balance: balance.credits,
        free_generations_left: balance.free_generations_left,
        shortfall: cost - balance.credits,
    })
}

/// A committed hold on a user's funds for one generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub id: Uuid,
    pub user_id: DbId,
    pub is_free: bool,
    /// Catalog price of the job; charged only when `is_free` is false.
    pub cost: i64,
    /// Balance immediately after the reservation.
    pub credits_after: i64,
    pub free_generations_left_after: i32,
}

impl Reservation {
    /// Credits actually debited.
    pub fn charged(&self) -> i64 {
        if self.is_free {
            0
        } else {
            self.cost
        }
    }

    /// Free-tier output carries a watermark.
    pub fn watermark(&self) -> bool {
        self.is_free
    }
}

/// Free count after restoring one use, never above the allotment.
pub fn restored_free_count(current: i32, allotment: i32) -> i32 {
    (current + 1).min(allotment)
}

/// Result of a `compensate` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompensationOutcome {
    /// Funds were returned by this call.
    Restored {
        credits_restored: i64,
        free_generation_restored: bool,
    },
    /// An earlier call already returned the funds.
    AlreadyCompensated,
    /// No committed reservation with that id exists; nothing to undo.
    NotCommitted,
}

impl CompensationOutcome {
    pub fn restored_anything(self) -> bool {
        matches!(self, CompensationOutcome::Restored { .. })
    }
}

// ---------------------------------------------------------------------------
// Grants and revocations
// ---------------------------------------------------------------------------

/// Validate a `grant` request before touching the store.
pub fn validate_grant(amount: i64, kind: LedgerEntryKind) -> Result<(), CoreError> {
    if amount <= 0 {
        return Err(CoreError::Validation(
            "grant amount must be positive".to_string(),
        ));
    }
    if !kind.is_grantable() {
        return Err(CoreError::Validation(format!(
            "'{}' entries cannot be granted; use purchase or refund",
            kind.as_str()
        )));
    }
    Ok(())
}

/// Outcome of revoking previously purchased credits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeOutcome {
    /// Credits actually removed.
    pub revoked: i64,
    /// Requested credits that could not be removed because they were spent.
    pub shortfall: i64,
    pub balance_after: i64,
}

/// Remove up to `amount` credits without taking the balance below zero.
///
/// Spent credits are not clawed back; the unrecovered part is reported as
/// `shortfall` so billing can reconcile it out of band.
pub fn plan_revoke(credits: i64, amount: i64) -> Result<RevokeOutcome, CoreError> {
    if amount <= 0 {
        return Err(CoreError::Validation(
            "revoke amount must be positive".to_string(),
        ));
    }
    let revoked = amount.min(credits.max(0));
    Ok(RevokeOutcome {
        revoked,
        shortfall: amount - revoked,
        balance_after: credits - revoked,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
