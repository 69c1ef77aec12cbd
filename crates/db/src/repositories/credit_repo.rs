//! Repository for the credit ledger tables.
//!
//! Every balance mutation runs in one transaction that first locks the
//! user's `user_balances` row with `SELECT ... FOR UPDATE`, so concurrent
//! reservations for the same user are serialized by PostgreSQL.

use lumora_core::error::CoreError;
use lumora_core::ledger::{
    plan_reservation, plan_revoke, restored_free_count, CompensationOutcome, InsufficientFunds,
    LedgerEntryKind, Reservation, ReservationPlan, RevokeOutcome,
};
use lumora_core::types::DbId;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::models::credit::{BalanceRow, LedgerEntryRow, ReservationRow};

/// Column list for `user_balances` queries.
const BALANCE_COLUMNS: &str = "\
    user_id, credits, free_generations_left, free_generation_allotment, \
    created_at, updated_at";

/// Column list for `credit_reservations` queries.
const RESERVATION_COLUMNS: &str = "\
    id, user_id, is_free, cost, credits_after, free_generations_left_after, \
    committed_at, compensated_at, compensation_reason";

/// Column list for `credit_ledger_entries` queries.
const ENTRY_COLUMNS: &str = "\
    id, user_id, amount, kind, description, balance_after, reservation_id, created_at";

/// Maximum page size for history listing.
const MAX_LIMIT: i64 = 200;

/// Provides atomic balance operations and ledger history.
pub struct CreditRepo;

impl CreditRepo {
    /// Fetch a balance, creating it with `allotment` free generations first
    /// if the user has none.
    pub async fn balance(
        pool: &PgPool,
        user_id: DbId,
        allotment: i32,
    ) -> Result<BalanceRow, sqlx::Error> {
        let mut conn = pool.acquire().await?;
        ensure_balance(&mut conn, user_id, allotment).await?;
        let query = format!("SELECT {BALANCE_COLUMNS} FROM user_balances WHERE user_id = $1");
        sqlx::query_as::<_, BalanceRow>(&query)
            .bind(user_id)
            .fetch_one(&mut *conn)
            .await
    }

    /// Reserve funds for one generation.
    ///
    /// The outer `Result` carries database failures; the inner one is the
    /// business outcome. An insufficient balance rolls back without writes.
    pub async fn reserve(
        pool: &PgPool,
        user_id: DbId,
        cost: i64,
        description: &str,
        allotment: i32,
    ) -> Result<Result<Reservation, InsufficientFunds>, sqlx::Error> {
        let mut tx = pool.begin().await?;
        ensure_balance(&mut tx, user_id, allotment).await?;
        let balance = lock_balance(&mut tx, user_id).await?;

        let plan = match plan_reservation(&balance.snapshot(), cost) {
            Ok(plan) => plan,
            Err(insufficient) => {
                tx.rollback().await?;
                return Ok(Err(insufficient));
            }
        };

        let (is_free, debit, kind) = match plan {
            ReservationPlan::Free => (true, 0, LedgerEntryKind::Usage),
            ReservationPlan::Paid { cost } => (false, cost, LedgerEntryKind::Generation),
        };
        let free_decrement: i32 = if is_free { 1 } else { 0 };

        let (credits_after, free_after): (i64, i32) = sqlx::query_as(
            "UPDATE user_balances \
             SET credits = credits - $2, \
                 free_generations_left = free_generations_left - $3, \
                 updated_at = NOW() \
             WHERE user_id = $1 \
             RETURNING credits, free_generations_left",
        )
        .bind(user_id)
        .bind(debit)
        .bind(free_decrement)
        .fetch_one(&mut *tx)
        .await?;

        let id = Uuid::now_v7();
        let query = format!(
            "INSERT INTO credit_reservations \
                 (id, user_id, is_free, cost, credits_after, free_generations_left_after) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {RESERVATION_COLUMNS}"
        );
        let reservation = sqlx::query_as::<_, ReservationRow>(&query)
            .bind(id)
            .bind(user_id)
            .bind(is_free)
            .bind(cost)
            .bind(credits_after)
            .bind(free_after)
            .fetch_one(&mut *tx)
            .await?;

        append_entry(
            &mut tx,
            user_id,
            -debit,
            kind,
            description,
            credits_after,
            Some(id),
        )
        .await?;

        tx.commit().await?;
        Ok(Ok(reservation.into()))
    }

    /// Reverse a reservation at most once.
    ///
    /// The `compensated_at IS NULL` guard on the reservation row is what
    /// makes a repeated call a no-op.
    pub async fn compensate(
        pool: &PgPool,
        reservation_id: Uuid,
        reason: &str,
    ) -> Result<CompensationOutcome, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "UPDATE credit_reservations \
             SET compensated_at = NOW(), compensation_reason = $2 \
             WHERE id = $1 AND compensated_at IS NULL \
             RETURNING {RESERVATION_COLUMNS}"
        );
        let claimed = sqlx::query_as::<_, ReservationRow>(&query)
            .bind(reservation_id)
            .bind(reason)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(reservation) = claimed else {
            let exists: Option<(Uuid,)> =
                sqlx::query_as("SELECT id FROM credit_reservations WHERE id = $1")
                    .bind(reservation_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            tx.rollback().await?;
            return Ok(match exists {
                Some(_) => CompensationOutcome::AlreadyCompensated,
                None => CompensationOutcome::NotCommitted,
            });
        };

        let balance = lock_balance(&mut tx, reservation.user_id).await?;

        let outcome = if reservation.is_free {
            let restored = restored_free_count(
                balance.free_generations_left,
                balance.free_generation_allotment,
            );
            sqlx::query(
                "UPDATE user_balances \
                 SET free_generations_left = $2, updated_at = NOW() \
                 WHERE user_id = $1",
            )
            .bind(reservation.user_id)
            .bind(restored)
            .execute(&mut *tx)
            .await?;

            append_entry(
                &mut tx,
                reservation.user_id,
                0,
                LedgerEntryKind::Refund,
                &format!("Free generation restored: {reason}"),
                balance.credits,
                Some(reservation.id),
            )
            .await?;

            CompensationOutcome::Restored {
                credits_restored: 0,
                free_generation_restored: restored > balance.free_generations_left,
            }
        } else {
            let credits_after = balance.credits + reservation.cost;
            sqlx::query(
                "UPDATE user_balances SET credits = $2, updated_at = NOW() WHERE user_id = $1",
            )
            .bind(reservation.user_id)
            .bind(credits_after)
            .execute(&mut *tx)
            .await?;

            append_entry(
                &mut tx,
                reservation.user_id,
                reservation.cost,
                LedgerEntryKind::Refund,
                &format!("Refund: {reason}"),
                credits_after,
                Some(reservation.id),
            )
            .await?;

            CompensationOutcome::Restored {
                credits_restored: reservation.cost,
                free_generation_restored: false,
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    pub async fn find_reservation(
        pool: &PgPool,
        id: Uuid,
    ) -> Result<Option<ReservationRow>, sqlx::Error> {
        let query = format!("SELECT {RESERVATION_COLUMNS} FROM credit_reservations WHERE id = $1");
        sqlx::query_as::<_, ReservationRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Add `amount` credits. The caller validates `amount` and `kind`.
    pub async fn grant(
        pool: &PgPool,
        user_id: DbId,
        amount: i64,
        kind: LedgerEntryKind,
        description: &str,
        allotment: i32,
    ) -> Result<LedgerEntryRow, sqlx::Error> {
        let mut tx = pool.begin().await?;
        ensure_balance(&mut tx, user_id, allotment).await?;
        let balance = lock_balance(&mut tx, user_id).await?;
        let credits_after = balance.credits + amount;

        sqlx::query("UPDATE user_balances SET credits = $2, updated_at = NOW() WHERE user_id = $1")
            .bind(user_id)
            .bind(credits_after)
            .execute(&mut *tx)
            .await?;

        let entry = append_entry(
            &mut tx,
            user_id,
            amount,
            kind,
            description,
            credits_after,
            None,
        )
        .await?;

        tx.commit().await?;
        Ok(entry)
    }

    /// Remove up to `amount` purchased credits, never below zero.
    pub async fn revoke(
        pool: &PgPool,
        user_id: DbId,
        amount: i64,
        description: &str,
        allotment: i32,
    ) -> Result<Result<RevokeOutcome, CoreError>, sqlx::Error> {
        let mut tx = pool.begin().await?;
        ensure_balance(&mut tx, user_id, allotment).await?;
        let balance = lock_balance(&mut tx, user_id).await?;

        let outcome = match plan_revoke(balance.credits, amount) {
            Ok(outcome) => outcome,
            Err(e) => {
                tx.rollback().await?;
                return Ok(Err(e));
            }
        };

        sqlx::query("UPDATE user_balances SET credits = $2, updated_at = NOW() WHERE user_id = $1")
            .bind(user_id)
            .bind(outcome.balance_after)
            .execute(&mut *tx)
            .await?;

        let description = if outcome.shortfall > 0 {
            format!(
                "{description} (revoked {} of {amount}; {} already spent)",
                outcome.revoked, outcome.shortfall
            )
        } else {
            description.to_string()
        };
        append_entry(
            &mut tx,
            user_id,
            -outcome.revoked,
            LedgerEntryKind::Refund,
            &description,
            outcome.balance_after,
            None,
        )
        .await?;

        tx.commit().await?;
        Ok(Ok(outcome))
    }

    /// Ledger entries for a user, newest first.
    pub async fn history(
        pool: &PgPool,
        user_id: DbId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LedgerEntryRow>, sqlx::Error> {
        let query = format!(
            "SELECT {ENTRY_COLUMNS} FROM credit_ledger_entries \
             WHERE user_id = $1 \
             ORDER BY id DESC \
             LIMIT $2 OFFSET $3"
        );
        sqlx::query_as::<_, LedgerEntryRow>(&query)
            .bind(user_id)
            .bind(limit.clamp(1, MAX_LIMIT))
            .bind(offset.max(0))
            .fetch_all(pool)
            .await
    }
}

async fn ensure_balance(
    conn: &mut PgConnection,
    user_id: DbId,
    allotment: i32,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO user_balances \
             (user_id, credits, free_generations_left, free_generation_allotment) \
         VALUES ($1, 0, $2, $2) \
         ON CONFLICT (user_id) DO NOTHING",
    )
    .bind(user_id)
    .bind(allotment)
    .execute(conn)
    .await?;
    Ok(())
}

async fn lock_balance(conn: &mut PgConnection, user_id: DbId) -> Result<BalanceRow, sqlx::Error> {
    let query =
        format!("SELECT {BALANCE_COLUMNS} FROM user_balances WHERE user_id = $1 FOR UPDATE");
    sqlx::query_as::<_, BalanceRow>(&query)
        .bind(user_id)
        .fetch_one(conn)
        .await
}

async fn append_entry(
    conn: &mut PgConnection,
    user_id: DbId,
    amount: i64,
    kind: LedgerEntryKind,
    description: &str,
    balance_after: i64,
    reservation_id: Option<Uuid>,
) -> Result<LedgerEntryRow, sqlx::Error> {
    let query = format!(
        "INSERT INTO credit_ledger_entries \
             (user_id, amount, kind, description, balance_after, reservation_id) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         RETURNING {ENTRY_COLUMNS}"
    );
    sqlx::query_as::<_, LedgerEntryRow>(&query)
        .bind(user_id)
        .bind(amount)
        .bind(kind.as_str())
        .bind(description)
        .bind(balance_after)
        .bind(reservation_id)
        .fetch_one(conn)
        .await
}
