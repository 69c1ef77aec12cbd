//! Storage seams the orchestrator and HTTP layer are written against.
//!
//! `lumora-db` implements these over PostgreSQL; `lumora-pipeline` ships
//! in-memory implementations for development and tests. Both must give the
//! same guarantees:
//!
//! - ledger mutations for one user are serialized, so two concurrent
//!   `reserve` calls can never both spend the same funds;
//! - status-changing job writes are guarded on the current status, so a
//!   terminal job never changes state and a lost race returns `false`
//!   instead of overwriting.

use async_trait::async_trait;
use uuid::Uuid;

use crate::catalog::{CatalogModel, GenerationOutcome};
use crate::error::CoreError;
use crate::generation::GenerationType;
use crate::job::{CompletionPath, GenerationJob, JobCompletion, NewGenerationJob};
use crate::ledger::{
    BalanceSnapshot, CompensationOutcome, LedgerEntry, LedgerEntryKind, Reservation,
    RevokeOutcome,
};
use crate::types::{DbId, Timestamp};

/// Atomic balance operations plus the append-only history.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Current balance; a user with no row gets a fresh one.
    async fn balance(&self, user_id: DbId) -> Result<BalanceSnapshot, CoreError>;

    /// Take the free allowance or debit `cost` credits.
    ///
    /// Fails with [`CoreError::InsufficientFunds`] and changes nothing when
    /// neither is available.
    async fn reserve(
        &self,
        user_id: DbId,
        cost: i64,
        description: &str,
    ) -> Result<Reservation, CoreError>;

    /// Return whatever `reservation` took. Idempotent: only the first call
    /// for a given reservation id restores anything.
    async fn compensate(
        &self,
        reservation: &Reservation,
        reason: &str,
    ) -> Result<CompensationOutcome, CoreError>;

    /// Look up a committed reservation by id.
    async fn find_reservation(&self, id: Uuid) -> Result<Option<Reservation>, CoreError>;

    /// Add credits. Never fails on balance checks.
    async fn grant(
        &self,
        user_id: DbId,
        amount: i64,
        kind: LedgerEntryKind,
        description: &str,
    ) -> Result<LedgerEntry, CoreError>;

    /// Remove previously purchased credits, clamped at zero.
    async fn revoke(
        &self,
        user_id: DbId,
        amount: i64,
        description: &str,
    ) -> Result<RevokeOutcome, CoreError>;

    /// Ledger entries, newest first.
    async fn history(
        &self,
        user_id: DbId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LedgerEntry>, CoreError>;
}

/// Durable generation job records.
///
/// Methods returning `bool` report whether a row actually changed; `false`
/// means the job was missing or not in a status that allows the write.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, new: NewGenerationJob) -> Result<GenerationJob, CoreError>;

    async fn find(&self, id: DbId) -> Result<Option<GenerationJob>, CoreError>;

    /// A user's jobs, newest first.
    async fn list_for_user(
        &self,
        user_id: DbId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<GenerationJob>, CoreError>;

    /// `pending -> processing`, stamping `started_at`.
    async fn mark_processing(&self, id: DbId) -> Result<bool, CoreError>;

    /// Write progress on a non-terminal job.
    async fn update_progress(&self, id: DbId, progress: i16) -> Result<bool, CoreError>;

    /// Record the upstream id on a non-terminal job.
    async fn set_generation_id(&self, id: DbId, generation_id: &str) -> Result<bool, CoreError>;

    /// Move to `completed` from any status `path` allows.
    async fn complete(
        &self,
        id: DbId,
        completion: &JobCompletion,
        path: CompletionPath,
    ) -> Result<bool, CoreError>;

    /// Move to `failed` from `pending` or `processing`.
    async fn fail(&self, id: DbId, error: &str) -> Result<bool, CoreError>;

    /// Cache repair: set `local_file_path` on a completed job. Not a
    /// status transition; repeated calls with the same path are harmless.
    async fn record_local_path(&self, id: DbId, path: &str) -> Result<bool, CoreError>;

    /// Non-terminal jobs last updated before `older_than`.
    async fn find_stale(&self, older_than: Timestamp) -> Result<Vec<GenerationJob>, CoreError>;

    /// Cheap liveness check for `/health`.
    async fn ping(&self) -> Result<(), CoreError>;
}

/// Read-only model catalog plus per-model outcome counters.
#[async_trait]
pub trait ModelCatalog: Send + Sync {
    async fn find_model(&self, model_id: &str) -> Result<Option<CatalogModel>, CoreError>;

    /// Active and beta models, optionally filtered by media type.
    async fn list_dispatchable(
        &self,
        generation_type: Option<GenerationType>,
    ) -> Result<Vec<CatalogModel>, CoreError>;

    async fn record_outcome(
        &self,
        model_id: &str,
        outcome: GenerationOutcome,
    ) -> Result<(), CoreError>;
}
