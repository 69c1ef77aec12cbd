//! `lumora_core::store` implementations backed by PostgreSQL.

use async_trait::async_trait;
use lumora_core::catalog::{CatalogModel, GenerationOutcome};
use lumora_core::error::CoreError;
use lumora_core::generation::GenerationType;
use lumora_core::job::{CompletionPath, GenerationJob, JobCompletion, NewGenerationJob};
use lumora_core::ledger::{
    validate_grant, BalanceSnapshot, CompensationOutcome, LedgerEntry, LedgerEntryKind,
    Reservation, RevokeOutcome,
};
use lumora_core::store::{JobStore, LedgerStore, ModelCatalog};
use lumora_core::types::{DbId, Timestamp};
use uuid::Uuid;

use crate::error::StoreError;
use crate::repositories::{AiModelRepo, CreditRepo, GenerationJobRepo};
use crate::DbPool;

/// One handle implementing every store trait over a shared pool.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
    free_generation_allotment: i32,
}

impl PgStore {
    pub fn new(pool: DbPool, free_generation_allotment: i32) -> Self {
        Self {
            pool,
            free_generation_allotment,
        }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

fn db(err: sqlx::Error) -> CoreError {
    StoreError::Database(err).into()
}

fn convert_jobs(
    rows: Vec<crate::models::generation_job::GenerationJobRow>,
) -> Result<Vec<GenerationJob>, CoreError> {
    rows.into_iter()
        .map(|row| GenerationJob::try_from(row).map_err(CoreError::from))
        .collect()
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn balance(&self, user_id: DbId) -> Result<BalanceSnapshot, CoreError> {
        let row = CreditRepo::balance(&self.pool, user_id, self.free_generation_allotment)
            .await
            .map_err(db)?;
        Ok(row.snapshot())
    }

    async fn reserve(
        &self,
        user_id: DbId,
        cost: i64,
        description: &str,
    ) -> Result<Reservation, CoreError> {
        CreditRepo::reserve(
            &self.pool,
            user_id,
            cost,
            description,
            self.free_generation_allotment,
        )
        .await
        .map_err(db)?
        .map_err(CoreError::InsufficientFunds)
    }

    async fn compensate(
        &self,
        reservation: &Reservation,
        reason: &str,
    ) -> Result<CompensationOutcome, CoreError> {
        CreditRepo::compensate(&self.pool, reservation.id, reason)
            .await
            .map_err(db)
    }

    async fn find_reservation(&self, id: Uuid) -> Result<Option<Reservation>, CoreError> {
        let row = CreditRepo::find_reservation(&self.pool, id)
            .await
            .map_err(db)?;
        Ok(row.map(Reservation::from))
    }

    async fn grant(
        &self,
        user_id: DbId,
        amount: i64,
        kind: LedgerEntryKind,
        description: &str,
    ) -> Result<LedgerEntry, CoreError> {
        validate_grant(amount, kind)?;
        let row = CreditRepo::grant(
            &self.pool,
            user_id,
            amount,
            kind,
            description,
            self.free_generation_allotment,
        )
        .await
        .map_err(db)?;
        Ok(LedgerEntry::try_from(row)?)
    }

    async fn revoke(
        &self,
        user_id: DbId,
        amount: i64,
        description: &str,
    ) -> Result<RevokeOutcome, CoreError> {
        CreditRepo::revoke(
            &self.pool,
            user_id,
            amount,
            description,
            self.free_generation_allotment,
        )
        .await
        .map_err(db)?
    }

    async fn history(
        &self,
        user_id: DbId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LedgerEntry>, CoreError> {
        let rows = CreditRepo::history(&self.pool, user_id, limit, offset)
            .await
            .map_err(db)?;
        rows.into_iter()
            .map(|row| LedgerEntry::try_from(row).map_err(CoreError::from))
            .collect()
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn create(&self, new: NewGenerationJob) -> Result<GenerationJob, CoreError> {
        let row = GenerationJobRepo::create(&self.pool, &new)
            .await
            .map_err(db)?;
        Ok(GenerationJob::try_from(row)?)
    }

    async fn find(&self, id: DbId) -> Result<Option<GenerationJob>, CoreError> {
        let row = GenerationJobRepo::find_by_id(&self.pool, id)
            .await
            .map_err(db)?;
        Ok(row.map(GenerationJob::try_from).transpose()?)
    }

    async fn list_for_user(
        &self,
        user_id: DbId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<GenerationJob>, CoreError> {
        let rows = GenerationJobRepo::list_for_user(&self.pool, user_id, limit, offset)
            .await
            .map_err(db)?;
        convert_jobs(rows)
    }

    async fn mark_processing(&self, id: DbId) -> Result<bool, CoreError> {
        GenerationJobRepo::mark_processing(&self.pool, id)
            .await
            .map_err(db)
    }

    async fn update_progress(&self, id: DbId, progress: i16) -> Result<bool, CoreError> {
        GenerationJobRepo::update_progress(&self.pool, id, progress)
            .await
            .map_err(db)
    }

    async fn set_generation_id(&self, id: DbId, generation_id: &str) -> Result<bool, CoreError> {
        GenerationJobRepo::set_generation_id(&self.pool, id, generation_id)
            .await
            .map_err(db)
    }

    async fn complete(
        &self,
        id: DbId,
        completion: &JobCompletion,
        path: CompletionPath,
    ) -> Result<bool, CoreError> {
        GenerationJobRepo::complete(&self.pool, id, completion, path)
            .await
            .map_err(db)
    }

    async fn fail(&self, id: DbId, error: &str) -> Result<bool, CoreError> {
        GenerationJobRepo::fail(&self.pool, id, error)
            .await
            .map_err(db)
    }

    async fn record_local_path(&self, id: DbId, path: &str) -> Result<bool, CoreError> {
        GenerationJobRepo::record_local_path(&self.pool, id, path)
            .await
            .map_err(db)
    }

    async fn find_stale(&self, older_than: Timestamp) -> Result<Vec<GenerationJob>, CoreError> {
        let rows = GenerationJobRepo::find_stale(&self.pool, older_than)
            .await
            .map_err(db)?;
        convert_jobs(rows)
    }

    async fn ping(&self) -> Result<(), CoreError> {
        crate::health_check(&self.pool).await.map_err(db)
    }
}

#[async_trait]
impl ModelCatalog for PgStore {
    async fn find_model(&self, model_id: &str) -> Result<Option<CatalogModel>, CoreError> {
        let row = AiModelRepo::find_by_model_id(&self.pool, model_id)
            .await
            .map_err(db)?;
        Ok(row.map(CatalogModel::try_from).transpose()?)
    }

    async fn list_dispatchable(
        &self,
        generation_type: Option<GenerationType>,
    ) -> Result<Vec<CatalogModel>, CoreError> {
        let rows =
            AiModelRepo::list_dispatchable(&self.pool, generation_type.map(GenerationType::as_str))
                .await
                .map_err(db)?;
        rows.into_iter()
            .map(|row| CatalogModel::try_from(row).map_err(CoreError::from))
            .collect()
    }

    async fn record_outcome(
        &self,
        model_id: &str,
        outcome: GenerationOutcome,
    ) -> Result<(), CoreError> {
        let updated = AiModelRepo::record_outcome(&self.pool, model_id, outcome)
            .await
            .map_err(db)?;
        if !updated {
            tracing::warn!(model_id, "Outcome recorded for a model missing from the catalog");
        }
        Ok(())
    }
}
