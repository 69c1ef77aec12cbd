//! In-process implementations of the store traits.
//!
//! Used by `STORE_BACKEND=memory` for local development and by the test
//! suites. All state sits behind one mutex that is never held across an
//! await, which serializes ledger mutation per user (and across users,
//! which is fine at this scale). Nothing survives a restart.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use lumora_core::catalog::{CatalogModel, GenerationOutcome, ModelPricing, ModelStats};
use lumora_core::error::CoreError;
use lumora_core::generation::GenerationType;
use lumora_core::job::{CompletionPath, GenerationJob, JobCompletion, NewGenerationJob};
use lumora_core::ledger::{
    plan_reservation, plan_revoke, restored_free_count, validate_grant, BalanceSnapshot,
    CompensationOutcome, LedgerEntry, LedgerEntryKind, Reservation, ReservationPlan,
    RevokeOutcome,
};
use lumora_core::status::{JobStatus, ModelStatus};
use lumora_core::store::{JobStore, LedgerStore, ModelCatalog};
use lumora_core::types::{DbId, Timestamp};
use uuid::Uuid;

const MAX_HISTORY_LIMIT: i64 = 200;
const MAX_JOB_LIMIT: i64 = 100;

struct StoredReservation {
    reservation: Reservation,
    compensated: bool,
}

#[derive(Default)]
struct State {
    balances: HashMap<DbId, BalanceSnapshot>,
    reservations: HashMap<Uuid, StoredReservation>,
    entries: Vec<LedgerEntry>,
    jobs: BTreeMap<DbId, GenerationJob>,
    models: HashMap<String, CatalogModel>,
    next_job_id: DbId,
}

impl State {
    fn balance_mut(&mut self, user_id: DbId, allotment: i32) -> &mut BalanceSnapshot {
        self.balances
            .entry(user_id)
            .or_insert_with(|| BalanceSnapshot::fresh(allotment))
    }

    fn append(
        &mut self,
        user_id: DbId,
        amount: i64,
        kind: LedgerEntryKind,
        description: &str,
        balance_after: i64,
        reservation_id: Option<Uuid>,
    ) -> LedgerEntry {
        let entry = LedgerEntry {
            id: self.entries.len() as DbId + 1,
            user_id,
            amount,
            kind,
            description: description.to_string(),
            balance_after,
            reservation_id,
            created_at: Utc::now(),
        };
        self.entries.push(entry.clone());
        entry
    }

    /// Apply a guarded status write. Returns whether the job changed.
    fn transition(
        &mut self,
        id: DbId,
        to: JobStatus,
        path: CompletionPath,
        apply: impl FnOnce(&mut GenerationJob),
    ) -> bool {
        match self.jobs.get_mut(&id) {
            Some(job) if job.status.can_transition_to(to, path) => {
                job.status = to;
                job.updated_at = Utc::now();
                apply(job);
                true
            }
            _ => false,
        }
    }
}

/// The model set seeded by the catalog migration.
pub fn default_catalog() -> Vec<CatalogModel> {
    let model = |id: &str, name: &str, t, per_second: f64, per_image: i64, status| CatalogModel {
        model_id: id.to_string(),
        display_name: name.to_string(),
        generation_type: t,
        pricing: ModelPricing {
            cost_per_second: per_second,
            cost_per_image: per_image,
        },
        status,
        stats: ModelStats::default(),
    };
    vec![
        model("flux-schnell", "FLUX Schnell", GenerationType::Image, 0.0, 5, ModelStatus::Active),
        model("gpt-image-1", "GPT Image", GenerationType::Image, 0.0, 8, ModelStatus::Beta),
        model("kling-v1", "Kling v1", GenerationType::Video, 2.0, 0, ModelStatus::Active),
        model("runway-gen3", "Runway Gen-3", GenerationType::Video, 3.0, 0, ModelStatus::Inactive),
    ]
}

/// One value implementing every store trait.
pub struct InMemoryStore {
    state: Mutex<State>,
    free_generation_allotment: i32,
    fail_compensations: AtomicBool,
    fail_job_creation: AtomicBool,
}

impl InMemoryStore {
    /// Empty store with the default model catalog.
    pub fn new(free_generation_allotment: i32) -> Self {
        Self::with_models(free_generation_allotment, default_catalog())
    }

    pub fn with_models(free_generation_allotment: i32, models: Vec<CatalogModel>) -> Self {
        let state = State {
            models: models
                .into_iter()
                .map(|m| (m.model_id.clone(), m))
                .collect(),
            next_job_id: 1,
            ..Default::default()
        };
        Self {
            state: Mutex::new(state),
            free_generation_allotment,
            fail_compensations: AtomicBool::new(false),
            fail_job_creation: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Set a user's free-generation counter directly. Seeding only; bypasses
    /// the ledger and keeps `credits` untouched.
    pub fn set_free_generations(&self, user_id: DbId, free_generations_left: i32) {
        let allotment = self.free_generation_allotment;
        let mut state = self.lock();
        let balance = state.balance_mut(user_id, allotment);
        balance.free_generations_left = free_generations_left.clamp(0, allotment);
    }

    /// Make every `compensate` call fail with a storage error.
    pub fn fail_compensations(&self, fail: bool) {
        self.fail_compensations.store(fail, Ordering::SeqCst);
    }

    /// Make every job `create` call fail with a storage error.
    pub fn fail_job_creation(&self, fail: bool) {
        self.fail_job_creation.store(fail, Ordering::SeqCst);
    }

    /// Backdate a job's `updated_at`, as if its worker died long ago.
    pub fn backdate_job(&self, id: DbId, updated_at: Timestamp) {
        if let Some(job) = self.lock().jobs.get_mut(&id) {
            job.updated_at = updated_at;
        }
    }

    /// Every ledger entry for `user_id`, oldest first.
    pub fn entries_for(&self, user_id: DbId) -> Vec<LedgerEntry> {
        self.lock()
            .entries
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl LedgerStore for InMemoryStore {
    async fn balance(&self, user_id: DbId) -> Result<BalanceSnapshot, CoreError> {
        let allotment = self.free_generation_allotment;
        Ok(*self.lock().balance_mut(user_id, allotment))
    }

    async fn reserve(
        &self,
        user_id: DbId,
        cost: i64,
        description: &str,
    ) -> Result<Reservation, CoreError> {
        let allotment = self.free_generation_allotment;
        let mut state = self.lock();
        let balance = state.balance_mut(user_id, allotment);

        let plan = plan_reservation(balance, cost).map_err(CoreError::InsufficientFunds)?;
        let (is_free, debit, kind) = match plan {
            ReservationPlan::Free => (true, 0, LedgerEntryKind::Usage),
            ReservationPlan::Paid { cost } => (false, cost, LedgerEntryKind::Generation),
        };
        if is_free {
            balance.free_generations_left -= 1;
        }
        balance.credits -= debit;
        let snapshot = *balance;

        let reservation = Reservation {
            id: Uuid::now_v7(),
            user_id,
            is_free,
            cost,
            credits_after: snapshot.credits,
            free_generations_left_after: snapshot.free_generations_left,
        };
        state.append(
            user_id,
            -debit,
            kind,
            description,
            snapshot.credits,
            Some(reservation.id),
        );
        state.reservations.insert(
            reservation.id,
            StoredReservation {
                reservation: reservation.clone(),
                compensated: false,
            },
        );
        Ok(reservation)
    }

    async fn compensate(
        &self,
        reservation: &Reservation,
        reason: &str,
    ) -> Result<CompensationOutcome, CoreError> {
        if self.fail_compensations.load(Ordering::SeqCst) {
            return Err(CoreError::Internal("ledger unavailable".into()));
        }

        let allotment = self.free_generation_allotment;
        let mut state = self.lock();
        let stored = match state.reservations.get_mut(&reservation.id) {
            None => return Ok(CompensationOutcome::NotCommitted),
            Some(s) if s.compensated => return Ok(CompensationOutcome::AlreadyCompensated),
            Some(s) => s,
        };
        stored.compensated = true;
        let committed = stored.reservation.clone();

        let balance = state.balance_mut(committed.user_id, allotment);
        if committed.is_free {
            let before = balance.free_generations_left;
            balance.free_generations_left =
                restored_free_count(before, balance.free_generation_allotment);
            let restored = balance.free_generations_left > before;
            let credits = balance.credits;
            state.append(
                committed.user_id,
                0,
                LedgerEntryKind::Refund,
                &format!("Free generation restored: {reason}"),
                credits,
                Some(committed.id),
            );
            Ok(CompensationOutcome::Restored {
                credits_restored: 0,
                free_generation_restored: restored,
            })
        } else {
            balance.credits += committed.cost;
            let credits = balance.credits;
            state.append(
                committed.user_id,
                committed.cost,
                LedgerEntryKind::Refund,
                &format!("Refund: {reason}"),
                credits,
                Some(committed.id),
            );
            Ok(CompensationOutcome::Restored {
                credits_restored: committed.cost,
                free_generation_restored: false,
            })
        }
    }

    async fn find_reservation(&self, id: Uuid) -> Result<Option<Reservation>, CoreError> {
        Ok(self
            .lock()
            .reservations
            .get(&id)
            .map(|s| s.reservation.clone()))
    }

    async fn grant(
        &self,
        user_id: DbId,
        amount: i64,
        kind: LedgerEntryKind,
        description: &str,
    ) -> Result<LedgerEntry, CoreError> {
        validate_grant(amount, kind)?;
        let allotment = self.free_generation_allotment;
        let mut state = self.lock();
        let balance = state.balance_mut(user_id, allotment);
        balance.credits += amount;
        let credits = balance.credits;
        Ok(state.append(user_id, amount, kind, description, credits, None))
    }

    async fn revoke(
        &self,
        user_id: DbId,
        amount: i64,
        description: &str,
    ) -> Result<RevokeOutcome, CoreError> {
        let allotment = self.free_generation_allotment;
        let mut state = self.lock();
        let balance = state.balance_mut(user_id, allotment);
        let outcome = plan_revoke(balance.credits, amount)?;
        balance.credits = outcome.balance_after;

        let description = if outcome.shortfall > 0 {
            format!(
                "{description} (revoked {} of {amount}; {} already spent)",
                outcome.revoked, outcome.shortfall
            )
        } else {
            description.to_string()
        };
        state.append(
            user_id,
            -outcome.revoked,
            LedgerEntryKind::Refund,
            &description,
            outcome.balance_after,
            None,
        );
        Ok(outcome)
    }

    async fn history(
        &self,
        user_id: DbId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LedgerEntry>, CoreError> {
        let limit = limit.clamp(1, MAX_HISTORY_LIMIT) as usize;
        let offset = offset.max(0) as usize;
        Ok(self
            .lock()
            .entries
            .iter()
            .rev()
            .filter(|e| e.user_id == user_id)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn create(&self, new: NewGenerationJob) -> Result<GenerationJob, CoreError> {
        if self.fail_job_creation.load(Ordering::SeqCst) {
            return Err(CoreError::Internal("job store unavailable".into()));
        }

        let mut state = self.lock();
        let id = state.next_job_id;
        state.next_job_id += 1;
        let now = Utc::now();
        let job = GenerationJob {
            id,
            user_id: new.user_id,
            generation_type: new.generation_type,
            prompt: new.prompt,
            model_id: new.model_id,
            aspect_ratio: new.aspect_ratio,
            duration_secs: new.duration_secs,
            status: JobStatus::Pending,
            progress: 0,
            cost_charged: new.cost_charged,
            used_free_tier: new.used_free_tier,
            watermark: new.watermark,
            reservation_id: new.reservation_id,
            generation_id: None,
            local_file_path: None,
            remote_url: None,
            thumbnail_url: None,
            format: None,
            metadata: None,
            error: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        };
        state.jobs.insert(id, job.clone());
        Ok(job)
    }

    async fn find(&self, id: DbId) -> Result<Option<GenerationJob>, CoreError> {
        Ok(self.lock().jobs.get(&id).cloned())
    }

    async fn list_for_user(
        &self,
        user_id: DbId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<GenerationJob>, CoreError> {
        let limit = limit.clamp(1, MAX_JOB_LIMIT) as usize;
        let offset = offset.max(0) as usize;
        Ok(self
            .lock()
            .jobs
            .values()
            .rev()
            .filter(|j| j.user_id == user_id)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_processing(&self, id: DbId) -> Result<bool, CoreError> {
        Ok(self.lock().transition(
            id,
            JobStatus::Processing,
            CompletionPath::Standard,
            |job| job.started_at = Some(Utc::now()),
        ))
    }

    async fn update_progress(&self, id: DbId, progress: i16) -> Result<bool, CoreError> {
        match self.lock().jobs.get_mut(&id) {
            Some(job) if !job.status.is_terminal() => {
                job.progress = progress.clamp(0, 100);
                job.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_generation_id(&self, id: DbId, generation_id: &str) -> Result<bool, CoreError> {
        match self.lock().jobs.get_mut(&id) {
            Some(job) if !job.status.is_terminal() => {
                job.generation_id = Some(generation_id.to_string());
                job.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete(
        &self,
        id: DbId,
        completion: &JobCompletion,
        path: CompletionPath,
    ) -> Result<bool, CoreError> {
        Ok(self
            .lock()
            .transition(id, JobStatus::Completed, path, |job| {
                job.progress = 100;
                job.generation_id = Some(completion.generation_id.clone());
                job.remote_url = Some(completion.remote_url.clone());
                if completion.local_file_path.is_some() {
                    job.local_file_path = completion.local_file_path.clone();
                }
                job.thumbnail_url = completion.thumbnail_url.clone();
                job.format = completion.format.clone();
                job.metadata = completion.metadata.clone();
                job.error = None;
                job.completed_at = Some(Utc::now());
            }))
    }

    async fn fail(&self, id: DbId, error: &str) -> Result<bool, CoreError> {
        Ok(self.lock().transition(
            id,
            JobStatus::Failed,
            CompletionPath::Standard,
            |job| {
                job.error = Some(error.to_string());
                job.completed_at = Some(Utc::now());
            },
        ))
    }

    async fn record_local_path(&self, id: DbId, path: &str) -> Result<bool, CoreError> {
        match self.lock().jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Completed => {
                job.local_file_path = Some(path.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_stale(&self, older_than: Timestamp) -> Result<Vec<GenerationJob>, CoreError> {
        let mut stale: Vec<GenerationJob> = self
            .lock()
            .jobs
            .values()
            .filter(|j| !j.status.is_terminal() && j.updated_at < older_than)
            .cloned()
            .collect();
        stale.sort_by_key(|j| j.updated_at);
        Ok(stale)
    }

    async fn ping(&self) -> Result<(), CoreError> {
        Ok(())
    }
}

#[async_trait]
impl ModelCatalog for InMemoryStore {
    async fn find_model(&self, model_id: &str) -> Result<Option<CatalogModel>, CoreError> {
        Ok(self.lock().models.get(model_id).cloned())
    }

    async fn list_dispatchable(
        &self,
        generation_type: Option<GenerationType>,
    ) -> Result<Vec<CatalogModel>, CoreError> {
        let mut models: Vec<CatalogModel> = self
            .lock()
            .models
            .values()
            .filter(|m| m.status.is_dispatchable())
            .filter(|m| generation_type.map_or(true, |t| m.generation_type == t))
            .cloned()
            .collect();
        models.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        Ok(models)
    }

    async fn record_outcome(
        &self,
        model_id: &str,
        outcome: GenerationOutcome,
    ) -> Result<(), CoreError> {
        match self.lock().models.get_mut(model_id) {
            Some(model) => model.stats.record(outcome),
            None => {
                tracing::warn!(model_id, "Outcome recorded for a model missing from the catalog")
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use lumora_core::ledger::replay_balance;

    use super::*;

    fn store() -> InMemoryStore {
        InMemoryStore::new(3)
    }

    // -- Ledger --

    #[tokio::test]
    async fn free_allowance_is_used_before_credits() {
        let store = store();
        store.grant(1, 20, LedgerEntryKind::Purchase, "pack").await.unwrap();

        let r = store.reserve(1, 5, "image").await.unwrap();
        assert!(r.is_free);
        assert_eq!(r.charged(), 0);
        assert_eq!(r.free_generations_left_after, 2);
        assert_eq!(r.credits_after, 20);
    }

    #[tokio::test]
    async fn insufficient_funds_changes_nothing() {
        let store = store();
        store.set_free_generations(1, 0);
        store.grant(1, 4, LedgerEntryKind::Purchase, "pack").await.unwrap();

        let err = store.reserve(1, 5, "image").await.unwrap_err();
        assert_matches!(
            err,
            CoreError::InsufficientFunds(f) if f.cost == 5 && f.current_balance == 4 && f.shortfall == 1
        );
        assert_eq!(store.balance(1).await.unwrap().credits, 4);
        assert_eq!(store.entries_for(1).len(), 1);
    }

    #[tokio::test]
    async fn compensation_restores_once() {
        let store = store();
        store.set_free_generations(1, 0);
        store.grant(1, 10, LedgerEntryKind::Purchase, "pack").await.unwrap();
        let r = store.reserve(1, 8, "video").await.unwrap();

        assert_eq!(
            store.compensate(&r, "failed").await.unwrap(),
            CompensationOutcome::Restored {
                credits_restored: 8,
                free_generation_restored: false
            }
        );
        assert_eq!(
            store.compensate(&r, "failed").await.unwrap(),
            CompensationOutcome::AlreadyCompensated
        );
        assert_eq!(store.balance(1).await.unwrap().credits, 10);
    }

    #[tokio::test]
    async fn unknown_reservation_is_not_committed() {
        let store = store();
        let phantom = Reservation {
            id: Uuid::now_v7(),
            user_id: 1,
            is_free: false,
            cost: 50,
            credits_after: 0,
            free_generations_left_after: 0,
        };
        assert_eq!(
            store.compensate(&phantom, "never charged").await.unwrap(),
            CompensationOutcome::NotCommitted
        );
        assert_eq!(store.balance(1).await.unwrap().credits, 0);
    }

    #[tokio::test]
    async fn free_restore_never_exceeds_allotment() {
        let store = store();
        let r = store.reserve(1, 5, "image").await.unwrap();
        assert!(r.is_free);
        store.compensate(&r, "failed").await.unwrap();
        assert_eq!(store.balance(1).await.unwrap().free_generations_left, 3);
    }

    #[tokio::test]
    async fn revoke_clamps_at_zero_and_reports_shortfall() {
        let store = store();
        store.grant(1, 10, LedgerEntryKind::Purchase, "pack").await.unwrap();
        let outcome = store.revoke(1, 25, "chargeback").await.unwrap();
        assert_eq!(outcome.revoked, 10);
        assert_eq!(outcome.shortfall, 15);
        assert_eq!(store.balance(1).await.unwrap().credits, 0);
    }

    #[tokio::test]
    async fn history_replays_to_balance() {
        let store = store();
        store.set_free_generations(1, 0);
        store.grant(1, 30, LedgerEntryKind::Purchase, "pack").await.unwrap();
        let a = store.reserve(1, 8, "a").await.unwrap();
        store.reserve(1, 5, "b").await.unwrap();
        store.compensate(&a, "failed").await.unwrap();
        store.revoke(1, 4, "partial refund").await.unwrap();

        let entries = store.entries_for(1);
        assert_eq!(replay_balance(&entries), store.balance(1).await.unwrap().credits);
        assert_eq!(store.balance(1).await.unwrap().credits, 21);

        let newest = store.history(1, 2, 0).await.unwrap();
        assert_eq!(newest.len(), 2);
        assert_eq!(newest[0].kind, LedgerEntryKind::Refund);
    }

    #[tokio::test]
    async fn concurrent_reservations_never_overdraw() {
        let store = std::sync::Arc::new(store());
        store.set_free_generations(1, 0);
        store.grant(1, 10, LedgerEntryKind::Purchase, "pack").await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.reserve(1, 3, "race").await })
            })
            .collect();
        let mut won = 0;
        for h in handles {
            if h.await.unwrap().is_ok() {
                won += 1;
            }
        }

        assert_eq!(won, 3);
        assert_eq!(store.balance(1).await.unwrap().credits, 1);
    }

    // -- Jobs --

    fn new_job(user_id: DbId) -> NewGenerationJob {
        NewGenerationJob {
            user_id,
            generation_type: GenerationType::Image,
            prompt: "p".into(),
            model_id: "flux-schnell".into(),
            aspect_ratio: None,
            duration_secs: None,
            cost_charged: 5,
            used_free_tier: false,
            watermark: false,
            reservation_id: Uuid::now_v7(),
        }
    }

    #[tokio::test]
    async fn terminal_jobs_reject_transitions() {
        let store = store();
        let job = store.create(new_job(1)).await.unwrap();

        assert!(!store
            .complete(job.id, &JobCompletion::default(), CompletionPath::Standard)
            .await
            .unwrap());
        assert!(store.mark_processing(job.id).await.unwrap());
        assert!(store.fail(job.id, "boom").await.unwrap());

        assert!(!store.mark_processing(job.id).await.unwrap());
        assert!(!store.update_progress(job.id, 50).await.unwrap());
        assert!(!store
            .complete(job.id, &JobCompletion::default(), CompletionPath::Standard)
            .await
            .unwrap());
        assert_eq!(store.find(job.id).await.unwrap().unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn synchronous_path_may_skip_processing() {
        let store = store();
        let job = store.create(new_job(1)).await.unwrap();
        assert!(store
            .complete(job.id, &JobCompletion::default(), CompletionPath::Synchronous)
            .await
            .unwrap());
        assert!(store.record_local_path(job.id, "/tmp/1.png").await.unwrap());
    }

    #[tokio::test]
    async fn listing_is_newest_first_and_scoped() {
        let store = store();
        let first = store.create(new_job(1)).await.unwrap();
        store.create(new_job(2)).await.unwrap();
        let third = store.create(new_job(1)).await.unwrap();

        let jobs = store.list_for_user(1, 10, 0).await.unwrap();
        assert_eq!(
            jobs.iter().map(|j| j.id).collect::<Vec<_>>(),
            vec![third.id, first.id]
        );
    }

    // -- Catalog --

    #[tokio::test]
    async fn only_active_and_beta_models_are_listed() {
        let store = store();
        let video = store
            .list_dispatchable(Some(GenerationType::Video))
            .await
            .unwrap();
        assert_eq!(video.len(), 1);
        assert_eq!(video[0].model_id, "kling-v1");
        assert_eq!(store.list_dispatchable(None).await.unwrap().len(), 3);
    }
}
