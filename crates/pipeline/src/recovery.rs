//! Orphaned job recovery.
//!
//! A process that dies mid-generation leaves jobs in `pending` or
//! `processing` with funds reserved. The sweep fails those jobs and
//! returns the funds, once at startup and then periodically.

use std::time::Duration;

use chrono::Utc;
use lumora_core::catalog::GenerationOutcome;
use lumora_core::error::CoreError;
use lumora_core::job::GenerationJob;
use lumora_core::ledger::Reservation;
use lumora_core::types::Timestamp;
use lumora_events::{event_types, DomainEvent};
use tokio_util::sync::CancellationToken;

use crate::compensation::compensate_reservation;
use crate::orchestrator::Orchestrator;

/// Error stored on jobs failed by the sweep.
pub const INTERRUPTED_MESSAGE: &str = "Generation was interrupted";

impl Orchestrator {
    /// Fail and compensate every non-terminal job untouched since
    /// `older_than`. Returns how many jobs this call moved to `failed`.
    ///
    /// A job that finishes between the lookup and the write loses nothing:
    /// the guarded `fail` returns `false` and the job is skipped.
    pub async fn recover_stale_jobs(&self, older_than: Timestamp) -> Result<usize, CoreError> {
        let stale = self.stores.jobs.find_stale(older_than).await?;
        let mut recovered = 0;

        for job in stale {
            if !self.stores.jobs.fail(job.id, INTERRUPTED_MESSAGE).await? {
                continue;
            }
            recovered += 1;
            tracing::warn!(
                job_id = job.id,
                user_id = job.user_id,
                status = %job.status,
                reservation_id = %job.reservation_id,
                "Recovered orphaned generation",
            );

            self.record_outcome(&job.model_id, GenerationOutcome::Failed)
                .await;
            self.events.publish(
                DomainEvent::new(event_types::GENERATION_FAILED)
                    .with_job(job.id)
                    .with_user(job.user_id)
                    .with_payload(serde_json::json!({
                        "modelId": job.model_id,
                        "error": INTERRUPTED_MESSAGE,
                    })),
            );

            let reservation = match self.stores.ledger.find_reservation(job.reservation_id).await {
                Ok(Some(reservation)) => reservation,
                Ok(None) => {
                    tracing::warn!(
                        job_id = job.id,
                        reservation_id = %job.reservation_id,
                        "Orphaned job has no committed reservation",
                    );
                    continue;
                }
                Err(e) => {
                    tracing::warn!(
                        job_id = job.id,
                        error = %e,
                        "Reservation lookup failed, compensating from the job record",
                    );
                    reservation_from_job(&job)
                }
            };
            compensate_reservation(
                self.stores.ledger.as_ref(),
                &self.events,
                &reservation,
                Some(job.id),
                INTERRUPTED_MESSAGE,
            )
            .await;
        }

        Ok(recovered)
    }
}

/// Rebuild enough of a reservation to compensate it. Stores key
/// compensation on the reservation id and their own record of it, so the
/// balance fields are irrelevant.
fn reservation_from_job(job: &GenerationJob) -> Reservation {
    Reservation {
        id: job.reservation_id,
        user_id: job.user_id,
        is_free: job.used_free_tier,
        cost: job.cost_charged,
        credits_after: 0,
        free_generations_left_after: 0,
    }
}

/// Periodic stale-job sweep.
pub struct RecoverySweeper {
    orchestrator: Orchestrator,
    interval: Duration,
}

impl RecoverySweeper {
    pub fn new(orchestrator: Orchestrator, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
        }
    }

    /// Sweep immediately, then every `interval` until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            stale_after_secs = self.orchestrator.config.stale_job_after.as_secs(),
            "Recovery sweeper started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Recovery sweeper stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.sweep().await;
                }
            }
        }
    }

    async fn sweep(&self) {
        let stale_after = chrono::Duration::from_std(self.orchestrator.config.stale_job_after)
            .unwrap_or_else(|_| chrono::Duration::minutes(30));
        let cutoff = Utc::now() - stale_after;
        match self.orchestrator.recover_stale_jobs(cutoff).await {
            Ok(0) => tracing::debug!("No orphaned generations"),
            Ok(count) => tracing::info!(count, "Orphaned generations recovered"),
            Err(e) => tracing::error!(error = %e, "Recovery sweep failed"),
        }
    }
}
