//! Request-time validation and payment, then background execution.
//!
//! Errors before the reservation commits are returned to the caller and
//! never need compensation. Everything after it happens on a tracked task:
//! the caller only ever sees the job record.

use std::sync::Arc;
use std::time::{Duration, Instant};

use lumora_core::catalog::{ensure_dispatchable, GenerationOutcome};
use lumora_core::error::CoreError;
use lumora_core::generation::{compute_cost, GenerationSpec};
use lumora_core::job::{CompletionPath, GenerationJob, JobCompletion, NewGenerationJob};
use lumora_core::ledger::Reservation;
use lumora_core::status::JobStatus;
use lumora_core::store::{JobStore, LedgerStore, ModelCatalog};
use lumora_core::types::DbId;
use lumora_events::{event_types, DomainEvent, EventBus};
use lumora_provider::{NormalizedResult, ProviderError, ProviderRequest, ProviderRunner};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use crate::compensation::compensate_reservation;
use crate::config::PipelineConfig;
use crate::media::MediaCache;
use crate::progress::JobProgress;

/// The three store seams, usually one object behind three `Arc`s.
#[derive(Clone)]
pub struct Stores {
    pub ledger: Arc<dyn LedgerStore>,
    pub jobs: Arc<dyn JobStore>,
    pub catalog: Arc<dyn ModelCatalog>,
}

impl Stores {
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: LedgerStore + JobStore + ModelCatalog + 'static,
    {
        Self {
            ledger: store.clone(),
            jobs: store.clone(),
            catalog: store,
        }
    }
}

/// What `request_generation` hands back immediately.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationTicket {
    pub job: GenerationJob,
    pub credits_remaining: i64,
    pub free_generations_left: i32,
}

/// Everything the background task needs about one generation.
#[derive(Debug, Clone)]
pub(crate) struct Dispatch {
    pub job_id: DbId,
    pub user_id: DbId,
    pub model_id: String,
    pub reservation: Reservation,
    pub request: ProviderRequest,
}

#[derive(Clone)]
pub struct Orchestrator {
    pub(crate) stores: Stores,
    pub(crate) runner: ProviderRunner,
    pub(crate) events: Arc<EventBus>,
    pub(crate) cache: Option<MediaCache>,
    pub(crate) config: PipelineConfig,
    tracker: TaskTracker,
    permits: Arc<Semaphore>,
}

impl Orchestrator {
    pub fn new(
        stores: Stores,
        runner: ProviderRunner,
        events: Arc<EventBus>,
        config: PipelineConfig,
    ) -> Self {
        let cache = config
            .cache_downloads
            .then(|| MediaCache::new(config.media_dir.clone()));
        Self {
            stores,
            runner,
            events,
            cache,
            permits: Arc::new(Semaphore::new(config.max_concurrent_generations)),
            config,
            tracker: TaskTracker::new(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Validate, price, reserve, and create the job; then start it.
    ///
    /// Returns as soon as the job exists. With a synchronous provider the
    /// job is already terminal when this returns.
    pub async fn request_generation(
        &self,
        user_id: DbId,
        spec: GenerationSpec,
    ) -> Result<GenerationTicket, CoreError> {
        spec.check()?;

        let model_id = spec
            .model_id
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| self.config.default_model(spec.generation_type))
            .to_string();
        let found = self.stores.catalog.find_model(&model_id).await?;
        let model = ensure_dispatchable(&model_id, found, spec.generation_type)?;

        let duration = spec.effective_duration();
        let aspect_ratio = spec.effective_aspect_ratio().to_string();
        let cost = compute_cost(spec.generation_type, &model.pricing, duration);
        let description = format!("{} generation with {}", spec.generation_type, model_id);

        let reservation = self
            .stores
            .ledger
            .reserve(user_id, cost, &description)
            .await?;
        tracing::info!(
            user_id,
            model_id = %model_id,
            reservation_id = %reservation.id,
            cost,
            is_free = reservation.is_free,
            "Funds reserved for generation",
        );

        let new_job = NewGenerationJob {
            user_id,
            generation_type: spec.generation_type,
            prompt: spec.prompt.clone(),
            model_id: model_id.clone(),
            aspect_ratio: Some(aspect_ratio.clone()),
            duration_secs: duration.map(|d| d as i32),
            cost_charged: reservation.charged(),
            used_free_tier: reservation.is_free,
            watermark: reservation.watermark(),
            reservation_id: reservation.id,
        };
        let job = match self.stores.jobs.create(new_job).await {
            Ok(job) => job,
            Err(e) => {
                tracing::error!(
                    user_id,
                    reservation_id = %reservation.id,
                    error = %e,
                    "Job creation failed after reservation, compensating",
                );
                compensate_reservation(
                    self.stores.ledger.as_ref(),
                    &self.events,
                    &reservation,
                    None,
                    "job could not be created",
                )
                .await;
                return Err(e);
            }
        };

        let mut credits_remaining = reservation.credits_after;
        let mut free_generations_left = reservation.free_generations_left_after;
        let dispatch = Dispatch {
            job_id: job.id,
            user_id,
            model_id,
            request: ProviderRequest {
                generation_type: spec.generation_type,
                prompt: spec.prompt,
                model_id: job.model_id.clone(),
                aspect_ratio,
                duration_secs: duration,
                watermark: reservation.watermark(),
            },
            reservation,
        };

        let job = if self.runner.is_synchronous() {
            self.execute(dispatch, CompletionPath::Synchronous).await;
            // An inline failure has already been compensated.
            match self.stores.ledger.balance(user_id).await {
                Ok(balance) => {
                    credits_remaining = balance.credits;
                    free_generations_left = balance.free_generations_left;
                }
                Err(e) => {
                    tracing::warn!(
                        user_id,
                        error = %e,
                        "Balance re-read failed after inline generation",
                    );
                }
            }
            self.stores.jobs.find(job.id).await?.unwrap_or(job)
        } else {
            self.spawn(dispatch);
            job
        };

        Ok(GenerationTicket {
            job,
            credits_remaining,
            free_generations_left,
        })
    }

    fn spawn(&self, dispatch: Dispatch) {
        let span = tracing::info_span!(
            "generation",
            job_id = dispatch.job_id,
            user_id = dispatch.user_id,
        );
        let this = self.clone();
        self.tracker.spawn(
            async move {
                let _permit = this.permits.clone().acquire_owned().await.ok();
                this.execute(dispatch, CompletionPath::Standard).await;
            }
            .instrument(span),
        );
    }

    /// Drive one job to a terminal state. Never returns an error: every
    /// outcome is written to the job record.
    pub(crate) async fn execute(&self, dispatch: Dispatch, path: CompletionPath) {
        let started = Instant::now();

        if path == CompletionPath::Standard {
            match self.stores.jobs.mark_processing(dispatch.job_id).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!(
                        job_id = dispatch.job_id,
                        "Job is no longer pending, not dispatching",
                    );
                    return;
                }
                Err(e) => {
                    self.handle_failure(&dispatch, "Generation could not be started", &e.to_string())
                        .await;
                    return;
                }
            }
        }

        let progress = JobProgress::new(self.stores.jobs.clone(), dispatch.job_id);
        let deadline = self.config.generation_deadline;
        let outcome =
            match tokio::time::timeout(deadline, self.runner.generate(&dispatch.request, &progress))
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(ProviderError::Timeout(format!(
                    "generation exceeded {}s overall",
                    deadline.as_secs()
                ))),
            };

        match outcome {
            Ok(result) => {
                self.handle_success(&dispatch, result, path, started.elapsed())
                    .await
            }
            Err(e) => {
                tracing::warn!(
                    job_id = dispatch.job_id,
                    model_id = %dispatch.model_id,
                    kind = e.kind(),
                    error = %e,
                    "Provider failed",
                );
                self.handle_failure(&dispatch, e.client_message(), &e.to_string())
                    .await
            }
        }
    }

    async fn handle_success(
        &self,
        dispatch: &Dispatch,
        result: NormalizedResult,
        path: CompletionPath,
        elapsed: Duration,
    ) {
        let completion = JobCompletion {
            generation_id: result.generation_id,
            remote_url: result.remote_url,
            local_file_path: result.local_path,
            thumbnail_url: result.thumbnail_url,
            format: Some(result.format),
            metadata: result.metadata,
        };

        match self
            .stores
            .jobs
            .complete(dispatch.job_id, &completion, path)
            .await
        {
            Ok(true) => {
                let latency_ms = elapsed.as_millis() as u64;
                tracing::info!(
                    job_id = dispatch.job_id,
                    user_id = dispatch.user_id,
                    model_id = %dispatch.model_id,
                    latency_ms,
                    "Generation completed",
                );
                self.record_outcome(&dispatch.model_id, GenerationOutcome::Succeeded { latency_ms })
                    .await;
                self.events.publish(
                    DomainEvent::new(event_types::GENERATION_COMPLETED)
                        .with_job(dispatch.job_id)
                        .with_user(dispatch.user_id)
                        .with_payload(serde_json::json!({
                            "modelId": dispatch.model_id,
                            "generationId": completion.generation_id,
                            "latencyMs": latency_ms,
                        })),
                );
                if completion.local_file_path.is_none() {
                    self.spawn_cache_download(dispatch, &completion);
                }
            }
            Ok(false) => {
                tracing::warn!(
                    job_id = dispatch.job_id,
                    "Generation finished but the job is no longer active, result discarded",
                );
            }
            Err(e) => {
                self.handle_failure(
                    dispatch,
                    "Generation result could not be saved",
                    &e.to_string(),
                )
                .await
            }
        }
    }

    /// Fail the job, record the outcome once, and return the funds.
    pub(crate) async fn handle_failure(&self, dispatch: &Dispatch, client_message: &str, detail: &str) {
        let transitioned = match self.stores.jobs.fail(dispatch.job_id, client_message).await {
            Ok(changed) => changed,
            Err(e) => {
                tracing::error!(
                    job_id = dispatch.job_id,
                    error = %e,
                    "Failed to mark job failed",
                );
                false
            }
        };

        if transitioned {
            self.record_outcome(&dispatch.model_id, GenerationOutcome::Failed)
                .await;
            self.events.publish(
                DomainEvent::new(event_types::GENERATION_FAILED)
                    .with_job(dispatch.job_id)
                    .with_user(dispatch.user_id)
                    .with_payload(serde_json::json!({
                        "modelId": dispatch.model_id,
                        "error": client_message,
                    })),
            );
        } else if self.is_completed(dispatch.job_id).await {
            tracing::warn!(
                job_id = dispatch.job_id,
                "Failure reported for a completed job, funds stay charged",
            );
            return;
        }

        compensate_reservation(
            self.stores.ledger.as_ref(),
            &self.events,
            &dispatch.reservation,
            Some(dispatch.job_id),
            detail,
        )
        .await;
    }

    async fn is_completed(&self, job_id: DbId) -> bool {
        matches!(
            self.stores.jobs.find(job_id).await,
            Ok(Some(job)) if job.status == JobStatus::Completed
        )
    }

    pub(crate) async fn record_outcome(&self, model_id: &str, outcome: GenerationOutcome) {
        if let Err(e) = self.stores.catalog.record_outcome(model_id, outcome).await {
            tracing::warn!(model_id, error = %e, "Failed to record model stats");
        }
    }

    fn spawn_cache_download(&self, dispatch: &Dispatch, completion: &JobCompletion) {
        let Some(cache) = self.cache.clone() else {
            return;
        };
        let jobs = self.stores.jobs.clone();
        let job_id = dispatch.job_id;
        let generation_type = dispatch.request.generation_type;
        let remote_url = completion.remote_url.clone();
        let format = completion.format.clone();
        let thumbnail_url = completion.thumbnail_url.clone();

        self.tracker.spawn(async move {
            cache
                .cache_job_assets(
                    jobs.as_ref(),
                    job_id,
                    generation_type,
                    &remote_url,
                    format.as_deref(),
                    thumbnail_url.as_deref(),
                )
                .await;
        });
    }

    /// Prompt rewriting through the configured provider.
    pub async fn enhance_prompt(&self, prompt: &str) -> Result<String, ProviderError> {
        self.runner.enhance_prompt(prompt).await
    }

    /// Wait until every background task has finished. Tests only need this
    /// to observe terminal states; shutdown uses [`Orchestrator::shutdown`].
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Stop accepting the idea of new work and wait up to `grace` for
    /// in-flight generations. Whatever is still running afterwards is left
    /// to the recovery sweep of the next start.
    pub async fn shutdown(&self, grace: Duration) {
        self.tracker.close();
        let in_flight = self.tracker.len();
        if in_flight == 0 {
            return;
        }
        tracing::info!(in_flight, "Waiting for in-flight generations");
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            tracing::warn!(
                remaining = self.tracker.len(),
                "Shutdown grace period elapsed with generations still running",
            );
        }
    }
}
