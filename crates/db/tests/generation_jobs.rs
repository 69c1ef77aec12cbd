//! Generation job repository tests against a real database.
//!
//! Run with `DATABASE_URL` set and `--ignored`.

use lumora_core::catalog::GenerationOutcome;
use lumora_core::generation::GenerationType;
use lumora_core::job::{CompletionPath, JobCompletion, NewGenerationJob};
use lumora_core::status::JobStatus;
use lumora_core::store::{JobStore, LedgerStore, ModelCatalog};
use lumora_db::PgStore;
use sqlx::PgPool;

async fn pending_job(store: &PgStore) -> i64 {
    let reservation = store.reserve(1, 5, "image").await.unwrap();
    store
        .create(NewGenerationJob {
            user_id: 1,
            generation_type: GenerationType::Image,
            prompt: "a harbour at dawn".into(),
            model_id: "flux-schnell".into(),
            aspect_ratio: Some("1:1".into()),
            duration_secs: None,
            cost_charged: reservation.charged(),
            used_free_tier: reservation.is_free,
            watermark: reservation.watermark(),
            reservation_id: reservation.id,
        })
        .await
        .unwrap()
        .id
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore]
async fn lookup_tables_are_seeded(pool: PgPool) {
    lumora_db::health_check(&pool).await.unwrap();
    for table in ["generation_job_statuses", "model_statuses"] {
        let count: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&pool)
            .await
            .unwrap_or_else(|e| panic!("{table} query failed: {e}"));
        assert_eq!(count.0, 4, "{table} should have four statuses");
    }
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore]
async fn standard_lifecycle(pool: PgPool) {
    let store = PgStore::new(pool, 3);
    let id = pending_job(&store).await;

    let completion = JobCompletion {
        generation_id: "gen-1".into(),
        remote_url: "https://cdn.example.com/gen-1.png".into(),
        ..Default::default()
    };
    assert!(!store.complete(id, &completion, CompletionPath::Standard).await.unwrap());

    assert!(store.mark_processing(id).await.unwrap());
    assert!(store.update_progress(id, 40).await.unwrap());
    assert!(store.complete(id, &completion, CompletionPath::Standard).await.unwrap());

    let job = store.find(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
    assert!(job.completed_at.is_some());
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore]
async fn terminal_jobs_reject_transitions_but_accept_cache_repair(pool: PgPool) {
    let store = PgStore::new(pool, 3);
    let id = pending_job(&store).await;
    assert!(store.fail(id, "Generation failed").await.unwrap());

    assert!(!store.mark_processing(id).await.unwrap());
    assert!(!store.update_progress(id, 90).await.unwrap());
    assert!(!store.fail(id, "again").await.unwrap());
    assert!(!store.record_local_path(id, "/tmp/x.png").await.unwrap());

    let id = pending_job(&store).await;
    let completion = JobCompletion {
        generation_id: "gen-2".into(),
        remote_url: "https://cdn.example.com/gen-2.png".into(),
        ..Default::default()
    };
    assert!(store.complete(id, &completion, CompletionPath::Synchronous).await.unwrap());
    assert!(store.record_local_path(id, "/media/images/2.png").await.unwrap());
    let job = store.find(id).await.unwrap().unwrap();
    assert_eq!(job.local_file_path.as_deref(), Some("/media/images/2.png"));
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore]
async fn catalog_lists_only_dispatchable_models(pool: PgPool) {
    let store = PgStore::new(pool, 3);
    let videos = store
        .list_dispatchable(Some(GenerationType::Video))
        .await
        .unwrap();
    assert!(videos.iter().all(|m| m.status.is_dispatchable()));
    assert!(videos.iter().all(|m| m.generation_type == GenerationType::Video));

    store
        .record_outcome("kling-v1", GenerationOutcome::Succeeded { latency_ms: 1200 })
        .await
        .unwrap();
    store
        .record_outcome("kling-v1", GenerationOutcome::Failed)
        .await
        .unwrap();
    let model = store.find_model("kling-v1").await.unwrap().unwrap();
    assert_eq!(model.stats.total_generations, 2);
    assert_eq!(model.stats.successful_generations, 1);
    assert_eq!(model.stats.failed_generations, 1);
    assert!((model.stats.avg_latency_ms - 1200.0).abs() < 1e-9);
}
