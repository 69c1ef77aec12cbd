use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lumora_api::config::{ServerConfig, StoreBackend};
use lumora_api::router::build_app_router;
use lumora_api::state::AppState;
use lumora_core::rate_limit::InMemoryRateLimiter;
use lumora_events::{EmailConfig, EmailDelivery, EventBus, OpsAlertService};
use lumora_pipeline::{
    InMemoryStore, MediaResolver, Orchestrator, PipelineConfig, RecoverySweeper, Stores,
};
use lumora_provider::{ProviderConfig, ProviderRunner};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "lumora_api=debug,lumora_pipeline=debug,lumora_provider=info,tower_http=debug".into()
    });
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    // --- Configuration ---
    let config = ServerConfig::from_env();
    let provider_config = ProviderConfig::from_env();
    let pipeline_config =
        PipelineConfig::from_env().with_generation_deadline(provider_config.overall_deadline());
    tracing::info!(
        host = %config.host,
        port = %config.port,
        store = ?config.store_backend,
        provider = ?provider_config.kind,
        "Loaded server configuration",
    );

    // --- Stores ---
    let stores = match config.store_backend {
        StoreBackend::Postgres => {
            let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

            let pool = lumora_db::create_pool(&database_url)
                .await
                .expect("Failed to connect to database");
            tracing::info!("Database connection pool created");

            lumora_db::health_check(&pool)
                .await
                .expect("Database health check failed");
            tracing::info!("Database health check passed");

            lumora_db::run_migrations(&pool)
                .await
                .expect("Failed to run database migrations");
            tracing::info!("Database migrations applied");

            Stores::shared(Arc::new(lumora_db::PgStore::new(
                pool,
                pipeline_config.free_generation_allotment,
            )))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store; all data is lost on restart");
            Stores::shared(Arc::new(InMemoryStore::new(
                pipeline_config.free_generation_allotment,
            )))
        }
    };

    // --- Provider ---
    let provider =
        lumora_provider::build_provider(&provider_config).expect("Failed to build provider");
    let runner = ProviderRunner::from_config(provider, &provider_config);

    // --- Event bus ---
    let event_bus = Arc::new(EventBus::default());

    let alert_handle = match EmailConfig::from_env() {
        Some(email) => {
            tracing::info!(to = %email.ops_alert_email, "Operator alerts enabled");
            let notifier = Arc::new(EmailDelivery::new(email));
            Some(tokio::spawn(OpsAlertService::run(
                notifier,
                event_bus.subscribe(),
            )))
        }
        None => {
            tracing::warn!("SMTP_HOST or OPS_ALERT_EMAIL not set, operator alerts are log-only");
            None
        }
    };

    // --- Orchestrator ---
    let media_dir = pipeline_config.media_dir.clone();
    let orchestrator = Orchestrator::new(
        stores.clone(),
        runner,
        Arc::clone(&event_bus),
        pipeline_config,
    );

    // Sweeps once immediately, which recovers jobs orphaned by the last exit.
    let sweeper_cancel = CancellationToken::new();
    let sweeper = RecoverySweeper::new(
        orchestrator.clone(),
        Duration::from_secs(config.recovery_interval_secs),
    );
    let sweeper_handle = tokio::spawn(sweeper.run(sweeper_cancel.clone()));

    // --- App state ---
    let state = AppState {
        config: Arc::new(config.clone()),
        media: MediaResolver::new(Arc::clone(&stores.jobs), media_dir),
        stores,
        orchestrator: orchestrator.clone(),
        rate_limiter: Arc::new(InMemoryRateLimiter::per_minute(
            config.generate_rate_limit_per_minute,
        )),
        event_bus: Arc::clone(&event_bus),
        http: reqwest::Client::new(),
    };

    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    // Let in-flight generations settle their funds before exiting. Any
    // that do not are failed and refunded by the next startup sweep.
    orchestrator
        .shutdown(Duration::from_secs(config.shutdown_timeout_secs))
        .await;

    sweeper_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), sweeper_handle).await;
    tracing::info!("Recovery sweeper stopped");

    // The alert service exits once every bus sender is gone.
    drop(orchestrator);
    drop(event_bus);
    if let Some(handle) = alert_handle {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }
    tracing::info!("Event services shut down");

    tracing::info!("Graceful shutdown complete");
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
