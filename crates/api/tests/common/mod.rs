#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use lumora_api::auth::jwt::{generate_access_token, JwtConfig};
use lumora_api::config::{ServerConfig, StoreBackend};
use lumora_api::router::build_app_router;
use lumora_api::state::AppState;
use lumora_core::rate_limit::InMemoryRateLimiter;
use lumora_core::roles::Role;
use lumora_core::types::DbId;
use lumora_events::EventBus;
use lumora_pipeline::{InMemoryStore, MediaResolver, Orchestrator, PipelineConfig, Stores};
use lumora_provider::adapters::mock::{MockBehavior, MockProvider};
use lumora_provider::poll::PollConfig;
use lumora_provider::retry::RetryConfig;
use lumora_provider::ProviderRunner;
use tower::ServiceExt;

pub const FREE_ALLOTMENT: i32 = 3;

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config(rate_limit: u32) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["*".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        jwt: JwtConfig {
            secret: "test-secret-that-is-long-enough-for-hmac".to_string(),
            access_token_expiry_mins: 15,
        },
        store_backend: StoreBackend::Memory,
        generate_rate_limit_per_minute: rate_limit,
        recovery_interval_secs: 300,
    }
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<InMemoryStore>,
    pub orchestrator: Orchestrator,
    pub config: ServerConfig,
    pub media_dir: PathBuf,
}

impl TestApp {
    pub fn token(&self, user_id: DbId) -> String {
        generate_access_token(user_id, Role::User, &self.config.jwt).unwrap()
    }

    pub fn admin_token(&self, user_id: DbId) -> String {
        generate_access_token(user_id, Role::Admin, &self.config.jwt).unwrap()
    }

    pub fn app(&self) -> Router {
        self.router.clone()
    }
}

/// Full router over an in-memory store and a synchronous mock provider.
pub fn build_test_app(media_dir: PathBuf) -> TestApp {
    build_test_app_with(MockBehavior::Instant, 100, media_dir)
}

pub fn build_test_app_with(behavior: MockBehavior, rate_limit: u32, media_dir: PathBuf) -> TestApp {
    let config = test_config(rate_limit);
    let store = Arc::new(InMemoryStore::new(FREE_ALLOTMENT));
    let stores = Stores::shared(store.clone());
    let events = Arc::new(EventBus::default());

    let runner = ProviderRunner::new(
        Arc::new(MockProvider::new(behavior)),
        RetryConfig {
            max_retries: 1,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            multiplier: 2.0,
            jitter: 0.0,
        },
        PollConfig {
            interval: Duration::from_millis(10),
            max_attempts: 5,
        },
        Duration::from_secs(5),
    );
    let orchestrator = Orchestrator::new(
        stores.clone(),
        runner,
        events.clone(),
        PipelineConfig {
            cache_downloads: false,
            media_dir: media_dir.clone(),
            ..Default::default()
        },
    );

    let state = AppState {
        config: Arc::new(config.clone()),
        media: MediaResolver::new(Arc::clone(&stores.jobs), media_dir.clone()),
        stores,
        orchestrator: orchestrator.clone(),
        rate_limiter: Arc::new(InMemoryRateLimiter::per_minute(rate_limit)),
        event_bus: events,
        http: reqwest::Client::new(),
    };

    TestApp {
        router: build_app_router(state, &config),
        store,
        orchestrator,
        config,
        media_dir,
    }
}

// -- Request helpers --

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn send(app: Router, request: Request<Body>) -> Response {
    app.oneshot(request).await.unwrap()
}

pub async fn get(app: Router, uri: &str) -> Response {
    send(app, Request::get(uri).body(Body::empty()).unwrap()).await
}

pub async fn get_auth(app: Router, uri: &str, token: &str) -> Response {
    let request = Request::get(uri)
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

pub async fn get_with_header(app: Router, uri: &str, name: &str, value: &str) -> Response {
    let request = Request::get(uri)
        .header(name, value)
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

pub async fn post_json_auth(
    app: Router,
    uri: &str,
    token: &str,
    body: serde_json::Value,
) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {token}"))
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}
