use std::sync::Arc;

use lumora_core::rate_limit::RateLimiter;
use lumora_events::EventBus;
use lumora_pipeline::{MediaResolver, Orchestrator, Stores};

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheap to clone: everything is behind an `Arc` or already `Clone`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub stores: Stores,
    pub orchestrator: Orchestrator,
    pub media: MediaResolver,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub event_bus: Arc<EventBus>,
    /// Client used to proxy media from the provider.
    pub http: reqwest::Client,
}
