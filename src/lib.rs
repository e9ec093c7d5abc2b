//! Credit-aware streaming generation gateway.
//!
//! Requests to `POST /api/generate` pass supervision, pool resolution, rate
//! limiting and spend authorization before a provider is called. The
//! provider stream is normalized, relayed as SSE and settled against the
//! pool that was resolved at the start of the request.

pub mod cache;
pub mod config;
pub mod credits;
pub mod db;
pub mod jobs;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod pricing;
pub mod providers;
pub mod ratelimit;
pub mod routes;
pub mod session;
pub mod settlement;
pub mod streaming;
pub mod supervision;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use axum::Router;
use reqwest::Client;
use thiserror::Error;
use tokio_util::task::TaskTracker;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::{
    cache::{Cache, CacheError},
    config::GatewayConfig,
    credits::CreditResolver,
    db::{DbError, DbPool},
    pricing::PricingStore,
    providers::ProviderRegistry,
    ratelimit::RateLimiter,
    settlement::SettlementEngine,
    supervision::SupervisionPolicy,
};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Database initialization failed: {0}")]
    Database(#[from] DbError),

    #[error("Cache initialization failed: {0}")]
    Cache(#[from] CacheError),
}

/// Shared state handed to every handler. Cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub http_client: Client,
    pub db: Arc<DbPool>,
    pub cache: Arc<dyn Cache>,
    pub providers: Arc<ProviderRegistry>,
    pub pricing: PricingStore,
    pub rate_limiter: RateLimiter,
    pub resolver: CreditResolver,
    pub supervision: SupervisionPolicy,
    pub settlement: SettlementEngine,
    /// Generation tasks; shutdown waits for them to persist.
    pub task_tracker: TaskTracker,
}

impl AppState {
    /// Connect storage, migrate if configured, and wire the services.
    pub async fn new(config: GatewayConfig) -> Result<Self, StartupError> {
        let db = DbPool::from_config(&config.database).await?;
        if config.database.run_migrations() {
            db.run_migrations().await?;
        }
        let cache = cache::from_config(&config.cache).await?;
        Self::from_parts(config, db, cache)
    }

    /// Wire services around an existing database and cache.
    pub fn from_parts(
        config: GatewayConfig,
        db: DbPool,
        cache: Arc<dyn Cache>,
    ) -> Result<Self, StartupError> {
        let http_client = config.server.http_client.build_client()?;
        tracing::debug!(
            timeout_secs = config.server.http_client.timeout_secs,
            connect_timeout_secs = config.server.http_client.connect_timeout_secs,
            "HTTP client configured"
        );

        let providers = ProviderRegistry::from_config(&config.providers);
        if providers.is_empty() {
            tracing::warn!("No providers configured; every generation will be rejected");
        }

        let db = Arc::new(db);
        Ok(Self {
            http_client,
            providers: Arc::new(providers),
            pricing: PricingStore::new(config.pricing.clone()),
            rate_limiter: RateLimiter::new(cache.clone(), config.rate_limits.clone()),
            resolver: CreditResolver::new(db.users(), db.memberships(), db.credits()),
            supervision: SupervisionPolicy::new(db.supervision(), db.usage()),
            settlement: SettlementEngine::new(db.credits(), db.usage()),
            task_tracker: TaskTracker::new(),
            config: Arc::new(config),
            db,
            cache,
        })
    }
}

pub fn build_app(config: &GatewayConfig, state: AppState) -> Router {
    let api = routes::api_routes().route_layer(axum::middleware::from_fn_with_state(
        state.clone(),
        middleware::identity_middleware,
    ));

    let mut app = routes::health_routes(config.observability.metrics.enabled)
        .merge(api)
        .layer(axum::middleware::from_fn(middleware::request_id_middleware));

    if let Some(cors_layer) = config.server.cors.clone().into_layer() {
        app = app.layer(cors_layer);
    }

    app.layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(config.server.body_limit_bytes))
        .with_state(state)
}
