pub mod error;
pub mod generate;
pub mod health;

use axum::{
    Router,
    routing::{get, post},
};

use crate::AppState;

/// Routes that require an authenticated user.
pub fn api_routes() -> Router<AppState> {
    Router::new().route("/api/generate", post(generate::generate))
}

/// Unauthenticated probe and scrape endpoints.
pub fn health_routes(metrics_enabled: bool) -> Router<AppState> {
    let router = Router::new()
        .route("/health", get(health::health_check))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));
    if metrics_enabled {
        router.route("/metrics", get(health::metrics))
    } else {
        router
    }
}
