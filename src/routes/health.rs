//! Health check endpoints for Kubernetes probes and monitoring.

use std::time::Instant;

use axum::{Json, extract::State, response::IntoResponse};
use http::StatusCode;
use serde::Serialize;

use crate::AppState;
#[cfg(feature = "prometheus")]
use crate::observability::metrics::get_prometheus_handle;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    /// "healthy", "degraded" or "unhealthy"
    pub status: &'static str,
    pub version: &'static str,
    pub subsystems: SubsystemStatus,
}

#[derive(Debug, Serialize)]
pub struct SubsystemStatus {
    pub database: ComponentStatus,
    pub cache: ComponentStatus,
}

#[derive(Debug, Serialize)]
pub struct ComponentStatus {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub latency_ms: u64,
}

impl ComponentStatus {
    fn from_result<E: std::fmt::Display>(
        result: Result<(), E>,
        started: Instant,
        failure: &str,
    ) -> Self {
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match result {
            Ok(()) => Self {
                healthy: true,
                message: None,
                latency_ms,
            },
            Err(e) => {
                tracing::warn!(error = %e, "{failure}");
                Self {
                    healthy: false,
                    message: Some(failure.to_string()),
                    latency_ms,
                }
            }
        }
    }
}

/// Full health check with subsystem status.
///
/// The database holds the credit ledger, so its failure is unhealthy. The
/// rate limiter fails closed without the cache, which also makes the
/// gateway unable to serve generations.
#[tracing::instrument(name = "health.check", skip(state))]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let started = Instant::now();
    let database = ComponentStatus::from_result(
        state.db.ping().await,
        started,
        "Database connection failed",
    );
    let started = Instant::now();
    let cache = ComponentStatus::from_result(
        state.cache.ping().await,
        started,
        "Cache connection failed",
    );

    let healthy = database.healthy && cache.healthy;
    let body = HealthStatus {
        status: if healthy { "healthy" } else { "unhealthy" },
        version: env!("CARGO_PKG_VERSION"),
        subsystems: SubsystemStatus { database, cache },
    };
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

/// Liveness probe: succeeds while the process can serve HTTP.
#[tracing::instrument(name = "health.liveness")]
pub async fn liveness() -> impl IntoResponse {
    StatusCode::OK
}

/// Readiness probe: requires the database and the cache.
#[tracing::instrument(name = "health.readiness", skip(state))]
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    if state.db.ping().await.is_err() || state.cache.ping().await.is_err() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::OK
}

/// Prometheus metrics in text format.
#[tracing::instrument(name = "health.metrics")]
pub async fn metrics() -> impl IntoResponse {
    #[cfg(feature = "prometheus")]
    {
        match get_prometheus_handle() {
            Some(handle) => (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            ),
            None => (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            ),
        }
    }
    #[cfg(not(feature = "prometheus"))]
    (
        StatusCode::NOT_FOUND,
        [("content-type", "text/plain")],
        "Prometheus metrics not enabled".to_string(),
    )
}
