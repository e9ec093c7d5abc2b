//! Prometheus metrics for the gateway.
//!
//! Provides metrics for:
//! - HTTP request latency and counts
//! - Generation outcomes, token usage and streaming latency
//! - Rate limit, spend and supervision decisions
//! - Settlement results

#[cfg(feature = "prometheus")]
use std::sync::OnceLock;

#[cfg(feature = "prometheus")]
use metrics::{counter, histogram};
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::config::MetricsConfig;

/// Global Prometheus handle for the metrics endpoint.
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the metrics system with the given configuration.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    let builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
            &seconds_from_ms(&config.latency_buckets_ms),
        )
        .map_err(|e| MetricsError::Setup(e.to_string()))?
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Suffix("_tokens".to_string()),
            &config.token_buckets,
        )
        .map_err(|e| MetricsError::Setup(e.to_string()))?;

    let handle = builder.install_recorder().map_err(MetricsError::Install)?;

    PROMETHEUS_HANDLE
        .set(handle)
        .map_err(|_| MetricsError::Setup("Metrics already initialized".to_string()))?;

    Ok(())
}

/// Initialize the metrics system (no-op without prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(_config: &MetricsConfig) -> Result<(), MetricsError> {
    Ok(())
}

#[cfg(feature = "prometheus")]
fn seconds_from_ms(ms_buckets: &[f64]) -> Vec<f64> {
    ms_buckets.iter().map(|ms| ms / 1000.0).collect()
}

/// Get the Prometheus handle for rendering metrics.
#[cfg(feature = "prometheus")]
pub fn get_prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ─────────────────────────────────────────────────────────────────────────────
// Metric Recording Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    #[cfg(feature = "prometheus")]
    {
        let status_class = format!("{}xx", status / 100);

        counter!("http_requests_total", "method" => method.to_string(), "path" => path.to_string(), "status" => status.to_string(), "status_class" => status_class.clone())
            .increment(1);

        histogram!("http_request_duration_seconds", "method" => method.to_string(), "path" => path.to_string(), "status_class" => status_class)
            .record(duration_secs);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (method, path, status, duration_secs);
    }
}

/// Metrics for one finished generation.
#[derive(Debug, Clone)]
pub struct GenerationMetrics<'a> {
    /// Provider name from config
    pub provider: &'a str,
    /// Gateway model id
    pub model: &'a str,
    /// "completed", "error" or "cancelled"
    pub outcome: &'a str,
    /// Number of visible chunks forwarded
    pub chunk_count: u64,
    /// Time to first forwarded event
    pub time_to_first_chunk_secs: Option<f64>,
    /// Total stream duration
    pub duration_secs: f64,
    /// Exact usage, when the provider reported it
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    /// Settled cost in microcents
    pub cost_microcents: Option<i64>,
}

/// Record a finished generation.
pub fn record_generation(metrics: GenerationMetrics<'_>) {
    #[cfg(feature = "prometheus")]
    {
        let GenerationMetrics {
            provider,
            model,
            outcome,
            chunk_count,
            time_to_first_chunk_secs,
            duration_secs,
            input_tokens,
            output_tokens,
            cost_microcents,
        } = metrics;

        counter!("generations_total", "provider" => provider.to_string(), "model" => model.to_string(), "outcome" => outcome.to_string())
            .increment(1);

        counter!("generation_streaming_chunks_total", "provider" => provider.to_string(), "model" => model.to_string())
            .increment(chunk_count);

        if let Some(ttfc) = time_to_first_chunk_secs {
            histogram!("generation_time_to_first_chunk_seconds", "provider" => provider.to_string(), "model" => model.to_string())
                .record(ttfc);
        }

        histogram!("generation_duration_seconds", "provider" => provider.to_string(), "model" => model.to_string())
            .record(duration_secs);

        if let Some(input) = input_tokens {
            histogram!("generation_input_tokens", "model" => model.to_string())
                .record(input as f64);
        }
        if let Some(output) = output_tokens {
            histogram!("generation_output_tokens", "model" => model.to_string())
                .record(output as f64);
        }
        if let Some(cost) = cost_microcents {
            counter!("generation_cost_microcents_total", "model" => model.to_string())
                .increment(cost.max(0) as u64);
        }
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = metrics;
    }
}

/// Record a rate limit decision ("allowed", "limited" or "error").
pub fn record_rate_limit(result: &str, tier: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("rate_limit_checks_total", "result" => result.to_string(), "tier" => tier.to_string())
            .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (result, tier);
    }
}

/// Record a spend authorization decision.
///
/// `result` is "allowed" or the denial code.
pub fn record_spend_check(result: &str, pool_kind: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("spend_checks_total", "result" => result.to_string(), "pool" => pool_kind.to_string())
            .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (result, pool_kind);
    }
}

/// Record a supervision precheck outcome.
pub fn record_supervision_check(result: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("supervision_checks_total", "result" => result.to_string()).increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = result;
    }
}

/// Record a settlement ("debited" or "debit_failed").
pub fn record_settlement(status: &str, pool_kind: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("settlements_total", "status" => status.to_string(), "pool" => pool_kind.to_string())
            .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (status, pool_kind);
    }
}

/// Record a gateway error returned to a client.
pub fn record_gateway_error(error_type: &str, error_code: &str, provider: Option<&str>) {
    #[cfg(feature = "prometheus")]
    {
        let provider_label = provider.unwrap_or("none").to_string();

        counter!(
            "gateway_errors_total",
            "error_type" => error_type.to_string(),
            "error_code" => error_code.to_string(),
            "provider" => provider_label
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (error_type, error_code, provider);
    }
}

/// Record a pricing catalog refresh.
pub fn record_pricing_refresh(success: bool, model_count: usize) {
    #[cfg(feature = "prometheus")]
    {
        let status = if success { "success" } else { "error" };
        counter!("pricing_refreshes_total", "status" => status).increment(1);
        if success {
            metrics::gauge!("pricing_catalog_models").set(model_count as f64);
        }
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (success, model_count);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics: {0}")]
    Setup(String),

    #[cfg(feature = "prometheus")]
    #[error("Failed to install metrics recorder: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}
