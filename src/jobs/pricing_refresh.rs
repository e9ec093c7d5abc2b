//! Pricing refresh worker.
//!
//! Loads rows from `model_pricing` and layers them over the configured
//! catalog. Requests already in flight keep the snapshot they started with.

use std::{sync::Arc, time::Instant};

use crate::{
    db::{DbResult, repos::ModelPricingRepo},
    observability::metrics,
    pricing::PricingStore,
};

#[derive(Debug)]
pub struct RefreshRunResult {
    /// Models in the catalog after the refresh
    pub model_count: usize,
    /// Rows loaded from the database
    pub override_count: usize,
    pub duration_ms: u64,
}

/// Run the refresh loop until the task is dropped.
///
/// An interval of zero disables the worker; the startup refresh still runs.
pub async fn start_pricing_refresh_worker(store: PricingStore, repo: Arc<dyn ModelPricingRepo>) {
    let interval_secs = store.refresh_interval_secs();
    if interval_secs == 0 {
        tracing::info!("Pricing refresh worker disabled by configuration");
        return;
    }

    tracing::info!(interval_secs, "Starting pricing refresh worker");
    let interval = std::time::Duration::from_secs(interval_secs);

    loop {
        tokio::time::sleep(interval).await;

        match refresh_pricing(&store, repo.as_ref()).await {
            Ok(result) => tracing::debug!(
                model_count = result.model_count,
                override_count = result.override_count,
                duration_ms = result.duration_ms,
                "Pricing refresh complete"
            ),
            Err(e) => tracing::warn!(error = %e, "Pricing refresh failed, keeping current catalog"),
        }
    }
}

/// Single refresh pass. On failure the current catalog stays in place.
pub async fn refresh_pricing(
    store: &PricingStore,
    repo: &dyn ModelPricingRepo,
) -> DbResult<RefreshRunResult> {
    let start = Instant::now();
    let rows = match repo.list_all().await {
        Ok(rows) => rows,
        Err(e) => {
            metrics::record_pricing_refresh(false, store.snapshot().model_count());
            return Err(e);
        }
    };

    let model_count = store.apply_overrides(
        rows.iter()
            .map(|row| (row.model.as_str(), row.to_pricing())),
    );
    metrics::record_pricing_refresh(true, model_count);

    Ok(RefreshRunResult {
        model_count,
        override_count: rows.len(),
        duration_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
    })
}
