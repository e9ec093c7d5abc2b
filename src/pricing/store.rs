use std::sync::Arc;

use parking_lot::RwLock;

use super::{ModelPricing, PricingCatalog, PricingConfig};

/// Reloadable holder of the current pricing snapshot.
///
/// The configured catalog is the base; database overrides are layered on top
/// at each reload. Readers clone an `Arc` and never hold the lock.
#[derive(Clone)]
pub struct PricingStore {
    base: Arc<PricingConfig>,
    current: Arc<RwLock<Arc<PricingCatalog>>>,
}

impl PricingStore {
    pub fn new(config: PricingConfig) -> Self {
        let catalog = PricingCatalog::from_config(&config);
        Self {
            base: Arc::new(config),
            current: Arc::new(RwLock::new(Arc::new(catalog))),
        }
    }

    /// Current catalog snapshot.
    pub fn snapshot(&self) -> Arc<PricingCatalog> {
        self.current.read().clone()
    }

    /// Rebuild the catalog from the base config plus `overrides`.
    pub fn apply_overrides<'a>(
        &self,
        overrides: impl IntoIterator<Item = (&'a str, ModelPricing)>,
    ) -> usize {
        let catalog = PricingCatalog::from_config(&self.base).with_overrides(overrides);
        let count = catalog.model_count();
        *self.current.write() = Arc::new(catalog);
        count
    }

    pub fn refresh_interval_secs(&self) -> u64 {
        self.base.refresh_interval_secs
    }
}

impl std::fmt::Debug for PricingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PricingStore")
            .field("model_count", &self.snapshot().model_count())
            .finish()
    }
}
