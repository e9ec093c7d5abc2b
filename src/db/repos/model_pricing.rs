use async_trait::async_trait;

use crate::{db::error::DbResult, models::DbModelPricing};

#[async_trait]
pub trait ModelPricingRepo: Send + Sync {
    async fn list_all(&self) -> DbResult<Vec<DbModelPricing>>;
    async fn upsert(&self, pricing: &DbModelPricing) -> DbResult<()>;
    async fn delete(&self, model: &str) -> DbResult<bool>;
}
