use async_trait::async_trait;
use uuid::Uuid;

use crate::{db::error::DbResult, models::SupervisionSettings};

#[async_trait]
pub trait SupervisionRepo: Send + Sync {
    async fn get_settings(&self, user_id: Uuid) -> DbResult<Option<SupervisionSettings>>;
    async fn upsert_settings(&self, settings: &SupervisionSettings) -> DbResult<()>;
}
