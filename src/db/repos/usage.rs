use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    db::error::DbResult,
    models::{NewUsageRecord, UsageRecord},
};

#[async_trait]
pub trait UsageRepo: Send + Sync {
    /// Append a usage record. A duplicate `request_id` is a `Conflict`.
    async fn record(&self, entry: NewUsageRecord) -> DbResult<UsageRecord>;

    /// Total cost attributed to a user at or after `since`, across all pools.
    async fn user_spend_since(&self, user_id: Uuid, since: DateTime<Utc>) -> DbResult<i64>;

    async fn list_by_user(&self, user_id: Uuid) -> DbResult<Vec<UsageRecord>>;
}
