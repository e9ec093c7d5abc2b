use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::common::{parse_enum, parse_uuid};
use crate::{
    db::{
        error::{DbError, DbResult},
        repos::UsageRepo,
    },
    models::{NewUsageRecord, UsageRecord},
};

pub struct SqliteUsageRepo {
    pool: SqlitePool,
}

impl SqliteUsageRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> DbResult<UsageRecord> {
        Ok(UsageRecord {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            request_id: row.get("request_id"),
            pool_kind: parse_enum(&row.get::<String, _>("pool_kind"))?,
            pool_id: parse_uuid(&row.get::<String, _>("pool_id"))?,
            user_id: parse_uuid(&row.get::<String, _>("user_id"))?,
            model: row.get("model"),
            input_tokens: row.get("input_tokens"),
            output_tokens: row.get("output_tokens"),
            cost_microcents: row.get("cost_microcents"),
            co2_grams: row.get("co2_grams"),
            debit_status: parse_enum(&row.get::<String, _>("debit_status"))?,
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl UsageRepo for SqliteUsageRepo {
    async fn record(&self, entry: NewUsageRecord) -> DbResult<UsageRecord> {
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO usage_records (
                id, request_id, pool_kind, pool_id, user_id, model,
                input_tokens, output_tokens, cost_microcents, co2_grams,
                debit_status, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(&entry.request_id)
        .bind(entry.pool_kind.as_str())
        .bind(entry.pool_id.to_string())
        .bind(entry.user_id.to_string())
        .bind(&entry.model)
        .bind(entry.input_tokens)
        .bind(entry.output_tokens)
        .bind(entry.cost_microcents)
        .bind(entry.co2_grams)
        .bind(entry.debit_status.as_str())
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => DbError::Conflict(
                format!("Usage already recorded for request '{}'", entry.request_id),
            ),
            _ => DbError::from(e),
        })?;

        Ok(UsageRecord {
            id,
            request_id: entry.request_id,
            pool_kind: entry.pool_kind,
            pool_id: entry.pool_id,
            user_id: entry.user_id,
            model: entry.model,
            input_tokens: entry.input_tokens,
            output_tokens: entry.output_tokens,
            cost_microcents: entry.cost_microcents,
            co2_grams: entry.co2_grams,
            debit_status: entry.debit_status,
            created_at: entry.created_at,
        })
    }

    async fn user_spend_since(&self, user_id: Uuid, since: DateTime<Utc>) -> DbResult<i64> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(cost_microcents), 0) AS total
            FROM usage_records
            WHERE user_id = ? AND created_at >= ?
            "#,
        )
        .bind(user_id.to_string())
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("total"))
    }

    async fn list_by_user(&self, user_id: Uuid) -> DbResult<Vec<UsageRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, request_id, pool_kind, pool_id, user_id, model,
                   input_tokens, output_tokens, cost_microcents, co2_grams,
                   debit_status, created_at
            FROM usage_records
            WHERE user_id = ?
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_record).collect()
    }
}
