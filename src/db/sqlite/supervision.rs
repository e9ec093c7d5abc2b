use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::common::parse_uuid;
use crate::{
    db::{error::DbResult, repos::SupervisionRepo},
    models::SupervisionSettings,
};

pub struct SqliteSupervisionRepo {
    pool: SqlitePool,
}

impl SqliteSupervisionRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SupervisionRepo for SqliteSupervisionRepo {
    async fn get_settings(&self, user_id: Uuid) -> DbResult<Option<SupervisionSettings>> {
        let row = sqlx::query(
            r#"
            SELECT user_id, enabled, quiet_start_minute, quiet_end_minute,
                   utc_offset_minutes, daily_ceiling_microcents
            FROM supervision_settings
            WHERE user_id = ?
            "#,
        )
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(SupervisionSettings {
                user_id: parse_uuid(&row.get::<String, _>("user_id"))?,
                enabled: row.get("enabled"),
                quiet_start_minute: row.get("quiet_start_minute"),
                quiet_end_minute: row.get("quiet_end_minute"),
                utc_offset_minutes: row.get("utc_offset_minutes"),
                daily_ceiling_microcents: row.get("daily_ceiling_microcents"),
            })
        })
        .transpose()
    }

    async fn upsert_settings(&self, settings: &SupervisionSettings) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO supervision_settings (
                user_id, enabled, quiet_start_minute, quiet_end_minute,
                utc_offset_minutes, daily_ceiling_microcents, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (user_id) DO UPDATE SET
                enabled = excluded.enabled,
                quiet_start_minute = excluded.quiet_start_minute,
                quiet_end_minute = excluded.quiet_end_minute,
                utc_offset_minutes = excluded.utc_offset_minutes,
                daily_ceiling_microcents = excluded.daily_ceiling_microcents,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(settings.user_id.to_string())
        .bind(settings.enabled)
        .bind(settings.quiet_start_minute)
        .bind(settings.quiet_end_minute)
        .bind(settings.utc_offset_minutes)
        .bind(settings.daily_ceiling_microcents)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
