use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::common::parse_uuid;
use crate::{
    db::{error::DbResult, repos::UserRepo},
    models::{CreateUser, User},
};

pub struct SqliteUserRepo {
    pool: SqlitePool,
}

impl SqliteUserRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepo for SqliteUserRepo {
    async fn create(&self, input: CreateUser) -> DbResult<User> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO users (id, display_name, cohort, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(&input.display_name)
        .bind(&input.cohort)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(User {
            id,
            display_name: input.display_name,
            cohort: input.cohort,
            created_at: now,
        })
    }

    async fn get_by_id(&self, id: Uuid) -> DbResult<Option<User>> {
        let row = sqlx::query(
            r#"
            SELECT id, display_name, cohort, created_at
            FROM users
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(User {
                id: parse_uuid(&row.get::<String, _>("id"))?,
                display_name: row.get("display_name"),
                cohort: row.get("cohort"),
                created_at: row.get("created_at"),
            })
        })
        .transpose()
    }
}
