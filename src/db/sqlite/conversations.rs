use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::common::{parse_enum, parse_uuid};
use crate::{
    db::{
        error::{DbError, DbResult},
        repos::ConversationRepo,
    },
    models::{Conversation, CreateConversation, CreateMessage, Message},
};

pub struct SqliteConversationRepo {
    pool: SqlitePool,
}

impl SqliteConversationRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> DbResult<Message> {
        let metadata: Option<String> = row.get("supervision_metadata");
        Ok(Message {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            conversation_id: parse_uuid(&row.get::<String, _>("conversation_id"))?,
            role: parse_enum(&row.get::<String, _>("role"))?,
            content: row.get("content"),
            tokens_input: row.get("tokens_input"),
            tokens_output: row.get("tokens_output"),
            cost_microcents: row.get("cost_microcents"),
            co2_grams: row.get("co2_grams"),
            status: parse_enum(&row.get::<String, _>("status"))?,
            supervision_metadata: metadata.as_deref().map(serde_json::from_str).transpose()?,
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl ConversationRepo for SqliteConversationRepo {
    async fn create(&self, input: CreateConversation) -> DbResult<Conversation> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO conversations (id, user_id, class_id, model, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(input.user_id.to_string())
        .bind(input.class_id.map(|id| id.to_string()))
        .bind(&input.model)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Conversation {
            id,
            user_id: input.user_id,
            class_id: input.class_id,
            model: input.model,
            created_at: now,
            updated_at: now,
        })
    }

    async fn get_by_id(&self, id: Uuid) -> DbResult<Option<Conversation>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, class_id, model, created_at, updated_at
            FROM conversations
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let class_id: Option<String> = row.get("class_id");
            Ok(Conversation {
                id: parse_uuid(&row.get::<String, _>("id"))?,
                user_id: parse_uuid(&row.get::<String, _>("user_id"))?,
                class_id: class_id.as_deref().map(parse_uuid).transpose()?,
                model: row.get("model"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            })
        })
        .transpose()
    }

    async fn append_message(&self, input: CreateMessage) -> DbResult<Message> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let metadata = input
            .supervision_metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(input.conversation_id.to_string())
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }

        sqlx::query(
            r#"
            INSERT INTO messages (
                id, conversation_id, role, content, tokens_input, tokens_output,
                cost_microcents, co2_grams, status, supervision_metadata, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(input.conversation_id.to_string())
        .bind(input.role.as_str())
        .bind(&input.content)
        .bind(input.tokens_input)
        .bind(input.tokens_output)
        .bind(input.cost_microcents)
        .bind(input.co2_grams)
        .bind(input.status.as_str())
        .bind(&metadata)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Message {
            id,
            conversation_id: input.conversation_id,
            role: input.role,
            content: input.content,
            tokens_input: input.tokens_input,
            tokens_output: input.tokens_output,
            cost_microcents: input.cost_microcents,
            co2_grams: input.co2_grams,
            status: input.status,
            supervision_metadata: input.supervision_metadata,
            created_at: now,
        })
    }

    async fn list_messages(&self, conversation_id: Uuid) -> DbResult<Vec<Message>> {
        let rows = sqlx::query(
            r#"
            SELECT id, conversation_id, role, content, tokens_input, tokens_output,
                   cost_microcents, co2_grams, status, supervision_metadata, created_at
            FROM messages
            WHERE conversation_id = ?
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(conversation_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_message).collect()
    }
}
