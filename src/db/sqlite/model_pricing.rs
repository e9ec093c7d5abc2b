use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::{
    db::{error::DbResult, repos::ModelPricingRepo},
    models::DbModelPricing,
};

pub struct SqliteModelPricingRepo {
    pool: SqlitePool,
}

impl SqliteModelPricingRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ModelPricingRepo for SqliteModelPricingRepo {
    async fn list_all(&self) -> DbResult<Vec<DbModelPricing>> {
        let rows = sqlx::query(
            r#"
            SELECT model, input_per_1m_tokens, output_per_1m_tokens,
                   carbon_grams_per_1k_tokens, updated_at
            FROM model_pricing
            ORDER BY model ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| DbModelPricing {
                model: row.get("model"),
                input_per_1m_tokens: row.get("input_per_1m_tokens"),
                output_per_1m_tokens: row.get("output_per_1m_tokens"),
                carbon_grams_per_1k_tokens: row.get("carbon_grams_per_1k_tokens"),
                updated_at: row.get("updated_at"),
            })
            .collect())
    }

    async fn upsert(&self, pricing: &DbModelPricing) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO model_pricing (
                model, input_per_1m_tokens, output_per_1m_tokens,
                carbon_grams_per_1k_tokens, updated_at
            )
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (model) DO UPDATE SET
                input_per_1m_tokens = excluded.input_per_1m_tokens,
                output_per_1m_tokens = excluded.output_per_1m_tokens,
                carbon_grams_per_1k_tokens = excluded.carbon_grams_per_1k_tokens,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&pricing.model)
        .bind(pricing.input_per_1m_tokens)
        .bind(pricing.output_per_1m_tokens)
        .bind(pricing.carbon_grams_per_1k_tokens)
        .bind(pricing.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, model: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM model_pricing WHERE model = ?")
            .bind(model)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
