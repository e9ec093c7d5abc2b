//! Shared tests for ModelPricingRepo implementations

use chrono::Utc;

use super::RepoTestContext;
use crate::models::DbModelPricing;

fn pricing(model: &str, input: i64, output: i64) -> DbModelPricing {
    DbModelPricing {
        model: model.to_string(),
        input_per_1m_tokens: input,
        output_per_1m_tokens: output,
        carbon_grams_per_1k_tokens: None,
        updated_at: Utc::now(),
    }
}

pub async fn test_upsert_and_list(ctx: &RepoTestContext<'_>) {
    ctx.model_pricing
        .upsert(&pricing("gpt-4o", 2_500_000, 10_000_000))
        .await
        .unwrap();
    ctx.model_pricing
        .upsert(&pricing("claude-sonnet-4", 3_000_000, 15_000_000))
        .await
        .unwrap();
    ctx.model_pricing
        .upsert(&pricing("gpt-4o", 2_000_000, 8_000_000))
        .await
        .unwrap();

    let all = ctx.model_pricing.list_all().await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].model, "claude-sonnet-4");
    assert_eq!(all[1].input_per_1m_tokens, 2_000_000);
    assert_eq!(all[1].output_per_1m_tokens, 8_000_000);
}

pub async fn test_delete(ctx: &RepoTestContext<'_>) {
    ctx.model_pricing
        .upsert(&pricing("gpt-4o", 1, 1))
        .await
        .unwrap();

    assert!(ctx.model_pricing.delete("gpt-4o").await.unwrap());
    assert!(!ctx.model_pricing.delete("gpt-4o").await.unwrap());
    assert!(ctx.model_pricing.list_all().await.unwrap().is_empty());
}

mod sqlite_tests {
    use crate::db::tests::sqlite_test;

    sqlite_test!(test_upsert_and_list);
    sqlite_test!(test_delete);
}
