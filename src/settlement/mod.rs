//! Settlement: turn exact usage into a debit and a usage record.
//!
//! Settlement runs after the provider finished and reported usage. The
//! pool is the one resolved at request start; it is never re-resolved.
//! A failed debit does not fail the generation. It is logged and recorded
//! as `debit_failed` for reconciliation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    credits::ResolvedSpend,
    db::{CreditRepo, DbError, UsageRepo},
    models::{DebitStatus, NewUsageRecord, PoolKind},
    observability::metrics,
    pricing::{PricingCatalog, TokenUsage, carbon_grams, compute_cost},
};

/// One completed generation to be charged.
#[derive(Debug, Clone, Copy)]
pub struct SettlementRequest<'a> {
    pub request_id: &'a str,
    pub user_id: Uuid,
    /// Gateway model id
    pub model: &'a str,
    pub resolved: &'a ResolvedSpend,
    pub usage: TokenUsage,
    /// The snapshot taken at request start
    pub catalog: &'a PricingCatalog,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SettlementResult {
    pub cost_microcents: i64,
    pub co2_grams: f64,
    /// Kind of the pool that was charged
    pub source: PoolKind,
    /// Balance after the debit. `None` when the debit failed.
    pub remaining_balance_microcents: Option<i64>,
    pub debit_status: DebitStatus,
}

#[derive(Clone)]
pub struct SettlementEngine {
    credits: Arc<dyn CreditRepo>,
    usage: Arc<dyn UsageRepo>,
}

impl SettlementEngine {
    pub fn new(credits: Arc<dyn CreditRepo>, usage: Arc<dyn UsageRepo>) -> Self {
        Self { credits, usage }
    }

    #[tracing::instrument(
        skip(self, request),
        fields(
            request_id = %request.request_id,
            model = %request.model,
            pool = %request.resolved.pool.kind(),
        )
    )]
    pub async fn settle(&self, request: SettlementRequest<'_>, now: DateTime<Utc>) -> SettlementResult {
        let SettlementRequest {
            request_id,
            user_id,
            model,
            resolved,
            usage,
            catalog,
        } = request;
        let source = resolved.pool.kind();

        let (cost_microcents, co2_grams) = match catalog.get(model) {
            Some(pricing) => (
                compute_cost(pricing, &usage, catalog.markup_for(resolved.pool.cohort.as_deref())),
                carbon_grams(&usage, catalog.carbon_coefficient(pricing)),
            ),
            None => {
                // Only reachable if the model was priced at admission but the
                // caller passed a different catalog.
                tracing::error!(model = %model, "No price for settled model, charging zero");
                (0, 0.0)
            }
        };

        let debit = self
            .credits
            .debit(resolved.pool_ref(), Some(&resolved.cap_owner), cost_microcents, now)
            .await;

        let (debit_status, remaining_balance_microcents) = match debit {
            Ok(outcome) => (DebitStatus::Debited, Some(outcome.remaining_balance_microcents)),
            Err(e) => {
                let reason = match &e {
                    DbError::Conflict(_) => "insufficient_balance",
                    DbError::NotFound => "pool_missing",
                    _ => "database",
                };
                tracing::error!(
                    user_id = %user_id,
                    pool_id = %resolved.pool_ref().owner_id(),
                    cost_microcents,
                    reason,
                    error = %e,
                    "Debit failed after generation; recording for reconciliation"
                );
                (DebitStatus::DebitFailed, None)
            }
        };
        metrics::record_settlement(debit_status.as_str(), source.as_str());

        let record = NewUsageRecord {
            request_id: request_id.to_string(),
            pool_kind: source,
            pool_id: resolved.pool_ref().owner_id(),
            user_id,
            model: model.to_string(),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cost_microcents,
            co2_grams,
            debit_status,
            created_at: now,
        };
        if let Err(e) = self.usage.record(record).await {
            tracing::error!(error = %e, cost_microcents, "Failed to write usage record");
        }

        SettlementResult {
            cost_microcents,
            co2_grams,
            source,
            remaining_balance_microcents,
            debit_status,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rust_decimal::dec;

    use super::*;
    use crate::{
        credits::{CreditResolver, SpendContext},
        db::{DbPool, tests::create_test_db},
        models::{CapOwner, CreateUser, PeriodCap, PoolRef, SpendCaps},
        pricing::{ModelPricing, PricingConfig},
    };

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 4, 15, 0, 0).unwrap()
    }

    fn catalog() -> PricingCatalog {
        let mut config = PricingConfig {
            cohorts: [("education".to_string(), dec!(0.5))].into(),
            ..Default::default()
        };
        config.models.insert(
            "claude-sonnet".into(),
            ModelPricing::from_dollars_per_1m(3.0, 15.0).with_carbon(0.3),
        );
        config
            .models
            .insert("gpt-4o-mini".into(), ModelPricing::from_dollars_per_1m(0.15, 0.6));
        PricingCatalog::from_config(&config)
    }

    async fn personal(db: &DbPool, cohort: Option<&str>, balance: i64) -> (Uuid, ResolvedSpend) {
        let user_id = db
            .users()
            .create(CreateUser {
                display_name: None,
                cohort: cohort.map(str::to_string),
            })
            .await
            .unwrap()
            .id;
        db.credits()
            .set_balance(&PoolRef::Personal { user_id }, balance)
            .await
            .unwrap();
        let resolved = CreditResolver::new(db.users(), db.memberships(), db.credits())
            .resolve(user_id, SpendContext::Auto)
            .await
            .unwrap();
        (user_id, resolved)
    }

    fn engine(db: &DbPool) -> SettlementEngine {
        SettlementEngine::new(db.credits(), db.usage())
    }

    #[tokio::test]
    async fn test_settle_debits_and_records() {
        let db = create_test_db().await;
        let (user_id, resolved) = personal(&db, None, 1_000_000).await;
        db.credits()
            .set_caps(
                &CapOwner::User { user_id },
                &SpendCaps {
                    daily: Some(PeriodCap::new(500_000)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let catalog = catalog();

        let result = engine(&db)
            .settle(
                SettlementRequest {
                    request_id: "req-1",
                    user_id,
                    model: "claude-sonnet",
                    resolved: &resolved,
                    usage: TokenUsage::new(1000, 1450),
                    catalog: &catalog,
                },
                now(),
            )
            .await;

        // 1000 * 3 + 1450 * 15 = 24_750 microdollars
        assert_eq!(result.cost_microcents, 24_750);
        assert!((result.co2_grams - 0.735).abs() < 1e-9);
        assert_eq!(result.source, PoolKind::Personal);
        assert_eq!(result.debit_status, DebitStatus::Debited);
        assert_eq!(result.remaining_balance_microcents, Some(975_250));

        let records = db.usage().list_by_user(user_id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].request_id, "req-1");
        assert_eq!(records[0].cost_microcents, 24_750);
        assert_eq!(records[0].debit_status, DebitStatus::Debited);

        let caps = db
            .credits()
            .get_caps(&CapOwner::User { user_id })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(caps.daily.unwrap().used_microcents, 24_750);
    }

    #[tokio::test]
    async fn test_cohort_markup_applies() {
        let db = create_test_db().await;
        let (user_id, resolved) = personal(&db, Some("education"), 1_000_000).await;
        let catalog = catalog();

        let result = engine(&db)
            .settle(
                SettlementRequest {
                    request_id: "req-2",
                    user_id,
                    model: "claude-sonnet",
                    resolved: &resolved,
                    usage: TokenUsage::new(1000, 1450),
                    catalog: &catalog,
                },
                now(),
            )
            .await;
        assert_eq!(result.cost_microcents, 12_375);
    }

    #[tokio::test]
    async fn test_debit_failure_is_recorded_not_raised() {
        let db = create_test_db().await;
        let (user_id, resolved) = personal(&db, None, 100).await;
        let catalog = catalog();

        let result = engine(&db)
            .settle(
                SettlementRequest {
                    request_id: "req-3",
                    user_id,
                    model: "claude-sonnet",
                    resolved: &resolved,
                    usage: TokenUsage::new(1000, 1450),
                    catalog: &catalog,
                },
                now(),
            )
            .await;

        assert_eq!(result.debit_status, DebitStatus::DebitFailed);
        assert_eq!(result.remaining_balance_microcents, None);
        assert_eq!(result.cost_microcents, 24_750);

        let pool = db
            .credits()
            .get_pool(&PoolRef::Personal { user_id })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pool.balance_microcents, 100);

        let records = db.usage().list_by_user(user_id).await.unwrap();
        assert_eq!(records[0].debit_status, DebitStatus::DebitFailed);
    }

    #[tokio::test]
    async fn test_default_carbon_coefficient() {
        let db = create_test_db().await;
        let (user_id, resolved) = personal(&db, None, 1_000_000).await;
        let catalog = catalog();

        let result = engine(&db)
            .settle(
                SettlementRequest {
                    request_id: "req-4",
                    user_id,
                    model: "gpt-4o-mini",
                    resolved: &resolved,
                    usage: TokenUsage::new(2000, 500),
                    catalog: &catalog,
                },
                now(),
            )
            .await;

        // 2000 * 0.15 + 500 * 0.6 = 600 microdollars, 2.5k tokens * 0.2 g
        assert_eq!(result.cost_microcents, 600);
        assert!((result.co2_grams - 0.5).abs() < 1e-9);
    }
}
