//! Tiered per-user rate limiting.
//!
//! Each model belongs to one [`Tier`]; each tier has a `(limit, window)`
//! quota. Requests are counted in a fixed window per `(user, tier)` held in
//! the shared [`Cache`], so the check-and-increment is atomic across
//! concurrent requests and (with Redis) across gateway replicas.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::{
    cache::{Cache, CacheError, CacheKeys},
    config::{RateLimitConfig, Tier},
    observability::metrics,
};

/// Outcome of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed {
        remaining: u32,
        limit: u32,
        reset_at: DateTime<Utc>,
        tier: Tier,
    },
    Denied {
        reset_at: DateTime<Utc>,
        limit: u32,
        tier: Tier,
    },
}

/// Rate limit state reported to the client in the `done` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitSnapshot {
    pub remaining: u32,
    pub limit: u32,
    pub tier: Tier,
}

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("rate limit backend unavailable: {0}")]
    Backend(#[from] CacheError),
}

#[derive(Clone)]
pub struct RateLimiter {
    cache: Arc<dyn Cache>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(cache: Arc<dyn Cache>, config: RateLimitConfig) -> Self {
        Self { cache, config }
    }

    pub fn tier_for_model(&self, model: &str) -> Tier {
        self.config.tier_for_model(model)
    }

    /// Count one request by `user_id` against the tier of `model`.
    ///
    /// Only admitted requests are counted; a denial leaves the window as is.
    pub async fn check(
        &self,
        user_id: &str,
        model: &str,
        now: DateTime<Utc>,
    ) -> Result<RateLimitDecision, RateLimitError> {
        let tier = self.tier_for_model(model);
        let quota = self.config.tiers.get(tier);
        let key = CacheKeys::rate_limit(user_id, tier);

        let result = match self
            .cache
            .check_and_incr_window(&key, quota.limit, Duration::from_secs(quota.window_secs), now)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                metrics::record_rate_limit("error", tier.as_str());
                return Err(e.into());
            }
        };

        if result.allowed {
            metrics::record_rate_limit("allowed", tier.as_str());
            Ok(RateLimitDecision::Allowed {
                remaining: result.remaining(),
                limit: result.limit,
                reset_at: result.reset_at,
                tier,
            })
        } else {
            metrics::record_rate_limit("limited", tier.as_str());
            tracing::info!(
                user_id = %user_id,
                tier = %tier,
                limit = result.limit,
                reset_at = %result.reset_at,
                "Rate limit exceeded"
            );
            Ok(RateLimitDecision::Denied {
                reset_at: result.reset_at,
                limit: result.limit,
                tier,
            })
        }
    }
}

impl RateLimitDecision {
    pub fn snapshot(&self) -> RateLimitSnapshot {
        match *self {
            RateLimitDecision::Allowed {
                remaining,
                limit,
                tier,
                ..
            } => RateLimitSnapshot {
                remaining,
                limit,
                tier,
            },
            RateLimitDecision::Denied { limit, tier, .. } => RateLimitSnapshot {
                remaining: 0,
                limit,
                tier,
            },
        }
    }
}

/// Whole seconds until `reset_at`, rounded up and never negative.
pub fn retry_after_secs(reset_at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = (reset_at - now).num_milliseconds().max(0) as u64;
    millis.div_ceil(1000)
}
