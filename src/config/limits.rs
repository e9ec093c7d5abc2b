use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Rate-limit class of a model.
///
/// The set is closed: every model maps to exactly one tier, and every tier
/// has exactly one `(limit, window)` pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Economy,
    #[default]
    Standard,
    Premium,
    Reasoning,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Economy => "economy",
            Tier::Standard => "standard",
            Tier::Premium => "premium",
            Tier::Reasoning => "reasoning",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tiered rate limit configuration.
///
/// ```toml
/// [rate_limits]
/// default_tier = "standard"
///
/// [rate_limits.models]
/// "gpt-4o-mini" = "economy"
/// "o3" = "reasoning"
///
/// [rate_limits.tiers.premium]
/// limit = 10
/// window_secs = 60
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Tier for models not listed in `models`.
    #[serde(default)]
    pub default_tier: Tier,

    /// Model id to tier mapping.
    #[serde(default)]
    pub models: HashMap<String, Tier>,

    /// Per-tier quota table.
    #[serde(default)]
    pub tiers: TierTable,
}

impl RateLimitConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for tier in [Tier::Economy, Tier::Standard, Tier::Premium, Tier::Reasoning] {
            let limits = self.tiers.get(tier);
            if limits.limit == 0 {
                return Err(ConfigError::Validation(format!(
                    "rate_limits.tiers.{tier}.limit must be greater than 0"
                )));
            }
            if limits.window_secs == 0 {
                return Err(ConfigError::Validation(format!(
                    "rate_limits.tiers.{tier}.window_secs must be greater than 0"
                )));
            }
        }
        Ok(())
    }

    /// Deterministic model to tier mapping.
    pub fn tier_for_model(&self, model: &str) -> Tier {
        self.models.get(model).copied().unwrap_or(self.default_tier)
    }
}

/// Quota for one tier: `limit` requests per `window_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TierLimit {
    pub limit: u32,
    pub window_secs: u64,
}

/// Static table of tier quotas.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TierTable {
    #[serde(default = "default_economy")]
    pub economy: TierLimit,
    #[serde(default = "default_standard")]
    pub standard: TierLimit,
    #[serde(default = "default_premium")]
    pub premium: TierLimit,
    #[serde(default = "default_reasoning")]
    pub reasoning: TierLimit,
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            economy: default_economy(),
            standard: default_standard(),
            premium: default_premium(),
            reasoning: default_reasoning(),
        }
    }
}

impl TierTable {
    pub fn get(&self, tier: Tier) -> TierLimit {
        match tier {
            Tier::Economy => self.economy,
            Tier::Standard => self.standard,
            Tier::Premium => self.premium,
            Tier::Reasoning => self.reasoning,
        }
    }
}

fn default_economy() -> TierLimit {
    TierLimit {
        limit: 60,
        window_secs: 60,
    }
}

fn default_standard() -> TierLimit {
    TierLimit {
        limit: 10,
        window_secs: 60,
    }
}

fn default_premium() -> TierLimit {
    TierLimit {
        limit: 5,
        window_secs: 60,
    }
}

fn default_reasoning() -> TierLimit {
    TierLimit {
        limit: 20,
        window_secs: 3600,
    }
}
