//! Pricing catalog and cost math.
//!
//! All monetary amounts are integer microcents ($1.00 = 1,000,000 microcents).
//! Prices are per 1M tokens so that fractional per-token prices stay exact.

mod store;

use std::collections::HashMap;

use rust_decimal::{Decimal, RoundingStrategy, prelude::ToPrimitive};
use serde::{Deserialize, Serialize};

pub use store::PricingStore;

use crate::config::ConfigError;

/// Carbon coefficient used when a model has none configured.
pub const DEFAULT_CARBON_GRAMS_PER_1K_TOKENS: f64 = 0.2;

/// Pricing information for a specific model.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ModelPricing {
    /// Cost per 1M input tokens in microcents
    #[serde(default)]
    pub input_per_1m_tokens: i64,

    /// Cost per 1M output tokens in microcents
    #[serde(default)]
    pub output_per_1m_tokens: i64,

    /// Grams of CO2e per 1k tokens (input plus output)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carbon_grams_per_1k_tokens: Option<f64>,
}

impl ModelPricing {
    /// Create pricing from dollars per 1M tokens, the unit providers publish.
    ///
    /// Example: $3 / 1M input tokens = 3_000_000 microcents / 1M
    pub fn from_dollars_per_1m(input: f64, output: f64) -> Self {
        Self {
            input_per_1m_tokens: dollars_to_microcents(input),
            output_per_1m_tokens: dollars_to_microcents(output),
            carbon_grams_per_1k_tokens: None,
        }
    }

    pub fn with_carbon(mut self, grams_per_1k_tokens: f64) -> Self {
        self.carbon_grams_per_1k_tokens = Some(grams_per_1k_tokens);
        self
    }
}

/// Exact token usage reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: i64,
    pub output_tokens: i64,
}

impl TokenUsage {
    pub fn new(input_tokens: i64, output_tokens: i64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> i64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// `[pricing]` configuration section.
///
/// ```toml
/// [pricing]
/// markup = "1.5"
/// default_carbon_grams_per_1k_tokens = 0.2
/// refresh_interval_secs = 300
///
/// [pricing.cohorts]
/// family = "0"
///
/// [pricing.models."gpt-4o"]
/// input_per_1m_tokens = 2500000
/// output_per_1m_tokens = 10000000
/// carbon_grams_per_1k_tokens = 0.4
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PricingConfig {
    /// Global markup multiplier applied to provider cost.
    #[serde(default = "default_markup")]
    pub markup: Decimal,

    /// Markup overrides by cohort name.
    #[serde(default)]
    pub cohorts: HashMap<String, Decimal>,

    /// Carbon coefficient for models without one.
    #[serde(default = "default_carbon")]
    pub default_carbon_grams_per_1k_tokens: f64,

    /// Interval for reloading database price overrides. 0 disables reloading.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    /// Model prices keyed by gateway model id.
    #[serde(default)]
    pub models: HashMap<String, ModelPricing>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            markup: default_markup(),
            cohorts: HashMap::new(),
            default_carbon_grams_per_1k_tokens: default_carbon(),
            refresh_interval_secs: default_refresh_interval(),
            models: HashMap::new(),
        }
    }
}

impl PricingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.markup.is_sign_negative() {
            return Err(ConfigError::Validation(
                "pricing.markup cannot be negative".into(),
            ));
        }
        for (cohort, markup) in &self.cohorts {
            if markup.is_sign_negative() {
                return Err(ConfigError::Validation(format!(
                    "pricing.cohorts.{cohort} cannot be negative"
                )));
            }
        }
        if !self.default_carbon_grams_per_1k_tokens.is_finite()
            || self.default_carbon_grams_per_1k_tokens < 0.0
        {
            return Err(ConfigError::Validation(
                "pricing.default_carbon_grams_per_1k_tokens must be a non-negative number".into(),
            ));
        }
        for (model, pricing) in &self.models {
            validate_model_pricing(pricing)
                .map_err(|e| ConfigError::Validation(format!("pricing.models.{model}: {e}")))?;
        }
        Ok(())
    }
}

fn validate_model_pricing(pricing: &ModelPricing) -> Result<(), String> {
    if pricing.input_per_1m_tokens < 0 || pricing.output_per_1m_tokens < 0 {
        return Err("prices cannot be negative".into());
    }
    if let Some(carbon) = pricing.carbon_grams_per_1k_tokens
        && (!carbon.is_finite() || carbon < 0.0)
    {
        return Err("carbon_grams_per_1k_tokens must be a non-negative number".into());
    }
    Ok(())
}

fn default_markup() -> Decimal {
    Decimal::ONE
}

fn default_carbon() -> f64 {
    DEFAULT_CARBON_GRAMS_PER_1K_TOKENS
}

fn default_refresh_interval() -> u64 {
    300
}

/// Immutable pricing snapshot.
///
/// A request takes one snapshot at the start and uses it for both the spend
/// estimate and settlement, so a reload mid-stream cannot change its price.
#[derive(Debug, Clone)]
pub struct PricingCatalog {
    models: HashMap<String, ModelPricing>,
    markup: Decimal,
    cohorts: HashMap<String, Decimal>,
    default_carbon_grams_per_1k_tokens: f64,
}

impl PricingCatalog {
    pub fn from_config(config: &PricingConfig) -> Self {
        Self {
            models: config.models.clone(),
            markup: config.markup,
            cohorts: config.cohorts.clone(),
            default_carbon_grams_per_1k_tokens: config.default_carbon_grams_per_1k_tokens,
        }
    }

    /// Overlay per-model prices, replacing configured entries with the same id.
    /// Invalid entries are skipped with a warning.
    pub fn with_overrides<'a>(
        mut self,
        overrides: impl IntoIterator<Item = (&'a str, ModelPricing)>,
    ) -> Self {
        for (model, pricing) in overrides {
            if let Err(e) = validate_model_pricing(&pricing) {
                tracing::warn!(model = %model, error = %e, "Ignoring invalid price override");
                continue;
            }
            self.models.insert(model.to_string(), pricing);
        }
        self
    }

    pub fn get(&self, model: &str) -> Option<&ModelPricing> {
        self.models.get(model)
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    /// Markup multiplier for a pool's cohort, falling back to the global markup.
    pub fn markup_for(&self, cohort: Option<&str>) -> Decimal {
        cohort
            .and_then(|c| self.cohorts.get(c))
            .copied()
            .unwrap_or(self.markup)
    }

    /// Carbon coefficient for a model, falling back to the catalog default.
    pub fn carbon_coefficient(&self, pricing: &ModelPricing) -> f64 {
        pricing
            .carbon_grams_per_1k_tokens
            .unwrap_or(self.default_carbon_grams_per_1k_tokens)
    }
}

/// Compute the marked-up cost of a generation in microcents.
///
/// `(input * input_price + output * output_price) / 1_000_000 * markup`,
/// rounded half away from zero to the microcent. Uses `i128` for the token
/// products and saturates to `i64::MAX` on overflow.
pub fn compute_cost(pricing: &ModelPricing, usage: &TokenUsage, markup: Decimal) -> i64 {
    let raw: i128 = usage.input_tokens as i128 * pricing.input_per_1m_tokens as i128
        + usage.output_tokens as i128 * pricing.output_per_1m_tokens as i128;

    // Scale 6 divides by 1_000_000 exactly.
    let Ok(base) = Decimal::try_from_i128_with_scale(raw, 6) else {
        return saturate_to_i64(raw / 1_000_000);
    };

    base.checked_mul(markup)
        .map(|v| v.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|v| v.to_i64())
        .unwrap_or(i64::MAX)
}

/// Grams of CO2e for a generation: `(input + output) / 1000 * coefficient`.
pub fn carbon_grams(usage: &TokenUsage, grams_per_1k_tokens: f64) -> f64 {
    usage.total() as f64 / 1000.0 * grams_per_1k_tokens
}

/// Convert dollars to microcents
///
/// Examples:
/// - $1.00 = 1,000,000 microcents
/// - $0.01 = 10,000 microcents
pub fn dollars_to_microcents(dollars: f64) -> i64 {
    (dollars * 1_000_000.0).round() as i64
}

/// Convert microcents to dollars
pub fn microcents_to_dollars(microcents: i64) -> f64 {
    microcents as f64 / 1_000_000.0
}

/// Saturate an i128 value to fit in an i64
fn saturate_to_i64(value: i128) -> i64 {
    if value > i64::MAX as i128 {
        i64::MAX
    } else if value < i64::MIN as i128 {
        i64::MIN
    } else {
        value as i64
    }
}
