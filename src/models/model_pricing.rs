use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pricing::ModelPricing;

/// Price override stored in the database, layered over the configured catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbModelPricing {
    pub model: String,
    /// Cost per 1M input tokens in microcents
    pub input_per_1m_tokens: i64,
    /// Cost per 1M output tokens in microcents
    pub output_per_1m_tokens: i64,
    pub carbon_grams_per_1k_tokens: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

impl DbModelPricing {
    pub fn to_pricing(&self) -> ModelPricing {
        ModelPricing {
            input_per_1m_tokens: self.input_per_1m_tokens,
            output_per_1m_tokens: self.output_per_1m_tokens,
            carbon_grams_per_1k_tokens: self.carbon_grams_per_1k_tokens,
        }
    }
}
