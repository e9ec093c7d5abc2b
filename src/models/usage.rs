use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::PoolKind;

/// Outcome of the pool debit that followed a generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebitStatus {
    Debited,
    /// The pool could not absorb the cost; kept for reconciliation
    DebitFailed,
}

impl DebitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debited => "debited",
            Self::DebitFailed => "debit_failed",
        }
    }
}

impl std::str::FromStr for DebitStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debited" => Ok(Self::Debited),
            "debit_failed" => Ok(Self::DebitFailed),
            _ => Err(format!("Invalid debit status: {}", s)),
        }
    }
}

/// Append-only record of one completed generation.
///
/// Costs are stored in microcents (1/1,000,000 of a dollar).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageRecord {
    pub id: Uuid,
    /// Request identifier, unique per record
    pub request_id: String,
    pub pool_kind: PoolKind,
    /// Owner id of the debited pool (user, organization or class)
    pub pool_id: Uuid,
    pub user_id: Uuid,
    pub model: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost_microcents: i64,
    pub co2_grams: f64,
    pub debit_status: DebitStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUsageRecord {
    pub request_id: String,
    pub pool_kind: PoolKind,
    pub pool_id: Uuid,
    pub user_id: Uuid,
    pub model: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost_microcents: i64,
    pub co2_grams: f64,
    pub debit_status: DebitStatus,
    pub created_at: DateTime<Utc>,
}
