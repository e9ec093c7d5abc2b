use serde::Serialize;
use uuid::Uuid;

use crate::ratelimit::RateLimitSnapshot;

/// One unit of the client-facing stream.
///
/// Exactly one `Done` or `Error` ends every stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Chunk { text: String },
    Thinking { text: String },
    Done(DonePayload),
    Error { message: String, code: String },
}

impl StreamEvent {
    /// SSE event name, matching the JSON `type` tag.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::Thinking { .. } => "thinking",
            Self::Done(_) => "done",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Error { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DonePayload {
    pub tokens_input: i64,
    pub tokens_output: i64,
    /// Charged amount in dollars.
    pub cost: f64,
    pub co2_grams: f64,
    pub conversation_id: Uuid,
    pub rate_limit: RateLimitSnapshot,
    pub credits: CreditSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreditSnapshot {
    /// Pool kind the generation was charged to.
    pub source: String,
    /// Remaining pool balance in dollars. Absent when the debit failed.
    pub remaining: Option<f64>,
}
