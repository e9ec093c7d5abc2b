use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::SupervisionMetadata;

/// A conversation owned by one user, optionally scoped to a class.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub class_id: Option<Uuid>,
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateConversation {
    pub user_id: Uuid,
    pub class_id: Option<Uuid>,
    pub model: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            _ => Err(format!("Invalid message role: {}", s)),
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a message holds a full response or a best-effort transcript of
/// an interrupted one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Complete,
    Partial,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Partial => "partial",
        }
    }
}

impl std::str::FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "complete" => Ok(Self::Complete),
            "partial" => Ok(Self::Partial),
            _ => Err(format!("Invalid message status: {}", s)),
        }
    }
}

/// One persisted turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub tokens_input: i64,
    pub tokens_output: i64,
    pub cost_microcents: i64,
    pub co2_grams: f64,
    pub status: MessageStatus,
    pub supervision_metadata: Option<SupervisionMetadata>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateMessage {
    pub conversation_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub tokens_input: i64,
    pub tokens_output: i64,
    pub cost_microcents: i64,
    pub co2_grams: f64,
    pub status: MessageStatus,
    pub supervision_metadata: Option<SupervisionMetadata>,
}

impl CreateMessage {
    /// An unpriced user turn.
    pub fn user(conversation_id: Uuid, content: impl Into<String>) -> Self {
        Self {
            conversation_id,
            role: MessageRole::User,
            content: content.into(),
            tokens_input: 0,
            tokens_output: 0,
            cost_microcents: 0,
            co2_grams: 0.0,
            status: MessageStatus::Complete,
            supervision_metadata: None,
        }
    }

    /// Best-effort transcript of an interrupted response. Never charged.
    pub fn partial_assistant(
        conversation_id: Uuid,
        content: impl Into<String>,
        supervision_metadata: Option<SupervisionMetadata>,
    ) -> Self {
        Self {
            conversation_id,
            role: MessageRole::Assistant,
            content: content.into(),
            tokens_input: 0,
            tokens_output: 0,
            cost_microcents: 0,
            co2_grams: 0.0,
            status: MessageStatus::Partial,
            supervision_metadata,
        }
    }
}
