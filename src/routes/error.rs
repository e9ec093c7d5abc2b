//! Error responses for the generation API.
//!
//! Every failure before the stream opens becomes an HTTP error with the
//! body `{"error": {"type", "message", "code", "request_id"}}`. The request
//! id is filled in by the request id middleware.

use axum::{
    Json,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    config::Tier,
    credits::{CreditError, SpendDenial},
    db::DbError,
    observability::metrics,
    providers::{ProviderError, ProviderErrorKind},
    ratelimit::{RateLimitError, retry_after_secs},
    supervision::SupervisionDenial,
};

/// Standard error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorInfo,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Error class, e.g. `invalid_request_error` or `policy_error`
    #[serde(rename = "type")]
    pub error_type: String,
    /// Human-readable message, safe to show to end users
    pub message: String,
    /// Machine-readable code
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ErrorResponse {
    pub fn new(
        error_type: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error: ErrorInfo {
                error_type: error_type.into(),
                message: message.into(),
                code: code.into(),
                request_id: None,
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("missing or invalid identity header")]
    MissingIdentity,

    #[error("unknown model '{0}'")]
    UnknownModel(String),

    #[error("unknown assistant '{0}'")]
    UnknownAssistant(String),

    #[error("user {0} not found")]
    UserNotFound(Uuid),

    #[error("conversation {0} not found")]
    ConversationNotFound(Uuid),

    #[error("supervision denied: {}", .0.code())]
    Supervision(SupervisionDenial),

    #[error("spend denied: {}", .0.code())]
    Spend(SpendDenial),

    #[error("rate limited on tier {tier}")]
    RateLimited {
        limit: u32,
        tier: Tier,
        reset_at: DateTime<Utc>,
        retry_after_secs: u64,
    },

    #[error("rate limiter unavailable: {0}")]
    RateLimiterUnavailable(#[from] RateLimitError),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// The provider failed after the stream opened.
    #[error("provider stream failed: {}", .0.code())]
    StreamFailed(ProviderErrorKind),

    #[error("database error: {0}")]
    Database(#[from] DbError),
}

impl GenerateError {
    pub fn rate_limited(limit: u32, tier: Tier, reset_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self::RateLimited {
            limit,
            tier,
            reset_at,
            retry_after_secs: retry_after_secs(reset_at, now),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::UnknownModel(_) | Self::UnknownAssistant(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::MissingIdentity => StatusCode::UNAUTHORIZED,
            Self::UserNotFound(_) | Self::ConversationNotFound(_) => StatusCode::NOT_FOUND,
            Self::Supervision(_) | Self::Spend(SpendDenial::NotClassMember) => StatusCode::FORBIDDEN,
            Self::Spend(_) => StatusCode::PAYMENT_REQUIRED,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::RateLimiterUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Provider(e) => e.kind().status(),
            Self::StreamFailed(kind) => kind.status(),
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "invalid_request",
            Self::MissingIdentity => "missing_identity",
            Self::UnknownModel(_) => "model_not_found",
            Self::UnknownAssistant(_) => "assistant_not_found",
            Self::UserNotFound(_) => "user_not_found",
            Self::ConversationNotFound(_) => "conversation_not_found",
            Self::Supervision(denial) => denial.code(),
            Self::Spend(denial) => denial.code(),
            Self::RateLimited { .. } => "rate_limited",
            Self::RateLimiterUnavailable(_) => "rate_limiter_unavailable",
            Self::Provider(e) => e.kind().code(),
            Self::StreamFailed(kind) => kind.code(),
            Self::Database(_) => "internal_error",
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            Self::Validation(_) | Self::UnknownModel(_) | Self::UnknownAssistant(_) => {
                "invalid_request_error"
            }
            Self::MissingIdentity => "authentication_error",
            Self::UserNotFound(_) | Self::ConversationNotFound(_) => "not_found_error",
            Self::Supervision(_) | Self::Spend(_) => "policy_error",
            Self::RateLimited { .. } => "rate_limit_error",
            Self::Provider(_) | Self::StreamFailed(_) => "provider_error",
            Self::RateLimiterUnavailable(_) | Self::Database(_) => "server_error",
        }
    }

    /// Message shown to the client. Internal details stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(msg) => msg.clone(),
            Self::MissingIdentity => "Missing or invalid user identity".into(),
            Self::UnknownModel(model) => format!("Model '{model}' is not available"),
            Self::UnknownAssistant(id) => format!("Assistant '{id}' does not exist"),
            Self::UserNotFound(_) => "User not found".into(),
            Self::ConversationNotFound(_) => "Conversation not found".into(),
            Self::Supervision(denial) => denial.message(),
            Self::Spend(denial) => denial.message(),
            Self::RateLimited {
                limit,
                tier,
                retry_after_secs,
                ..
            } => format!(
                "Rate limit of {limit} requests reached for {tier} models. Try again in {retry_after_secs} seconds."
            ),
            Self::RateLimiterUnavailable(_) => {
                "The service is temporarily unavailable. Please try again.".into()
            }
            Self::Provider(e) => e.kind().user_message().into(),
            Self::StreamFailed(kind) => kind.user_message().into(),
            Self::Database(_) => "An internal error occurred".into(),
        }
    }
}

impl From<CreditError> for GenerateError {
    fn from(err: CreditError) -> Self {
        match err {
            CreditError::UserNotFound(id) => Self::UserNotFound(id),
            CreditError::NotClassMember(_) => Self::Spend(SpendDenial::NotClassMember),
            CreditError::Db(e) => Self::Database(e),
        }
    }
}

impl IntoResponse for GenerateError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        match &self {
            Self::Provider(e) => {
                let kind = e.kind();
                if kind == ProviderErrorKind::Unknown {
                    tracing::error!(error = %e, "Provider request failed");
                } else {
                    tracing::warn!(error = %e, code = kind.code(), "Provider request failed");
                }
            }
            Self::RateLimiterUnavailable(_) | Self::Database(_) => {
                tracing::error!(error = %self, "Generation request failed");
            }
            _ => tracing::debug!(error = %self, code, "Generation request rejected"),
        }
        metrics::record_gateway_error(self.error_type(), code, None);

        let body = ErrorResponse::new(self.error_type(), code, self.user_message());
        let mut response = (status, Json(body)).into_response();

        if let Self::RateLimited {
            limit,
            reset_at,
            retry_after_secs,
            ..
        } = self
        {
            let headers = response.headers_mut();
            headers.insert("X-RateLimit-Limit", HeaderValue::from(limit));
            headers.insert("X-RateLimit-Remaining", HeaderValue::from(0u32));
            headers.insert("X-RateLimit-Reset", HeaderValue::from(reset_at.timestamp()));
            headers.insert("Retry-After", HeaderValue::from(retry_after_secs));
        }

        response
    }
}
