//! Provider failures and their classification.
//!
//! Every upstream failure is reduced to a [`ProviderErrorKind`]. The kind
//! picks the user-facing message and the HTTP status at the boundary; the
//! raw upstream text is only logged.

use http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Error reported by the provider, either as an HTTP error response or
    /// as an error event inside the stream.
    #[error("Provider error{}: {message}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Upstream {
        status: Option<StatusCode>,
        message: String,
    },

    #[error("No provider event within {0} seconds")]
    IdleTimeout(u64),

    #[error("SSE buffer overflow")]
    BufferOverflow,

    #[error("Internal provider error: {0}")]
    Internal(String),
}

impl ProviderError {
    pub fn upstream(status: Option<StatusCode>, message: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ProviderErrorKind {
        match self {
            Self::Request(e) => classify_reqwest_error(e),
            Self::Upstream { status, message } => classify(*status, message),
            Self::IdleTimeout(_) => ProviderErrorKind::Timeout,
            Self::BufferOverflow | Self::Internal(_) => ProviderErrorKind::Unknown,
        }
    }
}

/// Closed set of failure classes surfaced to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderErrorKind {
    ModelUnavailable,
    RateLimited,
    AuthError,
    ContentPolicyBlocked,
    Timeout,
    ContextLengthExceeded,
    Unknown,
}

impl ProviderErrorKind {
    pub const ALL: [Self; 7] = [
        Self::ModelUnavailable,
        Self::RateLimited,
        Self::AuthError,
        Self::ContentPolicyBlocked,
        Self::Timeout,
        Self::ContextLengthExceeded,
        Self::Unknown,
    ];

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.code() == code)
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::ModelUnavailable => "model_unavailable",
            Self::RateLimited => "rate_limited",
            Self::AuthError => "auth_error",
            Self::ContentPolicyBlocked => "content_policy_blocked",
            Self::Timeout => "timeout",
            Self::ContextLengthExceeded => "context_length_exceeded",
            Self::Unknown => "unknown",
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::ModelUnavailable => {
                "This model is temporarily unavailable. Please try again or choose another model."
            }
            Self::RateLimited => "The AI provider is busy right now. Please try again shortly.",
            Self::AuthError => "The AI provider is not available right now. Please try again later.",
            Self::ContentPolicyBlocked => {
                "The request was blocked by the provider's content policy."
            }
            Self::Timeout => "The AI provider took too long to respond. Please try again.",
            Self::ContextLengthExceeded => {
                "This conversation is too long for the model. Start a new conversation or summarize it first."
            }
            Self::Unknown => "Something went wrong while generating a response. Please try again.",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::ModelUnavailable | Self::AuthError => StatusCode::SERVICE_UNAVAILABLE,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::ContentPolicyBlocked | Self::ContextLengthExceeded => StatusCode::BAD_REQUEST,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Upstream rate limits, timeouts and outages may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ModelUnavailable | Self::RateLimited | Self::Timeout
        )
    }
}

const CONTEXT_PATTERNS: &[&str] = &[
    "context length",
    "context_length",
    "context window",
    "maximum context",
    "prompt is too long",
    "too many tokens",
    "max_tokens_exceeded",
];
const CONTENT_POLICY_PATTERNS: &[&str] = &[
    "content policy",
    "content_policy",
    "content_filter",
    "content management",
    "safety system",
    "flagged",
];
const RATE_LIMIT_PATTERNS: &[&str] = &[
    "rate limit",
    "rate_limit",
    "too many requests",
    "quota",
];
const TIMEOUT_PATTERNS: &[&str] = &["timed out", "timeout", "deadline exceeded"];
const AUTH_PATTERNS: &[&str] = &[
    "api key",
    "api_key",
    "authentication",
    "unauthorized",
    "permission",
    "invalid x-api-key",
];
const UNAVAILABLE_PATTERNS: &[&str] = &[
    "model not found",
    "model_not_found",
    "does not exist",
    "not_found_error",
    "overloaded",
    "unavailable",
    "no endpoints",
];

/// Classify by error text first, then by HTTP status.
pub fn classify(status: Option<StatusCode>, text: &str) -> ProviderErrorKind {
    let text = text.to_lowercase();
    let matches = |patterns: &[&str]| patterns.iter().any(|p| text.contains(p));

    if matches(CONTEXT_PATTERNS) {
        return ProviderErrorKind::ContextLengthExceeded;
    }
    if matches(CONTENT_POLICY_PATTERNS) {
        return ProviderErrorKind::ContentPolicyBlocked;
    }
    if matches(RATE_LIMIT_PATTERNS) {
        return ProviderErrorKind::RateLimited;
    }
    if matches(TIMEOUT_PATTERNS) {
        return ProviderErrorKind::Timeout;
    }
    if matches(AUTH_PATTERNS) {
        return ProviderErrorKind::AuthError;
    }
    if matches(UNAVAILABLE_PATTERNS) {
        return ProviderErrorKind::ModelUnavailable;
    }

    status.map_or(ProviderErrorKind::Unknown, classify_status)
}

pub fn classify_status(status: StatusCode) -> ProviderErrorKind {
    match status.as_u16() {
        401 | 403 => ProviderErrorKind::AuthError,
        429 => ProviderErrorKind::RateLimited,
        408 | 504 => ProviderErrorKind::Timeout,
        413 => ProviderErrorKind::ContextLengthExceeded,
        404 | 500..=503 | 529 => ProviderErrorKind::ModelUnavailable,
        _ => ProviderErrorKind::Unknown,
    }
}

fn classify_reqwest_error(error: &reqwest::Error) -> ProviderErrorKind {
    if error.is_timeout() {
        return ProviderErrorKind::Timeout;
    }
    if error.is_connect() {
        return ProviderErrorKind::ModelUnavailable;
    }
    error
        .status()
        .map_or(ProviderErrorKind::Unknown, classify_status)
}
