//! Caller identity.
//!
//! The gateway sits behind an authenticating proxy that forwards the user's
//! id in a configured header. Requests without a parseable id are rejected
//! before any handler runs.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::{AppState, routes::error::GenerateError};

/// The authenticated user for the current request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserIdentity(pub Uuid);

pub async fn identity_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, GenerateError> {
    let user_id = req
        .headers()
        .get(state.config.auth.identity_header.as_str())
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
        .ok_or(GenerateError::MissingIdentity)?;

    tracing::Span::current().record("user_id", tracing::field::display(user_id));
    req.extensions_mut().insert(UserIdentity(user_id));
    Ok(next.run(req).await)
}
