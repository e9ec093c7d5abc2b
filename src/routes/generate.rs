//! `POST /api/generate`.

use std::convert::Infallible;

use axum::{
    Extension, Json,
    extract::{State, rejection::JsonRejection},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use chrono::Utc;
use futures::{Stream, StreamExt, stream};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{
    AppState,
    middleware::{RequestId, UserIdentity},
    providers::{ChatMessage, ProviderErrorKind},
    routes::error::GenerateError,
    session::{self, GenerationRequest},
    streaming::{DonePayload, StreamEvent},
};

const MAX_MESSAGE_CHARS: u64 = 200_000;
const MAX_PRIOR_MESSAGES: u64 = 500;
const MAX_ATTACHMENTS: u64 = 20;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GenerateBody {
    #[validate(
        length(min = 1, max = MAX_MESSAGE_CHARS),
        custom(function = "not_blank")
    )]
    pub message: String,
    #[validate(length(min = 1, max = 256))]
    pub model: String,
    #[serde(default)]
    pub conversation_id: Option<Uuid>,
    #[serde(default)]
    #[validate(length(max = MAX_PRIOR_MESSAGES))]
    pub prior_messages: Vec<ChatMessage>,
    #[serde(default)]
    #[validate(length(max = MAX_ATTACHMENTS))]
    pub attachments: Vec<String>,
    #[serde(default = "default_stream")]
    pub stream: bool,
    #[serde(default)]
    pub enable_thinking: bool,
    #[serde(default)]
    pub class_id: Option<Uuid>,
    #[serde(default)]
    pub assistant_id: Option<String>,
}

fn default_stream() -> bool {
    true
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank").with_message("must not be blank".into()));
    }
    Ok(())
}

/// Non-streaming response: the `done` fields plus the generated text.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    #[serde(flatten)]
    pub done: DonePayload,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
}

#[tracing::instrument(name = "generate", skip_all, fields(user_id = %user_id))]
pub async fn generate(
    State(state): State<AppState>,
    Extension(UserIdentity(user_id)): Extension<UserIdentity>,
    request_id: Option<Extension<RequestId>>,
    body: Result<Json<GenerateBody>, JsonRejection>,
) -> Result<Response, GenerateError> {
    let Json(body) = body.map_err(|e| GenerateError::Validation(e.body_text()))?;
    body.validate()
        .map_err(|e| GenerateError::Validation(e.to_string()))?;

    let request = GenerationRequest {
        request_id: request_id
            .map(|Extension(id)| id.to_string())
            .unwrap_or_else(|| RequestId::new().to_string()),
        user_id,
        model: body.model,
        message: body.message,
        conversation_id: body.conversation_id,
        prior_messages: body.prior_messages,
        attachments: body.attachments,
        enable_thinking: body.enable_thinking,
        class_id: body.class_id,
        assistant_id: body.assistant_id,
    };

    let admitted = session::admit(&state, request, Utc::now()).await?;
    let enable_thinking = admitted.enable_thinking();
    let (tx, rx) = mpsc::channel(state.config.server.stream_event_buffer.max(1));
    session::spawn(state, admitted, tx);

    if body.stream {
        let events = terminated(rx).map(|event| {
            Event::default()
                .event(event.name())
                .json_data(&event)
                .or_else(|e| {
                    tracing::error!(error = %e, "Failed to serialize stream event");
                    Ok::<_, Infallible>(Event::default().event("error").data(
                        r#"{"type":"error","message":"Something went wrong while generating a response. Please try again.","code":"unknown"}"#,
                    ))
                })
        });
        return Ok(Sse::new(events)
            .keep_alive(KeepAlive::default())
            .into_response());
    }

    collect(rx, enable_thinking)
        .await
        .map(|response| Json(response).into_response())
}

/// Events from the generation task, ending after exactly one terminal event.
///
/// If the task goes away without a terminal event, an `unknown` error is
/// synthesized.
fn terminated(rx: mpsc::Receiver<StreamEvent>) -> impl Stream<Item = StreamEvent> + Send {
    stream::unfold((rx, false), |(mut rx, finished)| async move {
        if finished {
            return None;
        }
        let event = rx.recv().await.unwrap_or_else(|| {
            tracing::error!("Generation task ended without a terminal event");
            StreamEvent::Error {
                message: ProviderErrorKind::Unknown.user_message().to_string(),
                code: ProviderErrorKind::Unknown.code().to_string(),
            }
        });
        let terminal = event.is_terminal();
        Some((event, (rx, terminal)))
    })
}

async fn collect(
    rx: mpsc::Receiver<StreamEvent>,
    enable_thinking: bool,
) -> Result<GenerateResponse, GenerateError> {
    let mut content = String::new();
    let mut thinking = String::new();
    let mut events = std::pin::pin!(terminated(rx));

    while let Some(event) = events.next().await {
        match event {
            StreamEvent::Chunk { text } => content.push_str(&text),
            StreamEvent::Thinking { text } => thinking.push_str(&text),
            StreamEvent::Done(done) => {
                return Ok(GenerateResponse {
                    done,
                    content,
                    thinking: enable_thinking.then_some(thinking),
                });
            }
            StreamEvent::Error { code, .. } => {
                let kind = ProviderErrorKind::from_code(&code).unwrap_or(ProviderErrorKind::Unknown);
                return Err(GenerateError::StreamFailed(kind));
            }
        }
    }
    Err(GenerateError::StreamFailed(ProviderErrorKind::Unknown))
}
