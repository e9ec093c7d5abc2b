//! Generation sessions.
//!
//! [`admit`] runs the pre-stream pipeline in a fixed order: supervision
//! precheck, model and assistant lookup, pool resolution, rate limit, spend
//! authorization. Only then is the provider stream opened and the
//! conversation touched. [`run`] drives the admitted stream on a tracked
//! task and owns every post-stream write.

use std::{sync::Arc, time::Instant};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    AppState,
    credits::{ResolvedSpend, SpendContext, SpendDecision, can_spend, estimate_spend},
    models::{CreateConversation, CreateMessage, MessageRole, MessageStatus},
    observability::metrics::{self, GenerationMetrics},
    pricing::{PricingCatalog, microcents_to_dollars},
    providers::{ChatMessage, GenerationInput, ProviderError, ProviderEventStream, ResolvedProvider},
    ratelimit::{RateLimitDecision, RateLimitSnapshot},
    routes::error::GenerateError,
    settlement::{SettlementRequest, SettlementResult},
    streaming::{CreditSnapshot, DonePayload, IdleTimeoutStream, StreamEvent, StreamNormalizer},
    supervision::{BlockMarkers, Precheck},
};

/// A validated generation request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub request_id: String,
    pub user_id: Uuid,
    pub model: String,
    pub message: String,
    pub conversation_id: Option<Uuid>,
    pub prior_messages: Vec<ChatMessage>,
    pub attachments: Vec<String>,
    pub enable_thinking: bool,
    pub class_id: Option<Uuid>,
    pub assistant_id: Option<String>,
}

/// A request that passed every check and has an open provider stream.
pub struct AdmittedGeneration {
    request: GenerationRequest,
    resolved: ResolvedSpend,
    catalog: Arc<PricingCatalog>,
    provider: ResolvedProvider,
    rate_limit: RateLimitSnapshot,
    conversation_id: Uuid,
    markers: Option<BlockMarkers>,
    events: ProviderEventStream,
    started: Instant,
}

impl AdmittedGeneration {
    pub fn conversation_id(&self) -> Uuid {
        self.conversation_id
    }

    pub fn enable_thinking(&self) -> bool {
        self.request.enable_thinking
    }
}

impl std::fmt::Debug for AdmittedGeneration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmittedGeneration")
            .field("request_id", &self.request.request_id)
            .field("model", &self.request.model)
            .field("pool", &self.resolved.pool.pool)
            .field("provider", &self.provider)
            .field("conversation_id", &self.conversation_id)
            .finish()
    }
}

/// Run every pre-stream check and open the provider stream.
///
/// Nothing is persisted unless the stream opened.
#[tracing::instrument(
    skip(state, request),
    fields(request_id = %request.request_id, user_id = %request.user_id, model = %request.model)
)]
pub async fn admit(
    state: &AppState,
    request: GenerationRequest,
    now: DateTime<Utc>,
) -> Result<AdmittedGeneration, GenerateError> {
    let started = Instant::now();

    let supervised = match state.supervision.precheck(request.user_id, now).await? {
        Precheck::Allowed { supervised } => supervised,
        Precheck::Denied(denial) => return Err(GenerateError::Supervision(denial)),
    };

    // One snapshot serves both the estimate and settlement.
    let catalog = state.pricing.snapshot();
    let pricing = catalog
        .get(&request.model)
        .ok_or_else(|| GenerateError::UnknownModel(request.model.clone()))?;
    let provider = state
        .providers
        .resolve(&request.model)
        .ok_or_else(|| GenerateError::UnknownModel(request.model.clone()))?;
    let assistant_prompt = match &request.assistant_id {
        Some(id) => Some(
            state
                .config
                .assistants
                .get(id)
                .ok_or_else(|| GenerateError::UnknownAssistant(id.clone()))?
                .system_prompt
                .clone(),
        ),
        None => None,
    };

    let resolved = state
        .resolver
        .resolve(request.user_id, SpendContext::from_class_id(request.class_id))
        .await?;

    let rate_limit = match state
        .rate_limiter
        .check(&request.user_id.to_string(), &request.model, now)
        .await?
    {
        decision @ RateLimitDecision::Allowed { .. } => decision.snapshot(),
        RateLimitDecision::Denied {
            reset_at,
            limit,
            tier,
        } => return Err(GenerateError::rate_limited(limit, tier, reset_at, now)),
    };

    let system_prompt = build_system_prompt(
        assistant_prompt,
        supervised.then(|| state.config.supervision.rendered_instruction()),
    );
    let estimate = estimate_spend(
        &state.config.credits,
        system_prompt
            .as_deref()
            .into_iter()
            .chain(request.prior_messages.iter().map(|m| m.content.as_str()))
            .chain(std::iter::once(request.message.as_str())),
        request.attachments.len(),
        pricing,
        catalog.markup_for(resolved.pool.cohort.as_deref()),
    );
    let decision = can_spend(&resolved.pool, &resolved.caps, estimate.cost_microcents, now);
    metrics::record_spend_check(
        if matches!(decision, SpendDecision::Allowed) {
            "allowed"
        } else {
            "denied"
        },
        resolved.pool.kind().as_str(),
    );
    if let SpendDecision::Denied(denial) = decision {
        tracing::info!(
            code = denial.code(),
            estimated_cost = estimate.cost_microcents,
            "Spend denied"
        );
        return Err(GenerateError::Spend(denial));
    }

    let existing = match request.conversation_id {
        Some(id) => {
            let conversation = state
                .db
                .conversations()
                .get_by_id(id)
                .await?
                .filter(|c| c.user_id == request.user_id)
                .ok_or(GenerateError::ConversationNotFound(id))?;
            Some(conversation.id)
        }
        None => None,
    };

    let markers = supervised.then(|| state.config.supervision.block_markers());
    let mut messages = request.prior_messages.clone();
    messages.push(ChatMessage::user(request.message.clone()));
    let input = GenerationInput {
        model: provider.upstream_model.clone(),
        system_prompt,
        messages,
        enable_thinking: request.enable_thinking,
        metadata_sentinels: markers
            .as_ref()
            .map(|m| (m.open.clone(), m.close.clone())),
    };

    let events = provider
        .provider
        .stream_generation(&state.http_client, input)
        .await
        .inspect_err(|e| {
            metrics::record_generation(GenerationMetrics {
                provider: &provider.name,
                model: &request.model,
                outcome: "error",
                chunk_count: 0,
                time_to_first_chunk_secs: None,
                duration_secs: started.elapsed().as_secs_f64(),
                input_tokens: None,
                output_tokens: None,
                cost_microcents: None,
            });
            tracing::debug!(error = %e, "Provider stream failed to open");
        })?;

    let conversations = state.db.conversations();
    let conversation_id = match existing {
        Some(id) => id,
        None => {
            conversations
                .create(CreateConversation {
                    user_id: request.user_id,
                    class_id: request.class_id,
                    model: request.model.clone(),
                })
                .await?
                .id
        }
    };
    conversations
        .append_message(CreateMessage::user(conversation_id, request.message.clone()))
        .await?;

    Ok(AdmittedGeneration {
        request,
        resolved,
        catalog,
        provider,
        rate_limit,
        conversation_id,
        markers,
        events,
        started,
    })
}

fn build_system_prompt(assistant: Option<String>, supervision: Option<String>) -> Option<String> {
    match (assistant, supervision) {
        (Some(a), Some(s)) => Some(format!("{a}\n\n{s}")),
        (a, s) => a.or(s),
    }
}

/// Spawn [`run`] on the state's task tracker so shutdown waits for it.
pub fn spawn(state: AppState, admitted: AdmittedGeneration, tx: mpsc::Sender<StreamEvent>) {
    let span = tracing::info_span!(
        "generation",
        request_id = %admitted.request.request_id,
        model = %admitted.request.model,
        provider = %admitted.provider.name,
    );
    let tracker = state.task_tracker.clone();
    tracker.spawn(run(state, admitted, tx).instrument(span));
}

enum StreamEnd {
    Finished,
    Failed(ProviderError),
    Disconnected,
}

/// Drive the provider stream to its end and settle.
///
/// Exactly one terminal event is sent unless the client went away. A
/// disconnect drops the provider stream, which cancels the upstream request.
pub async fn run(state: AppState, admitted: AdmittedGeneration, tx: mpsc::Sender<StreamEvent>) {
    let AdmittedGeneration {
        request,
        resolved,
        catalog,
        provider,
        rate_limit,
        conversation_id,
        markers,
        events,
        started,
    } = admitted;

    let mut normalizer = StreamNormalizer::new(request.enable_thinking, markers);
    let idle_timeout = state
        .config
        .server
        .streaming_idle_timeout()
        .unwrap_or_default();
    let mut stream = IdleTimeoutStream::new(events, idle_timeout);
    let mut chunk_count = 0u64;
    let mut first_chunk: Option<f64> = None;

    let end = loop {
        let item = tokio::select! {
            _ = tx.closed() => break StreamEnd::Disconnected,
            item = stream.next() => item,
        };
        match item {
            Some(Ok(event)) => {
                let Some(out) = normalizer.push(event) else {
                    continue;
                };
                first_chunk.get_or_insert_with(|| started.elapsed().as_secs_f64());
                chunk_count += 1;
                if tx.send(out).await.is_err() {
                    break StreamEnd::Disconnected;
                }
            }
            Some(Err(e)) => break StreamEnd::Failed(e),
            None => break StreamEnd::Finished,
        }
    };
    drop(stream);

    let held = normalizer.flush();
    if let (Some(event), false) = (held, matches!(end, StreamEnd::Disconnected)) {
        let _ = tx.send(event).await;
    }
    let output = normalizer.into_output();
    let conversations = state.db.conversations();

    let mut generation_metrics = GenerationMetrics {
        provider: &provider.name,
        model: &request.model,
        outcome: "completed",
        chunk_count,
        time_to_first_chunk_secs: first_chunk,
        duration_secs: started.elapsed().as_secs_f64(),
        input_tokens: output.usage.map(|u| u.input_tokens),
        output_tokens: output.usage.map(|u| u.output_tokens),
        cost_microcents: None,
    };

    let usage = match (end, output.usage) {
        (StreamEnd::Finished, Some(usage)) => usage,
        (end, _) => {
            let (outcome, error) = match end {
                StreamEnd::Disconnected => {
                    tracing::info!(chars = output.content.len(), "Client disconnected mid-stream");
                    ("cancelled", None)
                }
                StreamEnd::Failed(e) => {
                    tracing::warn!(error = %e, code = e.kind().code(), "Provider stream failed");
                    ("error", Some(e.kind()))
                }
                StreamEnd::Finished => {
                    tracing::error!("Provider stream ended without reporting usage");
                    ("error", Some(crate::providers::ProviderErrorKind::Unknown))
                }
            };
            generation_metrics.outcome = outcome;
            metrics::record_generation(generation_metrics);

            if !output.content.is_empty()
                && let Err(e) = conversations
                    .append_message(CreateMessage::partial_assistant(
                        conversation_id,
                        output.content,
                        output.metadata,
                    ))
                    .await
            {
                tracing::error!(error = %e, "Failed to persist partial message");
            }

            if let Some(kind) = error {
                metrics::record_gateway_error("provider_error", kind.code(), Some(&provider.name));
                let _ = tx
                    .send(StreamEvent::Error {
                        message: kind.user_message().to_string(),
                        code: kind.code().to_string(),
                    })
                    .await;
            }
            return;
        }
    };

    let now = Utc::now();
    let settlement = state
        .settlement
        .settle(
            SettlementRequest {
                request_id: &request.request_id,
                user_id: request.user_id,
                model: &request.model,
                resolved: &resolved,
                usage,
                catalog: &catalog,
            },
            now,
        )
        .await;
    generation_metrics.cost_microcents = Some(settlement.cost_microcents);
    metrics::record_generation(generation_metrics);

    let message = CreateMessage {
        conversation_id,
        role: MessageRole::Assistant,
        content: output.content,
        tokens_input: usage.input_tokens,
        tokens_output: usage.output_tokens,
        cost_microcents: settlement.cost_microcents,
        co2_grams: settlement.co2_grams,
        status: MessageStatus::Complete,
        supervision_metadata: output.metadata,
    };
    if let Err(e) = conversations.append_message(message).await {
        tracing::error!(error = %e, "Failed to persist assistant message");
    }

    let _ = tx
        .send(StreamEvent::Done(done_payload(
            usage.input_tokens,
            usage.output_tokens,
            &settlement,
            conversation_id,
            rate_limit,
        )))
        .await;
}

fn done_payload(
    tokens_input: i64,
    tokens_output: i64,
    settlement: &SettlementResult,
    conversation_id: Uuid,
    rate_limit: RateLimitSnapshot,
) -> DonePayload {
    DonePayload {
        tokens_input,
        tokens_output,
        cost: microcents_to_dollars(settlement.cost_microcents),
        co2_grams: settlement.co2_grams,
        conversation_id,
        rate_limit,
        credits: CreditSnapshot {
            source: settlement.source.as_str().to_string(),
            remaining: settlement
                .remaining_balance_microcents
                .map(microcents_to_dollars),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_composition() {
        assert_eq!(build_system_prompt(None, None), None);
        assert_eq!(
            build_system_prompt(Some("tutor".into()), None).as_deref(),
            Some("tutor")
        );
        assert_eq!(
            build_system_prompt(None, Some("meta".into())).as_deref(),
            Some("meta")
        );
        assert_eq!(
            build_system_prompt(Some("tutor".into()), Some("meta".into())).as_deref(),
            Some("tutor\n\nmeta")
        );
    }
}
