//! Scripted provider with configurable failure modes.
//!
//! Streams a fixed answer without network calls so the gateway can be
//! exercised end to end, including mid-stream failures and stalls.

use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, stream};
use http::StatusCode;

use crate::{
    config::{TestFailureMode, TestProviderConfig},
    pricing::TokenUsage,
    providers::{GenerationInput, Provider, ProviderError, ProviderEvent, ProviderEventStream},
};

/// Approximate characters per token used for scripted usage counts.
const CHARS_PER_TOKEN: usize = 4;

pub struct TestProvider {
    config: TestProviderConfig,
}

impl TestProvider {
    pub fn from_config(config: &TestProviderConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Full visible text, with metadata appended when sentinels were requested.
    fn scripted_text(&self, input: &GenerationInput) -> String {
        match (&input.metadata_sentinels, &self.config.supervision_metadata) {
            (Some((open, close)), Some(metadata)) => {
                format!("{}\n{}{}{}", self.config.response, open, metadata, close)
            }
            _ => self.config.response.clone(),
        }
    }

    fn scripted_events(&self, input: &GenerationInput) -> Vec<Result<ProviderEvent, ProviderError>> {
        let mut events = Vec::new();

        let thinking = self
            .config
            .thinking
            .as_deref()
            .filter(|_| input.enable_thinking);
        if let Some(thinking) = thinking {
            events.extend(
                chunk_text(thinking, self.config.chunk_chars)
                    .into_iter()
                    .map(|c| Ok(ProviderEvent::Thinking(c))),
            );
        }

        let text = self.scripted_text(input);
        let mut chunks = chunk_text(&text, self.config.chunk_chars);
        let cut = match &self.config.failure_mode {
            TestFailureMode::MidStreamError { after_chunks, .. }
            | TestFailureMode::Stall { after_chunks } => Some(*after_chunks),
            _ => None,
        };
        if let Some(after) = cut {
            chunks.truncate(after);
        }
        events.extend(chunks.into_iter().map(|c| Ok(ProviderEvent::Text(c))));

        match &self.config.failure_mode {
            TestFailureMode::MidStreamError { message, .. } => {
                events.push(Err(ProviderError::upstream(None, message.clone())));
            }
            TestFailureMode::None => {
                let prompt_chars = input.system_prompt.as_deref().map_or(0, char_count)
                    + input.messages.iter().map(|m| char_count(&m.content)).sum::<usize>();
                let output_chars = char_count(&text) + thinking.map_or(0, char_count);
                events.push(Ok(ProviderEvent::Usage(TokenUsage::new(
                    tokens_for(prompt_chars),
                    tokens_for(output_chars),
                ))));
            }
            TestFailureMode::Stall { .. }
            | TestFailureMode::OmitUsage
            | TestFailureMode::HttpError { .. } => {}
        }

        events
    }
}

fn char_count(text: &str) -> usize {
    text.chars().count()
}

fn tokens_for(chars: usize) -> i64 {
    chars.div_ceil(CHARS_PER_TOKEN) as i64
}

/// Split on char boundaries into pieces of at most `size` chars.
fn chunk_text(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(size.max(1))
        .map(|c| c.iter().collect())
        .collect()
}

#[async_trait]
impl Provider for TestProvider {
    fn name(&self) -> &'static str {
        "test"
    }

    async fn stream_generation(
        &self,
        _client: &reqwest::Client,
        input: GenerationInput,
    ) -> Result<ProviderEventStream, ProviderError> {
        if let TestFailureMode::HttpError {
            status_code,
            message,
        } = &self.config.failure_mode
        {
            let status = StatusCode::from_u16(*status_code)
                .map_err(|e| ProviderError::Internal(e.to_string()))?;
            let message = message.clone().unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("test provider error")
                    .to_string()
            });
            return Err(ProviderError::upstream(Some(status), message));
        }

        let delay = Duration::from_millis(self.config.chunk_delay_ms);
        let scripted = stream::iter(self.scripted_events(&input)).then(move |event| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            event
        });

        if matches!(self.config.failure_mode, TestFailureMode::Stall { .. }) {
            return Ok(scripted.chain(stream::pending()).boxed());
        }
        Ok(scripted.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ChatMessage, ProviderErrorKind};

    fn input(enable_thinking: bool, sentinels: bool) -> GenerationInput {
        GenerationInput {
            model: "test-model".into(),
            system_prompt: Some("sys".into()),
            messages: vec![ChatMessage::user("hello there")],
            enable_thinking,
            metadata_sentinels: sentinels.then(|| ("<<<M".to_string(), "M>>>".to_string())),
        }
    }

    fn provider(config: TestProviderConfig) -> TestProvider {
        TestProvider::from_config(&config)
    }

    async fn collect(provider: &TestProvider, input: GenerationInput) -> Vec<Result<ProviderEvent, ProviderError>> {
        let client = reqwest::Client::new();
        provider
            .stream_generation(&client, input)
            .await
            .unwrap()
            .collect()
            .await
    }

    fn text_of(events: &[Result<ProviderEvent, ProviderError>]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                Ok(ProviderEvent::Text(t)) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_chunk_text_respects_char_boundaries() {
        assert_eq!(chunk_text("héllo", 2), vec!["hé", "ll", "o"]);
        assert_eq!(chunk_text("", 4), Vec::<String>::new());
        assert_eq!(chunk_text("abc", 0), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_normal_stream_with_usage() {
        let provider = provider(TestProviderConfig {
            response: "Fractions are parts.".into(),
            chunk_chars: 5,
            ..Default::default()
        });
        let events = collect(&provider, input(false, false)).await;

        assert_eq!(text_of(&events), "Fractions are parts.");
        // "sys" + "hello there" = 14 chars, 20 output chars
        assert_eq!(
            events.last().unwrap().as_ref().unwrap(),
            &ProviderEvent::Usage(TokenUsage::new(4, 5))
        );
    }

    #[tokio::test]
    async fn test_thinking_only_when_enabled() {
        let provider = provider(TestProviderConfig {
            thinking: Some("pondering".into()),
            ..Default::default()
        });

        let with = collect(&provider, input(true, false)).await;
        assert!(matches!(with[0], Ok(ProviderEvent::Thinking(_))));

        let without = collect(&provider, input(false, false)).await;
        assert!(
            without
                .iter()
                .all(|e| !matches!(e, Ok(ProviderEvent::Thinking(_))))
        );
    }

    #[tokio::test]
    async fn test_metadata_appended_only_with_sentinels() {
        let provider = provider(TestProviderConfig {
            response: "Answer.".into(),
            supervision_metadata: Some(r#"{"topic":"math"}"#.into()),
            chunk_chars: 3,
            ..Default::default()
        });

        let text = text_of(&collect(&provider, input(false, true)).await);
        assert_eq!(text, "Answer.\n<<<M{\"topic\":\"math\"}M>>>");

        let text = text_of(&collect(&provider, input(false, false)).await);
        assert_eq!(text, "Answer.");
    }

    #[tokio::test]
    async fn test_mid_stream_error() {
        let provider = provider(TestProviderConfig {
            response: "abcdefghij".into(),
            chunk_chars: 2,
            failure_mode: TestFailureMode::MidStreamError {
                after_chunks: 2,
                message: "upstream connection reset".into(),
            },
            ..Default::default()
        });
        let events = collect(&provider, input(false, false)).await;

        assert_eq!(events.len(), 3);
        assert_eq!(text_of(&events), "abcd");
        assert!(events[2].is_err());
    }

    #[tokio::test]
    async fn test_omit_usage() {
        let provider = provider(TestProviderConfig {
            failure_mode: TestFailureMode::OmitUsage,
            ..Default::default()
        });
        let events = collect(&provider, input(false, false)).await;
        assert!(
            events
                .iter()
                .all(|e| matches!(e, Ok(ProviderEvent::Text(_))))
        );
    }

    #[tokio::test]
    async fn test_http_error_before_stream() {
        let provider = provider(TestProviderConfig {
            failure_mode: TestFailureMode::HttpError {
                status_code: 503,
                message: None,
            },
            ..Default::default()
        });
        let client = reqwest::Client::new();
        let Err(err) = provider.stream_generation(&client, input(false, false)).await else {
            panic!("expected error");
        };
        assert_eq!(err.kind(), ProviderErrorKind::ModelUnavailable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stall_never_finishes() {
        let provider = provider(TestProviderConfig {
            response: "abcdef".into(),
            chunk_chars: 2,
            failure_mode: TestFailureMode::Stall { after_chunks: 1 },
            ..Default::default()
        });
        let client = reqwest::Client::new();
        let mut stream = provider
            .stream_generation(&client, input(false, false))
            .await
            .unwrap();

        assert_eq!(
            stream.next().await.unwrap().unwrap(),
            ProviderEvent::Text("ab".into())
        );
        let next = tokio::time::timeout(Duration::from_secs(60), stream.next()).await;
        assert!(next.is_err());
    }
}
