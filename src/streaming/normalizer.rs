use crate::{
    models::SupervisionMetadata,
    pricing::TokenUsage,
    providers::ProviderEvent,
    streaming::StreamEvent,
    supervision::{
        BlockMarkers, StripState,
        stripper::{self, parse_metadata},
    },
};

/// Turns provider events into client events while keeping the transcript.
///
/// Thinking is dropped entirely when it was not requested. With
/// supervision active, visible text passes through the metadata stripper
/// and the first well-formed block is kept as [`SupervisionMetadata`].
#[derive(Debug)]
pub struct StreamNormalizer {
    enable_thinking: bool,
    markers: Option<BlockMarkers>,
    strip: StripState,
    content: String,
    thinking: String,
    usage: Option<TokenUsage>,
    metadata: Option<SupervisionMetadata>,
}

/// Everything accumulated over one generation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedOutput {
    /// Visible text exactly as forwarded to the client.
    pub content: String,
    pub thinking: String,
    /// Exact usage, if the provider reported it.
    pub usage: Option<TokenUsage>,
    pub metadata: Option<SupervisionMetadata>,
}

impl StreamNormalizer {
    /// `markers` is set only when the request is supervised.
    pub fn new(enable_thinking: bool, markers: Option<BlockMarkers>) -> Self {
        Self {
            enable_thinking,
            markers,
            strip: StripState::default(),
            content: String::new(),
            thinking: String::new(),
            usage: None,
            metadata: None,
        }
    }

    /// Process one provider event. Returns the client event to forward, if any.
    pub fn push(&mut self, event: ProviderEvent) -> Option<StreamEvent> {
        match event {
            ProviderEvent::Text(text) => self.visible(text),
            ProviderEvent::Thinking(text) => {
                if !self.enable_thinking || text.is_empty() {
                    return None;
                }
                self.thinking.push_str(&text);
                Some(StreamEvent::Thinking { text })
            }
            ProviderEvent::Usage(usage) => {
                self.usage = Some(usage);
                None
            }
        }
    }

    /// Release text held back as a possible sentinel prefix.
    ///
    /// Call once the provider stream has ended, successfully or not.
    pub fn flush(&mut self) -> Option<StreamEvent> {
        let held = stripper::finish(std::mem::take(&mut self.strip));
        self.emit(held)
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn into_output(self) -> NormalizedOutput {
        NormalizedOutput {
            content: self.content,
            thinking: self.thinking,
            usage: self.usage,
            metadata: self.metadata,
        }
    }

    fn visible(&mut self, text: String) -> Option<StreamEvent> {
        let Some(markers) = &self.markers else {
            return self.emit(text);
        };

        let step = stripper::feed(std::mem::take(&mut self.strip), &text, markers.sentinels());
        self.strip = step.state;

        for block in step.blocks {
            if self.metadata.is_some() {
                tracing::debug!("Ignoring additional supervision block");
                continue;
            }
            self.metadata = parse_metadata(&block);
        }

        self.emit(step.visible)
    }

    fn emit(&mut self, text: String) -> Option<StreamEvent> {
        if text.is_empty() {
            return None;
        }
        self.content.push_str(&text);
        Some(StreamEvent::Chunk { text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentinels() -> Option<BlockMarkers> {
        Some(BlockMarkers {
            open: "<<<SUPERVISION".to_string(),
            close: "SUPERVISION>>>".to_string(),
            max_block_bytes: 256,
        })
    }

    fn run(normalizer: &mut StreamNormalizer, events: Vec<ProviderEvent>) -> Vec<StreamEvent> {
        let mut out: Vec<StreamEvent> = events
            .into_iter()
            .filter_map(|e| normalizer.push(e))
            .collect();
        out.extend(normalizer.flush());
        out
    }

    fn text(s: &str) -> ProviderEvent {
        ProviderEvent::Text(s.to_string())
    }

    #[test]
    fn test_thinking_suppressed_when_disabled() {
        let mut normalizer = StreamNormalizer::new(false, None);
        let events = run(
            &mut normalizer,
            vec![ProviderEvent::Thinking("secret plan".into()), text("Answer")],
        );

        assert_eq!(events, vec![StreamEvent::Chunk { text: "Answer".into() }]);
        let output = normalizer.into_output();
        assert!(output.thinking.is_empty());
        assert_eq!(output.content, "Answer");
    }

    #[test]
    fn test_thinking_forwarded_when_enabled() {
        let mut normalizer = StreamNormalizer::new(true, None);
        let events = run(
            &mut normalizer,
            vec![
                ProviderEvent::Thinking("step 1".into()),
                text("Answer"),
                ProviderEvent::Usage(TokenUsage::new(10, 3)),
            ],
        );

        assert_eq!(
            events,
            vec![
                StreamEvent::Thinking { text: "step 1".into() },
                StreamEvent::Chunk { text: "Answer".into() },
            ]
        );
        let output = normalizer.into_output();
        assert_eq!(output.thinking, "step 1");
        assert_eq!(output.usage, Some(TokenUsage::new(10, 3)));
    }

    #[test]
    fn test_unsupervised_text_is_not_stripped() {
        let mut normalizer = StreamNormalizer::new(false, None);
        run(&mut normalizer, vec![text("a <<<SUPERVISION b")]);
        assert_eq!(normalizer.content(), "a <<<SUPERVISION b");
    }

    #[test]
    fn test_supervised_metadata_extracted_across_chunks() {
        let mut normalizer = StreamNormalizer::new(false, sentinels());
        let events = run(
            &mut normalizer,
            vec![
                text("Half of 8 is 4.<<<SUPER"),
                text("VISION{\"subject\":\"math\",\"topic\":\"fra"),
                text("ctions\",\"activityType\":\"homework\",\"struggleFlag\":true}SUPERVIS"),
                text("ION>>> Bye"),
            ],
        );

        let visible: String = events
            .iter()
            .map(|e| match e {
                StreamEvent::Chunk { text } => text.as_str(),
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(visible, "Half of 8 is 4. Bye");

        let output = normalizer.into_output();
        assert_eq!(output.content, "Half of 8 is 4. Bye");
        let metadata = output.metadata.unwrap();
        assert_eq!(metadata.subject.as_deref(), Some("math"));
        assert_eq!(metadata.topic.as_deref(), Some("fractions"));
        assert!(metadata.struggle_flag);
    }

    #[test]
    fn test_first_block_wins() {
        let mut normalizer = StreamNormalizer::new(false, sentinels());
        run(
            &mut normalizer,
            vec![text(
                "x<<<SUPERVISION{\"topic\":\"one\"}SUPERVISION>>>y<<<SUPERVISION{\"topic\":\"two\"}SUPERVISION>>>",
            )],
        );
        let output = normalizer.into_output();
        assert_eq!(output.content, "xy");
        assert_eq!(output.metadata.unwrap().topic.as_deref(), Some("one"));
    }

    #[test]
    fn test_held_prefix_flushed_at_end() {
        let mut normalizer = StreamNormalizer::new(false, sentinels());
        let events = run(&mut normalizer, vec![text("Done <<<SUP")]);
        assert_eq!(
            events,
            vec![
                StreamEvent::Chunk { text: "Done ".into() },
                StreamEvent::Chunk { text: "<<<SUP".into() },
            ]
        );
        assert_eq!(normalizer.content(), "Done <<<SUP");
    }

    #[test]
    fn test_malformed_block_is_hidden_but_not_kept() {
        let mut normalizer = StreamNormalizer::new(false, sentinels());
        run(
            &mut normalizer,
            vec![text("ok<<<SUPERVISION not json SUPERVISION>>>")],
        );
        let output = normalizer.into_output();
        assert_eq!(output.content, "ok");
        assert!(output.metadata.is_none());
    }

    #[test]
    fn test_unterminated_block_does_not_swallow_answer() {
        let mut normalizer = StreamNormalizer::new(false, sentinels());
        let mut events = vec![text("Step 1. <<<SUPERVISION was mentioned, ")];
        events.extend((0..40).map(|i| text(&format!("then step {i}. "))));
        run(&mut normalizer, events);

        let output = normalizer.into_output();
        assert!(output.content.starts_with("Step 1.  was mentioned, then step 0."));
        assert!(output.content.ends_with("then step 39. "));
        assert!(output.metadata.is_none());
    }
}
