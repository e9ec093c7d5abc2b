//! Removes sentinel-delimited metadata blocks from streamed model output.
//!
//! The stripper is a plain state value threaded through [`feed`] and
//! [`finish`]. Text that might be the beginning of an opening sentinel is
//! held back until the next chunk proves otherwise, so a sentinel split
//! across network packets never reaches the client. Everything between the
//! sentinels, the sentinels included, is withheld.
//!
//! A block body is bounded by `max_block_bytes`. A body that grows past the
//! bound without a closing sentinel was not metadata: it is released as
//! visible text and scanning resumes after it.

use crate::models::SupervisionMetadata;

/// Opening and closing markers of a metadata block.
#[derive(Debug, Clone, Copy)]
pub struct Sentinels<'a> {
    pub open: &'a str,
    pub close: &'a str,
    /// Longest body withheld while waiting for `close`
    pub max_block_bytes: usize,
}

/// Owned [`Sentinels`], kept for the lifetime of one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMarkers {
    pub open: String,
    pub close: String,
    pub max_block_bytes: usize,
}

impl BlockMarkers {
    pub fn sentinels(&self) -> Sentinels<'_> {
        Sentinels {
            open: &self.open,
            close: &self.close,
            max_block_bytes: self.max_block_bytes,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StripState {
    /// Nothing withheld
    #[default]
    Scanning,
    /// Trailing text that is a prefix of the opening sentinel
    PossibleSentinel { held: String },
    /// Inside a block; `body` may end with part of the closing sentinel
    InsideMetadata { body: String },
}

/// Result of feeding one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub state: StripState,
    /// Text safe to forward to the client
    pub visible: String,
    /// Raw bodies of blocks closed by this chunk
    pub blocks: Vec<String>,
}

pub fn feed(state: StripState, chunk: &str, sentinels: Sentinels<'_>) -> Step {
    let mut visible = String::new();
    let mut blocks = Vec::new();

    // Inside a block, only the tail that could complete `close` is rescanned.
    let (mut inside, mut buf, mut search_from) = match state {
        StripState::Scanning => (false, chunk.to_string(), 0),
        StripState::PossibleSentinel { mut held } => {
            held.push_str(chunk);
            (false, held, 0)
        }
        StripState::InsideMetadata { mut body } => {
            let overlap = sentinels.close.len().saturating_sub(1);
            let from = floor_char_boundary(&body, body.len().saturating_sub(overlap));
            body.push_str(chunk);
            (true, body, from)
        }
    };

    let state = loop {
        if inside {
            match buf[search_from..].find(sentinels.close) {
                Some(offset) => {
                    let end = search_from + offset;
                    blocks.push(buf[..end].to_string());
                    buf.drain(..end + sentinels.close.len());
                    inside = false;
                    search_from = 0;
                }
                None if buf.len() > sentinels.max_block_bytes => {
                    tracing::warn!(
                        len = buf.len(),
                        limit = sentinels.max_block_bytes,
                        "Supervision block exceeded size limit, releasing it as text"
                    );
                    inside = false;
                    search_from = 0;
                }
                None => break StripState::InsideMetadata { body: buf },
            }
        } else {
            match buf.find(sentinels.open) {
                Some(start) => {
                    visible.push_str(&buf[..start]);
                    buf.drain(..start + sentinels.open.len());
                    inside = true;
                }
                None => {
                    let held_len = partial_prefix_len(&buf, sentinels.open);
                    let split = buf.len() - held_len;
                    visible.push_str(&buf[..split]);
                    break if held_len == 0 {
                        StripState::Scanning
                    } else {
                        StripState::PossibleSentinel {
                            held: buf[split..].to_string(),
                        }
                    };
                }
            }
        }
    };

    Step {
        state,
        visible,
        blocks,
    }
}

/// Flush at end of stream.
///
/// Held text was never a sentinel and is released. An unterminated block is
/// dropped.
pub fn finish(state: StripState) -> String {
    match state {
        StripState::Scanning => String::new(),
        StripState::PossibleSentinel { held } => held,
        StripState::InsideMetadata { body } => {
            tracing::debug!(len = body.len(), "Dropping unterminated supervision block");
            String::new()
        }
    }
}

/// Parse a block body. Malformed JSON is logged and ignored.
pub fn parse_metadata(body: &str) -> Option<SupervisionMetadata> {
    match serde_json::from_str(body.trim()) {
        Ok(metadata) => Some(metadata),
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring malformed supervision metadata");
            None
        }
    }
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Length of the longest proper suffix of `text` that starts `sentinel`.
fn partial_prefix_len(text: &str, sentinel: &str) -> usize {
    let max = text.len().min(sentinel.len().saturating_sub(1));
    (1..=max)
        .rev()
        .find(|&len| {
            let start = text.len() - len;
            text.is_char_boundary(start) && sentinel.as_bytes().starts_with(&text.as_bytes()[start..])
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const SENTINELS: Sentinels<'static> = Sentinels {
        open: "<<<SUP",
        close: "SUP>>>",
        max_block_bytes: 256,
    };

    /// Feed `chunks` in order and collect (visible, blocks).
    fn run<'a>(chunks: impl IntoIterator<Item = &'a str>) -> (String, Vec<String>) {
        let mut state = StripState::Scanning;
        let mut visible = String::new();
        let mut blocks = Vec::new();
        for chunk in chunks {
            let step = feed(state, chunk, SENTINELS);
            visible.push_str(&step.visible);
            blocks.extend(step.blocks);
            state = step.state;
        }
        visible.push_str(&finish(state));
        (visible, blocks)
    }

    fn split_at_all(text: &str, points: &[usize]) -> Vec<String> {
        let mut bounds: Vec<usize> = points
            .iter()
            .map(|p| p % (text.len() + 1))
            .filter(|p| text.is_char_boundary(*p))
            .collect();
        bounds.push(0);
        bounds.push(text.len());
        bounds.sort_unstable();
        bounds.dedup();
        bounds.windows(2).map(|w| text[w[0]..w[1]].to_string()).collect()
    }

    #[test]
    fn test_plain_text_passes_through() {
        let step = feed(StripState::Scanning, "hello world", SENTINELS);
        assert_eq!(step.visible, "hello world");
        assert_eq!(step.state, StripState::Scanning);
        assert!(step.blocks.is_empty());
    }

    #[test]
    fn test_trailing_prefix_is_held() {
        let step = feed(StripState::Scanning, "answer <<<", SENTINELS);
        assert_eq!(step.visible, "answer ");
        assert_eq!(
            step.state,
            StripState::PossibleSentinel {
                held: "<<<".into()
            }
        );
    }

    #[test]
    fn test_held_text_released_when_not_a_sentinel() {
        let state = StripState::PossibleSentinel {
            held: "<<".into(),
        };
        let step = feed(state, " is a shift", SENTINELS);
        assert_eq!(step.visible, "<< is a shift");
        assert_eq!(step.state, StripState::Scanning);
    }

    #[test]
    fn test_sentinel_completed_by_next_chunk() {
        let state = StripState::PossibleSentinel {
            held: "<<<S".into(),
        };
        let step = feed(state, "UP{\"topic\":", SENTINELS);
        assert_eq!(step.visible, "");
        assert_eq!(
            step.state,
            StripState::InsideMetadata {
                body: "{\"topic\":".into()
            }
        );
    }

    #[test]
    fn test_close_search_resumes_near_multibyte_tail() {
        let state = StripState::InsideMetadata {
            body: "{}éééé".into(),
        };
        let step = feed(state, "P>>>", SENTINELS);
        assert!(step.blocks.is_empty());
        let step = feed(step.state, "SUP>>>", SENTINELS);
        assert_eq!(step.blocks.len(), 1);
        assert_eq!(step.state, StripState::Scanning);
    }

    #[test]
    fn test_block_closed_across_chunks() {
        let state = StripState::InsideMetadata {
            body: "{}SUP".into(),
        };
        let step = feed(state, ">>> after", SENTINELS);
        assert_eq!(step.blocks, vec!["{}".to_string()]);
        assert_eq!(step.visible, " after");
        assert_eq!(step.state, StripState::Scanning);
    }

    #[test]
    fn test_whole_block_in_one_chunk() {
        let (visible, blocks) = run(["Before <<<SUP{\"subject\":\"math\"}SUP>>> after"]);
        assert_eq!(visible, "Before  after");
        assert_eq!(blocks, vec!["{\"subject\":\"math\"}".to_string()]);
    }

    #[test]
    fn test_finish_flushes_held_prefix() {
        let (visible, blocks) = run(["ends with <<<SU"]);
        assert_eq!(visible, "ends with <<<SU");
        assert!(blocks.is_empty());
    }

    #[test]
    fn test_finish_drops_unterminated_block() {
        let (visible, blocks) = run(["text <<<SUP{\"subject\":", "\"math\""]);
        assert_eq!(visible, "text ");
        assert!(blocks.is_empty());
    }

    #[test]
    fn test_oversized_block_released_as_text() {
        let filler = "keep reading, ".repeat(10);
        let mut chunks = vec!["Answer: <<<SUP not really metadata".to_string()];
        chunks.extend(std::iter::repeat_n(filler.clone(), 200));

        let mut state = StripState::Scanning;
        let mut visible = String::new();
        for chunk in &chunks {
            let step = feed(state, chunk, SENTINELS);
            visible.push_str(&step.visible);
            assert!(step.blocks.is_empty());
            state = step.state;
            if let StripState::InsideMetadata { body } = &state {
                assert!(body.len() <= SENTINELS.max_block_bytes);
            }
        }
        visible.push_str(&finish(state));

        assert!(visible.starts_with("Answer:  not really metadata"));
        assert!(visible.ends_with(&filler));
        assert_eq!(
            visible.len(),
            chunks.iter().map(String::len).sum::<usize>() - SENTINELS.open.len()
        );
    }

    #[test]
    fn test_block_after_released_block_is_still_stripped() {
        let long = "x".repeat(300);
        let (visible, blocks) = run([
            "a<<<SUP",
            long.as_str(),
            "b<<<SUP{\"topic\":\"fractions\"}SUP>>>c",
        ]);
        assert_eq!(visible, format!("a{long}bc"));
        assert_eq!(blocks, vec!["{\"topic\":\"fractions\"}".to_string()]);
    }

    #[test]
    fn test_close_split_across_many_small_chunks() {
        let (visible, blocks) = run(["<<<SUP{}", "S", "U", "P", ">", ">", ">", "tail"]);
        assert_eq!(visible, "tail");
        assert_eq!(blocks, vec!["{}".to_string()]);
    }

    #[test]
    fn test_multibyte_text_near_sentinel() {
        let (visible, _) = run(["héllo <", "<< wörld"]);
        assert_eq!(visible, "héllo <<< wörld");
    }

    #[test]
    fn test_parse_metadata() {
        let metadata =
            parse_metadata(r#" {"subject":"math","topic":"fractions","struggleFlag":true} "#)
                .expect("should parse");
        assert_eq!(metadata.subject.as_deref(), Some("math"));
        assert!(metadata.struggle_flag);
        assert!(metadata.activity_type.is_none());
        assert!(parse_metadata("not json").is_none());
    }

    #[test]
    fn test_every_single_split_point() {
        let text = "Fractions are parts.<<<SUP{\"topic\":\"fractions\"}SUP>>> Keep going!";
        for i in 0..=text.len() {
            let (visible, blocks) = run([&text[..i], &text[i..]]);
            assert_eq!(visible, "Fractions are parts. Keep going!", "split at {i}");
            assert_eq!(blocks.len(), 1, "split at {i}");
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        /// Sentinel content never leaks and the block is extracted exactly
        /// once, however the stream is chunked.
        #[test]
        fn prop_metadata_never_leaks(
            before in "[a-zA-Z <>.!é]{0,40}",
            after in "[a-zA-Z <>.!é]{0,40}",
            topic in "[a-z]{1,12}",
            points in prop::collection::vec(any::<usize>(), 0..12),
        ) {
            prop_assume!(!before.contains("<<<SUP") && !after.contains("<<<SUP"));

            let body = format!("{{\"topic\":\"{topic}\"}}");
            let text = format!("{before}<<<SUP{body}SUP>>>{after}");
            let chunks = split_at_all(&text, &points);

            let (visible, blocks) = run(chunks.iter().map(String::as_str));

            prop_assert_eq!(visible, format!("{before}{after}"));
            prop_assert_eq!(blocks, vec![body]);
        }
    }
}
