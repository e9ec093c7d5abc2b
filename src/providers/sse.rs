//! Incremental Server-Sent Events parsing shared by the HTTP adapters.

use std::collections::VecDeque;

use bytes::Bytes;
use futures_util::{StreamExt, stream::BoxStream};

use super::{ProviderError, ProviderEvent, ProviderEventStream};

/// Upper bound on a single buffered SSE line.
pub const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Splits a byte stream into complete lines and yields `data:` payloads.
///
/// Bytes are buffered until a newline arrives, so a UTF-8 sequence split
/// across network packets is decoded intact.
#[derive(Debug)]
pub struct SseLineBuffer {
    buffer: Vec<u8>,
    max_line_bytes: usize,
}

impl SseLineBuffer {
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_line_bytes,
        }
    }

    /// Append bytes and return the data payloads of every completed line.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>, ProviderError> {
        self.buffer.extend_from_slice(bytes);

        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(data) = data_payload(&line) {
                payloads.push(data);
            }
        }

        if self.buffer.len() > self.max_line_bytes {
            tracing::error!(
                buffer_size = self.buffer.len(),
                max_size = self.max_line_bytes,
                "SSE line exceeds buffer limit"
            );
            return Err(ProviderError::BufferOverflow);
        }

        Ok(payloads)
    }

    /// Payload of a trailing line that was never newline-terminated.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        data_payload(&rest)
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let data = line.trim().strip_prefix("data:")?.trim();
    (!data.is_empty() && data != "[DONE]").then(|| data.to_string())
}

/// Turns SSE data payloads into provider events.
pub trait SseEventParser: Send + 'static {
    /// Events carried by one payload. An `Err` ends the stream.
    fn parse(&mut self, data: &str) -> Result<Vec<ProviderEvent>, ProviderError>;

    /// Events to emit once the upstream body is exhausted.
    fn finish(&mut self) -> Vec<ProviderEvent> {
        Vec::new()
    }
}

struct EventStreamState<P> {
    bytes: BoxStream<'static, Result<Bytes, reqwest::Error>>,
    lines: SseLineBuffer,
    parser: P,
    pending: VecDeque<Result<ProviderEvent, ProviderError>>,
    finished: bool,
}

impl<P: SseEventParser> EventStreamState<P> {
    fn parse_payloads(&mut self, payloads: impl IntoIterator<Item = String>) {
        for data in payloads {
            match self.parser.parse(&data) {
                Ok(events) => self.pending.extend(events.into_iter().map(Ok)),
                Err(e) => {
                    self.pending.push_back(Err(e));
                    self.finished = true;
                    return;
                }
            }
        }
    }
}

/// Adapt a streaming HTTP response into provider events.
pub fn event_stream<P: SseEventParser>(response: reqwest::Response, parser: P) -> ProviderEventStream {
    let state = EventStreamState {
        bytes: response.bytes_stream().boxed(),
        lines: SseLineBuffer::new(MAX_LINE_BYTES),
        parser,
        pending: VecDeque::new(),
        finished: false,
    };

    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                if item.is_err() {
                    state.pending.clear();
                    state.finished = true;
                }
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => match state.lines.push(&chunk) {
                    Ok(payloads) => state.parse_payloads(payloads),
                    Err(e) => state.pending.push_back(Err(e)),
                },
                Some(Err(e)) => state.pending.push_back(Err(ProviderError::Request(e))),
                None => {
                    let rest = state.lines.finish();
                    state.parse_payloads(rest);
                    if !state.finished {
                        let trailing = state.parser.finish();
                        state.pending.extend(trailing.into_iter().map(Ok));
                    }
                    state.finished = true;
                }
            }
        }
    })
    .boxed()
}

/// Error message from a JSON error body, falling back to the raw text.
pub fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .or_else(|| v.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.chars().take(500).collect())
}

/// Fail on a non-success response, carrying the provider's error text.
pub async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::upstream(Some(status), error_message(&body)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_split_across_pushes() {
        let mut buf = SseLineBuffer::new(1024);
        assert!(buf.push(b"data: {\"a\"").unwrap().is_empty());
        assert_eq!(buf.push(b":1}\n\n").unwrap(), vec!["{\"a\":1}".to_string()]);
    }

    #[test]
    fn test_ignores_event_lines_comments_and_done() {
        let mut buf = SseLineBuffer::new(1024);
        let payloads = buf
            .push(b"event: ping\n: keepalive\ndata: x\n\ndata: [DONE]\n\n")
            .unwrap();
        assert_eq!(payloads, vec!["x".to_string()]);
    }

    #[test]
    fn test_multibyte_split_across_pushes() {
        let mut buf = SseLineBuffer::new(1024);
        let bytes = "data: héllo\n".as_bytes();
        let split = 8; // inside the two-byte 'é'
        assert!(buf.push(&bytes[..split]).unwrap().is_empty());
        assert_eq!(buf.push(&bytes[split..]).unwrap(), vec!["héllo".to_string()]);
    }

    #[test]
    fn test_crlf_and_unterminated_tail() {
        let mut buf = SseLineBuffer::new(1024);
        assert_eq!(buf.push(b"data: a\r\ndata: b").unwrap(), vec!["a".to_string()]);
        assert_eq!(buf.finish(), Some("b".to_string()));
        assert_eq!(buf.finish(), None);
    }

    #[test]
    fn test_overflow() {
        let mut buf = SseLineBuffer::new(8);
        assert!(matches!(
            buf.push(b"data: 0123456789"),
            Err(ProviderError::BufferOverflow)
        ));
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(
            error_message(r#"{"error":{"message":"bad key","type":"auth"}}"#),
            "bad key"
        );
        assert_eq!(error_message(r#"{"message":"overloaded"}"#), "overloaded");
        assert_eq!(error_message("plain text"), "plain text");
    }
}
