use std::{
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use futures_util::stream::Stream;
use tokio::time::Sleep;

use crate::{observability::metrics, providers::ProviderError};

/// A stream wrapper that enforces an idle timeout between provider events.
///
/// If the inner stream yields nothing within `timeout`, the wrapper yields
/// [`ProviderError::IdleTimeout`] and terminates. The timer resets after
/// every item, so long generations that keep producing are never cut.
pub struct IdleTimeoutStream<S> {
    inner: S,
    timeout: Duration,
    sleep: Pin<Box<Sleep>>,
    terminated: bool,
}

impl<S> IdleTimeoutStream<S>
where
    S: Stream + Unpin,
{
    /// A zero `timeout` makes the wrapper a pass-through.
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self {
            inner,
            timeout,
            sleep: Box::pin(tokio::time::sleep(timeout)),
            terminated: false,
        }
    }
}

impl<S, T> Stream for IdleTimeoutStream<S>
where
    S: Stream<Item = Result<T, ProviderError>> + Unpin,
{
    type Item = Result<T, ProviderError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.terminated {
            return Poll::Ready(None);
        }

        if self.timeout.is_zero() {
            return Pin::new(&mut self.inner).poll_next(cx);
        }

        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(item))) => {
                let deadline = tokio::time::Instant::now() + self.timeout;
                self.sleep.as_mut().reset(deadline);
                Poll::Ready(Some(Ok(item)))
            }
            Poll::Ready(Some(Err(e))) => {
                self.terminated = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                self.terminated = true;
                Poll::Ready(None)
            }
            Poll::Pending => match self.sleep.as_mut().poll(cx) {
                Poll::Ready(()) => {
                    self.terminated = true;
                    tracing::warn!(
                        timeout_secs = self.timeout.as_secs(),
                        "Provider stream idle timeout - terminating stalled stream"
                    );
                    metrics::record_gateway_error("streaming", "idle_timeout", None);
                    Poll::Ready(Some(Err(ProviderError::IdleTimeout(self.timeout.as_secs()))))
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}
