//! Accumulates a streamed chat answer into one message.
//!
//! Every caller that talks to the backend funnels its response body through
//! [`StreamAccumulator`], so there is exactly one place that knows how the
//! token stream is framed.

use std::time::Duration;

use futures::{Stream, StreamExt};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::sse::sse_tokens;

/// Reasons an accumulation ends without a message.
///
/// Malformed frames are never an error; they are skipped.
#[derive(Error, Debug)]
pub enum AccumulateError<E> {
    /// Reading from the underlying transport failed. Any partial text is discarded.
    #[error("stream transport error: {0}")]
    Transport(#[source] E),

    #[error("stream cancelled")]
    Cancelled,

    #[error("stream did not finish within {0:?}")]
    TimedOut(Duration),
}

/// Concatenates the `token` of every frame of an SSE byte stream, in
/// arrival order, until the stream ends.
///
/// # Example
/// ```
/// use botrelay::accumulator::StreamAccumulator;
/// use futures::stream;
/// use tokio_util::sync::CancellationToken;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let body = stream::iter(vec![Ok::<_, std::io::Error>(
///     "data: {\"token\":\"A\"}\ndata: {\"token\":\"B\"}\n",
/// )]);
/// let text = StreamAccumulator::new()
///     .accumulate(body, &CancellationToken::new())
///     .await
///     .unwrap();
/// assert_eq!(text, "AB");
/// # });
/// ```
#[derive(Debug, Clone, Default)]
pub struct StreamAccumulator {
    timeout: Option<Duration>,
}

impl StreamAccumulator {
    /// An accumulator that waits for the stream for as long as it takes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Give up once `timeout` has elapsed since the accumulation started,
    /// or since the instant passed to [`StreamAccumulator::accumulate_from`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Consume `byte_stream` and return the accumulated message.
    ///
    /// Returns early with [`AccumulateError::Cancelled`] when `cancel` fires
    /// and with [`AccumulateError::TimedOut`] when the configured timeout
    /// elapses first.
    pub async fn accumulate<S, B, E>(
        &self,
        byte_stream: S,
        cancel: &CancellationToken,
    ) -> Result<String, AccumulateError<E>>
    where
        S: Stream<Item = Result<B, E>> + Send,
        B: AsRef<[u8]> + Send,
        E: Send,
    {
        self.accumulate_from(Instant::now(), byte_stream, cancel)
            .await
    }

    /// Like [`StreamAccumulator::accumulate`], with the timeout counted from
    /// `started` so time already spent on the request is included.
    pub async fn accumulate_from<S, B, E>(
        &self,
        started: Instant,
        byte_stream: S,
        cancel: &CancellationToken,
    ) -> Result<String, AccumulateError<E>>
    where
        S: Stream<Item = Result<B, E>> + Send,
        B: AsRef<[u8]> + Send,
        E: Send,
    {
        self.collect(started, sse_tokens(byte_stream), cancel).await
    }

    /// Concatenate an already-decoded token stream.
    pub async fn accumulate_tokens<T, E>(
        &self,
        tokens: T,
        cancel: &CancellationToken,
    ) -> Result<String, AccumulateError<E>>
    where
        T: Stream<Item = Result<String, E>>,
    {
        self.collect(Instant::now(), tokens, cancel).await
    }

    async fn collect<T, E>(
        &self,
        started: Instant,
        tokens: T,
        cancel: &CancellationToken,
    ) -> Result<String, AccumulateError<E>>
    where
        T: Stream<Item = Result<String, E>>,
    {
        tokio::pin!(tokens);

        let timeout = self.timeout;
        let deadline = deadline(started, timeout);
        tokio::pin!(deadline);

        let mut message = String::new();
        let mut frames = 0usize;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AccumulateError::Cancelled),
                _ = &mut deadline => {
                    return Err(AccumulateError::TimedOut(timeout.unwrap_or_default()));
                }
                next = tokens.next() => match next {
                    Some(Ok(token)) => {
                        frames += 1;
                        message.push_str(&token);
                    }
                    Some(Err(e)) => return Err(AccumulateError::Transport(e)),
                    None => break,
                },
            }
        }

        debug!(frames, chars = message.chars().count(), "token stream finished");
        Ok(message)
    }
}

/// Completes `timeout` after `started`, or never when there is no timeout.
pub(crate) async fn deadline(started: Instant, timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep_until(started + timeout).await,
        None => std::future::pending::<()>().await,
    }
}
