//! Server-Sent Events framing for the backend's token stream.
//!
//! The backend answers a chat request with newline-delimited frames:
//! ```text
//! event: ping
//! data: {"token": "Hel"}
//! data: {"token": "lo"}
//! ```
//!
//! Only `data: ` lines are meaningful. There is no end-of-stream sentinel;
//! the stream is complete when the transport closes.

use std::collections::VecDeque;

use futures::stream::{self, Stream, StreamExt};
use tracing::{debug, trace, warn};

use crate::model::TokenEvent;

const DATA_PREFIX: &str = "data: ";

/// Extension trait for `reqwest::Response` to read the body as a token stream.
///
/// # Example
/// ```ignore
/// use botrelay::sse::SSEResponseExt;
///
/// let response = client.post(url).send().await?;
/// let mut tokens = response.sse_tokens();
/// while let Some(token) = tokens.next().await {
///     print!("{}", token?);
/// }
/// ```
pub trait SSEResponseExt {
    /// Convert the response body into a stream of `token` values.
    fn sse_tokens(self) -> impl Stream<Item = Result<String, reqwest::Error>> + Send;
}

impl SSEResponseExt for reqwest::Response {
    fn sse_tokens(self) -> impl Stream<Item = Result<String, reqwest::Error>> + Send {
        sse_tokens(self.bytes_stream())
    }
}

/// Turn a byte stream of SSE frames into the stream of tokens it carries.
///
/// Chunk boundaries may fall anywhere, including inside a line or inside a
/// multi-byte character. Transport errors are forwarded as they occur.
pub fn sse_tokens<S, B, E>(byte_stream: S) -> impl Stream<Item = Result<String, E>> + Send
where
    S: Stream<Item = Result<B, E>> + Send,
    B: AsRef<[u8]> + Send,
    E: Send,
{
    stream::unfold(
        (Box::pin(byte_stream), LineBuffer::default(), VecDeque::new(), false),
        |(mut byte_stream, mut lines, mut pending, mut stream_ended)| async move {
            loop {
                if let Some(token) = pending.pop_front() {
                    return Some((Ok(token), (byte_stream, lines, pending, stream_ended)));
                }

                if stream_ended {
                    return None;
                }

                match byte_stream.next().await {
                    Some(Ok(chunk)) => {
                        for line in lines.push(chunk.as_ref()) {
                            pending.extend(token_from_line(&line));
                        }
                    }
                    Some(Err(e)) => {
                        return Some((Err(e), (byte_stream, lines, pending, stream_ended)));
                    }
                    None => {
                        // The last frame may lack its trailing newline
                        stream_ended = true;
                        if let Some(line) = lines.finish() {
                            pending.extend(token_from_line(&line));
                        }
                    }
                }
            }
        },
    )
}

/// Longest partial line held while waiting for its newline.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Byte buffer that yields complete lines.
///
/// Bytes are held until a `\n` arrives, so a UTF-8 sequence split across
/// chunks is decoded only once it is whole. A trailing `\r` is dropped.
/// A partial line that grows past the limit is dropped up to its newline.
#[derive(Debug)]
pub struct LineBuffer {
    buf: Vec<u8>,
    /// Bytes of `buf` already known to hold no newline
    scanned: usize,
    max_line: usize,
    discarding: bool,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl LineBuffer {
    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buf: Vec::new(),
            scanned: 0,
            max_line,
            discarding: false,
        }
    }

    /// Append a chunk and return every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut chunk = chunk;
        if self.discarding {
            match chunk.iter().position(|b| *b == b'\n') {
                Some(pos) => {
                    self.discarding = false;
                    chunk = &chunk[pos + 1..];
                }
                None => return Vec::new(),
            }
        }
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        let mut from = self.scanned;
        while let Some(pos) = self.buf[from..].iter().position(|b| *b == b'\n') {
            let end = from + pos;
            lines.push(decode_line(&self.buf[start..end]));
            start = end + 1;
            from = start;
        }
        self.buf.drain(..start);

        if self.buf.len() > self.max_line {
            warn!(bytes = self.buf.len(), "dropping oversized SSE line");
            self.buf.clear();
            self.discarding = true;
        }
        self.scanned = self.buf.len();

        lines
    }

    /// Take whatever is left as a final, unterminated line.
    pub fn finish(&mut self) -> Option<String> {
        self.scanned = 0;
        if std::mem::take(&mut self.discarding) || self.buf.is_empty() {
            self.buf.clear();
            return None;
        }
        let line = decode_line(&self.buf);
        self.buf.clear();
        Some(line)
    }

    /// Number of bytes waiting for a newline.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// Parse an SSE line to extract the data portion.
///
/// # Example
/// ```
/// use botrelay::sse::parse_sse_line;
///
/// assert_eq!(parse_sse_line("data: {\"token\":\"a\"}"), Some("{\"token\":\"a\"}"));
/// assert_eq!(parse_sse_line("event: ping"), None);
/// ```
pub fn parse_sse_line(line: &str) -> Option<&str> {
    line.strip_prefix(DATA_PREFIX)
}

/// Extract the `token` carried by one line, if any.
///
/// Lines without the `data: ` prefix and frames that are not a JSON object
/// with a string `token` yield nothing.
pub fn token_from_line(line: &str) -> Option<String> {
    let Some(data) = parse_sse_line(line) else {
        if !line.is_empty() {
            trace!(line, "ignoring non-data SSE line");
        }
        return None;
    };

    match serde_json::from_str::<TokenEvent>(data) {
        Ok(event) => {
            if let Some(error) = &event.error {
                warn!(error = %error, "backend reported an error mid-stream");
            }
            if let Some(warning) = &event.warning {
                warn!(warning = %warning, "backend warning");
            }
            event.token
        }
        Err(e) => {
            debug!(error = %e, data, "skipping malformed SSE frame");
            None
        }
    }
}
