//! Bots chat API client.
//!
//! `POST {base_url}/{bot_id}/chat/{conversation_id}` with `{"prompt": ...}`
//! answers with a `text/event-stream` of `{"token": ...}` frames, which are
//! accumulated into the reply.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::accumulator::{deadline, AccumulateError, StreamAccumulator};
use crate::client::{ChatBackend, ClientError};
use crate::http::{authorize, build_http_client};
use crate::model::{BackendErrorResponse, ChatPrompt};
use crate::options::TransportOptions;

/// Client for one bot of the bots chat API.
#[derive(Debug, Clone)]
pub struct BotsClient {
    bot_id: String,
    transport_options: TransportOptions,
    accumulator: StreamAccumulator,
    http_client: reqwest::Client,
}

impl BotsClient {
    /// Create a client for `bot_id`.
    ///
    /// `transport_options.timeout` should normally be left unset; the
    /// accumulator bounds how long a streamed reply may take.
    pub fn new(
        bot_id: impl Into<String>,
        transport_options: TransportOptions,
        accumulator: StreamAccumulator,
    ) -> Result<Self, ClientError> {
        let bot_id = bot_id.into();
        if bot_id.is_empty() {
            return Err(ClientError::Config("bot id must not be empty".to_string()));
        }
        let http_client = build_http_client(&transport_options)?;

        Ok(Self {
            bot_id,
            transport_options,
            accumulator,
            http_client,
        })
    }

    pub fn bot_id(&self) -> &str {
        &self.bot_id
    }

    fn chat_url(&self, conversation_id: &str) -> String {
        self.transport_options
            .endpoint(&format!("{}/chat/{}", self.bot_id, conversation_id))
    }

    /// Send a prompt with an explicit request body.
    ///
    /// The accumulator's timeout bounds the whole exchange, from sending the
    /// request to the end of the streamed body or error body.
    pub async fn send(
        &self,
        conversation_id: &str,
        body: &ChatPrompt,
        cancel: &CancellationToken,
    ) -> Result<String, ClientError> {
        let url = self.chat_url(conversation_id);
        debug!(url = %url, "sending prompt to backend");

        let req = self
            .http_client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "text/event-stream");
        let req = authorize(req, &self.transport_options).json(body);

        let started = Instant::now();
        let timeout = self.accumulator.timeout();
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Self::cancelled()),
            _ = deadline(started, timeout) => return Err(Self::timed_out(timeout)),
            response = req.send() => response?,
        };
        let status = response.status();

        if !status.is_success() {
            let body = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Self::cancelled()),
                _ = deadline(started, timeout) => return Err(Self::timed_out(timeout)),
                body = response.text() => body.unwrap_or_default(),
            };
            return Err(Self::handle_error_response(status, &body));
        }

        let reply = self
            .accumulator
            .accumulate_from(started, response.bytes_stream(), cancel)
            .await?;
        info!(
            bot_id = %self.bot_id,
            conversation_id,
            chars = reply.chars().count(),
            "backend reply complete"
        );
        Ok(reply)
    }

    fn cancelled() -> ClientError {
        AccumulateError::<reqwest::Error>::Cancelled.into()
    }

    fn timed_out(timeout: Option<Duration>) -> ClientError {
        AccumulateError::<reqwest::Error>::TimedOut(timeout.unwrap_or_default()).into()
    }

    /// Handle bots API error responses.
    fn handle_error_response(status: reqwest::StatusCode, body: &str) -> ClientError {
        match serde_json::from_str::<BackendErrorResponse>(body) {
            Ok(envelope) if envelope.error.is_some() || envelope.detail.is_some() => {
                ClientError::ProviderError(format!(
                    "Backend error ({}): {}",
                    status,
                    envelope.message()
                ))
            }
            _ => ClientError::ProviderError(format!("HTTP {}: {}", status, body)),
        }
    }
}

#[async_trait]
impl ChatBackend for BotsClient {
    async fn complete(
        &self,
        conversation_id: &str,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ClientError> {
        self.send(conversation_id, &ChatPrompt::from(prompt), cancel)
            .await
    }
}
