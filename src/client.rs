//! Core backend trait and error types.

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::accumulator::AccumulateError;

/// Errors that can occur while talking to the AI backend or a messaging API.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Stream error: {0}")]
    Stream(#[from] AccumulateError<reqwest::Error>),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// A conversational backend that turns a prompt into a complete reply.
///
/// Webhook handlers depend on this trait rather than on a concrete client, so
/// any backend that can answer within a conversation can be plugged in.
///
/// # Example
/// ```rust,ignore
/// struct Echo;
///
/// #[async_trait]
/// impl ChatBackend for Echo {
///     async fn complete(
///         &self,
///         _conversation_id: &str,
///         prompt: &str,
///         _cancel: &CancellationToken,
///     ) -> Result<String, ClientError> {
///         Ok(prompt.to_string())
///     }
/// }
/// ```
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Send `prompt` within `conversation_id` and wait for the full answer.
    ///
    /// `cancel` aborts the wait, yielding [`AccumulateError::Cancelled`]
    /// wrapped in [`ClientError::Stream`].
    async fn complete(
        &self,
        conversation_id: &str,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ClientError>;
}
