//! Wire models exchanged with the conversational-AI backend.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON payload carried by one `data: ` frame of the backend's event stream.
///
/// Unknown fields are ignored. A frame without `token` is valid and simply
/// contributes nothing to the accumulated message.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TokenEvent {
    /// Text fragment produced by the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Completion marker some backends attach to the last frame.
    /// Carried for callers; accumulation only ends with the stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done: Option<Value>,

    /// In-band failure reported by the backend mid-stream.
    /// Any JSON shape is accepted so the frame's token is never lost.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,

    /// In-band notice, e.g. a tool-call recursion limit being hit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<Value>,
}

impl TokenEvent {
    /// Whether the backend flagged this frame as the final one.
    pub fn is_done(&self) -> bool {
        match &self.done {
            Some(Value::Bool(done)) => *done,
            Some(Value::Null) | None => false,
            Some(_) => true,
        }
    }
}

/// Body of a chat request to the bots API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatPrompt {
    pub prompt: String,

    /// Free-form context forwarded with the prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
}

impl From<&str> for ChatPrompt {
    fn from(prompt: &str) -> Self {
        Self {
            prompt: prompt.to_string(),
            metadata: None,
        }
    }
}

/// Error envelope returned by the bots API on a non-success status.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendErrorResponse {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub detail: Option<Value>,
}

impl BackendErrorResponse {
    /// Human readable summary of the envelope.
    pub fn message(&self) -> String {
        let detail = match &self.detail {
            Some(Value::String(detail)) => detail.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        match &self.error {
            Some(error) if detail.is_empty() => error.clone(),
            Some(error) => format!("{}: {}", error, detail),
            None => detail,
        }
    }
}
