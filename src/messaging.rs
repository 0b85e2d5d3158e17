//! Messaging platform clients built on the Graph API.
//!
//! Both Instagram Direct and the WhatsApp Cloud API deliver replies by
//! POSTing JSON to a `.../messages` edge with a bearer token.

pub mod instagram;
pub mod whatsapp;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::ClientError;
use crate::http::authorize;
use crate::options::TransportOptions;

// Re-export for convenience
pub use instagram::InstagramClient;
pub use whatsapp::WhatsAppClient;

/// POST `body` to `path` under the Graph API base URL.
pub(crate) async fn post_message<T: Serialize + ?Sized>(
    http_client: &reqwest::Client,
    transport_options: &TransportOptions,
    path: &str,
    body: &T,
) -> Result<(), ClientError> {
    let url = transport_options.endpoint(path);
    let req = authorize(http_client.post(&url), transport_options).json(body);

    let response = req.send().await?;
    let status = response.status();

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(handle_error_response(status, &body));
    }

    debug!(url = %url, status = status.as_u16(), "graph request accepted");
    Ok(())
}

/// Handle Graph API error responses.
fn handle_error_response(status: reqwest::StatusCode, body: &str) -> ClientError {
    if let Ok(error_resp) = serde_json::from_str::<GraphErrorResponse>(body) {
        ClientError::ProviderError(format!(
            "Graph API error ({}, code {}): {}",
            error_resp.error.error_type.as_deref().unwrap_or("unknown"),
            error_resp.error.code.unwrap_or_default(),
            error_resp.error.message
        ))
    } else {
        ClientError::ProviderError(format!("HTTP {}: {}", status, body))
    }
}

#[derive(Debug, Clone, Deserialize)]
struct GraphErrorResponse {
    error: GraphError,
}

#[derive(Debug, Clone, Deserialize)]
struct GraphError {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
    code: Option<i64>,
}
