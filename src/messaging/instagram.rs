//! Instagram Direct messaging: webhook payloads and the Send API.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::post_message;
use crate::client::ClientError;
use crate::http::build_http_client;
use crate::options::TransportOptions;

const MESSAGES_PATH: &str = "me/messages";

/// Body of an Instagram messaging webhook.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InstagramWebhook {
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub entry: Vec<InstagramEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InstagramEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub messaging: Vec<MessagingEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagingEvent {
    pub sender: Participant,
    #[serde(default)]
    pub recipient: Option<Participant>,
    #[serde(default)]
    pub message: Option<InboundMessage>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Participant {
    pub id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InboundMessage {
    #[serde(default)]
    pub mid: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    /// Set on copies of messages the account itself sent
    #[serde(default)]
    pub is_echo: bool,
}

/// A text message a user sent to the account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingText<'a> {
    pub sender_id: &'a str,
    pub text: &'a str,
}

impl InstagramWebhook {
    /// The text of the first messaging event, if it is a user's text message.
    ///
    /// Only the first event of the first entry is considered. Echoes of the
    /// account's own replies are skipped so a reply never triggers another.
    pub fn first_text_message(&self) -> Option<IncomingText<'_>> {
        let event = self.entry.first()?.messaging.first()?;
        let message = event.message.as_ref()?;
        if message.is_echo {
            return None;
        }
        let text = message.text.as_deref()?;

        Some(IncomingText {
            sender_id: &event.sender.id,
            text,
        })
    }
}

#[derive(Debug, Serialize)]
struct OutboundText<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    recipient: Recipient<'a>,
    message: OutboundText<'a>,
    messaging_type: &'static str,
}

#[derive(Debug, Serialize)]
struct SenderActionRequest<'a> {
    recipient: Recipient<'a>,
    sender_action: &'static str,
}

#[derive(Debug, Serialize)]
struct Recipient<'a> {
    id: &'a str,
}

/// Instagram Send API client.
#[derive(Debug, Clone)]
pub struct InstagramClient {
    transport_options: TransportOptions,
    http_client: reqwest::Client,
}

impl InstagramClient {
    pub fn new(transport_options: TransportOptions) -> Result<Self, ClientError> {
        if transport_options.access_token.is_none() {
            return Err(ClientError::Config(
                "Instagram access token is required".to_string(),
            ));
        }
        let http_client = build_http_client(&transport_options)?;

        Ok(Self {
            transport_options,
            http_client,
        })
    }

    /// Reply to `user_id` with `text`.
    pub async fn send_text(&self, user_id: &str, text: &str) -> Result<(), ClientError> {
        let body = SendMessageRequest {
            recipient: Recipient { id: user_id },
            message: OutboundText { text },
            messaging_type: "RESPONSE",
        };
        post_message(&self.http_client, &self.transport_options, MESSAGES_PATH, &body).await?;
        info!(user_id, "instagram reply sent");
        Ok(())
    }

    /// Mark the conversation with `user_id` as seen.
    pub async fn mark_seen(&self, user_id: &str) -> Result<(), ClientError> {
        let body = SenderActionRequest {
            recipient: Recipient { id: user_id },
            sender_action: "mark_seen",
        };
        post_message(&self.http_client, &self.transport_options, MESSAGES_PATH, &body).await
    }
}
