//! WhatsApp Cloud API messaging: webhook payloads and the messages edge.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::post_message;
use crate::client::ClientError;
use crate::http::build_http_client;
use crate::options::TransportOptions;

const MESSAGING_PRODUCT: &str = "whatsapp";

/// Body of a WhatsApp Business Account webhook.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WhatsAppWebhook {
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub entry: Vec<WhatsAppEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WhatsAppEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub changes: Vec<Change>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Change {
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub value: ChangeValue,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChangeValue {
    #[serde(default)]
    pub metadata: Option<Metadata>,
    #[serde(default)]
    pub messages: Vec<InboundMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub display_phone_number: Option<String>,
    pub phone_number_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    pub from: String,
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub text: Option<TextBody>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TextBody {
    pub body: String,
}

/// A text message a user sent to the business number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingText<'a> {
    /// Business number that received the message; replies go out from it
    pub phone_number_id: &'a str,
    /// Sender's WhatsApp id
    pub from: &'a str,
    pub message_id: &'a str,
    pub body: &'a str,
}

impl WhatsAppWebhook {
    /// The first message of the first change, if it is a text message.
    ///
    /// Status updates (sent, delivered, read) carry no `messages` and yield
    /// nothing.
    pub fn first_text_message(&self) -> Option<IncomingText<'_>> {
        let value = &self.entry.first()?.changes.first()?.value;
        let message = value.messages.first()?;
        if message.message_type != "text" {
            return None;
        }

        Some(IncomingText {
            phone_number_id: &value.metadata.as_ref()?.phone_number_id,
            from: &message.from,
            message_id: &message.id,
            body: &message.text.as_ref()?.body,
        })
    }
}

#[derive(Debug, Serialize)]
struct SendTextRequest<'a> {
    messaging_product: &'static str,
    to: &'a str,
    text: OutboundText<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<ReplyContext<'a>>,
}

#[derive(Debug, Serialize)]
struct OutboundText<'a> {
    body: &'a str,
}

#[derive(Debug, Serialize)]
struct ReplyContext<'a> {
    message_id: &'a str,
}

#[derive(Debug, Serialize)]
struct MarkReadRequest<'a> {
    messaging_product: &'static str,
    status: &'static str,
    message_id: &'a str,
}

/// WhatsApp Cloud API client.
#[derive(Debug, Clone)]
pub struct WhatsAppClient {
    transport_options: TransportOptions,
    http_client: reqwest::Client,
}

impl WhatsAppClient {
    pub fn new(transport_options: TransportOptions) -> Result<Self, ClientError> {
        if transport_options.access_token.is_none() {
            return Err(ClientError::Config(
                "WhatsApp access token is required".to_string(),
            ));
        }
        let http_client = build_http_client(&transport_options)?;

        Ok(Self {
            transport_options,
            http_client,
        })
    }

    /// Send `body` to `to` from the business number `phone_number_id`.
    ///
    /// With `reply_to` set the message is shown as a reply to that message.
    pub async fn send_text(
        &self,
        phone_number_id: &str,
        to: &str,
        body: &str,
        reply_to: Option<&str>,
    ) -> Result<(), ClientError> {
        let request = SendTextRequest {
            messaging_product: MESSAGING_PRODUCT,
            to,
            text: OutboundText { body },
            context: reply_to.map(|message_id| ReplyContext { message_id }),
        };
        post_message(
            &self.http_client,
            &self.transport_options,
            &messages_path(phone_number_id),
            &request,
        )
        .await?;
        info!(to, "whatsapp reply sent");
        Ok(())
    }

    /// Mark `message_id` as read, which also shows the blue ticks to the sender.
    pub async fn mark_read(&self, phone_number_id: &str, message_id: &str) -> Result<(), ClientError> {
        let request = MarkReadRequest {
            messaging_product: MESSAGING_PRODUCT,
            status: "read",
            message_id,
        };
        post_message(
            &self.http_client,
            &self.transport_options,
            &messages_path(phone_number_id),
            &request,
        )
        .await
    }
}

fn messages_path(phone_number_id: &str) -> String {
    format!("{}/messages", phone_number_id)
}
