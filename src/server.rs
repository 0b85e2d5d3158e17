//! Webhook server.
//!
//! Each messaging platform gets a verification route (`GET`) and a delivery
//! route (`POST`) under `/webhooks/{platform}`. A delivered text message is
//! relayed to the chat backend and the accumulated answer is sent back to the
//! user on the same platform.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use itertools::Itertools;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::accumulator::StreamAccumulator;
use crate::client::{ChatBackend, ClientError};
use crate::config::Config;
use crate::conversations::ConversationStore;
use crate::messaging::instagram::InstagramWebhook;
use crate::messaging::whatsapp::WhatsAppWebhook;
use crate::messaging::{InstagramClient, WhatsAppClient};
use crate::options::{SecretString, TransportOptions};
use crate::providers::BotsClient;

const INSTAGRAM_PATH: &str = "/webhooks/instagram";
const WHATSAPP_PATH: &str = "/webhooks/whatsapp";

/// Any failure while handling a webhook. Rendered as `500`.
#[derive(Debug)]
pub struct Error(ClientError);

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        error!("webhook handling failed: {}", self.0);
        (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL SERVER ERROR").into_response()
    }
}

impl<E> From<E> for Error
where
    E: Into<ClientError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

/// Forwards user messages to the chat backend within their conversation.
#[derive(Clone)]
pub struct Relay {
    backend: Arc<dyn ChatBackend>,
    conversations: Arc<ConversationStore>,
    shutdown: CancellationToken,
}

impl Relay {
    /// `shutdown` is the server's root token; cancelling it aborts every
    /// in-flight backend call.
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        conversations: Arc<ConversationStore>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            backend,
            conversations,
            shutdown,
        }
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    /// Ask the backend to answer `text` from the user known as `user_key`.
    pub async fn reply(&self, user_key: &str, text: &str) -> Result<String, ClientError> {
        let conversation_id = self.conversations.get_or_assign(user_key);
        debug!(user_key, conversation_id = %conversation_id, "relaying message");

        let cancel = self.shutdown.child_token();
        self.backend.complete(&conversation_id, text, &cancel).await
    }
}

/// State of one platform's routes.
#[derive(Clone)]
struct Channel<C> {
    relay: Relay,
    client: C,
    verify_token: SecretString,
}

/// Everything the router needs. Platforms left unset get no routes.
#[derive(Clone)]
pub struct AppState {
    relay: Relay,
    instagram: Option<(InstagramClient, SecretString)>,
    whatsapp: Option<(WhatsAppClient, SecretString)>,
}

impl AppState {
    pub fn new(relay: Relay) -> Self {
        Self {
            relay,
            instagram: None,
            whatsapp: None,
        }
    }

    pub fn with_instagram(mut self, client: InstagramClient, verify_token: SecretString) -> Self {
        self.instagram = Some((client, verify_token));
        self
    }

    pub fn with_whatsapp(mut self, client: WhatsAppClient, verify_token: SecretString) -> Self {
        self.whatsapp = Some((client, verify_token));
        self
    }

    /// Build the backend client, conversation store and platform clients
    /// described by `config`.
    pub fn from_config(config: &Config, shutdown: CancellationToken) -> Result<Self, ClientError> {
        let invalid = |e: crate::config::ConfigError| ClientError::Config(e.to_string());

        let mut accumulator = StreamAccumulator::new();
        if let Some(timeout) = config.stream_timeout() {
            accumulator = accumulator.with_timeout(timeout);
        }
        let backend = BotsClient::new(
            config.bot_id(),
            transport_options(config, &config.backend_base_url),
            accumulator,
        )?;
        let conversations = ConversationStore::new(
            config.conversation_pool().map_err(invalid)?,
            config.conversation_capacity().map_err(invalid)?,
        );
        let relay = Relay::new(Arc::new(backend), Arc::new(conversations), shutdown);
        let mut state = Self::new(relay);

        let graph = |access_token: SecretString| {
            transport_options(config, &config.graph_api_base_url)
                .with_access_token(access_token)
                .with_timeout(config.http_timeout())
        };
        if let Some(credentials) = config.instagram().map_err(invalid)? {
            let client = InstagramClient::new(graph(credentials.access_token))?;
            state = state.with_instagram(client, credentials.verify_token);
        }
        if let Some(credentials) = config.whatsapp().map_err(invalid)? {
            let client = WhatsAppClient::new(graph(credentials.access_token))?;
            state = state.with_whatsapp(client, credentials.verify_token);
        }
        Ok(state)
    }

    /// Names of the platforms that have routes.
    pub fn channels(&self) -> Vec<&'static str> {
        let mut channels = Vec::new();
        if self.instagram.is_some() {
            channels.push("instagram");
        }
        if self.whatsapp.is_some() {
            channels.push("whatsapp");
        }
        channels
    }
}

/// Options shared by every outbound client: base URL plus the configured proxy.
fn transport_options(config: &Config, base_url: &str) -> TransportOptions {
    let options = TransportOptions::new(base_url);
    match &config.http_proxy {
        Some(proxy) => options.with_proxy(proxy.clone()),
        None => options,
    }
}

/// This function creates the server's router.
pub fn router(state: AppState) -> Router {
    let banner = health_banner(&state.channels());
    let mut router = Router::new().route(
        "/",
        get(move || {
            let banner = banner.clone();
            async move { banner }
        }),
    );

    if let Some((client, verify_token)) = state.instagram {
        let channel = Channel {
            relay: state.relay.clone(),
            client,
            verify_token,
        };
        router = router.merge(
            Router::new()
                .route(
                    INSTAGRAM_PATH,
                    get(verify_subscription::<InstagramClient>).post(instagram_webhook),
                )
                .with_state(channel),
        );
    }

    if let Some((client, verify_token)) = state.whatsapp {
        let channel = Channel {
            relay: state.relay.clone(),
            client,
            verify_token,
        };
        router = router.merge(
            Router::new()
                .route(
                    WHATSAPP_PATH,
                    get(verify_subscription::<WhatsAppClient>).post(whatsapp_webhook),
                )
                .with_state(channel),
        );
    }

    router.layer(TraceLayer::new_for_http())
}

fn health_banner(channels: &[&str]) -> String {
    if channels.is_empty() {
        "botrelay is running (no channels configured)".to_string()
    } else {
        format!("botrelay is running (channels: {})", channels.iter().join(", "))
    }
}

/// Query parameters of Meta's subscription handshake.
#[derive(Debug, Default, Deserialize)]
struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

async fn verify_subscription<C>(
    State(channel): State<Channel<C>>,
    Query(query): Query<VerifyQuery>,
) -> Response
where
    C: Clone + Send + Sync + 'static,
{
    let subscribed = query.mode.as_deref() == Some("subscribe")
        && query.verify_token.as_deref() == Some(channel.verify_token.expose_secret());

    match (subscribed, query.challenge) {
        (true, Some(challenge)) => {
            info!("webhook subscription verified");
            (StatusCode::OK, challenge).into_response()
        }
        _ => {
            warn!(mode = ?query.mode, "webhook verification rejected");
            StatusCode::FORBIDDEN.into_response()
        }
    }
}

async fn instagram_webhook(
    State(channel): State<Channel<InstagramClient>>,
    Json(payload): Json<InstagramWebhook>,
) -> Result<StatusCode, Error> {
    let Some(message) = payload.first_text_message() else {
        debug!("instagram event without text ignored");
        return Ok(StatusCode::OK);
    };

    channel.client.mark_seen(message.sender_id).await?;
    let reply = channel
        .relay
        .reply(&format!("instagram:{}", message.sender_id), message.text)
        .await?;
    if reply.is_empty() {
        warn!(sender_id = message.sender_id, "backend returned an empty reply");
        return Ok(StatusCode::OK);
    }
    channel.client.send_text(message.sender_id, &reply).await?;

    Ok(StatusCode::OK)
}

async fn whatsapp_webhook(
    State(channel): State<Channel<WhatsAppClient>>,
    Json(payload): Json<WhatsAppWebhook>,
) -> Result<StatusCode, Error> {
    let Some(message) = payload.first_text_message() else {
        debug!("whatsapp change without a text message ignored");
        return Ok(StatusCode::OK);
    };

    channel
        .client
        .mark_read(message.phone_number_id, message.message_id)
        .await?;
    let reply = channel
        .relay
        .reply(&format!("whatsapp:{}", message.from), message.body)
        .await?;
    if reply.is_empty() {
        warn!(from = message.from, "backend returned an empty reply");
        return Ok(StatusCode::OK);
    }
    channel
        .client
        .send_text(
            message.phone_number_id,
            message.from,
            &reply,
            Some(message.message_id),
        )
        .await?;

    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use nonempty::nonempty;
    use serde_json::json;
    use std::num::NonZeroUsize;
    use std::sync::Mutex;
    use tower::ServiceExt;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Answers every prompt with a fixed reply and records what it was asked.
    struct ScriptedBackend {
        reply: Result<String, String>,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedBackend {
        fn answering(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.to_string()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn failing(message: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Err(message.to_string()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn complete(
            &self,
            conversation_id: &str,
            prompt: &str,
            _cancel: &CancellationToken,
        ) -> Result<String, ClientError> {
            self.calls
                .lock()
                .unwrap()
                .push((conversation_id.to_string(), prompt.to_string()));
            self.reply.clone().map_err(ClientError::ProviderError)
        }
    }

    fn relay(backend: Arc<ScriptedBackend>) -> Relay {
        let store = ConversationStore::new(nonempty!["conv-a".to_string()], NonZeroUsize::new(8).unwrap());
        Relay::new(backend, Arc::new(store), CancellationToken::new())
    }

    fn graph_options(server: &MockServer) -> TransportOptions {
        TransportOptions::new(server.uri()).with_access_token("page-token")
    }

    fn instagram_app(backend: Arc<ScriptedBackend>, server: &MockServer) -> Router {
        let client = InstagramClient::new(graph_options(server)).unwrap();
        router(AppState::new(relay(backend)).with_instagram(client, SecretString::from("ig-verify")))
    }

    fn whatsapp_app(backend: Arc<ScriptedBackend>, server: &MockServer) -> Router {
        let client = WhatsAppClient::new(graph_options(server)).unwrap();
        router(AppState::new(relay(backend)).with_whatsapp(client, SecretString::from("wa-verify")))
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn instagram_text(sender: &str, text: &str) -> serde_json::Value {
        json!({
            "object": "instagram",
            "entry": [{"id": "page", "messaging": [
                {"sender": {"id": sender}, "recipient": {"id": "page"}, "message": {"mid": "m1", "text": text}}
            ]}]
        })
    }

    #[tokio::test]
    async fn test_health_lists_channels() {
        let server = MockServer::start().await;
        let response = instagram_app(ScriptedBackend::answering("x"), &server)
            .oneshot(get_request("/"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_text(response).await,
            "botrelay is running (channels: instagram)"
        );
    }

    #[test]
    fn test_health_banner_without_channels() {
        assert_eq!(
            health_banner(&[]),
            "botrelay is running (no channels configured)"
        );
        assert_eq!(
            health_banner(&["instagram", "whatsapp"]),
            "botrelay is running (channels: instagram, whatsapp)"
        );
    }

    #[tokio::test]
    async fn test_verification_echoes_challenge() {
        let server = MockServer::start().await;
        let response = instagram_app(ScriptedBackend::answering("x"), &server)
            .oneshot(get_request(
                "/webhooks/instagram?hub.mode=subscribe&hub.verify_token=ig-verify&hub.challenge=1158201444",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "1158201444");
    }

    #[tokio::test]
    async fn test_verification_rejects_bad_requests() {
        let server = MockServer::start().await;
        let app = whatsapp_app(ScriptedBackend::answering("x"), &server);

        for uri in [
            "/webhooks/whatsapp?hub.mode=subscribe&hub.verify_token=wrong&hub.challenge=1",
            "/webhooks/whatsapp?hub.mode=unsubscribe&hub.verify_token=wa-verify&hub.challenge=1",
            "/webhooks/whatsapp?hub.mode=subscribe&hub.verify_token=wa-verify",
            "/webhooks/whatsapp",
        ] {
            let response = app.clone().oneshot(get_request(uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::FORBIDDEN, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_unconfigured_platform_has_no_routes() {
        let server = MockServer::start().await;
        let response = instagram_app(ScriptedBackend::answering("x"), &server)
            .oneshot(post_json("/webhooks/whatsapp", json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_instagram_message_is_relayed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/me/messages"))
            .and(body_json(json!({"recipient": {"id": "u1"}, "sender_action": "mark_seen"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/me/messages"))
            .and(body_json(json!({
                "recipient": {"id": "u1"},
                "message": {"text": "pong"},
                "messaging_type": "RESPONSE"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let backend = ScriptedBackend::answering("pong");
        let response = instagram_app(backend.clone(), &server)
            .oneshot(post_json("/webhooks/instagram", instagram_text("u1", "ping")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            backend.calls(),
            vec![("conv-a".to_string(), "ping".to_string())]
        );
    }

    #[tokio::test]
    async fn test_instagram_event_without_text_is_acknowledged() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let backend = ScriptedBackend::answering("pong");
        let response = instagram_app(backend.clone(), &server)
            .oneshot(post_json(
                "/webhooks/instagram",
                json!({"entry": [{"messaging": [{"sender": {"id": "u1"}, "read": {"mid": "m1"}}]}]}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_backend_failure_is_500() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_json(json!({"recipient": {"id": "u1"}, "sender_action": "mark_seen"})))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_json(json!({
                "recipient": {"id": "u1"},
                "message": {"text": "pong"},
                "messaging_type": "RESPONSE"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let response = instagram_app(ScriptedBackend::failing("backend down"), &server)
            .oneshot(post_json("/webhooks/instagram", instagram_text("u1", "ping")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_graph_failure_is_500() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"message": "bad token", "type": "OAuthException", "code": 190}
            })))
            .mount(&server)
            .await;

        let backend = ScriptedBackend::answering("pong");
        let response = instagram_app(backend.clone(), &server)
            .oneshot(post_json("/webhooks/instagram", instagram_text("u1", "ping")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_whatsapp_message_is_relayed_as_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pn-1/messages"))
            .and(body_json(json!({
                "messaging_product": "whatsapp",
                "status": "read",
                "message_id": "wamid.1"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/pn-1/messages"))
            .and(body_json(json!({
                "messaging_product": "whatsapp",
                "to": "15551234567",
                "text": {"body": "hola!"},
                "context": {"message_id": "wamid.1"}
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let backend = ScriptedBackend::answering("hola!");
        let response = whatsapp_app(backend.clone(), &server)
            .oneshot(post_json(
                "/webhooks/whatsapp",
                json!({
                    "object": "whatsapp_business_account",
                    "entry": [{"id": "waba", "changes": [{"field": "messages", "value": {
                        "messaging_product": "whatsapp",
                        "metadata": {"display_phone_number": "15550000000", "phone_number_id": "pn-1"},
                        "messages": [{"from": "15551234567", "id": "wamid.1", "type": "text", "text": {"body": "hola"}}]
                    }}]}]
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            backend.calls(),
            vec![("conv-a".to_string(), "hola".to_string())]
        );
    }

    #[tokio::test]
    async fn test_whatsapp_status_update_is_acknowledged() {
        let server = MockServer::start().await;
        let backend = ScriptedBackend::answering("x");
        let response = whatsapp_app(backend.clone(), &server)
            .oneshot(post_json(
                "/webhooks/whatsapp",
                json!({"entry": [{"changes": [{"value": {
                    "metadata": {"phone_number_id": "pn-1"},
                    "statuses": [{"id": "wamid.1", "status": "read"}]
                }}]}]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(backend.calls().is_empty());
    }

    fn config_with(extra: &[&str]) -> Config {
        use clap::Parser;

        let args = [
            "botrelay",
            "--backend-base-url",
            "http://backend/api/v1/bots",
            "--bot-id",
            "bot-1",
            "--conversation-ids",
            "c1",
        ];
        Config::try_parse_from(args.iter().chain(extra.iter()).copied()).unwrap()
    }

    #[test]
    fn test_transport_options_carry_proxy() {
        let config = config_with(&["--http-proxy", "http://proxy.internal:3128"]);
        let options = transport_options(&config, "http://backend/");
        assert_eq!(options.base_url, "http://backend");
        assert_eq!(options.proxy.as_deref(), Some("http://proxy.internal:3128"));

        let options = transport_options(&config_with(&[]), "http://backend");
        assert_eq!(options.proxy, None);
    }

    #[test]
    fn test_from_config_with_proxy_builds_clients() {
        let config = config_with(&[
            "--http-proxy",
            "http://proxy.internal:3128",
            "--whatsapp-access-token",
            "wa-access",
            "--whatsapp-verify-token",
            "wa-verify",
        ]);
        let state = AppState::from_config(&config, CancellationToken::new()).unwrap();
        assert_eq!(state.channels(), vec!["whatsapp"]);
    }

    #[tokio::test]
    async fn test_relay_keeps_users_in_their_conversation() {
        let backend = ScriptedBackend::answering("ok");
        let store = ConversationStore::new(
            nonempty!["c1".to_string(), "c2".to_string(), "c3".to_string()],
            NonZeroUsize::new(8).unwrap(),
        );
        let relay = Relay::new(backend.clone(), Arc::new(store), CancellationToken::new());

        relay.reply("instagram:u1", "one").await.unwrap();
        relay.reply("instagram:u1", "two").await.unwrap();

        let calls = backend.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, calls[1].0);
        assert_eq!(
            relay.conversations().peek("instagram:u1"),
            Some(calls[0].0.clone())
        );
    }
}
