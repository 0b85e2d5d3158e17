use std::num::NonZeroUsize;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use dotenvy::dotenv;
use nonempty::NonEmpty;
use thiserror::Error;

use crate::options::SecretString;

/// Default Graph API base URL used when `GRAPH_API_BASE_URL` is not set.
pub const DEFAULT_GRAPH_API_BASE_URL: &str = "https://graph.facebook.com/v18.0";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("bot id must not be empty")]
    EmptyBotId,

    #[error("at least one conversation id is required")]
    EmptyConversationPool,

    #[error("conversation capacity must be greater than zero")]
    ZeroCapacity,

    #[error("{0} needs both an access token and a verify token")]
    IncompleteChannel(&'static str),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Credentials for one messaging platform.
#[derive(Clone, Debug)]
pub struct ChannelCredentials {
    pub access_token: SecretString,
    pub verify_token: SecretString,
}

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// The host interface to listen for incoming connections
    #[arg(short, long, env, default_value = "127.0.0.1")]
    pub interface: String,

    /// The host TCP port to listen for incoming connections
    #[arg(short, long, env, default_value_t = 3000)]
    pub port: u16,

    /// Log filter directive, e.g. `info` or `botrelay=debug,tower_http=info`
    #[arg(long, env, default_value = "info")]
    pub log_filter: String,

    /// Log output format
    #[arg(long, env, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Base URL of the bots chat API, e.g. https://host/api/v1/bots
    #[arg(long, env)]
    pub backend_base_url: String,

    /// Bot that answers every relayed message
    #[arg(long, env)]
    bot_id: String,

    /// Conversation ids new users are assigned to, comma separated
    #[arg(long, env, value_delimiter = ',', required = true)]
    conversation_ids: Vec<String>,

    /// Maximum number of users whose conversation assignment is remembered
    #[arg(long, env, default_value_t = 10_000)]
    pub conversation_capacity: usize,

    /// Seconds to wait for a streamed backend reply; 0 waits indefinitely
    #[arg(long, env, default_value_t = 120)]
    pub stream_timeout_secs: u64,

    /// Timeout in seconds for Graph API calls
    #[arg(long, env, default_value_t = 30)]
    pub http_timeout_secs: u64,

    /// Proxy for every outbound call, e.g. http://proxy.internal:3128
    #[arg(long, env = "BOTRELAY_HTTP_PROXY")]
    pub http_proxy: Option<String>,

    /// The base URL of the Graph API.
    /// Override in tests to point at a mock server.
    #[arg(long, env, default_value = DEFAULT_GRAPH_API_BASE_URL)]
    pub graph_api_base_url: String,

    /// Page access token used to reply on Instagram
    #[arg(long, env, hide_env_values = true)]
    instagram_access_token: Option<SecretString>,

    /// Token Meta echoes back during Instagram webhook verification
    #[arg(long, env, hide_env_values = true)]
    instagram_verify_token: Option<SecretString>,

    /// System user access token used to reply on WhatsApp
    #[arg(long, env, hide_env_values = true)]
    whatsapp_access_token: Option<SecretString>,

    /// Token Meta echoes back during WhatsApp webhook verification
    #[arg(long, env, hide_env_values = true)]
    whatsapp_verify_token: Option<SecretString>,
}

impl Config {
    pub fn new() -> Self {
        // Load .env file first
        dotenv().ok();
        // Then parse the command line parameters and flags
        Config::parse()
    }

    /// Check the values clap cannot express on its own.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bot_id.trim().is_empty() {
            return Err(ConfigError::EmptyBotId);
        }
        self.conversation_pool()?;
        self.conversation_capacity()?;
        self.instagram()?;
        self.whatsapp()?;
        Ok(())
    }

    pub fn bot_id(&self) -> &str {
        self.bot_id.trim()
    }

    /// Configured conversation ids with blanks removed.
    pub fn conversation_pool(&self) -> Result<NonEmpty<String>, ConfigError> {
        let ids = self
            .conversation_ids
            .iter()
            .map(|id| id.trim())
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect();
        NonEmpty::from_vec(ids).ok_or(ConfigError::EmptyConversationPool)
    }

    pub fn conversation_capacity(&self) -> Result<NonZeroUsize, ConfigError> {
        NonZeroUsize::new(self.conversation_capacity).ok_or(ConfigError::ZeroCapacity)
    }

    pub fn stream_timeout(&self) -> Option<Duration> {
        (self.stream_timeout_secs > 0).then(|| Duration::from_secs(self.stream_timeout_secs))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Instagram credentials, or `None` when the channel is not configured.
    pub fn instagram(&self) -> Result<Option<ChannelCredentials>, ConfigError> {
        channel(
            "instagram",
            &self.instagram_access_token,
            &self.instagram_verify_token,
        )
    }

    /// WhatsApp credentials, or `None` when the channel is not configured.
    pub fn whatsapp(&self) -> Result<Option<ChannelCredentials>, ConfigError> {
        channel(
            "whatsapp",
            &self.whatsapp_access_token,
            &self.whatsapp_verify_token,
        )
    }
}

fn channel(
    name: &'static str,
    access_token: &Option<SecretString>,
    verify_token: &Option<SecretString>,
) -> Result<Option<ChannelCredentials>, ConfigError> {
    let present = |token: &Option<SecretString>| {
        token
            .as_ref()
            .filter(|token| !token.expose_secret().is_empty())
            .cloned()
    };

    match (present(access_token), present(verify_token)) {
        (Some(access_token), Some(verify_token)) => Ok(Some(ChannelCredentials {
            access_token,
            verify_token,
        })),
        (None, None) => Ok(None),
        _ => Err(ConfigError::IncompleteChannel(name)),
    }
}
