//! Transport options and secret handling shared by the outbound clients.

use std::time::Duration;

/// A secret string type for sensitive data like access and verify tokens.
/// Prevents accidental logging or display of secrets.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    /// Create a new secret string.
    pub fn new(s: String) -> Self {
        Self(s)
    }

    /// Get the underlying secret value.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretString([REDACTED])")
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s.to_string())
    }
}

impl std::str::FromStr for SecretString {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

/// Transport configuration for one outbound HTTP API.
///
/// # Example
/// ```rust
/// use botrelay::options::{SecretString, TransportOptions};
/// use std::time::Duration;
///
/// let options = TransportOptions::new("https://graph.facebook.com/v18.0")
///     .with_access_token(SecretString::from("token"))
///     .with_timeout(Duration::from_secs(30));
/// assert_eq!(options.base_url, "https://graph.facebook.com/v18.0");
/// ```
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Base URL for API endpoints, without a trailing slash
    pub base_url: String,

    /// Bearer token sent in the `Authorization` header
    pub access_token: Option<SecretString>,

    /// Request timeout. Leave unset for streaming endpoints, whose
    /// lifetime is bounded by the accumulator instead.
    pub timeout: Option<Duration>,

    /// HTTP proxy URL
    pub proxy: Option<String>,
}

impl TransportOptions {
    /// Create transport options for the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: None,
            timeout: None,
            proxy: None,
        }
    }

    /// Set the bearer token.
    pub fn with_access_token(mut self, token: impl Into<SecretString>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Set the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the proxy URL.
    pub fn with_proxy(mut self, proxy: String) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Join `path` onto the base URL.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}
