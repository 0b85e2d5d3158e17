//! # botrelay - chat bot relay for Meta messaging platforms
//!
//! Receives Instagram Direct and WhatsApp Cloud API webhooks, forwards each
//! user's text to a streaming chat backend and sends the accumulated answer
//! back on the platform it came from.
//!
//! ## Features
//! - Async-first, tokio compatible
//! - Incremental Server-Sent Events decoding with cancellation and timeouts
//! - Stable per-user conversation assignment from a configured pool
//! - Trait-based backend seam ([`ChatBackend`]) for swapping the AI provider
//!
//! ## Architecture
//!
//! ### Core Types
//!
//! - **`StreamAccumulator`**: drains an SSE byte stream into one reply
//! - **`ConversationStore`**: bounded map from platform user to conversation id
//! - **`BotsClient`**: the chat backend, implementing [`ChatBackend`]
//! - **`InstagramClient`** / **`WhatsAppClient`**: Graph API senders
//!
//! ## Example
//! ```no_run
//! use botrelay::accumulator::StreamAccumulator;
//! use botrelay::client::ChatBackend;
//! use botrelay::options::TransportOptions;
//! use botrelay::providers::BotsClient;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = BotsClient::new(
//!         "my-bot",
//!         TransportOptions::new("https://chat.example.com/api/v1/bots"),
//!         StreamAccumulator::new().with_timeout(Duration::from_secs(60)),
//!     )?;
//!
//!     let reply = client
//!         .complete("conversation-1", "Hello!", &CancellationToken::new())
//!         .await?;
//!     println!("{}", reply);
//!     Ok(())
//! }
//! ```

pub mod accumulator;
pub mod client;
pub mod config;
pub mod conversations;
pub mod http;
pub mod logging;
pub mod messaging;
pub mod model;
pub mod options;
pub mod providers;
pub mod server;
pub mod sse;

// Re-exports for convenience
pub use accumulator::{AccumulateError, StreamAccumulator};
pub use client::{ChatBackend, ClientError};
pub use conversations::ConversationStore;
pub use model::{ChatPrompt, TokenEvent};
