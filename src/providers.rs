//! Conversational backend implementations.

pub mod bots;

// Re-export for convenience
pub use bots::BotsClient;
