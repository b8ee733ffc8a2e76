//! Traits consumed from the transport collaborator.
//!
//! Sending is fire-and-forget: the bot acknowledges commands only
//! through the inbound message feed, never through a return value.

use async_trait::async_trait;

/// Commands the orchestrator issues to the generation bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    /// Slash command starting a new draft generation.
    Imagine { prompt: String },
    /// Press an action button on an earlier bot message (variations,
    /// upscales).
    Interact {
        message_id: String,
        custom_id: String,
    },
}

/// Outbound half of the messaging transport.
#[async_trait]
pub trait BotTransport: Send + Sync {
    /// Send a command tagged with a correlation nonce. Completion is
    /// observed via the inbound feed, not the return value.
    async fn send_command(&self, command: BotCommand, nonce: &str) -> Result<(), BotError>;
}

/// Fetches artifact bytes from the CDN URLs the bot hands out.
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn download(&self, url: &str) -> Result<Vec<u8>, BotError>;
}

/// Errors surfaced by the transport collaborator. Both variants are
/// per-task / per-artifact: they are reported through the event stream
/// or logged, never fatal to a run.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    /// A command could not be sent.
    #[error("Transport error: {0}")]
    Transport(String),

    /// An artifact download failed (non-2xx response or timeout).
    #[error("Download error: {0}")]
    Download(String),
}
