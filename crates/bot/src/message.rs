//! Raw inbound message model.
//!
//! The transport collaborator normalizes gateway traffic into
//! [`ChannelMessage`]s before handing them to the correlator. Only the
//! fields the correlator needs survive: identity, reference, nonce,
//! free-text content, attachments, and action buttons.

use easel_core::task::Stage;

/// How the message arrived on the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// A new message was posted.
    Created,
    /// An earlier message was edited in place (progress updates keep the
    /// original message id).
    Updated,
}

/// A file attached to a bot message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub url: String,
    pub filename: String,
}

/// An action button attached to a bot message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionComponent {
    pub custom_id: String,
    pub label: String,
}

/// One raw message from the inbound feed.
#[derive(Debug, Clone)]
pub struct ChannelMessage {
    pub id: String,
    pub kind: MessageKind,
    pub content: String,
    /// Echo of the nonce the client attached to the originating command,
    /// present only on the bot's first acknowledgment.
    pub nonce: Option<String>,
    /// Id of the message this one amends or replies to, when any.
    pub referenced_message_id: Option<String>,
    pub attachments: Vec<Attachment>,
    pub components: Vec<ActionComponent>,
}

impl ChannelMessage {
    /// URL of the first attachment, the bot's result image.
    pub fn attachment_url(&self) -> Option<&str> {
        self.attachments.first().map(|a| a.url.as_str())
    }
}

/// Locate the action button for a follow-up stage on a completed
/// message.
///
/// Matches the bot's custom-id patterns first (`variation::2`,
/// `upsample::2`), then falls back to the visible label (`V2` / `U2`).
pub fn find_action(components: &[ActionComponent], stage: Stage) -> Option<&ActionComponent> {
    let (pattern, label) = match stage {
        Stage::Variation(q) => (format!("variation::{q}"), format!("V{q}")),
        Stage::Upscale(q) => (format!("upsample::{q}"), format!("U{q}")),
        Stage::Draft => return None,
    };
    components
        .iter()
        .find(|c| c.custom_id.contains(&pattern))
        .or_else(|| components.iter().find(|c| c.label == label))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
