//! Chat platform surface the core consumes.
//!
//! The gateway library itself is an external collaborator; the core talks
//! through the `ChatClient` trait for publishing and receives raw edit-event
//! payloads from the `gateway` receiver.

pub mod gateway;
mod rest;

pub use rest::RestChatClient;

use crate::retry::Retryable;
use async_trait::async_trait;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl Retryable for ChatError {
    fn is_retryable(&self) -> bool {
        match self {
            ChatError::Network(_) => true,
            ChatError::Api { status, .. } => *status >= 500 || *status == 429,
            ChatError::InvalidResponse(_) => false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// A rich message card, serialized straight into the platform's wire shape.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub fields: Vec<EmbedField>,
}

/// A file attached to an outgoing message.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct OutgoingMessage {
    pub content: Option<String>,
    pub embeds: Vec<Embed>,
    pub attachments: Vec<Attachment>,
}

/// Publishing contract: send and edit messages in a channel.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Send a message, returning its id.
    async fn send_message(
        &self,
        channel_id: u64,
        message: OutgoingMessage,
    ) -> Result<u64, ChatError>;

    /// Replace a previously sent message's text content.
    async fn edit_message(
        &self,
        channel_id: u64,
        message_id: u64,
        content: String,
    ) -> Result<(), ChatError>;
}
