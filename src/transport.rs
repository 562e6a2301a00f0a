//! Transport seam between the poll loop and the messaging provider

use crate::error::Result;
use crate::store::ChatId;
use serde::Deserialize;

/// One item of the inbound update feed
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<IncomingMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    #[serde(default)]
    pub text: Option<String>,
    pub chat: Chat,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: ChatId,
}

impl Update {
    /// Convenience constructor for a plain text message
    pub fn text(update_id: i64, chat_id: ChatId, text: &str) -> Self {
        Self {
            update_id,
            message: Some(IncomingMessage {
                text: Some(text.to_string()),
                chat: Chat { id: chat_id },
            }),
        }
    }

    /// Sender and text, if this update carries a text message
    pub fn text_message(&self) -> Option<(ChatId, &str)> {
        let message = self.message.as_ref()?;
        let text = message.text.as_deref()?;
        Some((message.chat.id, text))
    }
}

/// A message to deliver to one chat
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub chat_id: ChatId,
    pub text: String,
    /// Attach the command keyboard
    pub keyboard: bool,
}

impl OutboundMessage {
    pub fn new(chat_id: ChatId, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
            keyboard: false,
        }
    }
}

/// Pull-based update feed plus fire-and-forget send
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Updates with id >= `offset`, ascending
    async fn pull_updates(&self, offset: i64) -> Result<Vec<Update>>;

    async fn send(&self, message: &OutboundMessage) -> Result<()>;
}
