//! Narrow interfaces the report core consumes. Implemented by the sqlite
//! store and the Telegram channel; test doubles live next to the tests
//! that need them.

use async_trait::async_trait;
use thiserror::Error;

use crate::{ChatId, DayWindow, StoredMessage};

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Unprocessed messages for one chat inside the day window, ascending
    /// by (timestamp, id).
    async fn messages_for_day(
        &self,
        chat_id: ChatId,
        window: &DayWindow,
    ) -> anyhow::Result<Vec<StoredMessage>>;

    /// Chats with at least one unprocessed message inside the window.
    async fn active_chats(&self, window: &DayWindow) -> anyhow::Result<Vec<ChatId>>;

    /// Idempotent; scoped to exactly the chat/day window that was summarized.
    async fn mark_processed(&self, chat_id: ChatId, window: &DayWindow) -> anyhow::Result<()>;

    async fn chat_title(&self, chat_id: ChatId) -> anyhow::Result<Option<String>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    Markdown,
    Plain,
}

#[derive(Debug, Error)]
pub enum SendError {
    /// The platform rejected the markup; the caller may retry in plain mode.
    #[error("markup rejected: {0}")]
    Markup(String),
    #[error("send failed: {0}")]
    Transport(String),
}

#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    async fn send(&self, chat_id: ChatId, text: &str, mode: SendMode) -> Result<(), SendError>;
}
