//! Chat-service collaborator.
//!
//! The relay core only needs two things from the chat side: a way to send text to a
//! destination ([`ChatClient`]) and a stream of inbound messages ([`ChatSource`]). The
//! Telegram Bot API adapter lives in [`telegram`] behind the `telegram` feature.

#[cfg(feature = "telegram")]
pub mod telegram;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Private,
    Group,
}

/// One inbound chat message.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatEvent {
    pub chat_id: i64,
    pub kind: ChatKind,
    pub sender_id: i64,
    pub sender_name: String,
    pub text: String,
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("chat transport error: {0}")]
    Transport(String),

    #[error("chat api error {code}: {description}")]
    Api { code: i64, description: String },

    #[error("unexpected chat api response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), ChatError>;
}

#[async_trait]
pub trait ChatSource: Send {
    /// Wait for the next batch of inbound messages. An empty batch is normal.
    async fn poll(&mut self) -> Result<Vec<ChatEvent>, ChatError>;
}

/// Sender label used on the mesh: full name, else username, else `tg_<id>`.
pub fn display_name(
    first_name: Option<&str>,
    last_name: Option<&str>,
    username: Option<&str>,
    user_id: i64,
) -> String {
    let full = [first_name, last_name]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if !full.is_empty() {
        return full;
    }
    match username.map(str::trim).filter(|s| !s.is_empty()) {
        Some(user) => user.to_string(),
        None => format!("tg_{}", user_id),
    }
}
