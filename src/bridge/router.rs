//! Fixed channel ↔ chat mapping.

use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouterError {
    #[error("mesh channel {0} is mapped twice")]
    DuplicateChannel(u32),

    #[error("chat {0} is mapped to more than one channel")]
    DuplicateChat(i64),
}

/// One-to-one mapping between mesh channel indices and chat destinations, fixed at
/// startup.
#[derive(Debug, Clone)]
pub struct ChannelRouter {
    to_chat: HashMap<u32, i64>,
    to_channel: HashMap<i64, u32>,
}

impl ChannelRouter {
    pub fn new<I>(pairs: I) -> Result<Self, RouterError>
    where
        I: IntoIterator<Item = (u32, i64)>,
    {
        let mut to_chat = HashMap::new();
        let mut to_channel = HashMap::new();
        for (channel, chat) in pairs {
            if to_chat.insert(channel, chat).is_some() {
                return Err(RouterError::DuplicateChannel(channel));
            }
            if to_channel.insert(chat, channel).is_some() {
                return Err(RouterError::DuplicateChat(chat));
            }
        }
        Ok(Self { to_chat, to_channel })
    }

    /// Chat destination for a mesh channel.
    pub fn forward(&self, channel: u32) -> Option<i64> {
        self.to_chat.get(&channel).copied()
    }

    /// Mesh channel for a chat destination.
    pub fn reverse(&self, chat_id: i64) -> Option<u32> {
        self.to_channel.get(&chat_id).copied()
    }

    /// Mappings ordered by channel.
    pub fn pairs(&self) -> Vec<(u32, i64)> {
        let mut pairs: Vec<_> = self.to_chat.iter().map(|(c, d)| (*c, *d)).collect();
        pairs.sort_unstable();
        pairs
    }
}
