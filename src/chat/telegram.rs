//! Telegram Bot API adapter: `sendMessage` for output and `getUpdates` long polling for
//! input.

use super::{display_name, ChatClient, ChatError, ChatEvent, ChatKind, ChatSource};
use async_trait::async_trait;
use log::{debug, trace};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::timeout;

const API_BASE: &str = "https://api.telegram.org";

/// Slack on top of the long-poll window before the HTTP call is abandoned.
const REQUEST_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    error_code: Option<i64>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    chat: Chat,
    from: Option<User>,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
    first_name: Option<String>,
    last_name: Option<String>,
    username: Option<String>,
}

/// Sends messages through the Bot API. Cheap to clone.
#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
}

impl TelegramClient {
    pub fn new(bot_token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: format!("{}/bot{}", API_BASE, bot_token),
        }
    }

    /// Long-polling source sharing this client's connection pool.
    pub fn poller(&self, poll_timeout: Duration) -> TelegramPoller {
        TelegramPoller {
            client: self.clone(),
            offset: None,
            poll_timeout,
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
        limit: Duration,
    ) -> Result<T, ChatError> {
        let url = format!("{}/{}", self.base_url, method);
        let request = self.http.post(&url).json(body);
        let response = timeout(limit, request.send())
            .await
            .map_err(|_| ChatError::Transport(format!("{} timed out after {}s", method, limit.as_secs())))?
            .map_err(|e| ChatError::Transport(e.without_url().to_string()))?;

        // Error payloads carry a JSON body too, so decode before checking status.
        let parsed: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| ChatError::Decode(e.without_url().to_string()))?;
        if !parsed.ok {
            return Err(ChatError::Api {
                code: parsed.error_code.unwrap_or_default(),
                description: parsed.description.unwrap_or_default(),
            });
        }
        parsed
            .result
            .ok_or_else(|| ChatError::Decode(format!("{} returned ok without result", method)))
    }
}

#[async_trait]
impl ChatClient for TelegramClient {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), ChatError> {
        let body = serde_json::json!({ "chat_id": chat_id, "text": text });
        let _: serde_json::Value = self.call("sendMessage", &body, REQUEST_GRACE * 3).await?;
        trace!("sendMessage to {} ok", chat_id);
        Ok(())
    }
}

pub struct TelegramPoller {
    client: TelegramClient,
    offset: Option<i64>,
    poll_timeout: Duration,
}

#[async_trait]
impl ChatSource for TelegramPoller {
    async fn poll(&mut self) -> Result<Vec<ChatEvent>, ChatError> {
        let mut body = serde_json::json!({
            "timeout": self.poll_timeout.as_secs(),
            "allowed_updates": ["message"],
        });
        if let Some(offset) = self.offset {
            body["offset"] = serde_json::Value::from(offset);
        }
        let updates: Vec<Update> = self
            .client
            .call("getUpdates", &body, self.poll_timeout + REQUEST_GRACE)
            .await?;

        let mut events = Vec::with_capacity(updates.len());
        for update in updates {
            self.offset = Some(update.update_id + 1);
            if let Some(event) = update.message.and_then(into_event) {
                events.push(event);
            }
        }
        if !events.is_empty() {
            debug!("Received {} chat message(s)", events.len());
        }
        Ok(events)
    }
}

fn into_event(message: Message) -> Option<ChatEvent> {
    let text = message.text?;
    let user = message.from?;
    let kind = match message.chat.kind.as_str() {
        "private" => ChatKind::Private,
        "group" | "supergroup" => ChatKind::Group,
        _ => return None,
    };
    Some(ChatEvent {
        chat_id: message.chat.id,
        kind,
        sender_id: user.id,
        sender_name: display_name(
            user.first_name.as_deref(),
            user.last_name.as_deref(),
            user.username.as_deref(),
            user.id,
        ),
        text,
    })
}
