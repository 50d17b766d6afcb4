//! Ordered chat delivery for work produced off the runtime.
//!
//! The mesh transport calls the relay on its own OS thread. That thread may not touch
//! the chat client, so it enqueues a [`RelayIntent`] on an unbounded channel instead;
//! enqueueing never blocks and needs no runtime context. A single consumer task drains
//! the channel in FIFO order and performs each send. Send failures are logged and the
//! consumer moves on.

use crate::chat::ChatClient;
use crate::logutil::preview;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A chat message waiting to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayIntent {
    pub destination: i64,
    pub text: String,
}

/// Sending half of the dispatcher. Cloneable and usable from any thread.
#[derive(Clone, Debug)]
pub struct DispatchHandle {
    tx: mpsc::UnboundedSender<RelayIntent>,
}

impl DispatchHandle {
    /// Queue `text` for `destination`. Fails only once the consumer is gone.
    pub fn submit(&self, destination: i64, text: String) -> Result<(), RelayIntent> {
        self.tx
            .send(RelayIntent { destination, text })
            .map_err(|e| e.0)
    }
}

/// Spawn the consumer task on the current runtime.
pub fn start_dispatcher(chat: Arc<dyn ChatClient>) -> (DispatchHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<RelayIntent>();
    let task = tokio::spawn(async move {
        while let Some(intent) = rx.recv().await {
            debug!("→ chat {}: {}", intent.destination, preview(&intent.text));
            if let Err(e) = chat.send_text(intent.destination, &intent.text).await {
                warn!("Chat delivery to {} failed: {}", intent.destination, e);
            }
        }
        info!("Chat dispatcher stopped");
    });
    (DispatchHandle { tx }, task)
}
