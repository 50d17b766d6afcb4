//! The bidirectional message pump.
//!
//! Mesh → chat runs synchronously on the transport's reader thread: identity and
//! statistics are updated in place and the formatted message is queued on the
//! dispatcher. Chat → mesh runs on the runtime and sends chunked text straight to the
//! mesh link with pacing between parts.

use super::chunking::{split_message, tag_parts};
use super::dispatch::DispatchHandle;
use super::names::Suffix;
use super::router::ChannelRouter;
use super::state::BridgeState;
use crate::chat::{ChatEvent, ChatKind};
use crate::config::RelaySettings;
use crate::logutil::{preview, preview_with};
use crate::meshtastic::{MeshHandle, MeshPacket, MeshTarget, PacketCallback};
use chrono::Local;
use log::{debug, error, info, trace, warn};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Why an inbound packet produced no chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    UnmappedChannel(u32),
    DispatcherClosed,
    HandlerPanicked,
}

/// What ingress did with one mesh packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngressOutcome {
    /// Addressed to the local node; queued for the administrator.
    QueuedDirect,
    QueuedBroadcast { channel: u32, destination: i64 },
    Dropped(DropReason),
    /// No text; only identity and statistics were updated.
    NoText,
}

/// Result of relaying one chat message to the mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatRelayReport {
    pub channel: u32,
    pub parts: usize,
    pub sent: usize,
}

pub struct RelayEngine {
    state: Arc<BridgeState>,
    router: Arc<ChannelRouter>,
    mesh: MeshHandle,
    dispatch: DispatchHandle,
    admin_chat: i64,
    settings: RelaySettings,
}

impl RelayEngine {
    pub fn new(
        state: Arc<BridgeState>,
        router: Arc<ChannelRouter>,
        mesh: MeshHandle,
        dispatch: DispatchHandle,
        admin_chat: i64,
        settings: RelaySettings,
    ) -> Self {
        Self {
            state,
            router,
            mesh,
            dispatch,
            admin_chat,
            settings,
        }
    }

    /// Callback to register with a mesh connector. Panics inside packet handling are
    /// contained here and never reach the transport thread.
    pub fn packet_callback(self: &Arc<Self>) -> PacketCallback {
        let engine = Arc::clone(self);
        Arc::new(move |packet: MeshPacket| {
            let outcome = engine.ingest(&packet);
            trace!("ingress from {:08x}: {:?}", packet.from, outcome);
        })
    }

    /// [`RelayEngine::handle_packet`] with panics converted into a dropped outcome.
    pub fn ingest(&self, packet: &MeshPacket) -> IngressOutcome {
        match catch_unwind(AssertUnwindSafe(|| self.handle_packet(packet))) {
            Ok(outcome) => outcome,
            Err(_) => {
                error!("Mesh packet handler panicked; packet from {:08x} dropped", packet.from);
                IngressOutcome::Dropped(DropReason::HandlerPanicked)
            }
        }
    }

    /// Mesh → chat for one packet. Never blocks beyond an enqueue.
    pub fn handle_packet(&self, packet: &MeshPacket) -> IngressOutcome {
        let suffix = Suffix::from_node_id(packet.from);
        if let Some(label) = packet.identity.as_ref().and_then(|i| i.preferred_label()) {
            self.state.names.upsert(suffix, label);
        }
        self.state.record_inbound(suffix, Local::now().date_naive());

        let Some(text) = packet.text.as_deref() else {
            return IngressOutcome::NoText;
        };
        let message = format!("[{}]: {}", self.state.names.lookup_name(suffix), text);

        let local = self.mesh.current().and_then(|link| link.local_node_id());
        if local == Some(packet.to) {
            info!("Direct mesh message → admin: {}", preview(&message));
            return self.enqueue(self.admin_chat, message, IngressOutcome::QueuedDirect);
        }

        match self.router.forward(packet.channel) {
            Some(destination) => {
                info!("→ chat (ch{}): {}", packet.channel, preview(&message));
                self.enqueue(
                    destination,
                    message,
                    IngressOutcome::QueuedBroadcast {
                        channel: packet.channel,
                        destination,
                    },
                )
            }
            None => {
                warn!("Message on unmapped mesh channel {} dropped", packet.channel);
                IngressOutcome::Dropped(DropReason::UnmappedChannel(packet.channel))
            }
        }
    }

    fn enqueue(&self, destination: i64, text: String, queued: IngressOutcome) -> IngressOutcome {
        match self.dispatch.submit(destination, text) {
            Ok(()) => queued,
            Err(_) => {
                warn!("Chat dispatcher is closed; message to {} dropped", destination);
                IngressOutcome::Dropped(DropReason::DispatcherClosed)
            }
        }
    }

    /// Chat → mesh for one inbound chat message. Returns `None` when the message does
    /// not come from a mapped group chat.
    pub async fn relay_chat_message(&self, event: &ChatEvent) -> Option<ChatRelayReport> {
        if event.kind != ChatKind::Group {
            return None;
        }
        let Some(channel) = self.router.reverse(event.chat_id) else {
            debug!("Chat {} is not mapped to a mesh channel", event.chat_id);
            return None;
        };

        let text = format!("[TG: {}] {}", event.sender_name, event.text.trim());
        let parts = tag_parts(split_message(&text, self.settings.max_part_chars));
        let total = parts.len();
        let mut sent = 0;
        for (i, part) in parts.iter().enumerate() {
            let result = self
                .mesh
                .link()
                .and_then(|link| link.send_text(part, MeshTarget::Channel(channel)));
            match result {
                Ok(()) => {
                    sent += 1;
                    self.state.record_chat_to_mesh();
                    info!(
                        "→ mesh (ch{}): {}",
                        channel,
                        preview_with(part, self.settings.max_part_chars)
                    );
                }
                Err(e) => warn!("Mesh send of part {}/{} failed: {}", i + 1, total, e),
            }
            if i + 1 < total {
                tokio::time::sleep(self.settings.part_delay).await;
            }
        }
        Some(ChatRelayReport {
            channel,
            parts: total,
            sent,
        })
    }
}
