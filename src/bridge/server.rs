//! Bridge server: wires state, relay, monitors and the chat loop together.
//!
//! Startup order:
//! 1. load the name cache and favorites from the data directory
//! 2. start the chat dispatcher and the relay engine
//! 3. connect to the mesh in the background, retrying with a fixed backoff and
//!    alerting the administrator on each failure; a supervisor reconnects whenever the
//!    link reports itself down
//! 4. start the periodic monitors once the first connection is up
//! 5. poll the chat service until shutdown
//!
//! Group messages are relayed to the mesh by a single worker so that the parts of one
//! message are never interleaved with another. Private messages are only accepted from
//! the administrator and go to [`AdminConsole`].

use super::admin::AdminConsole;
use super::dispatch::start_dispatcher;
use super::monitor::{self, MonitorContext};
use super::relay::RelayEngine;
use super::router::ChannelRouter;
use super::state::BridgeState;
use super::{favorites::FavoritesStore, names::NodeIdentityCache};
use crate::chat::{ChatClient, ChatEvent, ChatKind, ChatSource};
use crate::config::BridgeSettings;
use crate::logutil::preview;
use crate::meshtastic::{MeshConnector, MeshHandle, PacketCallback};
use crate::storage::{JsonStore, FAVORITES_FILE, NODE_NAMES_FILE};
use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Pause after a failed chat poll before trying again.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Keeps a mesh link in the shared [`MeshHandle`].
#[derive(Clone)]
pub struct LinkSupervisor {
    connector: Arc<dyn MeshConnector>,
    on_packet: PacketCallback,
    mesh: MeshHandle,
    state: Arc<BridgeState>,
    chat: Arc<dyn ChatClient>,
    admin_chat: i64,
    backoff: Duration,
}

impl LinkSupervisor {
    pub fn new(
        connector: Arc<dyn MeshConnector>,
        on_packet: PacketCallback,
        mesh: MeshHandle,
        state: Arc<BridgeState>,
        chat: Arc<dyn ChatClient>,
        admin_chat: i64,
        backoff: Duration,
    ) -> Self {
        Self {
            connector,
            on_packet,
            mesh,
            state,
            chat,
            admin_chat,
            backoff,
        }
    }

    /// Connect, retrying forever. On success the link is published and the name cache
    /// is refreshed from its node table.
    pub async fn connect_with_backoff(&self) {
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            let connector = Arc::clone(&self.connector);
            let on_packet = self.on_packet.clone();
            let result = tokio::task::spawn_blocking(move || connector.connect(on_packet)).await;
            let failure = match result {
                Ok(Ok(link)) => {
                    self.mesh.set(link);
                    info!("Connected to Meshtastic (attempt {})", attempt);
                    let nodes = self.mesh.nodes();
                    self.state.names.bulk_refresh(nodes.as_deref());
                    return;
                }
                Ok(Err(e)) => e.to_string(),
                Err(e) => format!("connect task failed: {}", e),
            };
            error!("Meshtastic connection failed: {}", failure);
            let notice = format!(
                "❌ Meshtastic connection failed: {}\nRetrying in {} seconds...",
                failure,
                self.backoff.as_secs()
            );
            if let Err(e) = self.chat.send_text(self.admin_chat, &notice).await {
                warn!("Could not notify admin about connection failure: {}", e);
            }
            tokio::time::sleep(self.backoff).await;
        }
    }

    /// Connect, then keep checking the link and reconnect when it goes down.
    /// `first_link` fires once the initial connection is published.
    pub async fn supervise(self, first_link: oneshot::Sender<()>) {
        self.connect_with_backoff().await;
        let _ = first_link.send(());
        loop {
            tokio::time::sleep(self.backoff).await;
            let up = self.mesh.current().is_some_and(|link| link.is_connected());
            if !up {
                warn!("Mesh link lost; reconnecting");
                self.mesh.clear();
                self.connect_with_backoff().await;
            }
        }
    }
}

pub struct BridgeServer {
    settings: BridgeSettings,
    state: Arc<BridgeState>,
    router: Arc<ChannelRouter>,
    mesh: MeshHandle,
    chat: Arc<dyn ChatClient>,
    connector: Arc<dyn MeshConnector>,
}

impl BridgeServer {
    pub fn new(
        settings: BridgeSettings,
        chat: Arc<dyn ChatClient>,
        connector: Arc<dyn MeshConnector>,
    ) -> Result<Self> {
        let router = ChannelRouter::new(settings.channel_pairs()).context("invalid channel mapping")?;
        let names = NodeIdentityCache::load(JsonStore::in_dir(&settings.data_dir, NODE_NAMES_FILE));
        let favorites = FavoritesStore::new(JsonStore::in_dir(&settings.data_dir, FAVORITES_FILE));
        for (channel, chat_id) in router.pairs() {
            info!("Mesh channel {} <-> chat {}", channel, chat_id);
        }
        Ok(Self {
            settings,
            state: Arc::new(BridgeState::new(names, favorites)),
            router: Arc::new(router),
            mesh: MeshHandle::new(),
            chat,
            connector,
        })
    }

    pub fn state(&self) -> Arc<BridgeState> {
        Arc::clone(&self.state)
    }

    pub fn mesh(&self) -> MeshHandle {
        self.mesh.clone()
    }

    /// Run until Ctrl-C.
    pub async fn run(self, source: Box<dyn ChatSource>) -> Result<()> {
        self.run_until(source, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Cannot listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Received shutdown signal");
        })
        .await
    }

    /// Run until `shutdown` resolves. Background tasks are aborted on return.
    pub async fn run_until<F>(self, mut source: Box<dyn ChatSource>, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let admin_chat = self.settings.admin_user_id;
        let (dispatch, dispatch_task) = start_dispatcher(Arc::clone(&self.chat));
        let relay = Arc::new(RelayEngine::new(
            Arc::clone(&self.state),
            Arc::clone(&self.router),
            self.mesh.clone(),
            dispatch,
            admin_chat,
            self.settings.relay.clone(),
        ));

        let mut tasks = vec![dispatch_task];
        let supervisor = LinkSupervisor::new(
            Arc::clone(&self.connector),
            relay.packet_callback(),
            self.mesh.clone(),
            Arc::clone(&self.state),
            Arc::clone(&self.chat),
            admin_chat,
            self.settings.reconnect_backoff,
        );
        let (link_up, mut first_link) = oneshot::channel();
        tasks.push(tokio::spawn(supervisor.supervise(link_up)));

        let ctx = MonitorContext {
            state: Arc::clone(&self.state),
            mesh: self.mesh.clone(),
            chat: Arc::clone(&self.chat),
            admin_chat,
        };
        let mut monitors_started = false;

        let (to_mesh, mut to_mesh_rx) = mpsc::unbounded_channel::<ChatEvent>();
        let worker_relay = Arc::clone(&relay);
        tasks.push(tokio::spawn(async move {
            while let Some(event) = to_mesh_rx.recv().await {
                if let Some(report) = worker_relay.relay_chat_message(&event).await {
                    debug!("Relayed chat message: {:?}", report);
                }
            }
        }));

        let console = AdminConsole::new(
            Arc::clone(&self.state),
            self.mesh.clone(),
            self.settings.monitor.battery_low_threshold,
        );

        info!("Bridge running; waiting for messages");
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                ready = &mut first_link, if !monitors_started => {
                    monitors_started = true;
                    if ready.is_ok() {
                        debug!("Mesh link up; starting monitors");
                        tasks.extend(monitor::spawn_all(&ctx, &self.settings.monitor));
                    }
                }
                batch = source.poll() => match batch {
                    Ok(events) => {
                        for event in events {
                            self.route_chat_event(event, &console, &to_mesh).await;
                        }
                    }
                    Err(e) => {
                        warn!("Chat poll failed: {}", e);
                        tokio::time::sleep(POLL_RETRY_DELAY).await;
                    }
                },
            }
        }

        for task in tasks {
            task.abort();
        }
        let stats = self.state.stats();
        info!(
            "Bridge stopped (mesh→chat {}, chat→mesh {})",
            stats.mesh_to_chat, stats.chat_to_mesh
        );
        Ok(())
    }

    async fn route_chat_event(
        &self,
        event: ChatEvent,
        console: &AdminConsole,
        to_mesh: &mpsc::UnboundedSender<ChatEvent>,
    ) {
        debug!(
            "Chat message from {} in {}: {}",
            event.sender_id,
            event.chat_id,
            preview(&event.text)
        );
        match event.kind {
            ChatKind::Group => {
                if event.text.trim_start().starts_with('/') {
                    return;
                }
                if to_mesh.send(event).is_err() {
                    warn!("Chat→mesh worker stopped; message dropped");
                }
            }
            ChatKind::Private if event.sender_id == self.settings.admin_user_id => {
                let Some(reply) = console.handle(&event.text).await else {
                    return;
                };
                if let Err(e) = self.chat.send_text(event.chat_id, &reply).await {
                    warn!("Could not deliver admin reply: {}", e);
                }
            }
            ChatKind::Private => debug!("Ignoring private message from {}", event.sender_id),
        }
    }
}
