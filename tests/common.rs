//! In-memory stand-ins for the chat service and the mesh radio.
#![allow(dead_code)]

use async_trait::async_trait;
use meshbridge::bridge::favorites::FavoritesStore;
use meshbridge::bridge::names::NodeIdentityCache;
use meshbridge::bridge::BridgeState;
use meshbridge::chat::{ChatClient, ChatError, ChatEvent, ChatKind, ChatSource};
use meshbridge::meshtastic::{
    ConfigSection, DeviceConfig, MeshConnector, MeshError, MeshInterface, MeshPacket, MeshTarget,
    NodeIdentity, NodeRecord, PacketCallback,
};
use meshbridge::storage::{JsonStore, FAVORITES_FILE, NODE_NAMES_FILE};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub const PUBLIC_CHAT: i64 = -100;
pub const PRIVATE_CHAT: i64 = 555;
pub const ADMIN: i64 = 42;
pub const LOCAL_NODE: u32 = 0x0DEA_DBEE;

#[derive(Default)]
pub struct FakeChat {
    sent: Mutex<Vec<(i64, String)>>,
    failing: AtomicBool,
    attempts: AtomicUsize,
}

impl FakeChat {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(i64, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn texts_to(&self, chat_id: i64) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|(id, _)| *id == chat_id)
            .map(|(_, t)| t)
            .collect()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatClient for FakeChat {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), ChatError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ChatError::Transport("offline".into()));
        }
        self.sent.lock().unwrap().push((chat_id, text.to_string()));
        Ok(())
    }
}

/// One text handed to the fake radio, with the (paused-clock friendly) send instant.
#[derive(Debug, Clone)]
pub struct MeshSend {
    pub text: String,
    pub target: MeshTarget,
    pub at: tokio::time::Instant,
}

pub struct FakeMesh {
    nodes: Mutex<Option<Vec<NodeRecord>>>,
    local_id: Option<u32>,
    connected: AtomicBool,
    failing: AtomicBool,
    sends: Mutex<Vec<MeshSend>>,
    config: Mutex<DeviceConfig>,
    written: Mutex<Vec<ConfigSection>>,
    pub reboots: AtomicUsize,
    pub positions: AtomicUsize,
    pub node_db_resets: AtomicUsize,
}

impl FakeMesh {
    pub fn new(nodes: Vec<NodeRecord>) -> Arc<Self> {
        Arc::new(Self {
            nodes: Mutex::new(Some(nodes)),
            local_id: Some(LOCAL_NODE),
            connected: AtomicBool::new(true),
            failing: AtomicBool::new(false),
            sends: Mutex::new(Vec::new()),
            config: Mutex::new(DeviceConfig::default()),
            written: Mutex::new(Vec::new()),
            reboots: AtomicUsize::new(0),
            positions: AtomicUsize::new(0),
            node_db_resets: AtomicUsize::new(0),
        })
    }

    pub fn set_nodes(&self, nodes: Option<Vec<NodeRecord>>) {
        *self.nodes.lock().unwrap() = nodes;
    }

    pub fn set_connected(&self, up: bool) {
        self.connected.store(up, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sends(&self) -> Vec<MeshSend> {
        self.sends.lock().unwrap().clone()
    }

    pub fn config(&self) -> DeviceConfig {
        self.config.lock().unwrap().clone()
    }

    pub fn written(&self) -> Vec<ConfigSection> {
        self.written.lock().unwrap().clone()
    }
}

impl MeshInterface for FakeMesh {
    fn nodes(&self) -> Option<Vec<NodeRecord>> {
        self.nodes.lock().unwrap().clone()
    }

    fn local_node_id(&self) -> Option<u32> {
        self.local_id
    }

    fn local_uptime_secs(&self) -> Option<u64> {
        Some(2 * 3600 + 5 * 60)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn send_text(&self, text: &str, target: MeshTarget) -> Result<(), MeshError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(MeshError::Rejected("queue full".into()));
        }
        self.sends.lock().unwrap().push(MeshSend {
            text: text.to_string(),
            target,
            at: tokio::time::Instant::now(),
        });
        Ok(())
    }

    fn send_position(&self) -> Result<(), MeshError> {
        self.positions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn reboot(&self) -> Result<(), MeshError> {
        self.reboots.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn reset_node_db(&self) -> Result<(), MeshError> {
        self.node_db_resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn device_config(&self) -> Result<DeviceConfig, MeshError> {
        Ok(self.config())
    }

    fn write_config(&self, config: &DeviceConfig, section: ConfigSection) -> Result<(), MeshError> {
        *self.config.lock().unwrap() = config.clone();
        self.written.lock().unwrap().push(section);
        Ok(())
    }
}

/// Fails the first `failures` attempts, then hands out `link`.
pub struct FakeConnector {
    link: Arc<FakeMesh>,
    failures: usize,
    attempts: AtomicUsize,
    callback: Mutex<Option<PacketCallback>>,
}

impl FakeConnector {
    pub fn new(link: Arc<FakeMesh>, failures: usize) -> Arc<Self> {
        Arc::new(Self {
            link,
            failures,
            attempts: AtomicUsize::new(0),
            callback: Mutex::new(None),
        })
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Deliver `packet` the way the transport's reader thread would.
    pub fn inject(&self, packet: MeshPacket) -> bool {
        let Some(callback) = self.callback.lock().unwrap().clone() else {
            return false;
        };
        std::thread::spawn(move || callback(packet)).join().is_ok()
    }
}

impl MeshConnector for FakeConnector {
    fn connect(&self, on_packet: PacketCallback) -> Result<Arc<dyn MeshInterface>, MeshError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures {
            return Err(MeshError::Open {
                port: "/dev/fake".into(),
                reason: "no such device".into(),
            });
        }
        *self.callback.lock().unwrap() = Some(on_packet);
        Ok(self.link.clone())
    }
}

/// Chat events fed from the test through a channel.
pub struct FakeSource {
    rx: mpsc::UnboundedReceiver<ChatEvent>,
}

impl FakeSource {
    pub fn new() -> (mpsc::UnboundedSender<ChatEvent>, Box<dyn ChatSource>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Box::new(Self { rx }))
    }
}

#[async_trait]
impl ChatSource for FakeSource {
    async fn poll(&mut self) -> Result<Vec<ChatEvent>, ChatError> {
        match self.rx.recv().await {
            Some(event) => Ok(vec![event]),
            None => std::future::pending().await,
        }
    }
}

pub fn node(id: u32, short: &str) -> NodeRecord {
    let mut record = NodeRecord::new(id);
    record.identity = NodeIdentity::new(Some(short), None);
    record
}

pub fn node_with_voltage(id: u32, short: &str, voltage: f32) -> NodeRecord {
    let mut record = node(id, short);
    record.metrics.voltage = Some(voltage);
    record
}

pub fn state_in(dir: &Path) -> Arc<BridgeState> {
    let names = NodeIdentityCache::load(JsonStore::in_dir(dir, NODE_NAMES_FILE));
    let favorites = FavoritesStore::new(JsonStore::in_dir(dir, FAVORITES_FILE));
    Arc::new(BridgeState::new(names, favorites))
}

pub fn group_message(chat_id: i64, sender: &str, text: &str) -> ChatEvent {
    ChatEvent {
        chat_id,
        kind: ChatKind::Group,
        sender_id: 7,
        sender_name: sender.to_string(),
        text: text.to_string(),
    }
}

pub fn admin_message(text: &str) -> ChatEvent {
    ChatEvent {
        chat_id: ADMIN,
        kind: ChatKind::Private,
        sender_id: ADMIN,
        sender_name: "Admin".to_string(),
        text: text.to_string(),
    }
}
