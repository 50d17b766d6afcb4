//! # Meshtastic Device Interface
//!
//! The bridge does not speak the radio protocol itself. This module defines what the
//! relay core needs from a mesh link and nothing more:
//!
//! - [`MeshInterface`] - live node table, local identity, text sends and device control
//! - [`MeshConnector`] - opens a link and registers the inbound-packet callback
//! - [`MeshHandle`] - the shared slot holding the current link (empty while disconnected)
//!
//! ## Execution Contexts
//!
//! A link owns its own reader thread and invokes the registered [`PacketCallback`]
//! synchronously for every packet it decodes. The callback must never block beyond a
//! channel enqueue; see `bridge::relay`.
//!
//! ## Transports
//!
//! With the `serial` feature, [`serial::SerialConnector`] opens a USB/UART device that
//! speaks the plain-text line framing in [`framer`].

pub mod device_config;
pub mod framer;
#[cfg(feature = "serial")]
pub mod serial;

pub use device_config::{ConfigPathError, ConfigSection, ConfigValue, DeviceConfig};

use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Destination address meaning "everyone on the channel".
pub const BROADCAST_ADDR: u32 = 0xFFFF_FFFF;

/// Identity labels a node advertises about itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeIdentity {
    pub short_name: Option<String>,
    pub long_name: Option<String>,
}

impl NodeIdentity {
    pub fn new(short_name: Option<&str>, long_name: Option<&str>) -> Self {
        Self {
            short_name: short_name.map(str::to_string),
            long_name: long_name.map(str::to_string),
        }
    }

    /// Short label if set, else long label. Blank labels count as unset.
    pub fn preferred_label(&self) -> Option<&str> {
        fn pick(s: &Option<String>) -> Option<&str> {
            s.as_deref().map(str::trim).filter(|s| !s.is_empty())
        }
        pick(&self.short_name).or_else(|| pick(&self.long_name))
    }
}

/// Device telemetry as last reported by a node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceMetrics {
    pub voltage: Option<f32>,
    pub battery_level: Option<u32>,
    pub uptime_seconds: Option<u64>,
}

/// One row of the live node table.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub id: u32,
    pub identity: NodeIdentity,
    /// Unix seconds of the last packet heard from this node
    pub last_heard: Option<i64>,
    pub snr: Option<f32>,
    pub metrics: DeviceMetrics,
}

impl NodeRecord {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            identity: NodeIdentity::default(),
            last_heard: None,
            snr: None,
            metrics: DeviceMetrics::default(),
        }
    }

    /// Reported voltage, only when it is a real positive reading.
    pub fn voltage(&self) -> Option<f32> {
        self.metrics.voltage.filter(|v| v.is_finite() && *v > 0.0)
    }
}

/// Inbound packet as delivered to the relay callback.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshPacket {
    pub from: u32,
    pub to: u32,
    pub channel: u32,
    pub text: Option<String>,
    pub identity: Option<NodeIdentity>,
}

impl MeshPacket {
    pub fn text(from: u32, to: u32, channel: u32, text: &str) -> Self {
        Self {
            from,
            to,
            channel,
            text: Some(text.to_string()),
            identity: None,
        }
    }
}

/// Where an outbound text goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshTarget {
    Channel(u32),
    Node(u32),
}

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("mesh link unavailable")]
    Unavailable,

    #[error("serial link error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to open {port}: {reason}")]
    Open { port: String, reason: String },

    #[error("device rejected request: {0}")]
    Rejected(String),

    #[error(transparent)]
    Config(#[from] ConfigPathError),
}

/// Operations the bridge needs from a connected mesh link.
///
/// All methods are synchronous and cheap enough to call from async tasks; sends hand
/// the frame to the transport and return without waiting for airtime.
pub trait MeshInterface: Send + Sync {
    /// Snapshot of the live node table; `None` when the link cannot provide one.
    fn nodes(&self) -> Option<Vec<NodeRecord>>;

    fn local_node_id(&self) -> Option<u32>;

    fn local_uptime_secs(&self) -> Option<u64> {
        None
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn send_text(&self, text: &str, target: MeshTarget) -> Result<(), MeshError>;

    fn send_position(&self) -> Result<(), MeshError>;

    fn reboot(&self) -> Result<(), MeshError>;

    fn reset_node_db(&self) -> Result<(), MeshError>;

    fn device_config(&self) -> Result<DeviceConfig, MeshError>;

    /// Write back one top-level section of `config`.
    fn write_config(&self, config: &DeviceConfig, section: ConfigSection) -> Result<(), MeshError>;
}

/// Callback invoked on the transport's own thread for every inbound packet.
pub type PacketCallback = Arc<dyn Fn(MeshPacket) + Send + Sync>;

/// Opens mesh links. Blocking; call it from `spawn_blocking`. A returned link has
/// already loaded the local node id and the node table.
pub trait MeshConnector: Send + Sync {
    fn connect(&self, on_packet: PacketCallback) -> Result<Arc<dyn MeshInterface>, MeshError>;
}

/// Shared slot with the current mesh link.
#[derive(Clone, Default)]
pub struct MeshHandle {
    inner: Arc<RwLock<Option<Arc<dyn MeshInterface>>>>,
}

impl MeshHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_link(link: Arc<dyn MeshInterface>) -> Self {
        let handle = Self::new();
        handle.set(link);
        handle
    }

    /// The connected link, if any.
    pub fn current(&self) -> Option<Arc<dyn MeshInterface>> {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Like [`MeshHandle::current`] but as a `Result` for `?` chains.
    pub fn link(&self) -> Result<Arc<dyn MeshInterface>, MeshError> {
        self.current().ok_or(MeshError::Unavailable)
    }

    pub fn set(&self, link: Arc<dyn MeshInterface>) {
        let mut guard = self.inner.write().unwrap_or_else(|p| p.into_inner());
        *guard = Some(link);
    }

    pub fn clear(&self) {
        let mut guard = self.inner.write().unwrap_or_else(|p| p.into_inner());
        *guard = None;
    }

    /// Live node table, `None` when disconnected or the link has none.
    pub fn nodes(&self) -> Option<Vec<NodeRecord>> {
        self.current().and_then(|link| link.nodes())
    }
}

impl std::fmt::Debug for MeshHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshHandle")
            .field("connected", &self.current().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preferred_label_skips_blank_short_name() {
        let id = NodeIdentity::new(Some("  "), Some("Relay One"));
        assert_eq!(id.preferred_label(), Some("Relay One"));
        let id = NodeIdentity::new(Some("RLY1"), Some("Relay One"));
        assert_eq!(id.preferred_label(), Some("RLY1"));
        assert_eq!(NodeIdentity::default().preferred_label(), None);
    }

    #[test]
    fn zero_or_missing_voltage_is_not_a_reading() {
        let mut node = NodeRecord::new(1);
        assert_eq!(node.voltage(), None);
        node.metrics.voltage = Some(0.0);
        assert_eq!(node.voltage(), None);
        node.metrics.voltage = Some(3.71);
        assert_eq!(node.voltage(), Some(3.71));
    }

    #[test]
    fn empty_handle_reports_unavailable() {
        let handle = MeshHandle::new();
        assert!(handle.current().is_none());
        assert!(handle.nodes().is_none());
        assert!(matches!(handle.link(), Err(MeshError::Unavailable)));
    }
}
