//! Serial transport for the line-framed mesh link.
//!
//! [`SerialConnector::connect`] opens the port, starts a dedicated reader thread,
//! requests the radio's configuration dump and returns a [`SerialLink`] only once the
//! dump has been read, so callers see the local node id and the full node table. The
//! reader keeps the node table current and hands every
//! inbound packet to the registered callback on its own thread. Any read error other
//! than a timeout marks the link disconnected and ends the thread; the bridge's
//! supervisor then reconnects.

use super::framer::{self, InboundLine, LineFramer};
use super::{
    ConfigSection, DeviceConfig, MeshConnector, MeshError, MeshInterface, MeshTarget, NodeRecord,
    PacketCallback,
};
use log::{debug, info, trace, warn};
use serialport::SerialPort;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Settle time after raising DTR/RTS; ESP32 boards reset on the toggle.
const SETTLE_DELAY: Duration = Duration::from_millis(150);
const READ_TIMEOUT: Duration = Duration::from_millis(500);
/// How long the radio gets to finish its node and config dump.
const CONFIG_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct SerialConnector {
    port: String,
    baud_rate: u32,
}

impl SerialConnector {
    pub fn new(port: &str, baud_rate: u32) -> Self {
        Self {
            port: port.to_string(),
            baud_rate,
        }
    }

    fn open(&self) -> Result<Box<dyn SerialPort>, MeshError> {
        debug!("Opening serial port {} at {} baud", self.port, self.baud_rate);
        let mut builder = serialport::new(&self.port, self.baud_rate).timeout(READ_TIMEOUT);
        #[cfg(unix)]
        {
            builder = builder
                .data_bits(serialport::DataBits::Eight)
                .stop_bits(serialport::StopBits::One)
                .parity(serialport::Parity::None);
        }
        let mut port = builder.open().map_err(|e| MeshError::Open {
            port: self.port.clone(),
            reason: e.to_string(),
        })?;

        let _ = port.write_data_terminal_ready(true);
        let _ = port.write_request_to_send(true);
        std::thread::sleep(SETTLE_DELAY);

        // Discard boot chatter buffered before we attached
        let mut purge_buf = [0u8; 512];
        if let Ok(available) = port.bytes_to_read() {
            if available > 0 {
                let _ = port.read(&mut purge_buf);
            }
        }
        Ok(port)
    }
}

impl MeshConnector for SerialConnector {
    fn connect(&self, on_packet: PacketCallback) -> Result<Arc<dyn MeshInterface>, MeshError> {
        let port = self.open()?;
        let reader = port.try_clone().map_err(|e| MeshError::Open {
            port: self.port.clone(),
            reason: format!("cannot clone handle: {}", e),
        })?;

        let shared = Arc::new(LinkShared::default());
        shared.connected.store(true, Ordering::SeqCst);
        let link = Arc::new(SerialLink {
            port_name: self.port.clone(),
            writer: Mutex::new(port),
            shared: shared.clone(),
        });

        let port_name = self.port.clone();
        std::thread::Builder::new()
            .name("mesh-serial-reader".to_string())
            .spawn(move || reader_loop(reader, shared, on_packet, port_name))?;

        let ready = link
            .write_line(&framer::encode_command("WANT_CONFIG"))
            .map_err(|e| e.to_string())
            .and_then(|()| link.shared.wait_for_config(CONFIG_TIMEOUT));
        if let Err(reason) = ready {
            link.shared.close();
            return Err(MeshError::Open {
                port: self.port.clone(),
                reason,
            });
        }
        info!(
            "Mesh link open on {} ({} nodes known)",
            self.port,
            LinkShared::lock(&link.shared.nodes).len()
        );
        Ok(link)
    }
}

#[derive(Default)]
struct LinkShared {
    connected: AtomicBool,
    nodes: Mutex<HashMap<u32, NodeRecord>>,
    my_info: Mutex<Option<(u32, Option<u64>)>>,
    config: Mutex<DeviceConfig>,
    config_complete: Mutex<bool>,
    progress: Condvar,
}

impl LinkShared {
    fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
        m.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Block until the reader has seen the end of the config dump. Fails when the
    /// timeout passes, the link closes first, or the dump lacked `MYINFO`.
    fn wait_for_config(&self, timeout: Duration) -> Result<(), String> {
        let guard = Self::lock(&self.config_complete);
        let (done, _) = self
            .progress
            .wait_timeout_while(guard, timeout, |done| {
                !*done && self.connected.load(Ordering::SeqCst)
            })
            .unwrap_or_else(|p| p.into_inner());
        if !self.connected.load(Ordering::SeqCst) {
            return Err("link closed during config download".to_string());
        }
        if !*done {
            return Err(format!("no config from radio within {}s", timeout.as_secs()));
        }
        drop(done);
        if Self::lock(&self.my_info).is_none() {
            return Err("radio did not report its node id".to_string());
        }
        Ok(())
    }

    fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let _guard = Self::lock(&self.config_complete);
        self.progress.notify_all();
    }

    fn apply(&self, line: InboundLine, on_packet: &PacketCallback) {
        match line {
            InboundLine::Packet(packet) => {
                {
                    let mut nodes = Self::lock(&self.nodes);
                    let node = nodes
                        .entry(packet.from)
                        .or_insert_with(|| NodeRecord::new(packet.from));
                    node.last_heard = Some(chrono::Utc::now().timestamp());
                    if let Some(identity) = &packet.identity {
                        if identity.short_name.is_some() {
                            node.identity.short_name = identity.short_name.clone();
                        }
                        if identity.long_name.is_some() {
                            node.identity.long_name = identity.long_name.clone();
                        }
                    }
                }
                on_packet(packet);
            }
            InboundLine::Node(record) => {
                trace!("node update {:08x}", record.id);
                Self::lock(&self.nodes).insert(record.id, record);
            }
            InboundLine::MyInfo { node_id, uptime_secs } => {
                debug!("local node is !{:08x}", node_id);
                *Self::lock(&self.my_info) = Some((node_id, uptime_secs));
            }
            InboundLine::Config { section, body } => {
                if let Err(e) = Self::lock(&self.config).apply_section(section, body) {
                    warn!("Ignoring malformed {} config report: {}", section, e);
                }
            }
            InboundLine::ConfigComplete => {
                debug!("config dump complete");
                *Self::lock(&self.config_complete) = true;
                self.progress.notify_all();
            }
        }
    }
}

fn reader_loop(
    mut port: Box<dyn SerialPort>,
    shared: Arc<LinkShared>,
    on_packet: PacketCallback,
    port_name: String,
) {
    let mut framer = LineFramer::new();
    let mut buf = [0u8; 1024];
    while shared.connected.load(Ordering::SeqCst) {
        match port.read(&mut buf) {
            Ok(0) => continue,
            Ok(n) => {
                framer.push(&buf[..n]);
                while let Some(line) = framer.next_line() {
                    match framer::parse_line(&line) {
                        Some(parsed) => shared.apply(parsed, &on_packet),
                        None => trace!("unparsed serial line: {}", crate::logutil::preview(&line)),
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
            Err(e) => {
                warn!("Serial read on {} failed: {}", port_name, e);
                break;
            }
        }
    }
    shared.close();
}

/// A connected serial link.
pub struct SerialLink {
    port_name: String,
    writer: Mutex<Box<dyn SerialPort>>,
    shared: Arc<LinkShared>,
}

impl SerialLink {
    fn write_line(&self, line: &str) -> Result<(), MeshError> {
        if !self.shared.connected.load(Ordering::SeqCst) {
            return Err(MeshError::Unavailable);
        }
        let mut port = LinkShared::lock(&self.writer);
        port.write_all(line.as_bytes())?;
        port.flush()?;
        Ok(())
    }
}

impl MeshInterface for SerialLink {
    fn nodes(&self) -> Option<Vec<NodeRecord>> {
        if !self.is_connected() {
            return None;
        }
        Some(LinkShared::lock(&self.shared.nodes).values().cloned().collect())
    }

    fn local_node_id(&self) -> Option<u32> {
        let info = *LinkShared::lock(&self.shared.my_info);
        info.map(|(id, _)| id)
    }

    fn local_uptime_secs(&self) -> Option<u64> {
        let info = *LinkShared::lock(&self.shared.my_info);
        info.and_then(|(_, up)| up)
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn send_text(&self, text: &str, target: MeshTarget) -> Result<(), MeshError> {
        self.write_line(&framer::encode_text(text, target))
    }

    fn send_position(&self) -> Result<(), MeshError> {
        self.write_line(&framer::encode_command("POSITION"))
    }

    fn reboot(&self) -> Result<(), MeshError> {
        info!("Requesting reboot of radio on {}", self.port_name);
        self.write_line(&framer::encode_command("REBOOT"))
    }

    fn reset_node_db(&self) -> Result<(), MeshError> {
        self.write_line(&framer::encode_command("RESET_NODEDB"))?;
        LinkShared::lock(&self.shared.nodes).clear();
        Ok(())
    }

    fn device_config(&self) -> Result<DeviceConfig, MeshError> {
        Ok(LinkShared::lock(&self.shared.config).clone())
    }

    fn write_config(&self, config: &DeviceConfig, section: ConfigSection) -> Result<(), MeshError> {
        let line = framer::encode_config(config, section)
            .map_err(|e| MeshError::Rejected(e.to_string()))?;
        self.write_line(&line)?;
        *LinkShared::lock(&self.shared.config) = config.clone();
        Ok(())
    }
}
