//! Administrator commands received over the private chat.
//!
//! [`AdminCommand::parse`] turns chat text into a command; [`AdminConsole::execute`]
//! runs it against the bridge state and the mesh link and always produces a reply.
//! Failures become reply text and never propagate.

use super::names::{Suffix, SuffixError};
use super::state::BridgeState;
use crate::logutil::preview;
use crate::meshtastic::{
    ConfigPathError, ConfigSection, ConfigValue, MeshError, MeshHandle, MeshInterface, MeshTarget,
    NodeRecord,
};
use chrono::{Local, TimeZone, Utc};
use log::{info, warn};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Nodes heard this recently count as direct neighbours.
const DIRECT_WINDOW_SECS: i64 = 300;
const SNR_WINDOW_SECS: i64 = 24 * 3600;
const TOP_N: usize = 5;
const LIST_LIMIT: usize = 10;
/// Delay between a node-db reset and the follow-up name refresh.
pub const NODEDB_REFRESH_DELAY: Duration = Duration::from_secs(5);

const HELP_TEXT: &str = "📊 Statistics:\n\
/stats - full statistics\n\
/uptime - bridge and radio uptime\n\
/direct - direct neighbours\n\
/battery - lowest battery voltages\n\
/battery_low - nodes below threshold\n\
/lastseen - last contact\n\
/nodeinfo <suffix> - node details\n\
/topnodes - most active nodes\n\
/stats_today - messages today\n\
/snr_stats - SNR summary\n\
\n🛠️ Management:\n\
/setname <suffix> <name> - set cached name\n\
/reload_names - refresh name cache\n\
/dump_cache - show name cache\n\
/reset_cache - clear name cache\n\
/reset_nodedb - reset radio node DB\n\
/reboot - reboot radio\n\
/pos - send position\n\
/ble true|false - bluetooth on/off\n\
/set <a.b> <value> - radio setting\n\
\n⭐ Favorites:\n\
/fav_add <name|suffix>\n\
/fav_del <name|suffix>\n\
/fav_list\n\
\n@<name|suffix> <text> - direct message to a node";

#[derive(Debug, Clone, PartialEq)]
pub enum AdminCommand {
    SendDirect { target: String, text: String },
    Help,
    Stats,
    Uptime,
    Direct,
    Battery,
    BatteryLow,
    LastSeen,
    NodeInfo(String),
    TopNodes,
    StatsToday,
    SnrStats,
    SetName { suffix: String, name: String },
    ResetCache,
    ReloadNames,
    DumpCache,
    ResetNodeDb,
    Reboot,
    Position,
    Ble(bool),
    Set { path: String, value: String },
    FavAdd(String),
    FavDel(String),
    FavList,
    Usage(&'static str),
    Unknown(String),
}

impl AdminCommand {
    /// `None` for text that is neither a command nor an `@` message.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if let Some(rest) = text.strip_prefix('@') {
            let mut split = rest.splitn(2, char::is_whitespace);
            let target = split.next().unwrap_or_default();
            let body = split.next().map(str::trim).unwrap_or_default();
            if target.is_empty() || body.is_empty() {
                return Some(AdminCommand::Usage("@<name|suffix> <text>"));
            }
            return Some(AdminCommand::SendDirect {
                target: target.to_string(),
                text: body.to_string(),
            });
        }

        let rest = text.strip_prefix('/')?;
        let mut words = rest.split_whitespace();
        let Some(head) = words.next() else {
            return Some(AdminCommand::Unknown(String::new()));
        };
        // Group-style `/cmd@botname` addressing
        let cmd = head.split('@').next().unwrap_or(head).to_lowercase();
        let args: Vec<&str> = words.collect();
        let first = args.first().map(|s| s.to_string());

        let command = match (cmd.as_str(), first) {
            ("help" | "start", _) => AdminCommand::Help,
            ("stats", _) => AdminCommand::Stats,
            ("uptime", _) => AdminCommand::Uptime,
            ("direct", _) => AdminCommand::Direct,
            ("battery", _) => AdminCommand::Battery,
            ("battery_low", _) => AdminCommand::BatteryLow,
            ("lastseen", _) => AdminCommand::LastSeen,
            ("nodeinfo", Some(s)) => AdminCommand::NodeInfo(s),
            ("nodeinfo", None) => AdminCommand::Usage("/nodeinfo <suffix>"),
            ("topnodes", _) => AdminCommand::TopNodes,
            ("stats_today", _) => AdminCommand::StatsToday,
            ("snr_stats", _) => AdminCommand::SnrStats,
            ("setname", Some(suffix)) if args.len() >= 2 => AdminCommand::SetName {
                suffix,
                name: args[1..].join(" "),
            },
            ("setname", _) => AdminCommand::Usage("/setname <suffix> <name>"),
            ("reset_cache", _) => AdminCommand::ResetCache,
            ("reload_names", _) => AdminCommand::ReloadNames,
            ("dump_cache", _) => AdminCommand::DumpCache,
            ("reset_nodedb", _) => AdminCommand::ResetNodeDb,
            ("reboot", _) => AdminCommand::Reboot,
            ("pos", _) => AdminCommand::Position,
            ("ble", Some(v)) => match v.to_lowercase().as_str() {
                "true" | "on" | "1" => AdminCommand::Ble(true),
                "false" | "off" | "0" => AdminCommand::Ble(false),
                _ => AdminCommand::Usage("/ble true|false"),
            },
            ("ble", None) => AdminCommand::Usage("/ble true|false"),
            ("set", Some(path)) if args.len() >= 2 => AdminCommand::Set {
                path,
                value: args[1..].join(" "),
            },
            ("set", _) => AdminCommand::Usage("/set <a.b> <value>"),
            ("fav_add", Some(t)) => AdminCommand::FavAdd(t),
            ("fav_add", None) => AdminCommand::Usage("/fav_add <name|suffix>"),
            ("fav_del", Some(t)) => AdminCommand::FavDel(t),
            ("fav_del", None) => AdminCommand::Usage("/fav_del <name|suffix>"),
            ("fav_list", _) => AdminCommand::FavList,
            (other, _) => AdminCommand::Unknown(other.to_string()),
        };
        Some(command)
    }
}

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("❌ No connection to Meshtastic")]
    NotConnected,

    #[error("❌ Node '{0}' not found in cache")]
    NotInCache(String),

    #[error("❌ Node '{0}' is not online")]
    NotOnline(String),

    #[error("❌ Node {0} not found")]
    NoSuchNode(String),

    #[error("❌ {0}")]
    BadSuffix(#[from] SuffixError),

    #[error("❌ Node '{0}' is not in favorites")]
    NotFavorite(String),

    #[error("❌ {0}")]
    Setting(#[from] ConfigPathError),

    #[error("⚠️ Error: {0}")]
    Mesh(MeshError),
}

impl From<MeshError> for AdminError {
    fn from(e: MeshError) -> Self {
        match e {
            MeshError::Unavailable => AdminError::NotConnected,
            MeshError::Config(e) => AdminError::Setting(e),
            other => AdminError::Mesh(other),
        }
    }
}

type Reply = Result<String, AdminError>;

/// Executes administrator commands.
pub struct AdminConsole {
    state: Arc<BridgeState>,
    mesh: MeshHandle,
    battery_threshold: f32,
    nodedb_refresh_delay: Duration,
}

impl AdminConsole {
    pub fn new(state: Arc<BridgeState>, mesh: MeshHandle, battery_threshold: f32) -> Self {
        Self {
            state,
            mesh,
            battery_threshold,
            nodedb_refresh_delay: NODEDB_REFRESH_DELAY,
        }
    }

    /// Parse and run `text`. `None` when the text is not a command.
    pub async fn handle(&self, text: &str) -> Option<String> {
        let command = AdminCommand::parse(text)?;
        info!("Admin command: {}", preview(text));
        Some(self.execute(command).await)
    }

    pub async fn execute(&self, command: AdminCommand) -> String {
        let result = match command {
            AdminCommand::SendDirect { target, text } => self.send_direct(&target, &text),
            AdminCommand::Help => Ok(HELP_TEXT.to_string()),
            AdminCommand::Stats => Ok(self.full_stats()),
            AdminCommand::Uptime => Ok(self.uptime()),
            AdminCommand::Direct => self.direct_neighbours(),
            AdminCommand::Battery => self.battery(),
            AdminCommand::BatteryLow => self.battery_low(),
            AdminCommand::LastSeen => self.last_seen(),
            AdminCommand::NodeInfo(s) => self.node_info(&s),
            AdminCommand::TopNodes => Ok(self.top_nodes()),
            AdminCommand::StatsToday => Ok(self.stats_today()),
            AdminCommand::SnrStats => Ok(self.snr_summary().unwrap_or_else(|| "No SNR data.".to_string())),
            AdminCommand::SetName { suffix, name } => self.set_name(&suffix, &name),
            AdminCommand::ResetCache => {
                self.state.reset_names();
                Ok("🗑 Name cache cleared.".to_string())
            }
            AdminCommand::ReloadNames => Ok(self.reload_names()),
            AdminCommand::DumpCache => Ok(self.dump_cache()),
            AdminCommand::ResetNodeDb => self.reset_node_db(),
            AdminCommand::Reboot => self
                .link()
                .and_then(|link| Ok(link.reboot()?))
                .map(|()| "🔄 Reboot started".to_string()),
            AdminCommand::Position => self
                .link()
                .and_then(|link| Ok(link.send_position()?))
                .map(|()| "📍 Position sent".to_string()),
            AdminCommand::Ble(enabled) => self.set_ble(enabled),
            AdminCommand::Set { path, value } => self.set_config(&path, &value),
            AdminCommand::FavAdd(target) => self.fav_add(&target),
            AdminCommand::FavDel(target) => self.fav_del(&target),
            AdminCommand::FavList => Ok(self.fav_list()),
            AdminCommand::Usage(usage) => Ok(format!("❌ Usage: {}", usage)),
            AdminCommand::Unknown(_) => Ok("❓ Unknown command. Try /help".to_string()),
        };
        result.unwrap_or_else(|e| {
            warn!("Admin command failed: {}", e);
            e.to_string()
        })
    }

    fn link(&self) -> Result<Arc<dyn MeshInterface>, AdminError> {
        self.mesh.current().ok_or(AdminError::NotConnected)
    }

    fn nodes(&self) -> Result<Vec<NodeRecord>, AdminError> {
        self.mesh.nodes().ok_or(AdminError::NotConnected)
    }

    /// Node table without the local radio itself.
    fn remote_nodes(&self) -> Result<Vec<NodeRecord>, AdminError> {
        let local = self.mesh.current().and_then(|l| l.local_node_id());
        let mut nodes = self.nodes()?;
        nodes.retain(|n| Some(n.id) != local);
        Ok(nodes)
    }

    fn name_of(&self, node_id: u32) -> String {
        self.state.names.lookup_name(Suffix::from_node_id(node_id))
    }

    fn send_direct(&self, target: &str, text: &str) -> Reply {
        let suffix = self
            .state
            .names
            .find_by_name_or_suffix(target)
            .ok_or_else(|| AdminError::NotInCache(target.to_string()))?;
        let node = self
            .nodes()?
            .into_iter()
            .find(|n| suffix.matches(n.id))
            .ok_or_else(|| AdminError::NotOnline(target.to_string()))?;
        self.link()?.send_text(text, MeshTarget::Node(node.id))?;
        info!("Direct message to {} ({})", target, suffix);
        Ok(format!("📨 Sent to {}: {}", target, text))
    }

    fn uptime(&self) -> String {
        let mut reply = format!("⏱ Bridge uptime: {}", format_hm(self.state.uptime().as_secs()));
        if let Some(device) = self.mesh.current().and_then(|l| l.local_uptime_secs()) {
            let _ = write!(reply, "\n⏱ Radio uptime: {}", format_hm(device));
        }
        reply
    }

    fn snr_summary(&self) -> Option<String> {
        let snrs: Vec<f32> = self.mesh.nodes()?.iter().filter_map(|n| n.snr).collect();
        if snrs.is_empty() {
            return None;
        }
        let min = snrs.iter().copied().fold(f32::INFINITY, f32::min);
        let max = snrs.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let avg = snrs.iter().sum::<f32>() / snrs.len() as f32;
        Some(format!("SNR: min={:.1}, max={:.1}, avg={:.1}", min, max, avg))
    }

    fn top_lines(&self) -> Vec<String> {
        self.state
            .top_nodes(TOP_N)
            .into_iter()
            .map(|(s, c)| format!("{}: {}", self.state.names.lookup_name(s), c))
            .collect()
    }

    fn today_lines(&self) -> Vec<String> {
        self.state
            .counts_on(Local::now().date_naive())
            .into_iter()
            .map(|(s, c)| format!("{}: {}", self.state.names.lookup_name(s), c))
            .collect()
    }

    fn full_stats(&self) -> String {
        let mut parts = vec!["📊 Full statistics:".to_string(), String::new(), self.uptime()];
        let stats = self.state.stats();
        parts.push(format!(
            "✉️ Relayed: mesh→chat {}, chat→mesh {}",
            stats.mesh_to_chat, stats.chat_to_mesh
        ));
        if let Some(snr) = self.snr_summary() {
            parts.push(format!("\n📡 {}", snr));
        }

        let now = Utc::now().timestamp();
        let mut recent: Vec<(f32, String)> = self
            .mesh
            .nodes()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|n| {
                let snr = n.snr?;
                let heard = n.last_heard.unwrap_or(0);
                (now - heard <= SNR_WINDOW_SECS).then(|| (snr, self.name_of(n.id)))
            })
            .collect();
        if !recent.is_empty() {
            recent.sort_by(|a, b| b.0.total_cmp(&a.0));
            parts.push("\n🏆 Top 5 nodes by SNR (24h):".to_string());
            parts.extend(recent.into_iter().take(TOP_N).map(|(snr, name)| format!("{} (SNR: {:.1})", name, snr)));
        }

        let top = self.top_lines();
        if !top.is_empty() {
            parts.push("\n🏆 Top 5 nodes by messages:".to_string());
            parts.extend(top);
        }
        let today = self.today_lines();
        if !today.is_empty() {
            parts.push("\n📈 Messages today:".to_string());
            parts.extend(today);
        }
        let watched = self.state.battery_snapshot();
        if !watched.is_empty() {
            parts.push("\n🔋 Favorite batteries:".to_string());
            parts.extend(
                watched
                    .into_iter()
                    .map(|(s, v)| format!("{}: {:.2}V", self.state.names.lookup_name(s), v)),
            );
        }
        parts.join("\n")
    }

    fn direct_neighbours(&self) -> Reply {
        let now = Utc::now().timestamp();
        let mut lines = Vec::new();
        for node in self.remote_nodes()? {
            let snr = node.snr.unwrap_or(-99.0);
            if snr < 0.0 {
                continue;
            }
            let name = self.name_of(node.id);
            match node.last_heard {
                Some(heard) if now - heard <= DIRECT_WINDOW_SECS => {
                    lines.push(format!("{} (SNR:{:.1})", name, snr))
                }
                Some(_) => {}
                None => lines.push(format!("{} (SNR:{:.1}, time unknown)", name, snr)),
            }
        }
        if lines.is_empty() {
            return Ok("📡 No direct neighbours found".to_string());
        }
        Ok(format!("📡 Direct neighbours ({}):\n{}", lines.len(), lines.join("\n")))
    }

    fn battery(&self) -> Reply {
        let mut readings: Vec<(f32, String)> = self
            .remote_nodes()?
            .into_iter()
            .filter_map(|n| n.voltage().map(|v| (v, self.name_of(n.id))))
            .collect();
        if readings.is_empty() {
            return Ok("🔋 No battery data received".to_string());
        }
        readings.sort_by(|a, b| a.0.total_cmp(&b.0));
        let lines: Vec<String> = readings
            .into_iter()
            .take(LIST_LIMIT)
            .map(|(v, name)| format!("{}: {:.2}V", name, v))
            .collect();
        Ok(format!("🔋 Battery voltage (10 lowest):\n{}", lines.join("\n")))
    }

    fn battery_low(&self) -> Reply {
        let lines: Vec<String> = self
            .nodes()?
            .into_iter()
            .filter_map(|n| {
                let v = n.voltage().filter(|v| *v < self.battery_threshold)?;
                Some(format!("{}: {:.2}V", self.name_of(n.id), v))
            })
            .collect();
        if lines.is_empty() {
            return Ok("No nodes with low battery.".to_string());
        }
        Ok(format!("🔋 Low battery:\n{}", lines.join("\n")))
    }

    fn last_seen(&self) -> Reply {
        let now = Utc::now().timestamp();
        let mut nodes = self.nodes()?;
        nodes.sort_by_key(|n| std::cmp::Reverse(n.last_heard));
        let lines: Vec<String> = nodes
            .iter()
            .take(LIST_LIMIT)
            .map(|n| match n.last_heard {
                Some(heard) => format!("{}: {} min ago", self.name_of(n.id), (now - heard).max(0) / 60),
                None => format!("{}: no data", self.name_of(n.id)),
            })
            .collect();
        if lines.is_empty() {
            return Ok("No data.".to_string());
        }
        Ok(format!("⏰ Last contact:\n{}", lines.join("\n")))
    }

    fn node_info(&self, raw: &str) -> Reply {
        let suffix = Suffix::parse(raw)?;
        let node = self
            .nodes()?
            .into_iter()
            .find(|n| suffix.matches(n.id))
            .ok_or_else(|| AdminError::NoSuchNode(suffix.to_string()))?;
        let snr = node.snr.map_or("N/A".to_string(), |s| format!("{:.1}", s));
        let voltage = node.voltage().map_or("N/A".to_string(), |v| format!("{:.2}V", v));
        let heard = node
            .last_heard
            .and_then(|t| Local.timestamp_opt(t, 0).single())
            .map_or("unknown".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string());
        let history: Vec<String> = self
            .state
            .node_history(suffix)
            .into_iter()
            .map(|(d, c)| format!("{} {}", d.format("%m-%d"), c))
            .collect();
        let mut reply = format!(
            "ℹ️ Node {} ({}):\nSNR: {}\nBattery: {}\nLast contact: {}",
            self.state.names.lookup_name(suffix),
            suffix,
            snr,
            voltage,
            heard
        );
        if !history.is_empty() {
            let _ = write!(reply, "\nMessages: {}", history.join(", "));
        }
        Ok(reply)
    }

    fn top_nodes(&self) -> String {
        let top = self.top_lines();
        if top.is_empty() {
            return "No node activity yet.".to_string();
        }
        format!("🏆 Top 5 nodes by messages:\n{}", top.join("\n"))
    }

    fn stats_today(&self) -> String {
        let today = self.today_lines();
        if today.is_empty() {
            return "No messages today.".to_string();
        }
        format!("📈 Messages today:\n{}", today.join("\n"))
    }

    fn set_name(&self, raw: &str, name: &str) -> Reply {
        let suffix = Suffix::parse(raw)?;
        self.state.names.upsert(suffix, name);
        Ok(format!("✅ Name for {} set: {}", suffix, name.trim()))
    }

    fn reload_names(&self) -> String {
        let nodes = self.mesh.nodes();
        let report = self.state.names.bulk_refresh(nodes.as_deref());
        format!(
            "🔄 Name cache refreshed:\nAdded: {}\nUpdated: {}\nTotal: {} nodes",
            report.added, report.updated, report.total
        )
    }

    fn dump_cache(&self) -> String {
        let entries = self.state.names.snapshot();
        if entries.is_empty() {
            return "Cache is empty".to_string();
        }
        let lines: Vec<String> = entries.iter().map(|(s, n)| format!("{}: {}", s, n)).collect();
        format!("Name cache:\n{}", lines.join("\n"))
    }

    fn reset_node_db(&self) -> Reply {
        self.link()?.reset_node_db()?;
        let state = Arc::clone(&self.state);
        let mesh = self.mesh.clone();
        let delay = self.nodedb_refresh_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let nodes = mesh.nodes();
            state.names.bulk_refresh(nodes.as_deref());
        });
        Ok("🗑 Node DB reset. Names refresh shortly...".to_string())
    }

    fn set_ble(&self, enabled: bool) -> Reply {
        let link = self.link()?;
        let mut config = link.device_config()?;
        config.bluetooth.enabled = enabled;
        link.write_config(&config, ConfigSection::Bluetooth)?;
        Ok(format!("✅ BLE {}", if enabled { "enabled" } else { "disabled" }))
    }

    fn set_config(&self, path: &str, raw: &str) -> Reply {
        let link = self.link()?;
        let mut config = link.device_config()?;
        let value = ConfigValue::parse(raw);
        let section = config.set_path(path, value.clone())?;
        link.write_config(&config, section)?;
        info!("Radio setting {} = {}", path, value);
        Ok(format!("✅ {} = {}", path, value))
    }

    /// Resolve a favorite target: cached name or suffix first, then any 6-hex suffix.
    fn resolve_target(&self, target: &str) -> Result<Suffix, AdminError> {
        match self.state.names.find_by_name_or_suffix(target) {
            Some(suffix) => Ok(suffix),
            None => Ok(Suffix::parse(target)?),
        }
    }

    fn fav_add(&self, target: &str) -> Reply {
        let suffix = self.resolve_target(target)?;
        let name = self.state.names.lookup_name(suffix);
        if self.state.favorites.add(suffix) {
            Ok(format!("✅ {} added to favorites", name))
        } else {
            Ok(format!("ℹ️ {} is already a favorite", name))
        }
    }

    fn fav_del(&self, target: &str) -> Reply {
        let wanted = Suffix::parse(target).ok();
        let found = self
            .state
            .favorites
            .list()
            .into_iter()
            .find(|s| Some(*s) == wanted || self.state.names.lookup_name(*s) == target);
        match found {
            Some(suffix) if self.state.favorites.remove(suffix) => Ok("🗑 Removed from favorites".to_string()),
            _ => Err(AdminError::NotFavorite(target.to_string())),
        }
    }

    fn fav_list(&self) -> String {
        let favorites = self.state.favorites.list();
        if favorites.is_empty() {
            return "📭 Favorites list is empty".to_string();
        }
        let lines: Vec<String> = favorites
            .iter()
            .map(|s| format!("{} ({})", self.state.names.lookup_name(*s), s))
            .collect();
        format!("⭐ Favorite nodes:\n{}", lines.join("\n"))
    }
}

fn format_hm(secs: u64) -> String {
    format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
}
