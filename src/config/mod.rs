//! # Configuration Management Module
//!
//! Configuration is read from a TOML file and may be overridden by environment
//! variables, following the precedence: Environment > Config file > Defaults.
//!
//! ## Configuration Structure
//!
//! - [`TelegramConfig`] - Bot credential, bridged chats and the administrator
//! - [`MeshtasticConfig`] - Serial link and the two bridged channel indices
//! - [`RelayConfig`] - Chunking limit and inter-part pacing for mesh sends
//! - [`MonitorConfig`] - Periodic task intervals, battery threshold, maintenance time
//! - [`StorageConfig`] - Data directory for the JSON stores
//! - [`LoggingConfig`] - Log level and optional log file
//!
//! ## Configuration File Format
//!
//! ```toml
//! [telegram]
//! bot_token = "123456:ABC..."
//! public_chat_id = -1001234567890
//! private_chat_id = -1009876543210
//! admin_user_id = 123456789
//!
//! [meshtastic]
//! port = "/dev/ttyACM0"
//! baud_rate = 115200
//! public_channel = 0
//! private_channel = 1
//! ```
//!
//! ## Environment Overrides
//!
//! `TELEGRAM_BOT_TOKEN`, `CHAT_ID_PUBLIC`, `CHAT_ID_PRIVATE`, `MESH_CHANNEL_PUBLIC`,
//! `MESH_CHANNEL_PRIVATE` and `ADMIN_USER_ID` replace the matching file values. A value
//! that fails to parse is a startup error, never silently ignored.
//!
//! ## Validation
//!
//! [`Config::validate`] turns the loose file form into immutable [`BridgeSettings`].
//! Startup stops before any connection attempt when a required value is missing or
//! malformed.

use anyhow::{anyhow, Result};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::fs;

/// Meshtastic devices expose channel slots 0..=7.
pub const MAX_CHANNEL_INDEX: u32 = 7;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("required setting `{0}` is missing")]
    Missing(&'static str),

    #[error("setting `{field}` has invalid value `{value}`: {reason}")]
    Invalid {
        field: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, value: impl ToString, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default)]
    pub public_chat_id: Option<i64>,
    #[serde(default)]
    pub private_chat_id: Option<i64>,
    #[serde(default)]
    pub admin_user_id: Option<i64>,
    /// Long-poll timeout passed to getUpdates (seconds)
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
}

fn default_poll_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshtasticConfig {
    pub port: String,
    pub baud_rate: u32,
    #[serde(default)]
    pub public_channel: Option<u32>,
    #[serde(default)]
    pub private_channel: Option<u32>,
    /// Fixed delay between connection attempts (seconds)
    #[serde(default = "default_reconnect_backoff")]
    pub reconnect_backoff_secs: u64,
}

fn default_reconnect_backoff() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Longest mesh text part, in characters
    pub max_part_chars: usize,
    /// Pause between consecutive parts of one chat message (ms)
    pub part_delay_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_part_chars: 80,
            part_delay_ms: 800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub watchdog_interval_secs: u64,
    pub new_node_interval_secs: u64,
    pub battery_interval_secs: u64,
    pub name_refresh_interval_secs: u64,
    pub battery_low_threshold: f32,
    /// Local wall-clock time of the daily reboot, `HH:MM`
    pub maintenance_time: String,
    #[serde(default = "default_true")]
    pub maintenance_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            watchdog_interval_secs: 300,
            new_node_interval_secs: 60,
            battery_interval_secs: 60,
            name_refresh_interval_secs: 1800,
            battery_low_threshold: 3.5,
            maintenance_time: "00:15".to_string(),
            maintenance_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,
    pub meshtastic: MeshtasticConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields `None` so a deployment can run
    /// from environment variables alone.
    pub async fn load_optional(path: &str) -> Result<Option<Self>> {
        match fs::try_exists(path).await {
            Ok(false) => Ok(None),
            _ => Self::load(path).await.map(Some),
        }
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Apply overrides from the process environment.
    pub fn apply_process_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup (the process environment in production).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(token) = get("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = Some(token);
        }
        if let Some(raw) = get("CHAT_ID_PUBLIC") {
            self.telegram.public_chat_id = Some(parse_env("CHAT_ID_PUBLIC", &raw)?);
        }
        if let Some(raw) = get("CHAT_ID_PRIVATE") {
            self.telegram.private_chat_id = Some(parse_env("CHAT_ID_PRIVATE", &raw)?);
        }
        if let Some(raw) = get("ADMIN_USER_ID") {
            self.telegram.admin_user_id = Some(parse_env("ADMIN_USER_ID", &raw)?);
        }
        if let Some(raw) = get("MESH_CHANNEL_PUBLIC") {
            self.meshtastic.public_channel = Some(parse_env("MESH_CHANNEL_PUBLIC", &raw)?);
        }
        if let Some(raw) = get("MESH_CHANNEL_PRIVATE") {
            self.meshtastic.private_channel = Some(parse_env("MESH_CHANNEL_PRIVATE", &raw)?);
        }
        Ok(())
    }

    /// Check every required value and produce the immutable runtime settings.
    pub fn validate(&self) -> Result<BridgeSettings, ConfigError> {
        let bot_token = self
            .telegram
            .bot_token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or(ConfigError::Missing("telegram.bot_token"))?;
        let public_chat = self
            .telegram
            .public_chat_id
            .ok_or(ConfigError::Missing("telegram.public_chat_id"))?;
        let private_chat = self
            .telegram
            .private_chat_id
            .ok_or(ConfigError::Missing("telegram.private_chat_id"))?;
        let admin_user_id = self
            .telegram
            .admin_user_id
            .ok_or(ConfigError::Missing("telegram.admin_user_id"))?;
        let public_channel = self
            .meshtastic
            .public_channel
            .ok_or(ConfigError::Missing("meshtastic.public_channel"))?;
        let private_channel = self
            .meshtastic
            .private_channel
            .ok_or(ConfigError::Missing("meshtastic.private_channel"))?;

        for (field, ch) in [
            ("meshtastic.public_channel", public_channel),
            ("meshtastic.private_channel", private_channel),
        ] {
            if ch > MAX_CHANNEL_INDEX {
                return Err(ConfigError::invalid(field, ch, "channel index must be 0-7"));
            }
        }
        if public_channel == private_channel {
            return Err(ConfigError::invalid(
                "meshtastic.private_channel",
                private_channel,
                "public and private channels must differ",
            ));
        }
        if public_chat == private_chat {
            return Err(ConfigError::invalid(
                "telegram.private_chat_id",
                private_chat,
                "public and private chats must differ",
            ));
        }
        if self.relay.max_part_chars == 0 {
            return Err(ConfigError::invalid("relay.max_part_chars", 0, "must be positive"));
        }
        let threshold = self.monitor.battery_low_threshold;
        if !(threshold.is_finite() && threshold > 0.0) {
            return Err(ConfigError::invalid(
                "monitor.battery_low_threshold",
                threshold,
                "must be a positive voltage",
            ));
        }
        let maintenance_at = NaiveTime::parse_from_str(self.monitor.maintenance_time.trim(), "%H:%M")
            .map_err(|e| {
                ConfigError::invalid("monitor.maintenance_time", &self.monitor.maintenance_time, e.to_string())
            })?;

        let secs = |field: &'static str, v: u64| {
            if v == 0 {
                Err(ConfigError::invalid(field, v, "interval must be positive"))
            } else {
                Ok(Duration::from_secs(v))
            }
        };

        Ok(BridgeSettings {
            bot_token,
            poll_timeout: Duration::from_secs(self.telegram.poll_timeout_secs),
            public_chat,
            private_chat,
            admin_user_id,
            public_channel,
            private_channel,
            port: self.meshtastic.port.clone(),
            baud_rate: self.meshtastic.baud_rate,
            reconnect_backoff: secs("meshtastic.reconnect_backoff_secs", self.meshtastic.reconnect_backoff_secs)?,
            data_dir: PathBuf::from(&self.storage.data_dir),
            relay: RelaySettings {
                max_part_chars: self.relay.max_part_chars,
                part_delay: Duration::from_millis(self.relay.part_delay_ms),
            },
            monitor: MonitorSettings {
                watchdog_interval: secs("monitor.watchdog_interval_secs", self.monitor.watchdog_interval_secs)?,
                new_node_interval: secs("monitor.new_node_interval_secs", self.monitor.new_node_interval_secs)?,
                battery_interval: secs("monitor.battery_interval_secs", self.monitor.battery_interval_secs)?,
                name_refresh_interval: secs(
                    "monitor.name_refresh_interval_secs",
                    self.monitor.name_refresh_interval_secs,
                )?,
                battery_low_threshold: threshold,
                maintenance_at,
                maintenance_enabled: self.monitor.maintenance_enabled,
            },
        })
    }
}

fn parse_env<T>(field: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| ConfigError::invalid(field, raw, e.to_string()))
}

impl Default for Config {
    fn default() -> Self {
        Config {
            telegram: TelegramConfig {
                bot_token: None,
                public_chat_id: None,
                private_chat_id: None,
                admin_user_id: None,
                poll_timeout_secs: default_poll_timeout(),
            },
            meshtastic: MeshtasticConfig {
                port: "/dev/ttyACM0".to_string(),
                baud_rate: 115200,
                public_channel: Some(0),
                private_channel: Some(1),
                reconnect_backoff_secs: default_reconnect_backoff(),
            },
            relay: RelayConfig::default(),
            monitor: MonitorConfig::default(),
            storage: StorageConfig {
                data_dir: "./data".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                file: Some("meshbridge.log".to_string()),
            },
        }
    }
}

/// Validated, immutable settings the bridge runs with.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub bot_token: String,
    pub poll_timeout: Duration,
    pub public_chat: i64,
    pub private_chat: i64,
    pub admin_user_id: i64,
    pub public_channel: u32,
    pub private_channel: u32,
    pub port: String,
    pub baud_rate: u32,
    pub reconnect_backoff: Duration,
    pub data_dir: PathBuf,
    pub relay: RelaySettings,
    pub monitor: MonitorSettings,
}

impl BridgeSettings {
    /// The two bridged (channel, chat) pairs, public first.
    pub fn channel_pairs(&self) -> [(u32, i64); 2] {
        [
            (self.public_channel, self.public_chat),
            (self.private_channel, self.private_chat),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub max_part_chars: usize,
    pub part_delay: Duration,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            max_part_chars: 80,
            part_delay: Duration::from_millis(800),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub watchdog_interval: Duration,
    pub new_node_interval: Duration,
    pub battery_interval: Duration,
    pub name_refresh_interval: Duration,
    pub battery_low_threshold: f32,
    pub maintenance_at: NaiveTime,
    pub maintenance_enabled: bool,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            watchdog_interval: Duration::from_secs(300),
            new_node_interval: Duration::from_secs(60),
            battery_interval: Duration::from_secs(60),
            name_refresh_interval: Duration::from_secs(1800),
            battery_low_threshold: 3.5,
            maintenance_at: NaiveTime::from_hms_opt(0, 15, 0).unwrap_or(NaiveTime::MIN),
            maintenance_enabled: true,
        }
    }
}
