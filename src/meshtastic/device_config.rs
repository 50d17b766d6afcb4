//! Typed view of the radio's local configuration.
//!
//! The administrative `/set a.b value` command addresses fields by dotted path. Paths
//! are resolved against the serialized form of [`DeviceConfig`], so only fields that
//! actually exist can be written, and a value of the wrong kind is rejected before
//! anything reaches the device.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigPathError {
    #[error("unknown config path `{0}`")]
    UnknownPath(String),

    #[error("`{path}` expects {expected}, got `{found}`")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        found: String,
    },
}

/// Top-level sections; each is written back to the device as a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigSection {
    Device,
    Position,
    Power,
    Network,
    Display,
    Lora,
    Bluetooth,
}

impl ConfigSection {
    pub const ALL: [ConfigSection; 7] = [
        ConfigSection::Device,
        ConfigSection::Position,
        ConfigSection::Power,
        ConfigSection::Network,
        ConfigSection::Display,
        ConfigSection::Lora,
        ConfigSection::Bluetooth,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigSection::Device => "device",
            ConfigSection::Position => "position",
            ConfigSection::Power => "power",
            ConfigSection::Network => "network",
            ConfigSection::Display => "display",
            ConfigSection::Lora => "lora",
            ConfigSection::Bluetooth => "bluetooth",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == key)
    }
}

impl fmt::Display for ConfigSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value typed by an administrator, coerced the loose way operators expect:
/// `true`/`false` become booleans, all-digit strings become integers, anything else
/// stays text.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Bool(bool),
    Int(u64),
    Text(String),
}

impl ConfigValue {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "true" => return ConfigValue::Bool(true),
            "false" => return ConfigValue::Bool(false),
            _ => {}
        }
        if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(n) = trimmed.parse::<u64>() {
                return ConfigValue::Int(n);
            }
        }
        ConfigValue::Text(trimmed.to_string())
    }

    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(ConfigValue::Bool(*b)),
            Value::Number(n) => n.as_u64().map(ConfigValue::Int),
            Value::String(s) => Some(ConfigValue::Text(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Bool(b) => write!(f, "{}", b),
            ConfigValue::Int(n) => write!(f, "{}", n),
            ConfigValue::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSection {
    pub role: String,
    pub serial_enabled: bool,
    pub node_info_broadcast_secs: u32,
    pub rebroadcast_mode: String,
    pub tzdef: String,
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            role: "CLIENT".to_string(),
            serial_enabled: true,
            node_info_broadcast_secs: 10800,
            rebroadcast_mode: "ALL".to_string(),
            tzdef: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionSection {
    pub position_broadcast_secs: u32,
    pub position_broadcast_smart_enabled: bool,
    pub fixed_position: bool,
    pub gps_enabled: bool,
}

impl Default for PositionSection {
    fn default() -> Self {
        Self {
            position_broadcast_secs: 900,
            position_broadcast_smart_enabled: true,
            fixed_position: false,
            gps_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerSection {
    pub is_power_saving: bool,
    pub on_battery_shutdown_after_secs: u32,
    pub ls_secs: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSection {
    pub wifi_enabled: bool,
    pub wifi_ssid: String,
    pub ntp_server: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplaySection {
    pub screen_on_secs: u32,
    pub flip_screen: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoraSection {
    pub region: String,
    pub modem_preset: String,
    pub use_preset: bool,
    pub hop_limit: u32,
    pub tx_enabled: bool,
    pub tx_power: u32,
}

impl Default for LoraSection {
    fn default() -> Self {
        Self {
            region: "UNSET".to_string(),
            modem_preset: "LONG_FAST".to_string(),
            use_preset: true,
            hop_limit: 3,
            tx_enabled: true,
            tx_power: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothSection {
    pub enabled: bool,
    pub mode: String,
    pub fixed_pin: u32,
}

impl Default for BluetoothSection {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: "RANDOM_PIN".to_string(),
            fixed_pin: 123456,
        }
    }
}

/// The radio's local configuration tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub device: DeviceSection,
    pub position: PositionSection,
    pub power: PowerSection,
    pub network: NetworkSection,
    pub display: DisplaySection,
    pub lora: LoraSection,
    pub bluetooth: BluetoothSection,
}

impl DeviceConfig {
    /// Read the leaf at `path` (e.g. `lora.hop_limit`).
    pub fn get_path(&self, path: &str) -> Result<ConfigValue, ConfigPathError> {
        let (_, segments) = split_path(path)?;
        let tree = self.to_tree();
        let mut node = &tree;
        for seg in &segments {
            node = node
                .get(*seg)
                .ok_or_else(|| ConfigPathError::UnknownPath(path.to_string()))?;
        }
        ConfigValue::from_json(node).ok_or_else(|| ConfigPathError::UnknownPath(path.to_string()))
    }

    /// Assign `value` to the leaf at `path`, returning the section to write back.
    pub fn set_path(&mut self, path: &str, value: ConfigValue) -> Result<ConfigSection, ConfigPathError> {
        let (section, segments) = split_path(path)?;
        let mut tree = self.to_tree();

        let (leaf_key, parents) = match segments.split_last() {
            Some(split) => split,
            None => return Err(ConfigPathError::UnknownPath(path.to_string())),
        };
        let mut node = &mut tree;
        for seg in parents {
            node = node
                .get_mut(*seg)
                .filter(|v| v.is_object())
                .ok_or_else(|| ConfigPathError::UnknownPath(path.to_string()))?;
        }
        let slot = node
            .get_mut(*leaf_key)
            .ok_or_else(|| ConfigPathError::UnknownPath(path.to_string()))?;

        *slot = coerce(path, slot, value)?;

        let updated: DeviceConfig = serde_json::from_value(tree).map_err(|e| ConfigPathError::TypeMismatch {
            path: path.to_string(),
            expected: "a value in range",
            found: e.to_string(),
        })?;
        *self = updated;
        Ok(section)
    }

    /// Replace one section with a report from the device. Missing keys keep defaults.
    pub fn apply_section(&mut self, section: ConfigSection, body: Value) -> Result<(), serde_json::Error> {
        match section {
            ConfigSection::Device => self.device = serde_json::from_value(body)?,
            ConfigSection::Position => self.position = serde_json::from_value(body)?,
            ConfigSection::Power => self.power = serde_json::from_value(body)?,
            ConfigSection::Network => self.network = serde_json::from_value(body)?,
            ConfigSection::Display => self.display = serde_json::from_value(body)?,
            ConfigSection::Lora => self.lora = serde_json::from_value(body)?,
            ConfigSection::Bluetooth => self.bluetooth = serde_json::from_value(body)?,
        }
        Ok(())
    }

    fn to_tree(&self) -> Value {
        // Plain structs of strings, bools and integers always serialize.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn split_path(path: &str) -> Result<(ConfigSection, Vec<&str>), ConfigPathError> {
    let segments: Vec<&str> = path.trim().split('.').collect();
    if segments.len() < 2 || segments.iter().any(|s| s.is_empty()) {
        return Err(ConfigPathError::UnknownPath(path.to_string()));
    }
    let section = ConfigSection::from_key(segments[0])
        .ok_or_else(|| ConfigPathError::UnknownPath(path.to_string()))?;
    Ok((section, segments))
}

fn coerce(path: &str, current: &Value, value: ConfigValue) -> Result<Value, ConfigPathError> {
    let mismatch = |expected: &'static str, found: &ConfigValue| ConfigPathError::TypeMismatch {
        path: path.to_string(),
        expected,
        found: found.to_string(),
    };
    match (current, value) {
        (Value::Bool(_), ConfigValue::Bool(b)) => Ok(Value::Bool(b)),
        (Value::Bool(_), other) => Err(mismatch("true or false", &other)),
        (Value::Number(_), ConfigValue::Int(n)) => Ok(Value::from(n)),
        (Value::Number(_), other) => Err(mismatch("a whole number", &other)),
        (Value::String(_), other) => Ok(Value::String(other.to_string())),
        (_, other) => Err(mismatch("a leaf value", &other)),
    }
}
