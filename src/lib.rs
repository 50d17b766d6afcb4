//! # Meshbridge - Meshtastic ↔ Telegram relay
//!
//! Meshbridge connects a Meshtastic radio to a Telegram bot and relays text both ways:
//! two mesh channels are each paired with a group chat, direct messages to the local
//! node go to a single administrator, and that administrator gets a small command
//! console for inspecting and managing the node.
//!
//! ## Features
//!
//! - **Bidirectional relay**: `[name]: text` into chat, `[TG: name] text` onto the mesh,
//!   with long chat messages split into paced, numbered parts.
//! - **Node identity cache**: short/long names keyed by the 24-bit node suffix,
//!   persisted to JSON and refreshed from the live node table.
//! - **Monitors**: connectivity watchdog, new-node announcements, low-battery alerts
//!   for favorite nodes, periodic name refresh and a daily scheduled reboot.
//! - **Admin console**: statistics, node listings, favorites and device settings.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use meshbridge::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::load("config.toml").await?;
//!     config.apply_process_env()?;
//!     let settings = config.validate()?;
//!     println!("bridging {:?}", settings.channel_pairs());
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`bridge`] - Relay engine, dispatcher, monitors, admin console and server loop
//! - [`meshtastic`] - Mesh link abstraction and the serial transport
//! - [`chat`] - Chat client abstraction and the Telegram Bot API adapter
//! - [`storage`] - Atomic JSON file persistence
//! - [`config`] - Configuration loading, environment overrides and validation
//! - [`logutil`] - Log formatting helpers

pub mod bridge;
pub mod chat;
pub mod config;
pub mod logutil;
pub mod meshtastic;
pub mod storage;
