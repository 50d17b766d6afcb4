//! # Bridge Core Module
//!
//! Everything between the mesh link and the chat service.
//!
//! ## Components
//!
//! - [`server`] - Startup, link supervision and the chat polling loop
//! - [`relay`] - Mesh → chat ingress and chat → mesh chunked egress
//! - [`dispatch`] - FIFO hand-off from the transport thread to the runtime
//! - [`monitor`] - Periodic watchdog, new-node, battery, name refresh and reboot tasks
//! - [`admin`] - Command console for the administrator's private chat
//! - [`state`] - Shared counters, activity history, battery latches and seen nodes
//! - [`names`] - Persistent node suffix → display name cache
//! - [`favorites`] - Persistent set of watched nodes
//! - [`router`] - Mesh channel ↔ chat id mapping
//! - [`chunking`] - Splitting long chat messages into mesh-sized parts
//!
//! ```text
//! ┌──────────────┐   packets    ┌──────────────┐  intents  ┌──────────────┐
//! │  Mesh link   │ ───────────► │ RelayEngine  │ ────────► │  Dispatcher  │ ──► chat
//! └──────────────┘              └──────────────┘           └──────────────┘
//!        ▲                              │
//!        └──────── chunked text ────────┘ ◄── group messages ── BridgeServer
//! ```

pub mod admin;
pub mod chunking;
pub mod dispatch;
pub mod favorites;
pub mod monitor;
pub mod names;
pub mod relay;
pub mod router;
pub mod server;
pub mod state;

pub use admin::{AdminCommand, AdminConsole};
pub use relay::{IngressOutcome, RelayEngine};
pub use server::BridgeServer;
pub use state::BridgeState;

use std::sync::{Mutex, MutexGuard};

/// Lock `m`, taking the guard back from a poisoned mutex. Shared state here is
/// always left consistent between statements, so a panic elsewhere must not wedge it.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
