//! Periodic reconciliation tasks.
//!
//! Each monitor implements [`MonitorTask`] and is driven by [`spawn_monitor`]. Every
//! cycle runs in its own spawned task, so an error or a panic inside one cycle is
//! logged and the monitor simply carries on at its next interval. `run_cycle` is the
//! single-cycle entry point used directly by tests.

use super::names::Suffix;
use super::state::{BatteryTransition, BridgeState};
use crate::chat::ChatClient;
use crate::config::MonitorSettings;
use crate::meshtastic::MeshHandle;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{Local, NaiveDateTime, NaiveTime};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

#[async_trait]
pub trait MonitorTask: Send + 'static {
    fn name(&self) -> &'static str;

    /// Wait before each cycle.
    fn wait_before(&self) -> Duration {
        Duration::ZERO
    }

    /// Wait after each cycle, whether it succeeded or not.
    fn wait_after(&self) -> Duration;

    async fn run_cycle(&mut self) -> anyhow::Result<()>;
}

/// Run `task` forever on the current runtime.
pub fn spawn_monitor<T: MonitorTask>(task: T) -> JoinHandle<()> {
    let name = task.name();
    let task = Arc::new(tokio::sync::Mutex::new(task));
    tokio::spawn(async move {
        info!("Monitor {} started", name);
        loop {
            let before = task.lock().await.wait_before();
            if !before.is_zero() {
                debug!("{}: next cycle in {}s", name, before.as_secs());
                tokio::time::sleep(before).await;
            }

            let cycle_task = Arc::clone(&task);
            let cycle = tokio::spawn(async move { cycle_task.lock().await.run_cycle().await });
            match cycle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("{} cycle failed: {:#}", name, e),
                Err(e) if e.is_panic() => error!("{} cycle panicked; continuing", name),
                Err(e) => warn!("{} cycle aborted: {}", name, e),
            }

            let after = task.lock().await.wait_after();
            tokio::time::sleep(after).await;
        }
    })
}

/// What every monitor reads from and reports to.
#[derive(Clone)]
pub struct MonitorContext {
    pub state: Arc<BridgeState>,
    pub mesh: MeshHandle,
    pub chat: Arc<dyn ChatClient>,
    pub admin_chat: i64,
}

impl MonitorContext {
    async fn notify_admin(&self, text: &str) -> anyhow::Result<()> {
        self.chat
            .send_text(self.admin_chat, text)
            .await
            .context("admin notification failed")
    }
}

/// Edge-triggered alert when the node table goes empty or unavailable.
pub struct ConnectivityWatchdog {
    ctx: MonitorContext,
    interval: Duration,
    alerted: bool,
}

impl ConnectivityWatchdog {
    pub fn new(ctx: MonitorContext, interval: Duration) -> Self {
        Self {
            ctx,
            interval,
            alerted: false,
        }
    }
}

#[async_trait]
impl MonitorTask for ConnectivityWatchdog {
    fn name(&self) -> &'static str {
        "connectivity-watchdog"
    }

    fn wait_after(&self) -> Duration {
        self.interval
    }

    async fn run_cycle(&mut self) -> anyhow::Result<()> {
        let healthy = self.ctx.mesh.nodes().is_some_and(|nodes| !nodes.is_empty());
        if healthy {
            if std::mem::take(&mut self.alerted) {
                info!("Mesh node table is back");
            }
            return Ok(());
        }
        if !self.alerted {
            warn!("Mesh node table empty or unavailable");
            self.ctx.notify_admin("⚠️ Lost connection to Meshtastic!").await?;
            self.alerted = true;
        }
        Ok(())
    }
}

/// Announces suffixes that appear in the node table for the first time.
pub struct NewNodeDetector {
    ctx: MonitorContext,
    interval: Duration,
}

impl NewNodeDetector {
    pub fn new(ctx: MonitorContext, interval: Duration) -> Self {
        Self { ctx, interval }
    }
}

#[async_trait]
impl MonitorTask for NewNodeDetector {
    fn name(&self) -> &'static str {
        "new-node-detector"
    }

    fn wait_after(&self) -> Duration {
        self.interval
    }

    async fn run_cycle(&mut self) -> anyhow::Result<()> {
        let Some(nodes) = self.ctx.mesh.nodes() else {
            return Ok(());
        };
        let state = &self.ctx.state;
        let fresh = state.absorb_seen(nodes.iter().map(|n| Suffix::from_node_id(n.id)));
        if fresh.is_empty() {
            return Ok(());
        }
        let mut names: Vec<String> = fresh.iter().map(|s| state.names.lookup_name(*s)).collect();
        names.sort();
        info!("{} new node(s) detected", names.len());
        self.ctx
            .notify_admin(&format!("🆕 New nodes detected:\n{}", names.join("\n")))
            .await
    }
}

/// Low-voltage alerts for favorite nodes with a hysteresis latch. Recovery clears the
/// latch silently.
pub struct BatteryHysteresisMonitor {
    ctx: MonitorContext,
    interval: Duration,
    threshold: f32,
}

impl BatteryHysteresisMonitor {
    pub fn new(ctx: MonitorContext, interval: Duration, threshold: f32) -> Self {
        Self {
            ctx,
            interval,
            threshold,
        }
    }
}

#[async_trait]
impl MonitorTask for BatteryHysteresisMonitor {
    fn name(&self) -> &'static str {
        "battery-monitor"
    }

    fn wait_after(&self) -> Duration {
        self.interval
    }

    async fn run_cycle(&mut self) -> anyhow::Result<()> {
        let state = Arc::clone(&self.ctx.state);
        let favorites = state.favorites.list();
        if favorites.is_empty() {
            return Ok(());
        }
        let Some(nodes) = self.ctx.mesh.nodes() else {
            return Ok(());
        };

        let mut alerts = Vec::new();
        for node in &nodes {
            let suffix = Suffix::from_node_id(node.id);
            if !favorites.contains(&suffix) {
                continue;
            }
            let Some(voltage) = node.voltage() else { continue };
            let name = state.names.lookup_name(suffix);
            match state.observe_battery(suffix, voltage, self.threshold) {
                BatteryTransition::BecameLow => {
                    warn!("Low battery on {}: {:.2}V", name, voltage);
                    alerts.push(format!("🔋 Low battery {}: {:.2}V", name, voltage));
                }
                BatteryTransition::Recovered => info!("Battery on {} recovered: {:.2}V", name, voltage),
                BatteryTransition::Unchanged => {}
            }
        }
        for alert in alerts {
            self.ctx.notify_admin(&alert).await?;
        }
        Ok(())
    }
}

/// Periodic bulk refresh of the name cache.
pub struct NameCacheAutoRefresh {
    ctx: MonitorContext,
    interval: Duration,
}

impl NameCacheAutoRefresh {
    pub fn new(ctx: MonitorContext, interval: Duration) -> Self {
        Self { ctx, interval }
    }
}

#[async_trait]
impl MonitorTask for NameCacheAutoRefresh {
    fn name(&self) -> &'static str {
        "name-refresh"
    }

    fn wait_after(&self) -> Duration {
        self.interval
    }

    async fn run_cycle(&mut self) -> anyhow::Result<()> {
        let nodes = self.ctx.mesh.nodes();
        self.ctx.state.names.bulk_refresh(nodes.as_deref());
        Ok(())
    }
}

/// Reboots the radio once a day at a fixed local time.
pub struct DailyMaintenance {
    ctx: MonitorContext,
    at: NaiveTime,
}

impl DailyMaintenance {
    pub fn new(ctx: MonitorContext, at: NaiveTime) -> Self {
        Self { ctx, at }
    }
}

/// Time from `now` to the next `at`; exactly at `at` rolls over to tomorrow.
pub fn delay_until_next(now: NaiveDateTime, at: NaiveTime) -> Duration {
    let mut target = now.date().and_time(at);
    if now >= target {
        target += chrono::Duration::days(1);
    }
    (target - now).to_std().unwrap_or(Duration::ZERO)
}

#[async_trait]
impl MonitorTask for DailyMaintenance {
    fn name(&self) -> &'static str {
        "daily-maintenance"
    }

    fn wait_before(&self) -> Duration {
        let now = Local::now().naive_local();
        let delay = delay_until_next(now, self.at);
        info!("Next scheduled reboot at {}", now + chrono::Duration::seconds(delay.as_secs() as i64));
        delay
    }

    fn wait_after(&self) -> Duration {
        // Keeps the next computation clear of the minute just handled.
        Duration::from_secs(1)
    }

    async fn run_cycle(&mut self) -> anyhow::Result<()> {
        let Some(link) = self.ctx.mesh.current() else {
            warn!("Scheduled reboot skipped: mesh link unavailable");
            return Ok(());
        };
        info!("Running scheduled reboot");
        link.reboot().context("scheduled reboot failed")?;
        self.ctx.notify_admin("🔄 Daily reboot done").await
    }
}

/// Start every monitor enabled in `settings`.
pub fn spawn_all(ctx: &MonitorContext, settings: &MonitorSettings) -> Vec<JoinHandle<()>> {
    let mut handles = vec![
        spawn_monitor(ConnectivityWatchdog::new(ctx.clone(), settings.watchdog_interval)),
        spawn_monitor(NewNodeDetector::new(ctx.clone(), settings.new_node_interval)),
        spawn_monitor(BatteryHysteresisMonitor::new(
            ctx.clone(),
            settings.battery_interval,
            settings.battery_low_threshold,
        )),
        spawn_monitor(NameCacheAutoRefresh::new(ctx.clone(), settings.name_refresh_interval)),
    ];
    if settings.maintenance_enabled {
        handles.push(spawn_monitor(DailyMaintenance::new(ctx.clone(), settings.maintenance_at)));
    }
    handles
}
