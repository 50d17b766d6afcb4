//! Administrator commands against a fake radio.
mod common;

use common::*;
use meshbridge::bridge::names::Suffix;
use meshbridge::bridge::{AdminConsole, BridgeState};
use meshbridge::meshtastic::{ConfigSection, MeshHandle, MeshTarget, NodeRecord};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

const RLY1: u32 = 0x1A2B3C;

struct Console {
    console: AdminConsole,
    state: Arc<BridgeState>,
    mesh: Arc<FakeMesh>,
    handle: MeshHandle,
    _dir: tempfile::TempDir,
}

impl Console {
    fn new(nodes: Vec<NodeRecord>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(dir.path());
        let mesh = FakeMesh::new(nodes);
        let handle = MeshHandle::with_link(mesh.clone());
        state.names.bulk_refresh(handle.nodes().as_deref());
        Self {
            console: AdminConsole::new(state.clone(), handle.clone(), 3.5),
            state,
            mesh,
            handle,
            _dir: dir,
        }
    }

    async fn reply(&self, text: &str) -> String {
        self.console.handle(text).await.expect("command reply")
    }
}

fn heard(mut record: NodeRecord, secs_ago: i64, snr: f32) -> NodeRecord {
    record.last_heard = Some(chrono::Utc::now().timestamp() - secs_ago);
    record.snr = Some(snr);
    record
}

#[tokio::test]
async fn plain_text_gets_no_reply() {
    let c = Console::new(vec![node(RLY1, "RLY1")]);
    assert!(c.console.handle("good morning").await.is_none());
    assert!(c.reply("/help").await.contains("/fav_add"));
    assert!(c.reply("/frobnicate").await.contains("Unknown command"));
}

#[tokio::test]
async fn direct_message_by_name_goes_to_node() {
    let c = Console::new(vec![node(RLY1, "RLY1")]);
    assert_eq!(c.reply("@RLY1 status?").await, "📨 Sent to RLY1: status?");
    assert_eq!(c.reply("@1a2b3c again").await, "📨 Sent to 1a2b3c: again");

    let sends = c.mesh.sends();
    assert_eq!(sends.len(), 2);
    assert_eq!(sends[0].text, "status?");
    assert_eq!(sends[0].target, MeshTarget::Node(RLY1));
}

#[tokio::test]
async fn direct_message_failures_are_distinct() {
    let c = Console::new(vec![node(RLY1, "RLY1")]);
    assert_eq!(c.reply("@NOBODY hi").await, "❌ Node 'NOBODY' not found in cache");

    c.state.names.upsert(Suffix::from_node_id(0x77), "GONE");
    assert_eq!(c.reply("@GONE hi").await, "❌ Node 'GONE' is not online");

    c.handle.clear();
    assert_eq!(c.reply("@RLY1 hi").await, "❌ No connection to Meshtastic");
    assert!(c.mesh.sends().is_empty());
}

#[tokio::test]
async fn stats_report_relay_counters_and_activity() {
    let c = Console::new(vec![heard(node(RLY1, "RLY1"), 30, 6.5)]);
    let today = chrono::Local::now().date_naive();
    for _ in 0..3 {
        c.state.record_inbound(Suffix::from_node_id(RLY1), today);
    }
    c.state.record_chat_to_mesh();
    c.state.observe_battery(Suffix::from_node_id(RLY1), 3.42, 3.5);

    let stats = c.reply("/stats").await;
    assert!(stats.starts_with("📊 Full statistics:"));
    assert!(stats.contains("mesh→chat 3, chat→mesh 1"));
    assert!(stats.contains("RLY1 (SNR: 6.5)"));
    assert!(stats.contains("RLY1: 3"));
    assert!(stats.contains("🔋 Favorite batteries:\nRLY1: 3.42V"));

    assert_eq!(c.reply("/topnodes").await, "🏆 Top 5 nodes by messages:\nRLY1: 3");
    assert_eq!(c.reply("/stats_today").await, "📈 Messages today:\nRLY1: 3");
    assert!(c.reply("/uptime").await.contains("Radio uptime: 2h 5m"));
    assert!(c.reply("/nodeinfo 1A2B3C").await.contains("Messages: "));
}

#[tokio::test]
async fn node_listings() {
    let c = Console::new(vec![
        heard(node_with_voltage(RLY1, "RLY1", 3.9), 60, 4.0),
        heard(node_with_voltage(0x22, "FAR", 3.2), 7200, -3.0),
        heard(node_with_voltage(LOCAL_NODE, "ME", 4.1), 0, 9.0),
    ]);

    assert_eq!(c.reply("/direct").await, "📡 Direct neighbours (1):\nRLY1 (SNR:4.0)");
    assert_eq!(
        c.reply("/battery").await,
        "🔋 Battery voltage (10 lowest):\nFAR: 3.20V\nRLY1: 3.90V"
    );
    assert_eq!(c.reply("/battery_low").await, "🔋 Low battery:\nFAR: 3.20V");

    let last = c.reply("/lastseen").await;
    let me = last.find("ME:").unwrap();
    let far = last.find("FAR:").unwrap();
    assert!(me < far);

    assert!(c.reply("/snr_stats").await.starts_with("SNR: min=-3.0, max=9.0"));
    assert_eq!(c.reply("/nodeinfo zz").await.chars().next(), Some('❌'));
    assert_eq!(c.reply("/nodeinfo 000099").await, "❌ Node 000099 not found");
}

#[tokio::test]
async fn name_cache_management() {
    let c = Console::new(vec![node(RLY1, "RLY1")]);
    assert_eq!(c.reply("/setname 1a2b3c Hill Top").await, "✅ Name for 1A2B3C set: Hill Top");
    assert_eq!(c.state.names.lookup_name(Suffix::from_node_id(RLY1)), "Hill Top");
    assert_eq!(c.reply("/dump_cache").await, "Name cache:\n1A2B3C: Hill Top");

    assert!(c.reply("/reload_names").await.contains("Updated: 1"));
    assert_eq!(c.state.names.lookup_name(Suffix::from_node_id(RLY1)), "RLY1");

    c.reply("/reset_cache").await;
    assert_eq!(c.reply("/dump_cache").await, "Cache is empty");
    assert_eq!(c.state.seen_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn node_db_reset_refreshes_names_later() {
    let c = Console::new(vec![node(RLY1, "RLY1")]);
    assert!(c.reply("/reset_nodedb").await.starts_with("🗑 Node DB reset"));
    assert_eq!(c.mesh.node_db_resets.load(Ordering::SeqCst), 1);

    c.mesh.set_nodes(Some(vec![node(RLY1, "RLY2")]));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(c.state.names.lookup_name(Suffix::from_node_id(RLY1)), "RLY1");
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(c.state.names.lookup_name(Suffix::from_node_id(RLY1)), "RLY2");
}

#[tokio::test]
async fn device_control() {
    let c = Console::new(vec![node(RLY1, "RLY1")]);
    assert_eq!(c.reply("/reboot").await, "🔄 Reboot started");
    assert_eq!(c.reply("/pos").await, "📍 Position sent");
    assert_eq!(c.mesh.reboots.load(Ordering::SeqCst), 1);
    assert_eq!(c.mesh.positions.load(Ordering::SeqCst), 1);

    assert_eq!(c.reply("/ble off").await, "✅ BLE disabled");
    assert!(!c.mesh.config().bluetooth.enabled);

    assert_eq!(c.reply("/set lora.hop_limit 5").await, "✅ lora.hop_limit = 5");
    assert_eq!(c.mesh.config().lora.hop_limit, 5);
    assert_eq!(c.mesh.written(), vec![ConfigSection::Bluetooth, ConfigSection::Lora]);

    assert!(c.reply("/set lora.nope 1").await.contains("unknown config path"));
    assert!(c.reply("/set lora.hop_limit many").await.starts_with("❌"));
    assert_eq!(c.mesh.written().len(), 2);
}

#[tokio::test]
async fn favorites_round_trip_through_disk() {
    let c = Console::new(vec![node(RLY1, "RLY1")]);
    assert_eq!(c.reply("/fav_list").await, "📭 Favorites list is empty");
    assert_eq!(c.reply("/fav_add RLY1").await, "✅ RLY1 added to favorites");
    assert_eq!(c.reply("/fav_add 1A2B3C").await, "ℹ️ RLY1 is already a favorite");
    assert_eq!(c.reply("/fav_add abcdef").await, "✅ ABCDEF added to favorites");
    assert_eq!(
        c.reply("/fav_list").await,
        "⭐ Favorite nodes:\nRLY1 (1A2B3C)\nABCDEF (ABCDEF)"
    );

    assert_eq!(c.reply("/fav_del RLY1").await, "🗑 Removed from favorites");
    assert_eq!(c.reply("/fav_del RLY1").await, "❌ Node 'RLY1' is not in favorites");
    assert_eq!(c.state.favorites.list().len(), 1);
}
