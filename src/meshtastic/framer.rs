//! Newline-delimited text framer for the serial mesh link.
//!
//! The radio-side firmware emits one record per line:
//!
//! ```text
//! FROM:!a1b2c3d4 TO:^all CH:1 MSG:hello mesh
//! NODE:0x1A2B3C SHORT:RLY1 SNR:6.25 V:3.92 HEARD:1718000000 LONG:Relay One
//! MYINFO:!0000beef UPTIME:86400
//! CONFIG:lora {"region":"EU_868","hop_limit":3}
//! CONFIG_COMPLETE
//! ```
//!
//! After `CMD:WANT_CONFIG` the radio dumps `MYINFO:`, every `NODE:` and every `CONFIG:`
//! record, then `CONFIG_COMPLETE`.
//!
//! and accepts `TO:<dest> CH:<n> MSG:<text>` plus `CMD:<verb> [args]` lines. Inside
//! `MSG:` a literal newline is written as `\n` and a backslash as `\\`.
//!
//! [`LineFramer`] is fed arbitrary chunks and yields complete lines. Oversize lines are
//! discarded up to the next newline so one corrupt record cannot wedge the link.

use super::{ConfigSection, DeviceConfig, MeshPacket, MeshTarget, NodeIdentity, NodeRecord, BROADCAST_ADDR};
use bytes::{Buf, BytesMut};

/// Longest accepted line, excluding the terminator.
const MAX_LINE_LEN: usize = 2048;

pub struct LineFramer {
    buf: BytesMut,
    discarding: bool,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineFramer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(1024),
            discarding: false,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Next complete, non-empty line with its terminator (and any `\r`) removed.
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            let pos = match self.buf.iter().position(|b| *b == b'\n') {
                Some(pos) => pos,
                None => {
                    if self.buf.len() > MAX_LINE_LEN {
                        // Drop the partial oversize line and skip its tail when it arrives.
                        self.buf.clear();
                        self.discarding = true;
                    }
                    return None;
                }
            };
            let raw = self.buf.split_to(pos);
            self.buf.advance(1);
            if std::mem::take(&mut self.discarding) || raw.len() > MAX_LINE_LEN {
                continue;
            }
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches('\r').trim();
            if !line.is_empty() {
                return Some(line.to_string());
            }
        }
    }
}

/// A decoded inbound record.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundLine {
    Packet(MeshPacket),
    Node(NodeRecord),
    MyInfo { node_id: u32, uptime_secs: Option<u64> },
    Config { section: ConfigSection, body: serde_json::Value },
    /// End of the dump requested by `CMD:WANT_CONFIG`.
    ConfigComplete,
}

/// Parse a node id written as decimal, `0x` hex, or Meshtastic `!hex`. `^all` is the
/// broadcast address.
pub fn parse_node_id(s: &str) -> Option<u32> {
    let s = s.trim();
    if s == "^all" {
        return Some(BROADCAST_ADDR);
    }
    if let Some(hex) = s.strip_prefix('!').or_else(|| s.strip_prefix("0x")).or_else(|| s.strip_prefix("0X")) {
        return u32::from_str_radix(hex, 16).ok();
    }
    s.parse().ok()
}

/// Decode one line; unrecognised or malformed records yield `None`.
pub fn parse_line(line: &str) -> Option<InboundLine> {
    let line = line.trim();
    if line.starts_with("FROM:") {
        parse_packet(line).map(InboundLine::Packet)
    } else if line.starts_with("NODE:") {
        parse_node(line).map(InboundLine::Node)
    } else if let Some(rest) = line.strip_prefix("MYINFO:") {
        let mut tokens = rest.split_whitespace();
        let node_id = parse_node_id(tokens.next()?)?;
        let uptime_secs = tokens
            .find_map(|t| t.strip_prefix("UPTIME:"))
            .and_then(|v| v.parse().ok());
        Some(InboundLine::MyInfo { node_id, uptime_secs })
    } else if line == "CONFIG_COMPLETE" {
        Some(InboundLine::ConfigComplete)
    } else if let Some(rest) = line.strip_prefix("CONFIG:") {
        let (key, json) = rest.split_once(' ')?;
        let section = ConfigSection::from_key(key)?;
        let body = serde_json::from_str(json).ok()?;
        Some(InboundLine::Config { section, body })
    } else {
        None
    }
}

/// Splits `head` into `KEY:value` tokens and the free-text remainder after `tail_key`.
fn split_fields<'a>(line: &'a str, tail_key: &str) -> (Vec<(&'a str, &'a str)>, Option<&'a str>) {
    let (head, tail) = match line.find(tail_key) {
        Some(idx) => (&line[..idx], Some(&line[idx + tail_key.len()..])),
        None => (line, None),
    };
    let fields = head
        .split_whitespace()
        .filter_map(|tok| tok.split_once(':'))
        .collect();
    (fields, tail)
}

fn parse_packet(line: &str) -> Option<MeshPacket> {
    let (fields, text) = split_fields(line, "MSG:");
    let mut from = None;
    let mut to = BROADCAST_ADDR;
    let mut channel = 0u32;
    let mut identity = NodeIdentity::default();
    for (key, value) in fields {
        match key {
            "FROM" => from = parse_node_id(value),
            "TO" => to = parse_node_id(value)?,
            "CH" => channel = value.parse().ok()?,
            "SHORT" => identity.short_name = Some(value.to_string()),
            _ => {}
        }
    }
    Some(MeshPacket {
        from: from?,
        to,
        channel,
        text: text.map(unescape),
        identity: identity.short_name.is_some().then_some(identity),
    })
}

fn parse_node(line: &str) -> Option<NodeRecord> {
    let (fields, long) = split_fields(line, "LONG:");
    let mut record: Option<NodeRecord> = None;
    for (key, value) in fields {
        if key == "NODE" {
            record = Some(NodeRecord::new(parse_node_id(value)?));
            continue;
        }
        let node = record.as_mut()?;
        match key {
            "SHORT" => node.identity.short_name = Some(value.to_string()),
            "SNR" => node.snr = value.parse().ok(),
            "V" => node.metrics.voltage = value.parse().ok(),
            "BAT" => node.metrics.battery_level = value.parse().ok(),
            "UP" => node.metrics.uptime_seconds = value.parse().ok(),
            "HEARD" => node.last_heard = value.parse().ok(),
            _ => {}
        }
    }
    let mut node = record?;
    if let Some(long) = long.map(str::trim).filter(|l| !l.is_empty()) {
        node.identity.long_name = Some(long.to_string());
    }
    Some(node)
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('\r', "").replace('\n', "\\n")
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Outbound text line, newline-terminated.
pub fn encode_text(text: &str, target: MeshTarget) -> String {
    match target {
        MeshTarget::Channel(ch) => format!("TO:^all CH:{} MSG:{}\n", ch, escape(text)),
        MeshTarget::Node(id) => format!("TO:!{:08x} CH:0 MSG:{}\n", id, escape(text)),
    }
}

/// Outbound control line for a bare verb such as `REBOOT`.
pub fn encode_command(verb: &str) -> String {
    format!("CMD:{}\n", verb)
}

/// Outbound `CMD:CONFIG <section> <json>` line carrying one section of `config`.
pub fn encode_config(config: &DeviceConfig, section: ConfigSection) -> Result<String, serde_json::Error> {
    let json = match section {
        ConfigSection::Device => serde_json::to_string(&config.device)?,
        ConfigSection::Position => serde_json::to_string(&config.position)?,
        ConfigSection::Power => serde_json::to_string(&config.power)?,
        ConfigSection::Network => serde_json::to_string(&config.network)?,
        ConfigSection::Display => serde_json::to_string(&config.display)?,
        ConfigSection::Lora => serde_json::to_string(&config.lora)?,
        ConfigSection::Bluetooth => serde_json::to_string(&config.bluetooth)?,
    };
    Ok(format!("CMD:CONFIG {} {}\n", section, json))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_split_across_chunks_are_reassembled() {
        let mut f = LineFramer::new();
        f.push(b"FROM:1 CH:0 MS");
        assert_eq!(f.next_line(), None);
        f.push(b"G:hi\r\n\nMYINFO:!00000001\n");
        assert_eq!(f.next_line().as_deref(), Some("FROM:1 CH:0 MSG:hi"));
        assert_eq!(f.next_line().as_deref(), Some("MYINFO:!00000001"));
        assert_eq!(f.next_line(), None);
    }

    #[test]
    fn oversize_line_is_skipped_and_framer_resyncs() {
        let mut f = LineFramer::new();
        f.push(&vec![b'x'; MAX_LINE_LEN + 10]);
        assert_eq!(f.next_line(), None);
        f.push(b"tail of junk\nFROM:2 MSG:ok\n");
        assert_eq!(f.next_line().as_deref(), Some("FROM:2 MSG:ok"));
    }

    #[test]
    fn node_ids_accept_three_notations() {
        assert_eq!(parse_node_id("1715004"), Some(0x1A2B3C));
        assert_eq!(parse_node_id("0x1A2B3C"), Some(0x1A2B3C));
        assert_eq!(parse_node_id("!001a2b3c"), Some(0x1A2B3C));
        assert_eq!(parse_node_id("^all"), Some(BROADCAST_ADDR));
        assert_eq!(parse_node_id("!zz"), None);
    }

    #[test]
    fn text_packet_keeps_spaces_and_escapes() {
        let parsed = parse_line(r"FROM:!00000010 TO:^all CH:1 MSG:hello  there\nsecond \\ line").unwrap();
        let InboundLine::Packet(p) = parsed else { panic!("expected packet") };
        assert_eq!(p.from, 0x10);
        assert_eq!(p.to, BROADCAST_ADDR);
        assert_eq!(p.channel, 1);
        assert_eq!(p.text.as_deref(), Some("hello  there\nsecond \\ line"));
        assert_eq!(p.identity, None);
    }

    #[test]
    fn packet_without_message_carries_identity_only() {
        let parsed = parse_line("FROM:0x1A2B3C SHORT:RLY1").unwrap();
        let InboundLine::Packet(p) = parsed else { panic!("expected packet") };
        assert_eq!(p.text, None);
        assert_eq!(p.identity.unwrap().short_name.as_deref(), Some("RLY1"));
    }

    #[test]
    fn node_record_with_long_name_and_metrics() {
        let parsed = parse_line("NODE:0x1A2B3C SHORT:RLY1 SNR:-2.5 V:3.41 HEARD:1700000000 LONG:Relay One Hill").unwrap();
        let InboundLine::Node(n) = parsed else { panic!("expected node") };
        assert_eq!(n.id, 0x1A2B3C);
        assert_eq!(n.identity.short_name.as_deref(), Some("RLY1"));
        assert_eq!(n.identity.long_name.as_deref(), Some("Relay One Hill"));
        assert_eq!(n.snr, Some(-2.5));
        assert_eq!(n.voltage(), Some(3.41));
        assert_eq!(n.last_heard, Some(1_700_000_000));
    }

    #[test]
    fn malformed_records_are_ignored() {
        assert_eq!(parse_line("TO:^all MSG:no sender"), None);
        assert_eq!(parse_line("FROM:nothex MSG:x"), None);
        assert_eq!(parse_line("FROM:1 CH:seven MSG:x"), None);
        assert_eq!(parse_line("NODE:"), None);
        assert_eq!(parse_line("boot banner v2.3"), None);
        assert_eq!(parse_line("CONFIG:radio {}"), None);
        assert_eq!(parse_line("CONFIG:lora {broken"), None);
    }

    #[test]
    fn config_dump_ends_with_marker() {
        assert_eq!(parse_line("CONFIG_COMPLETE\r"), Some(InboundLine::ConfigComplete));
        assert_eq!(parse_line("CONFIG_COMPLETED"), None);
    }

    #[test]
    fn config_report_is_decoded_per_section() {
        let parsed = parse_line(r#"CONFIG:lora {"region":"EU_868","hop_limit":5}"#).unwrap();
        let InboundLine::Config { section, body } = parsed else { panic!("expected config") };
        assert_eq!(section, ConfigSection::Lora);
        assert_eq!(body["hop_limit"], 5);
    }

    #[test]
    fn outbound_text_lines_escape_newlines() {
        let line = encode_text("two\nlines", MeshTarget::Channel(2));
        assert_eq!(line, "TO:^all CH:2 MSG:two\\nlines\n");
        let line = encode_text("hi", MeshTarget::Node(0xBEEF));
        assert_eq!(line, "TO:!0000beef CH:0 MSG:hi\n");
    }

    #[test]
    fn config_line_names_the_section() {
        let mut cfg = DeviceConfig::default();
        cfg.bluetooth.enabled = false;
        let line = encode_config(&cfg, ConfigSection::Bluetooth).unwrap();
        assert!(line.starts_with("CMD:CONFIG bluetooth {"));
        assert!(line.contains("\"enabled\":false"));
        assert_eq!(encode_command("REBOOT"), "CMD:REBOOT\n");
    }
}
