//! Core domain types for Sentinel network discovery.
//!
//! A [`Record`] is the canonical per-device value held in the inventory.
//! An [`Observation`] is a raw, unmerged sighting reported by one discovery
//! technique. Records are keyed by network address; everything else about
//! a device is filled in progressively by later stages.

use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace UUID for deterministic device IDs.
const SENTINEL_NS: Uuid = Uuid::from_bytes([
    0x6b, 0xa7, 0xb8, 0x10, 0x9d, 0xad, 0x11, 0xd1, 0x80, 0xb4, 0x00, 0xc0, 0x4f, 0xd4, 0x30, 0xc8,
]);

/// Latency reported for any record that has no successful echo measurement.
pub const LATENCY_UNMEASURED: i64 = -1;

// ── Identity ──────────────────────────────────────────────────────

/// Synthetic device identifier. Informative only, never a merge key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct DeviceId(pub Uuid);

impl DeviceId {
    /// Deterministic ID derived from the address, stable across runs.
    pub fn for_address(address: IpAddr) -> Self {
        Self(Uuid::new_v5(
            &SENTINEL_NS,
            format!("device:{address}").as_bytes(),
        ))
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ── Techniques ────────────────────────────────────────────────────

/// A discovery or enrichment technique that can contribute to a record.
///
/// The declaration order of the discovery techniques is the precedence
/// used when canonicalising observations before a merge.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Technique {
    /// Link-layer neighbor capture.
    Lldp,
    /// Address-range ping sweep.
    Nmap,
    /// Local-segment address-resolution sweep.
    Arp,
    /// Echo reachability probe.
    Icmp,
    /// Reverse name resolution.
    Dns,
    /// Well-known TCP port probe.
    Ports,
    /// Management-protocol counter fetch.
    Snmp,
}

impl Technique {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lldp => "lldp",
            Self::Nmap => "nmap",
            Self::Arp => "arp",
            Self::Icmp => "icmp",
            Self::Dns => "dns",
            Self::Ports => "ports",
            Self::Snmp => "snmp",
        }
    }
}

impl fmt::Display for Technique {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Status ────────────────────────────────────────────────────────

/// Liveness of a device as determined by the reachability stage.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Reachability {
    /// Not probed yet.
    #[default]
    Unknown,
    /// Answered an echo probe.
    Active { latency_ms: u64 },
    /// Probe failed or timed out.
    Inactive,
}

impl Reachability {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Active { .. } => "active",
            Self::Inactive => "inactive",
        }
    }
}

/// Platform family guessed from responding well-known ports.
///
/// This is a heuristic, not a protocol: Windows-indicative ports take
/// precedence over Unix-indicative ones.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    Unix,
    Unknown,
}

impl Platform {
    /// Human-readable device type label for this guess.
    pub fn device_type_label(&self) -> &'static str {
        match self {
            Self::Windows => "Windows (likely)",
            Self::Unix => "Linux/Unix (likely)",
            Self::Unknown => "unknown",
        }
    }
}

/// Point-in-time interface counter snapshot (not a delta).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InterfaceCounters {
    pub in_octets: Option<u64>,
    pub out_octets: Option<u64>,
    pub in_errors: Option<u64>,
    pub out_errors: Option<u64>,
}

// ── Observation ───────────────────────────────────────────────────

/// A raw sighting reported by a single discovery technique.
///
/// Field order is significant: the derived ordering sorts by technique
/// first, then address, then content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Observation {
    pub technique: Technique,
    pub address: Option<IpAddr>,
    pub hostname: Option<String>,
    pub hardware_address: Option<String>,
    pub vendor: Option<String>,
    pub device_type: Option<String>,
    pub description: Option<String>,
    pub seen_at: DateTime<Utc>,
}

impl Observation {
    pub fn new(technique: Technique) -> Self {
        Self {
            technique,
            address: None,
            hostname: None,
            hardware_address: None,
            vendor: None,
            device_type: None,
            description: None,
            seen_at: Utc::now(),
        }
    }

    pub fn with_address(mut self, address: IpAddr) -> Self {
        self.address = Some(address);
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = normalize(Some(hostname.into()));
        self
    }

    pub fn with_hardware_address(mut self, mac: impl Into<String>) -> Self {
        self.hardware_address = normalize(Some(mac.into()));
        self
    }

    pub fn with_vendor(mut self, vendor: impl Into<String>) -> Self {
        self.vendor = normalize(Some(vendor.into()));
        self
    }

    pub fn with_device_type(mut self, device_type: impl Into<String>) -> Self {
        self.device_type = normalize(Some(device_type.into()));
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = normalize(Some(description.into()));
        self
    }

    pub fn seen_at(mut self, at: DateTime<Utc>) -> Self {
        self.seen_at = at;
        self
    }
}

// ── Record ────────────────────────────────────────────────────────

/// One device observed on the network, keyed by `address`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub id: DeviceId,
    pub address: IpAddr,
    pub hostname: Option<String>,
    pub hardware_address: Option<String>,
    pub vendor: Option<String>,
    pub device_type: Option<String>,
    pub description: Option<String>,
    pub reachability: Reachability,
    pub platform: Option<Platform>,
    pub open_ports: BTreeSet<u16>,
    pub counters: InterfaceCounters,
    pub system_name: Option<String>,
    pub system_uptime: Option<String>,
    pub system_description: Option<String>,
    pub source_protocols: BTreeSet<String>,
    pub last_seen: DateTime<Utc>,
}

impl Record {
    /// Seed a new record from an observation. Returns `None` when the
    /// observation carries no address.
    pub fn from_observation(obs: &Observation) -> Option<Self> {
        let address = obs.address?;
        let mut record = Self {
            id: DeviceId::for_address(address),
            address,
            hostname: None,
            hardware_address: None,
            vendor: None,
            device_type: None,
            description: None,
            reachability: Reachability::Unknown,
            platform: None,
            open_ports: BTreeSet::new(),
            counters: InterfaceCounters::default(),
            system_name: None,
            system_uptime: None,
            system_description: None,
            source_protocols: BTreeSet::new(),
            last_seen: obs.seen_at,
        };
        record.absorb(obs);
        Some(record)
    }

    /// Apply the field-merge rule: populated fields are kept, empty ones
    /// adopt the incoming value, protocols are unioned and `last_seen`
    /// moves to the later timestamp.
    pub fn absorb(&mut self, obs: &Observation) {
        fill(&mut self.hostname, obs.hostname.as_deref());
        fill(&mut self.hardware_address, obs.hardware_address.as_deref());
        fill(&mut self.vendor, obs.vendor.as_deref());
        fill(&mut self.device_type, obs.device_type.as_deref());
        fill(&mut self.description, obs.description.as_deref());
        self.add_technique(obs.technique);
        self.touch(obs.seen_at);
    }

    /// Union another record's provenance into this one.
    pub fn union_protocols(&mut self, other: &Record) {
        self.source_protocols
            .extend(other.source_protocols.iter().cloned());
    }

    pub fn add_technique(&mut self, technique: Technique) {
        self.source_protocols.insert(technique.as_str().to_string());
    }

    /// Add a free-form protocol tag (lowercased, blanks ignored).
    pub fn add_protocol(&mut self, tag: &str) {
        let tag = tag.trim();
        if !tag.is_empty() {
            self.source_protocols.insert(tag.to_lowercase());
        }
    }

    /// Move `last_seen` forward, never backward.
    pub fn touch(&mut self, at: DateTime<Utc>) {
        if at > self.last_seen {
            self.last_seen = at;
        }
    }

    pub fn mark_active(&mut self, rtt: Duration) {
        self.reachability = Reachability::Active {
            latency_ms: rtt.as_millis() as u64,
        };
        self.add_technique(Technique::Icmp);
    }

    pub fn mark_inactive(&mut self) {
        self.reachability = Reachability::Inactive;
    }

    /// Measured round-trip latency, or [`LATENCY_UNMEASURED`].
    pub fn latency_ms(&self) -> i64 {
        match self.reachability {
            Reachability::Active { latency_ms } => latency_ms as i64,
            _ => LATENCY_UNMEASURED,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.reachability, Reachability::Active { .. })
    }

    /// Append a fragment to the description, `"; "`-separated.
    pub fn append_description(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        match self.description.as_mut() {
            Some(existing) if !existing.trim().is_empty() => {
                existing.push_str("; ");
                existing.push_str(text);
            }
            _ => self.description = Some(text.to_string()),
        }
    }

    pub fn has_hostname(&self) -> bool {
        !is_blank(self.hostname.as_deref())
    }

    pub fn has_vendor(&self) -> bool {
        !is_blank(self.vendor.as_deref())
    }

    /// Fill an empty field; a populated value is never overwritten.
    pub fn fill_hostname(&mut self, value: &str) -> bool {
        fill(&mut self.hostname, Some(value))
    }

    pub fn fill_vendor(&mut self, value: &str) -> bool {
        fill(&mut self.vendor, Some(value))
    }

    pub fn fill_device_type(&mut self, value: &str) -> bool {
        fill(&mut self.device_type, Some(value))
    }
}

/// True when the value is absent or whitespace-only.
pub fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}

fn normalize(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Adopt `incoming` only when `slot` is empty. Returns whether it changed.
fn fill(slot: &mut Option<String>, incoming: Option<&str>) -> bool {
    if !is_blank(slot.as_deref()) || is_blank(incoming) {
        return false;
    }
    *slot = incoming.map(|v| v.trim().to_string());
    true
}
