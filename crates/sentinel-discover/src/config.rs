//! Configuration for the sentinel-discover pipeline.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{DiscoverError, Result};

/// Top-level discover configuration.
///
/// Loaded from `sentinel.toml` `[discover]` section or
/// `SENTINEL_DISCOVER__` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoverConfig {
    /// Path to the nmap binary (default: "nmap").
    #[serde(default = "default_nmap_path")]
    pub nmap_path: String,

    /// Interface to discover on. Resolved automatically when unset.
    #[serde(default)]
    pub interface: Option<String>,

    /// Subnet override in CIDR notation (e.g., "192.168.1.0/24").
    #[serde(default)]
    pub subnet: Option<String>,

    /// Discovery sources, in the order they are registered.
    #[serde(default = "default_sources")]
    pub sources: Vec<SourceKind>,

    /// Abort the run after this many seconds, keeping partial results.
    #[serde(default)]
    pub run_deadline_secs: Option<u64>,

    #[serde(default)]
    pub lldp: LldpConfig,

    #[serde(default)]
    pub sweep: SweepConfig,

    #[serde(default)]
    pub arp: ArpConfig,

    #[serde(default)]
    pub reachability: ReachabilityConfig,

    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    #[serde(default)]
    pub snmp: SnmpConfig,
}

/// The discovery techniques that can be enabled.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Link-layer neighbor capture.
    Lldp,
    /// nmap ping sweep of the subnet.
    Sweep,
    /// Address-resolution sweep of the local segment.
    Arp,
}

impl std::str::FromStr for SourceKind {
    type Err = DiscoverError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "lldp" => Ok(Self::Lldp),
            "sweep" | "nmap" => Ok(Self::Sweep),
            "arp" => Ok(Self::Arp),
            other => Err(DiscoverError::Config(format!(
                "Invalid source: {other}. Choose: lldp, sweep, arp"
            ))),
        }
    }
}

/// Predefined nmap profiles.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScanProfile {
    /// Ping sweep only: `-sn`
    #[default]
    Quick,
    /// Service version detection on open ports: `-sV -T4 --open`
    Standard,
    /// Service and OS detection: `-sV -O -T4 --open`
    Deep,
}

impl ScanProfile {
    /// Return the nmap flags for this profile.
    pub fn nmap_flags(&self) -> Vec<&'static str> {
        match self {
            Self::Quick => vec!["-sn"],
            Self::Standard => vec!["-sV", "-T4", "--open"],
            Self::Deep => vec!["-sV", "-O", "-T4", "--open"],
        }
    }
}

/// Link-layer capture settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LldpConfig {
    /// Path to the lldpcli binary.
    #[serde(default = "default_lldpcli_path")]
    pub lldpcli_path: String,

    /// How long to keep collecting neighbors.
    #[serde(default = "default_capture_secs")]
    pub capture_secs: u64,
}

/// nmap ping sweep settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
    #[serde(default)]
    pub profile: ScanProfile,

    #[serde(default = "default_sweep_timeout_secs")]
    pub timeout_secs: u64,
}

/// Address-resolution sweep settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ArpConfig {
    #[serde(default = "default_arping_path")]
    pub arping_path: String,

    /// Concurrent resolution probes.
    #[serde(default = "default_arp_workers")]
    pub workers: usize,

    /// Per-address resolution timeout.
    #[serde(default = "default_arp_unit_timeout_ms")]
    pub unit_timeout_ms: u64,

    /// Upper bound on addresses swept in large subnets.
    #[serde(default = "default_arp_max_hosts")]
    pub max_hosts: usize,
}

/// Echo probe settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ReachabilityConfig {
    #[serde(default = "default_reachability_workers")]
    pub workers: usize,

    #[serde(default = "default_reachability_timeout_ms")]
    pub timeout_ms: u64,
}

/// Enrichment pass settings.
#[derive(Debug, Clone, Deserialize)]
pub struct EnrichmentConfig {
    #[serde(default = "default_enrichment_workers")]
    pub workers: usize,

    /// Well-known ports probed for the platform heuristic.
    #[serde(default = "default_ports")]
    pub ports: Vec<u16>,

    #[serde(default = "default_port_timeout_ms")]
    pub port_timeout_ms: u64,

    #[serde(default = "default_dns_timeout_ms")]
    pub dns_timeout_ms: u64,

    #[serde(default = "default_fingerprint_profile")]
    pub fingerprint_profile: ScanProfile,

    #[serde(default = "default_fingerprint_timeout_secs")]
    pub fingerprint_timeout_secs: u64,
}

/// Management-protocol fetch settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SnmpConfig {
    #[serde(default = "default_snmpget_path")]
    pub snmpget_path: String,

    #[serde(default = "default_snmp_port")]
    pub port: u16,

    #[serde(default = "default_community")]
    pub community: String,

    #[serde(default = "default_snmp_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_snmp_retries")]
    pub retries: u32,

    #[serde(default = "default_oids")]
    pub oids: Vec<String>,
}

impl DiscoverConfig {
    /// Load from an optional config file (prefix, e.g. "sentinel") and the
    /// `SENTINEL_DISCOVER__` environment, falling back to defaults.
    pub fn load(file_prefix: &str) -> Result<Self> {
        Self::build(config::File::with_name(file_prefix).required(false))
    }

    /// Load from an explicit file path, still honoring the environment.
    pub fn from_file(path: &Path) -> Result<Self> {
        Self::build(config::File::from(path))
    }

    // `SENTINEL_DISCOVER__REACHABILITY__WORKERS` lands on
    // `discover.reachability.workers`, next to the file's `[discover]` table.
    fn build(file: config::File<config::FileSourceFile, config::FileFormat>) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("SENTINEL")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| DiscoverError::Config(e.to_string()))?;

        match cfg.get::<DiscoverConfig>("discover") {
            Ok(c) => Ok(c),
            Err(config::ConfigError::NotFound(_)) => Ok(DiscoverConfig::default()),
            Err(e) => Err(DiscoverError::Config(e.to_string())),
        }
    }

    pub fn run_deadline(&self) -> Option<Duration> {
        self.run_deadline_secs.map(Duration::from_secs)
    }
}

impl SnmpConfig {
    /// snmpget's own retry loop plus one second of slack.
    pub fn fetch_limit(&self) -> Duration {
        let attempts = u64::from(self.retries) + 1;
        Duration::from_secs(self.timeout_secs * attempts + 1)
    }
}

fn default_nmap_path() -> String {
    "nmap".to_string()
}

fn default_sources() -> Vec<SourceKind> {
    vec![SourceKind::Lldp, SourceKind::Sweep, SourceKind::Arp]
}

fn default_lldpcli_path() -> String {
    "lldpcli".to_string()
}

fn default_capture_secs() -> u64 {
    10
}

fn default_sweep_timeout_secs() -> u64 {
    300
}

fn default_arping_path() -> String {
    "arping".to_string()
}

fn default_arp_workers() -> usize {
    50
}

fn default_arp_unit_timeout_ms() -> u64 {
    300
}

fn default_arp_max_hosts() -> usize {
    1024
}

fn default_reachability_workers() -> usize {
    50
}

fn default_reachability_timeout_ms() -> u64 {
    2000
}

fn default_enrichment_workers() -> usize {
    20
}

fn default_ports() -> Vec<u16> {
    vec![22, 80, 135, 139, 443, 445, 3389]
}

fn default_port_timeout_ms() -> u64 {
    500
}

fn default_dns_timeout_ms() -> u64 {
    2000
}

fn default_fingerprint_profile() -> ScanProfile {
    ScanProfile::Standard
}

fn default_fingerprint_timeout_secs() -> u64 {
    120
}

fn default_snmpget_path() -> String {
    "snmpget".to_string()
}

fn default_snmp_port() -> u16 {
    161
}

fn default_community() -> String {
    "public".to_string()
}

fn default_snmp_timeout_secs() -> u64 {
    2
}

fn default_snmp_retries() -> u32 {
    1
}

fn default_oids() -> Vec<String> {
    crate::probe::snmp::DEFAULT_OIDS
        .iter()
        .map(|oid| oid.to_string())
        .collect()
}

impl Default for DiscoverConfig {
    fn default() -> Self {
        Self {
            nmap_path: default_nmap_path(),
            interface: None,
            subnet: None,
            sources: default_sources(),
            run_deadline_secs: None,
            lldp: LldpConfig::default(),
            sweep: SweepConfig::default(),
            arp: ArpConfig::default(),
            reachability: ReachabilityConfig::default(),
            enrichment: EnrichmentConfig::default(),
            snmp: SnmpConfig::default(),
        }
    }
}

impl Default for LldpConfig {
    fn default() -> Self {
        Self {
            lldpcli_path: default_lldpcli_path(),
            capture_secs: default_capture_secs(),
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            profile: ScanProfile::Quick,
            timeout_secs: default_sweep_timeout_secs(),
        }
    }
}

impl Default for ArpConfig {
    fn default() -> Self {
        Self {
            arping_path: default_arping_path(),
            workers: default_arp_workers(),
            unit_timeout_ms: default_arp_unit_timeout_ms(),
            max_hosts: default_arp_max_hosts(),
        }
    }
}

impl Default for ReachabilityConfig {
    fn default() -> Self {
        Self {
            workers: default_reachability_workers(),
            timeout_ms: default_reachability_timeout_ms(),
        }
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            workers: default_enrichment_workers(),
            ports: default_ports(),
            port_timeout_ms: default_port_timeout_ms(),
            dns_timeout_ms: default_dns_timeout_ms(),
            fingerprint_profile: default_fingerprint_profile(),
            fingerprint_timeout_secs: default_fingerprint_timeout_secs(),
        }
    }
}

impl Default for SnmpConfig {
    fn default() -> Self {
        Self {
            snmpget_path: default_snmpget_path(),
            port: default_snmp_port(),
            community: default_community(),
            timeout_secs: default_snmp_timeout_secs(),
            retries: default_snmp_retries(),
            oids: default_oids(),
        }
    }
}
