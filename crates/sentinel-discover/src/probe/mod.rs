//! Per-device probe collaborators.
//!
//! Each external capability the reachability and enrichment stages call is
//! a trait, so stages can run against the real tools or against stubs. The
//! default implementations shell out to system tools or open plain sockets;
//! none of them speaks a wire protocol in-process.

pub mod dns;
pub mod fingerprint;
pub mod icmp;
pub mod ports;
pub mod snmp;
pub mod vendor;

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::DiscoverConfig;
use crate::error::Result;
use crate::nmap::NmapScanner;

/// Echo-style round-trip probe.
#[async_trait]
pub trait Pinger: Send + Sync {
    /// Round-trip time on success; any error means unreachable.
    async fn ping(&self, address: IpAddr, timeout: Duration) -> Result<Duration>;
}

/// Reverse name resolution.
#[async_trait]
pub trait NameResolver: Send + Sync {
    async fn reverse(&self, address: IpAddr) -> Result<Option<String>>;
}

/// TCP reachability of a single port.
#[async_trait]
pub trait PortProber: Send + Sync {
    async fn is_open(&self, address: IpAddr, port: u16, timeout: Duration) -> bool;
}

/// Service/version banner fingerprint of a host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fingerprint {
    /// Free-text summary, e.g. `22/ssh(OpenSSH 9.6); 80/http(nginx)`.
    pub description: String,
    /// Service names seen, used as protocol tags.
    pub protocols: Vec<String>,
}

impl Fingerprint {
    pub fn is_empty(&self) -> bool {
        self.description.trim().is_empty() && self.protocols.is_empty()
    }
}

#[async_trait]
pub trait Fingerprinter: Send + Sync {
    async fn fingerprint(&self, address: IpAddr) -> Result<Fingerprint>;
}

/// Management-protocol GET of a set of OIDs.
#[async_trait]
pub trait ManagementClient: Send + Sync {
    /// Values keyed by numeric OID without a leading dot.
    async fn fetch(&self, address: IpAddr, oids: &[String]) -> Result<HashMap<String, String>>;
}

/// The collaborators used after discovery.
#[derive(Clone)]
pub struct Probes {
    pub pinger: Arc<dyn Pinger>,
    pub resolver: Arc<dyn NameResolver>,
    pub ports: Arc<dyn PortProber>,
    pub fingerprinter: Arc<dyn Fingerprinter>,
    pub management: Arc<dyn ManagementClient>,
}

impl Probes {
    /// Build the system-tool backed collaborators from configuration.
    pub fn from_config(config: &DiscoverConfig) -> Self {
        let enrichment = &config.enrichment;
        Self {
            pinger: Arc::new(icmp::SystemPinger::default()),
            resolver: Arc::new(dns::GetentResolver::new(Duration::from_millis(
                enrichment.dns_timeout_ms,
            ))),
            ports: Arc::new(ports::TcpConnectProber),
            fingerprinter: Arc::new(fingerprint::NmapFingerprinter::new(
                NmapScanner::new(&config.nmap_path),
                enrichment.fingerprint_profile.clone(),
                Duration::from_secs(enrichment.fingerprint_timeout_secs),
            )),
            management: Arc::new(snmp::SnmpGetClient::new(config.snmp.clone())),
        }
    }
}
