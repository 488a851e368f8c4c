//! Service/version fingerprinting through an nmap service scan.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::ScanProfile;
use crate::error::Result;
use crate::nmap::NmapScanner;
use crate::nmap_xml::NmapRun;
use crate::probe::{Fingerprint, Fingerprinter};

#[derive(Debug, Clone)]
pub struct NmapFingerprinter {
    scanner: NmapScanner,
    profile: ScanProfile,
    limit: Duration,
}

impl NmapFingerprinter {
    pub fn new(scanner: NmapScanner, profile: ScanProfile, limit: Duration) -> Self {
        Self {
            scanner,
            profile,
            limit,
        }
    }
}

#[async_trait]
impl Fingerprinter for NmapFingerprinter {
    async fn fingerprint(&self, address: IpAddr) -> Result<Fingerprint> {
        let result = self
            .scanner
            .scan(&address.to_string(), &self.profile, self.limit)
            .await?;
        Ok(summarize(&result.nmap_run))
    }
}

/// Condense a service scan into `port/service(banner)` entries.
pub fn summarize(run: &NmapRun) -> Fingerprint {
    let mut entries = Vec::new();
    let mut protocols: Vec<String> = Vec::new();

    for host in run.hosts.iter().filter(|h| h.is_up()) {
        for port in host.open_ports() {
            let Some(service) = &port.service else {
                entries.push(port.port_id.to_string());
                continue;
            };
            let name = service.name.trim();
            let entry = match service.banner() {
                Some(banner) => format!("{}/{}({})", port.port_id, name, banner),
                None => format!("{}/{}", port.port_id, name),
            };
            entries.push(entry);

            if !name.is_empty() && !protocols.iter().any(|p| p == name) {
                protocols.push(name.to_string());
            }
        }
        if let Some(os) = host.os_name() {
            entries.push(format!("os:{os}"));
        }
    }

    Fingerprint {
        description: entries.join("; "),
        protocols,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nmap_xml::parse_nmap_xml;

    const SERVICE_SCAN: &str = r#"<?xml version="1.0"?>
<nmaprun scanner="nmap" args="nmap -sV -T4 --open -oX - 10.0.0.5" start="1700000000" version="7.94">
  <host>
    <status state="up" reason="syn-ack"/>
    <address addr="10.0.0.5" addrtype="ipv4"/>
    <ports>
      <port protocol="tcp" portid="22">
        <state state="open" reason="syn-ack"/>
        <service name="ssh" product="OpenSSH" version="9.6p1"/>
      </port>
      <port protocol="tcp" portid="80">
        <state state="open" reason="syn-ack"/>
        <service name="http" product="nginx"/>
      </port>
      <port protocol="tcp" portid="8080">
        <state state="open" reason="syn-ack"/>
        <service name="http"/>
      </port>
    </ports>
  </host>
</nmaprun>"#;

    #[test]
    fn test_summarize_service_scan() {
        let run = parse_nmap_xml(SERVICE_SCAN.as_bytes()).unwrap();
        let fingerprint = summarize(&run);
        assert_eq!(
            fingerprint.description,
            "22/ssh(OpenSSH 9.6p1); 80/http(nginx); 8080/http"
        );
        assert_eq!(fingerprint.protocols, vec!["ssh", "http"]);
    }

    #[test]
    fn test_summarize_no_hosts() {
        let run = NmapRun { hosts: Vec::new() };
        assert!(summarize(&run).is_empty());
    }
}
