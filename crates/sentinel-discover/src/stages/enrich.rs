//! Enrichment: best-effort augmentation of every record.
//!
//! Each unit runs five steps in order on its own snapshot: reverse name,
//! well-known ports, service fingerprint, management counters, vendor
//! placeholder. A step that fails or times out is logged and skipped; the
//! remaining steps still run.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use sentinel_core::{Inventory, Record, Technique};
use tokio_util::sync::CancellationToken;

use crate::config::{EnrichmentConfig, SnmpConfig};
use crate::probe::{self, ports, snmp, vendor, Probes};
use crate::stages::{self, StageReport, UnitOutcome};

/// Timeouts and inputs shared by every unit.
#[derive(Debug, Clone)]
struct EnrichSettings {
    ports: Vec<u16>,
    port_timeout: Duration,
    dns_timeout: Duration,
    fingerprint_timeout: Duration,
    oids: Vec<String>,
    management_timeout: Duration,
}

pub struct EnrichStage {
    probes: Probes,
    workers: usize,
    settings: Arc<EnrichSettings>,
}

impl EnrichStage {
    pub fn new(probes: Probes, config: &EnrichmentConfig, snmp: &SnmpConfig) -> Self {
        Self {
            probes,
            workers: config.workers,
            settings: Arc::new(EnrichSettings {
                ports: config.ports.clone(),
                port_timeout: Duration::from_millis(config.port_timeout_ms),
                dns_timeout: Duration::from_millis(config.dns_timeout_ms),
                fingerprint_timeout: Duration::from_secs(config.fingerprint_timeout_secs),
                oids: snmp.oids.clone(),
                management_timeout: snmp.fetch_limit(),
            }),
        }
    }

    pub async fn run(&self, inventory: &mut Inventory, cancel: &CancellationToken) -> StageReport {
        let snapshots = inventory.records().cloned().collect();
        tracing::info!(records = inventory.len(), workers = self.workers, "Starting enrichment stage");

        let (finished, report) = stages::run_bounded("enrich", snapshots, self.workers, cancel, |record| {
            enrich_record(self.probes.clone(), Arc::clone(&self.settings), record)
        })
        .await;

        stages::write_back(inventory, finished);
        report.log();
        report
    }
}

async fn enrich_record(probes: Probes, settings: Arc<EnrichSettings>, mut record: Record) -> UnitOutcome {
    let address = record.address;
    let mut faults = 0;

    // 1. Reverse name, only when nothing named the device yet.
    if !record.has_hostname() {
        match tokio::time::timeout(settings.dns_timeout, probes.resolver.reverse(address)).await {
            Ok(Ok(Some(name))) => {
                if record.fill_hostname(&name) {
                    record.add_technique(Technique::Dns);
                }
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => {
                faults += 1;
                tracing::debug!(address = %address, error = %e, "Reverse lookup failed");
            }
            Err(_) => {
                faults += 1;
                tracing::debug!(address = %address, "Reverse lookup timed out");
            }
        }
    }

    // 2. Well-known ports and the platform guess.
    let open = ports::probe_ports(
        Arc::clone(&probes.ports),
        address,
        &settings.ports,
        settings.port_timeout,
    )
    .await;
    apply_open_ports(&mut record, &open);

    // 3. Service banners.
    match tokio::time::timeout(settings.fingerprint_timeout, probes.fingerprinter.fingerprint(address)).await {
        Ok(Ok(fingerprint)) => apply_fingerprint(&mut record, &fingerprint),
        Ok(Err(e)) => {
            faults += 1;
            tracing::debug!(address = %address, error = %e, "Service fingerprint failed");
        }
        Err(_) => {
            faults += 1;
            tracing::debug!(address = %address, "Service fingerprint timed out");
        }
    }

    // 4. Management counters.
    match tokio::time::timeout(
        settings.management_timeout,
        probes.management.fetch(address, &settings.oids),
    )
    .await
    {
        Ok(Ok(values)) => {
            snmp::apply_management_values(&mut record, &values);
        }
        Ok(Err(e)) => {
            faults += 1;
            tracing::debug!(address = %address, error = %e, "Management fetch failed");
        }
        Err(_) => {
            faults += 1;
            tracing::debug!(address = %address, "Management fetch timed out");
        }
    }

    // 5. Vendor placeholder.
    if !record.has_vendor() {
        if let Some(tag) = record
            .hardware_address
            .as_deref()
            .and_then(vendor::vendor_from_hardware_address)
        {
            record.fill_vendor(&tag);
        }
    }

    tracing::debug!(
        address = %address,
        faults,
        protocols = record.source_protocols.len(),
        "Record enriched"
    );
    UnitOutcome { record, faults }
}

fn apply_open_ports(record: &mut Record, open: &BTreeSet<u16>) {
    if open.is_empty() {
        return;
    }
    let platform = ports::guess_platform(open);
    record.open_ports.extend(open.iter().copied());
    record.platform = Some(platform);
    record.add_technique(Technique::Ports);

    let listed: Vec<u16> = open.iter().copied().collect();
    record.append_description(&format!("Open ports: {listed:?}"));
    record.fill_device_type(platform.device_type_label());
}

fn apply_fingerprint(record: &mut Record, fingerprint: &probe::Fingerprint) {
    record.append_description(&fingerprint.description);
    for protocol in &fingerprint.protocols {
        record.add_protocol(protocol);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DiscoverError, Result};
    use crate::probe::{Fingerprinter, ManagementClient, NameResolver, Pinger, PortProber};
    use async_trait::async_trait;
    use sentinel_core::{Observation, Platform};
    use std::collections::HashMap;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Mutex;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    fn record() -> Record {
        let obs = Observation::new(Technique::Arp)
            .with_address(ip(5))
            .with_hardware_address("aa:bb:cc:dd:ee:ff");
        Record::from_observation(&obs).unwrap()
    }

    /// `.5` has a name, `.6` errors, `.7` never answers. Every lookup is recorded.
    #[derive(Default)]
    struct ScriptedNames {
        asked: Mutex<Vec<IpAddr>>,
    }

    #[async_trait]
    impl NameResolver for ScriptedNames {
        async fn reverse(&self, address: IpAddr) -> Result<Option<String>> {
            self.asked.lock().unwrap().push(address);
            match address {
                a if a == ip(5) => Ok(Some("nas.lan".to_string())),
                a if a == ip(6) => Err(DiscoverError::ToolFailed {
                    tool: "getent".to_string(),
                    code: 1,
                    stderr: String::new(),
                }),
                _ => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(Some("late.lan".to_string()))
                }
            }
        }
    }

    struct Unused;

    #[async_trait]
    impl Pinger for Unused {
        async fn ping(&self, _address: IpAddr, _timeout: Duration) -> Result<Duration> {
            Ok(Duration::ZERO)
        }
    }

    struct SshOnly;

    #[async_trait]
    impl PortProber for SshOnly {
        async fn is_open(&self, _address: IpAddr, port: u16, _timeout: Duration) -> bool {
            port == 22
        }
    }

    struct SshBanner;

    #[async_trait]
    impl Fingerprinter for SshBanner {
        async fn fingerprint(&self, _address: IpAddr) -> Result<probe::Fingerprint> {
            Ok(probe::Fingerprint {
                description: "22/ssh(OpenSSH 9.6)".to_string(),
                protocols: vec!["ssh".to_string()],
            })
        }
    }

    struct Counters;

    #[async_trait]
    impl ManagementClient for Counters {
        async fn fetch(&self, _address: IpAddr, _oids: &[String]) -> Result<HashMap<String, String>> {
            Ok(HashMap::from([(snmp::IF_IN_OCTETS.to_string(), "4096".to_string())]))
        }
    }

    fn probes(names: Arc<ScriptedNames>) -> Probes {
        Probes {
            pinger: Arc::new(Unused),
            resolver: names,
            ports: Arc::new(SshOnly),
            fingerprinter: Arc::new(SshBanner),
            management: Arc::new(Counters),
        }
    }

    fn settings() -> Arc<EnrichSettings> {
        Arc::new(EnrichSettings {
            ports: vec![22, 80],
            port_timeout: Duration::from_millis(100),
            dns_timeout: Duration::from_millis(50),
            fingerprint_timeout: Duration::from_secs(1),
            oids: vec![snmp::IF_IN_OCTETS.to_string()],
            management_timeout: Duration::from_secs(1),
        })
    }

    fn unnamed(last: u8) -> Record {
        let obs = Observation::new(Technique::Arp)
            .with_address(ip(last))
            .with_hardware_address("00:1a:2b:3c:4d:5e");
        Record::from_observation(&obs).unwrap()
    }

    /// Every step after the name lookup left its mark.
    fn assert_later_steps_ran(record: &Record) {
        assert_eq!(record.open_ports.iter().copied().collect::<Vec<_>>(), vec![22]);
        assert_eq!(record.platform, Some(Platform::Unix));
        assert!(record.source_protocols.contains("ssh"));
        assert_eq!(record.counters.in_octets, Some(4096));
        assert!(record.source_protocols.contains("snmp"));
        assert_eq!(record.vendor.as_deref(), Some("Vendor-001A"));
    }

    #[tokio::test]
    async fn test_reverse_name_fills_empty_hostname() {
        let names = Arc::new(ScriptedNames::default());
        let outcome = enrich_record(probes(names.clone()), settings(), unnamed(5)).await;

        assert_eq!(outcome.faults, 0);
        assert_eq!(outcome.record.hostname.as_deref(), Some("nas.lan"));
        assert!(outcome.record.source_protocols.contains("dns"));
        assert_later_steps_ran(&outcome.record);
    }

    #[tokio::test]
    async fn test_named_record_skips_lookup() {
        let names = Arc::new(ScriptedNames::default());
        let obs = Observation::new(Technique::Lldp)
            .with_address(ip(5))
            .with_hostname("printer1");
        let named = Record::from_observation(&obs).unwrap();

        let outcome = enrich_record(probes(names.clone()), settings(), named).await;

        assert!(names.asked.lock().unwrap().is_empty());
        assert_eq!(outcome.record.hostname.as_deref(), Some("printer1"));
        assert!(!outcome.record.source_protocols.contains("dns"));
    }

    #[tokio::test]
    async fn test_lookup_failure_does_not_stop_later_steps() {
        let names = Arc::new(ScriptedNames::default());

        for last in [6, 7] {
            let outcome = enrich_record(probes(names.clone()), settings(), unnamed(last)).await;
            assert_eq!(outcome.faults, 1, "10.0.0.{last}");
            assert!(outcome.record.hostname.is_none());
            assert!(!outcome.record.source_protocols.contains("dns"));
            assert_later_steps_ran(&outcome.record);
        }
        assert_eq!(*names.asked.lock().unwrap(), vec![ip(6), ip(7)]);
    }

    #[test]
    fn test_apply_open_ports_windows_wins() {
        let mut record = record();
        apply_open_ports(&mut record, &[22, 445].into_iter().collect());

        assert_eq!(record.platform, Some(Platform::Windows));
        assert_eq!(record.device_type.as_deref(), Some("Windows (likely)"));
        assert_eq!(record.description.as_deref(), Some("Open ports: [22, 445]"));
        assert!(record.source_protocols.contains("ports"));
    }

    #[test]
    fn test_apply_open_ports_keeps_existing_device_type() {
        let mut record = record();
        record.fill_device_type("switch");
        apply_open_ports(&mut record, &[22].into_iter().collect());

        assert_eq!(record.platform, Some(Platform::Unix));
        assert_eq!(record.device_type.as_deref(), Some("switch"));
    }

    #[test]
    fn test_no_open_ports_changes_nothing() {
        let mut record = record();
        let before = record.clone();
        apply_open_ports(&mut record, &BTreeSet::new());
        assert_eq!(record, before);
    }

    #[test]
    fn test_apply_fingerprint() {
        let mut record = record();
        record.append_description("Open ports: [22]");
        apply_fingerprint(
            &mut record,
            &probe::Fingerprint {
                description: "22/ssh(OpenSSH 9.6)".to_string(),
                protocols: vec!["SSH".to_string()],
            },
        );
        assert_eq!(
            record.description.as_deref(),
            Some("Open ports: [22]; 22/ssh(OpenSSH 9.6)")
        );
        assert!(record.source_protocols.contains("ssh"));
    }
}
