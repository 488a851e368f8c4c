//! Management counter fetch via net-snmp's `snmpget`.
//!
//! Output is requested with `-On -Oq`, which prints one `<numeric-oid> <value>`
//! pair per line with no type prefix. Missing objects come back as
//! `No Such Object/Instance ...` and are skipped.

use std::collections::HashMap;
use std::net::IpAddr;

use async_trait::async_trait;
use sentinel_core::Record;

use crate::command;
use crate::config::SnmpConfig;
use crate::error::Result;
use crate::probe::ManagementClient;

pub const SYS_UPTIME: &str = "1.3.6.1.2.1.1.3.0";
pub const SYS_NAME: &str = "1.3.6.1.2.1.1.5.0";
pub const SYS_DESCR: &str = "1.3.6.1.2.1.1.1.0";
pub const IF_IN_OCTETS: &str = "1.3.6.1.2.1.2.2.1.10.1";
pub const IF_OUT_OCTETS: &str = "1.3.6.1.2.1.2.2.1.16.1";
pub const IF_IN_ERRORS: &str = "1.3.6.1.2.1.2.2.1.14.1";
pub const IF_OUT_ERRORS: &str = "1.3.6.1.2.1.2.2.1.20.1";

pub const DEFAULT_OIDS: &[&str] = &[
    SYS_UPTIME,
    SYS_NAME,
    SYS_DESCR,
    IF_IN_OCTETS,
    IF_OUT_OCTETS,
    IF_IN_ERRORS,
    IF_OUT_ERRORS,
];

#[derive(Debug, Clone)]
pub struct SnmpGetClient {
    config: SnmpConfig,
}

impl SnmpGetClient {
    pub fn new(config: SnmpConfig) -> Self {
        Self { config }
    }

    fn target(&self, address: IpAddr) -> String {
        match address {
            IpAddr::V4(v4) => format!("{}:{}", v4, self.config.port),
            IpAddr::V6(v6) => format!("udp6:[{}]:{}", v6, self.config.port),
        }
    }
}

#[async_trait]
impl ManagementClient for SnmpGetClient {
    async fn fetch(&self, address: IpAddr, oids: &[String]) -> Result<HashMap<String, String>> {
        if oids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut args = vec![
            "-v2c".to_string(),
            "-c".to_string(),
            self.config.community.clone(),
            "-t".to_string(),
            self.config.timeout_secs.to_string(),
            "-r".to_string(),
            self.config.retries.to_string(),
            "-On".to_string(),
            "-Oq".to_string(),
            self.target(address),
        ];
        args.extend(oids.iter().cloned());

        let output =
            command::run_checked(&self.config.snmpget_path, &args, self.config.fetch_limit()).await?;
        Ok(parse_snmpget_output(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Parse `-On -Oq` output into OID (no leading dot) to value.
pub fn parse_snmpget_output(output: &str) -> HashMap<String, String> {
    output
        .lines()
        .filter_map(|line| {
            let (oid, value) = line.trim().split_once(char::is_whitespace)?;
            let value = value.trim().trim_matches('"').trim();
            if value.starts_with("No Such") || value.is_empty() {
                return None;
            }
            Some((oid.trim_start_matches('.').to_string(), value.to_string()))
        })
        .collect()
}

/// Copy fetched values onto the record. Returns whether anything was set.
pub fn apply_management_values(record: &mut Record, values: &HashMap<String, String>) -> bool {
    let mut applied = false;

    for (oid, slot) in [
        (IF_IN_OCTETS, &mut record.counters.in_octets),
        (IF_OUT_OCTETS, &mut record.counters.out_octets),
        (IF_IN_ERRORS, &mut record.counters.in_errors),
        (IF_OUT_ERRORS, &mut record.counters.out_errors),
    ] {
        if let Some(counter) = values.get(oid).and_then(|v| v.parse::<u64>().ok()) {
            *slot = Some(counter);
            applied = true;
        }
    }

    if let Some(name) = values.get(SYS_NAME) {
        record.system_name = Some(name.clone());
        record.fill_hostname(name);
        applied = true;
    }
    if let Some(uptime) = values.get(SYS_UPTIME) {
        record.system_uptime = Some(uptime.clone());
        applied = true;
    }
    if let Some(descr) = values.get(SYS_DESCR) {
        record.system_description = Some(descr.clone());
        applied = true;
    }

    if applied {
        record.add_protocol("snmp");
    }
    applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_core::{Observation, Technique};
    use std::net::Ipv4Addr;
    use std::time::Duration;

    const ROUTER_OUTPUT: &str = "\
.1.3.6.1.2.1.1.3.0 12:3:45:06.78
.1.3.6.1.2.1.1.5.0 \"core-sw1\"
.1.3.6.1.2.1.1.1.0 \"Cisco IOS Software, C2960 Software\"
.1.3.6.1.2.1.2.2.1.10.1 123456789
.1.3.6.1.2.1.2.2.1.16.1 987654321
.1.3.6.1.2.1.2.2.1.14.1 0
.1.3.6.1.2.1.2.2.1.20.1 No Such Instance currently exists at this OID
";

    fn record() -> Record {
        let obs = Observation::new(Technique::Nmap)
            .with_address(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        Record::from_observation(&obs).unwrap()
    }

    #[test]
    fn test_default_oids() {
        assert_eq!(DEFAULT_OIDS.len(), 7);
        assert!(DEFAULT_OIDS.iter().all(|oid| !oid.starts_with('.')));
    }

    #[test]
    fn test_parse_snmpget_output() {
        let values = parse_snmpget_output(ROUTER_OUTPUT);
        assert_eq!(values.len(), 6);
        assert_eq!(values[SYS_NAME], "core-sw1");
        assert_eq!(values[SYS_UPTIME], "12:3:45:06.78");
        assert_eq!(values[IF_IN_OCTETS], "123456789");
        assert!(!values.contains_key(IF_OUT_ERRORS));
    }

    #[test]
    fn test_apply_management_values() {
        let mut record = record();
        let applied = apply_management_values(&mut record, &parse_snmpget_output(ROUTER_OUTPUT));

        assert!(applied);
        assert_eq!(record.counters.in_octets, Some(123_456_789));
        assert_eq!(record.counters.out_octets, Some(987_654_321));
        assert_eq!(record.counters.in_errors, Some(0));
        assert_eq!(record.counters.out_errors, None);
        assert_eq!(record.hostname.as_deref(), Some("core-sw1"));
        assert_eq!(record.system_name.as_deref(), Some("core-sw1"));
        assert!(record.source_protocols.contains("snmp"));
    }

    #[test]
    fn test_sys_name_does_not_replace_hostname() {
        let mut record = record();
        record.fill_hostname("printer1");
        let values = HashMap::from([(SYS_NAME.to_string(), "HP-LJ-4000".to_string())]);

        apply_management_values(&mut record, &values);
        assert_eq!(record.hostname.as_deref(), Some("printer1"));
        assert_eq!(record.system_name.as_deref(), Some("HP-LJ-4000"));
    }

    #[test]
    fn test_unparsable_counter_left_untouched() {
        let mut record = record();
        let values = HashMap::from([(IF_IN_OCTETS.to_string(), "Wrong Type".to_string())]);

        assert!(!apply_management_values(&mut record, &values));
        assert_eq!(record.counters.in_octets, None);
        assert!(!record.source_protocols.contains("snmp"));
    }

    #[test]
    fn test_ipv6_target() {
        let client = SnmpGetClient::new(SnmpConfig::default());
        let v6: IpAddr = "fe80::1".parse().unwrap();
        assert_eq!(client.target(v6), "udp6:[fe80::1]:161");
        assert_eq!(client.config.fetch_limit(), Duration::from_secs(5));
    }
}
