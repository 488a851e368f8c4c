//! Link-layer neighbor capture through lldpd.
//!
//! lldpd does the actual capture; this source polls its neighbor table
//! (`lldpcli show neighbors -f keyvalue`) once a second for the capture
//! window and keeps the latest view of each chassis.

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use sentinel_core::{Observation, Technique};
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::command;
use crate::config::LldpConfig;
use crate::error::DiscoverError;
use crate::interface::LocalSegment;
use crate::sources::{DiscoverySource, SourceReport};

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const POLL_LIMIT: Duration = Duration::from_secs(2);

/// Keys lldpcli uses for the chassis identifier, by subtype.
const CHASSIS_ID_KEYS: &[&str] = &["chassis.id", "chassis.mac", "chassis.local", "chassis.ifname", "chassis.ip"];
const PORT_ID_KEYS: &[&str] = &["port.id", "port.ifname", "port.mac", "port.local"];

/// First component after the interface name in a keyvalue key.
const KEY_SECTIONS: &[&str] = &[
    "chassis",
    "port",
    "vlan",
    "ppvid",
    "pi",
    "lldp-med",
    "unknown-tlvs",
    "rid",
    "via",
    "age",
];

/// One neighbor as advertised over LLDP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LldpNeighbor {
    pub local_interface: String,
    pub chassis_id: String,
    pub port_id: Option<String>,
    pub system_name: Option<String>,
    pub system_desc: Option<String>,
    pub mgmt_addresses: Vec<String>,
}

impl LldpNeighbor {
    pub fn to_observation(&self) -> Observation {
        let mut obs = Observation::new(Technique::Lldp).with_device_type("switch");
        if let Some(address) = self
            .mgmt_addresses
            .iter()
            .find_map(|a| a.parse::<IpAddr>().ok())
        {
            obs = obs.with_address(address);
        }
        if let Some(name) = &self.system_name {
            obs = obs.with_hostname(name.clone());
        }
        if let Some(desc) = &self.system_desc {
            obs = obs.with_description(desc.clone());
        }
        if looks_like_mac(&self.chassis_id) {
            obs = obs.with_hardware_address(self.chassis_id.to_lowercase());
        }
        obs
    }
}

#[derive(Debug, Clone)]
pub struct LldpSource {
    config: LldpConfig,
}

impl LldpSource {
    pub fn new(config: LldpConfig) -> Self {
        Self { config }
    }

    async fn poll(&self, limit: Duration) -> crate::error::Result<Vec<LldpNeighbor>> {
        let output = command::run_checked(
            &self.config.lldpcli_path,
            &["show", "neighbors", "-f", "keyvalue"],
            limit,
        )
        .await?;
        Ok(parse_lldpcli_keyvalue(&String::from_utf8_lossy(&output.stdout)))
    }
}

#[async_trait]
impl DiscoverySource for LldpSource {
    fn technique(&self) -> Technique {
        Technique::Lldp
    }

    fn time_bound(&self) -> Duration {
        Duration::from_secs(self.config.capture_secs)
    }

    async fn discover(&self, segment: &LocalSegment, cancel: &CancellationToken) -> SourceReport {
        let deadline = Instant::now() + self.time_bound();
        let mut ticker = interval(POLL_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut by_chassis: BTreeMap<String, LldpNeighbor> = BTreeMap::new();
        let mut polls_ok = 0usize;
        let mut last_error: Option<DiscoverError> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    last_error = Some(DiscoverError::Cancelled);
                    break;
                }
                _ = sleep_until(deadline) => break,
                _ = ticker.tick() => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        break;
                    }
                    match self.poll(remaining.min(POLL_LIMIT)).await {
                        Ok(neighbors) => {
                            polls_ok += 1;
                            for neighbor in neighbors
                                .into_iter()
                                .filter(|n| n.local_interface == segment.interface)
                            {
                                by_chassis.insert(neighbor.chassis_id.clone(), neighbor);
                            }
                        }
                        Err(e @ DiscoverError::ToolNotFound { .. }) => {
                            last_error = Some(e);
                            break;
                        }
                        Err(e) => {
                            tracing::debug!(error = %e, "lldpcli poll failed");
                            last_error = Some(e);
                        }
                    }
                }
            }
        }

        tracing::debug!(
            interface = %segment.interface,
            polls = polls_ok,
            neighbors = by_chassis.len(),
            "LLDP capture finished"
        );

        let observations = by_chassis.values().map(LldpNeighbor::to_observation).collect();
        match last_error {
            Some(DiscoverError::Cancelled) => {
                SourceReport::partial(Technique::Lldp, observations, DiscoverError::Cancelled)
            }
            Some(e) if polls_ok == 0 => SourceReport::partial(Technique::Lldp, observations, e),
            _ => SourceReport::complete(Technique::Lldp, observations),
        }
    }
}

/// Parse `lldpcli -f keyvalue` output.
///
/// Lines look like `lldp.<iface>.chassis.name=switch1`; the interface may
/// itself contain dots (`eth0.100`). A new neighbor
/// starts when the interface changes or a second `rid` appears for the
/// same interface.
pub fn parse_lldpcli_keyvalue(output: &str) -> Vec<LldpNeighbor> {
    let mut neighbors = Vec::new();
    let mut current: HashMap<String, String> = HashMap::new();
    let mut current_interface = String::new();

    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let Some((interface, rest_key)) = split_key(key) else {
            continue;
        };
        let rest_key = rest_key.to_string();
        let new_block = interface != current_interface
            || (rest_key == "rid" && current.contains_key("rid"));

        if new_block && !current_interface.is_empty() {
            neighbors.extend(build_neighbor(&current_interface, &current));
            current.clear();
        }
        current_interface = interface.to_string();

        // Repeated keys (several mgmt-ip lines) are kept with an index suffix.
        let mut slot = rest_key.clone();
        let mut n = 1;
        while current.contains_key(&slot) {
            slot = format!("{rest_key}#{n}");
            n += 1;
        }
        current.insert(slot, value.trim().to_string());
    }

    if !current_interface.is_empty() {
        neighbors.extend(build_neighbor(&current_interface, &current));
    }
    neighbors
}

/// `lldp.eth0.100.chassis.name` -> (`eth0.100`, `chassis.name`).
fn split_key(key: &str) -> Option<(&str, &str)> {
    let body = key.strip_prefix("lldp.")?;
    body.match_indices('.')
        .map(|(i, _)| i)
        .filter(|&i| i > 0)
        .find(|&i| {
            let rest = &body[i + 1..];
            let section = rest.split('.').next().unwrap_or(rest);
            KEY_SECTIONS.contains(&section)
        })
        .map(|i| (&body[..i], &body[i + 1..]))
}

fn build_neighbor(interface: &str, data: &HashMap<String, String>) -> Option<LldpNeighbor> {
    let first_of = |keys: &[&str]| keys.iter().find_map(|k| data.get(*k)).cloned();

    let chassis_id = first_of(CHASSIS_ID_KEYS)?;
    let mut mgmt_addresses: Vec<(String, String)> = data
        .iter()
        .filter(|(k, _)| k.starts_with("chassis.mgmt-ip"))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    mgmt_addresses.sort();

    Some(LldpNeighbor {
        local_interface: interface.to_string(),
        chassis_id,
        port_id: first_of(PORT_ID_KEYS),
        system_name: data.get("chassis.name").cloned(),
        system_desc: data.get("chassis.descr").cloned(),
        mgmt_addresses: mgmt_addresses.into_iter().map(|(_, v)| v).collect(),
    })
}

fn looks_like_mac(value: &str) -> bool {
    let octets: Vec<&str> = value.split([':', '-']).collect();
    octets.len() == 6
        && octets
            .iter()
            .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()))
}
