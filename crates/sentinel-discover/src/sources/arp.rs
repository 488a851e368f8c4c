//! Address-resolution sweep of the local segment.
//!
//! The kernel neighbor table seeds addresses that are already resolved;
//! every other host address in the subnet is then resolved with one
//! `arping` request each. A semaphore caps in-flight requests and each
//! request has its own short timeout, so the worst case is about
//! `hosts / workers * unit_timeout`.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sentinel_core::{Observation, Technique};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::command;
use crate::config::ArpConfig;
use crate::error::{DiscoverError, Result};
use crate::interface::LocalSegment;
use crate::sources::{DiscoverySource, SourceReport};

const NEIGHBOR_TABLE_LIMIT: Duration = Duration::from_secs(5);

/// Kernel neighbor entry state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighborState {
    Reachable,
    Stale,
    Delay,
    Probe,
    Failed,
    Incomplete,
    Permanent,
    Noarp,
    Unknown,
}

impl NeighborState {
    fn parse(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "REACHABLE" => Self::Reachable,
            "STALE" => Self::Stale,
            "DELAY" => Self::Delay,
            "PROBE" => Self::Probe,
            "FAILED" => Self::Failed,
            "INCOMPLETE" => Self::Incomplete,
            "PERMANENT" => Self::Permanent,
            "NOARP" => Self::Noarp,
            _ => Self::Unknown,
        }
    }

    /// Whether the entry carries a usable link-layer address.
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Self::Failed | Self::Incomplete)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborEntry {
    pub ip: Ipv4Addr,
    pub mac: String,
    pub state: NeighborState,
}

/// Resolves IPv4 addresses to link-layer addresses on one interface.
#[async_trait]
pub trait NeighborResolver: Send + Sync {
    /// Entries the host already knows about.
    async fn neighbor_table(&self, interface: &str) -> Result<Vec<NeighborEntry>>;

    /// Link-layer address of `address`, or `None` when nothing answered.
    async fn resolve(&self, interface: &str, address: Ipv4Addr) -> Result<Option<String>>;
}

/// `ip neigh` for the table, `arping` for individual requests.
#[derive(Debug, Clone)]
pub struct ArpingResolver {
    arping_path: String,
    ip_path: String,
}

impl ArpingResolver {
    pub fn new(arping_path: &str) -> Self {
        Self {
            arping_path: arping_path.to_string(),
            ip_path: "ip".to_string(),
        }
    }
}

#[async_trait]
impl NeighborResolver for ArpingResolver {
    async fn neighbor_table(&self, interface: &str) -> Result<Vec<NeighborEntry>> {
        let output = command::run_checked(
            &self.ip_path,
            &["neigh", "show", "dev", interface],
            NEIGHBOR_TABLE_LIMIT,
        )
        .await?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(parse_ip_neigh_line)
            .collect())
    }

    async fn resolve(&self, interface: &str, address: Ipv4Addr) -> Result<Option<String>> {
        let args = [
            "-c".to_string(),
            "1".to_string(),
            "-w".to_string(),
            "1".to_string(),
            "-I".to_string(),
            interface.to_string(),
            address.to_string(),
        ];
        let output = command::run_tool(&self.arping_path, &args, Duration::from_secs(2)).await?;
        arping_outcome(
            &self.arping_path,
            output.status.code(),
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
            address,
        )
    }
}

/// Exit 1 only means nobody answered; anything above it (or a signal) is a
/// failure of arping itself, e.g. a missing raw-socket capability.
fn arping_outcome(
    tool: &str,
    code: Option<i32>,
    stdout: &str,
    stderr: &str,
    address: Ipv4Addr,
) -> Result<Option<String>> {
    match code {
        Some(0) | Some(1) => Ok(parse_arping_reply(stdout, address)),
        other => Err(DiscoverError::ToolFailed {
            tool: tool.to_string(),
            code: other.unwrap_or(-1),
            stderr: stderr.trim().to_string(),
        }),
    }
}

#[derive(Clone)]
pub struct ArpSweepSource {
    resolver: Arc<dyn NeighborResolver>,
    config: ArpConfig,
}

impl ArpSweepSource {
    pub fn new(resolver: Arc<dyn NeighborResolver>, config: ArpConfig) -> Self {
        Self { resolver, config }
    }

    fn unit_timeout(&self) -> Duration {
        Duration::from_millis(self.config.unit_timeout_ms)
    }

    /// Host addresses still to resolve, capped at `max_hosts`.
    fn targets(&self, segment: &LocalSegment, known: &BTreeMap<Ipv4Addr, String>) -> Vec<Ipv4Addr> {
        segment
            .subnet
            .hosts()
            .filter(|ip| *ip != segment.address && !known.contains_key(ip))
            .take(self.config.max_hosts)
            .collect()
    }
}

#[async_trait]
impl DiscoverySource for ArpSweepSource {
    fn technique(&self) -> Technique {
        Technique::Arp
    }

    fn time_bound(&self) -> Duration {
        let workers = self.config.workers.max(1) as u32;
        let rounds = (self.config.max_hosts as u32).div_ceil(workers);
        NEIGHBOR_TABLE_LIMIT + self.unit_timeout() * rounds.max(1)
    }

    async fn discover(&self, segment: &LocalSegment, cancel: &CancellationToken) -> SourceReport {
        let mut found: BTreeMap<Ipv4Addr, String> = BTreeMap::new();
        let mut error = None;
        let mut table_error = None;

        match self.resolver.neighbor_table(&segment.interface).await {
            Ok(entries) => {
                for entry in entries {
                    if entry.state.is_resolved()
                        && !entry.mac.is_empty()
                        && segment.subnet.contains(&entry.ip)
                    {
                        found.insert(entry.ip, entry.mac);
                    }
                }
            }
            Err(e) => {
                tracing::warn!(interface = %segment.interface, error = %e, "Neighbor table unavailable");
                table_error = Some(e);
            }
        }
        let seeded = found.len();

        let targets = self.targets(segment, &found);
        let semaphore = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let unit_timeout = self.unit_timeout();
        let mut tasks = JoinSet::new();

        for ip in targets.iter().copied() {
            let resolver = Arc::clone(&self.resolver);
            let semaphore = Arc::clone(&semaphore);
            let interface = segment.interface.clone();
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (ip, Err(DiscoverError::Cancelled));
                };
                let result = match tokio::time::timeout(unit_timeout, resolver.resolve(&interface, ip)).await {
                    Ok(result) => result,
                    Err(_) => Err(DiscoverError::Timeout {
                        operation: format!("arping {ip}"),
                        elapsed: unit_timeout,
                    }),
                };
                (ip, result)
            });
        }

        let mut failures = 0usize;
        let mut resolved = 0usize;
        let mut tool_error = None;
        loop {
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    error = Some(DiscoverError::Cancelled);
                    break;
                }
                joined = tasks.join_next() => joined,
            };
            let Some(joined) = joined else { break };

            match joined {
                Ok((ip, Ok(Some(mac)))) => {
                    resolved += 1;
                    found.insert(ip, mac);
                }
                Ok((_, Ok(None))) => {}
                Ok((ip, Err(DiscoverError::ToolNotFound { path }))) => {
                    // No point asking the rest.
                    tracing::debug!(ip = %ip, "arping not installed");
                    tasks.abort_all();
                    error = Some(DiscoverError::ToolNotFound { path });
                    break;
                }
                Ok((ip, Err(e @ DiscoverError::Timeout { .. }))) => {
                    failures += 1;
                    tracing::trace!(ip = %ip, error = %e, "Address resolution timed out");
                }
                Ok((ip, Err(e))) => {
                    failures += 1;
                    tracing::debug!(ip = %ip, error = %e, "Address resolution failed");
                    tool_error.get_or_insert(e);
                }
                Err(e) if e.is_cancelled() => {}
                Err(e) => tracing::warn!(error = %e, "Address resolution task panicked"),
            }
        }

        // A sweep where the tool broke and nothing answered is a failed
        // sweep, not an empty segment.
        if resolved > 0 {
            tool_error = None;
        }
        if error.is_none() {
            error = table_error.or(tool_error);
        }

        tracing::info!(
            interface = %segment.interface,
            seeded,
            probed = targets.len(),
            failures,
            found = found.len(),
            "Address-resolution sweep finished"
        );

        let observations = found
            .into_iter()
            .map(|(ip, mac)| {
                Observation::new(Technique::Arp)
                    .with_address(IpAddr::V4(ip))
                    .with_hardware_address(mac.to_lowercase())
            })
            .collect();

        match error {
            Some(e) => SourceReport::partial(Technique::Arp, observations, e),
            None => SourceReport::complete(Technique::Arp, observations),
        }
    }
}

/// Parse one line of `ip neigh show [dev <if>]`.
///
/// `192.168.1.1 dev eth0 lladdr aa:bb:cc:dd:ee:ff REACHABLE`; the `dev`
/// pair is absent when the output is already filtered by device.
pub fn parse_ip_neigh_line(line: &str) -> Option<NeighborEntry> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 2 {
        return None;
    }

    let ip: Ipv4Addr = parts[0].parse().ok()?;
    let mac = parts
        .iter()
        .position(|&p| p == "lladdr")
        .and_then(|idx| parts.get(idx + 1))
        .map(|s| s.to_string())
        .unwrap_or_default();
    let state = parts
        .last()
        .map(|s| NeighborState::parse(s))
        .unwrap_or(NeighborState::Unknown);

    Some(NeighborEntry { ip, mac, state })
}

/// Find the MAC in an arping reply for `address`
/// (`Unicast reply from 192.168.1.1 [AA:BB:CC:DD:EE:FF]  0.713ms`).
pub fn parse_arping_reply(output: &str, address: Ipv4Addr) -> Option<String> {
    let needle = format!("reply from {address} ");
    output
        .lines()
        .filter(|line| line.to_lowercase().contains(&needle))
        .find_map(|line| {
            let start = line.find('[')?;
            let end = line[start..].find(']')? + start;
            let mac = line[start + 1..end].trim();
            (!mac.is_empty()).then(|| mac.to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn segment() -> LocalSegment {
        LocalSegment {
            interface: "eth0".to_string(),
            address: Ipv4Addr::new(192, 168, 1, 23),
            subnet: "192.168.1.0/28".parse().unwrap(),
        }
    }

    /// Answers for `.1` and `.5`, hangs on `.9`, and tracks concurrency.
    struct ScriptedResolver {
        table: Vec<NeighborEntry>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedResolver {
        fn new(table: Vec<NeighborEntry>) -> Self {
            Self {
                table,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl NeighborResolver for ScriptedResolver {
        async fn neighbor_table(&self, _interface: &str) -> Result<Vec<NeighborEntry>> {
            Ok(self.table.clone())
        }

        async fn resolve(&self, _interface: &str, address: Ipv4Addr) -> Result<Option<String>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            let last = address.octets()[3];
            if last == 9 {
                tokio::time::sleep(Duration::from_secs(10)).await;
            } else {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(match last {
                1 => Some("AA:BB:CC:00:00:01".to_string()),
                5 => Some("AA:BB:CC:00:00:05".to_string()),
                _ => None,
            })
        }
    }

    /// Every tool invocation fails the way arping does without raw-socket access.
    struct BrokenTools {
        table_fails: bool,
        resolve_fails: bool,
    }

    fn denied(tool: &str) -> DiscoverError {
        DiscoverError::ToolFailed {
            tool: tool.to_string(),
            code: 2,
            stderr: "socket: Operation not permitted".to_string(),
        }
    }

    #[async_trait]
    impl NeighborResolver for BrokenTools {
        async fn neighbor_table(&self, _interface: &str) -> Result<Vec<NeighborEntry>> {
            if self.table_fails {
                return Err(denied("ip"));
            }
            Ok(vec![NeighborEntry {
                ip: Ipv4Addr::new(192, 168, 1, 2),
                mac: "aa:bb:cc:00:00:02".to_string(),
                state: NeighborState::Reachable,
            }])
        }

        async fn resolve(&self, _interface: &str, address: Ipv4Addr) -> Result<Option<String>> {
            if self.resolve_fails {
                return Err(denied("arping"));
            }
            Ok((address.octets()[3] == 4).then(|| "aa:bb:cc:00:00:04".to_string()))
        }
    }

    fn config(workers: usize) -> ArpConfig {
        ArpConfig {
            arping_path: "arping".to_string(),
            workers,
            unit_timeout_ms: 100,
            max_hosts: 1024,
        }
    }

    #[test]
    fn test_parse_ip_neigh_line() {
        let entry = parse_ip_neigh_line("192.168.1.100 dev eth0 lladdr aa:bb:cc:dd:ee:ff REACHABLE").unwrap();
        assert_eq!(entry.ip, Ipv4Addr::new(192, 168, 1, 100));
        assert_eq!(entry.mac, "aa:bb:cc:dd:ee:ff");
        assert_eq!(entry.state, NeighborState::Reachable);

        let filtered = parse_ip_neigh_line("192.168.1.7 lladdr 11:22:33:44:55:66 STALE").unwrap();
        assert_eq!(filtered.mac, "11:22:33:44:55:66");
        assert!(filtered.state.is_resolved());

        let incomplete = parse_ip_neigh_line("192.168.1.100 dev eth0 INCOMPLETE").unwrap();
        assert_eq!(incomplete.mac, "");
        assert!(!incomplete.state.is_resolved());

        assert!(parse_ip_neigh_line("fe80::1 dev eth0 lladdr aa:bb:cc:dd:ee:ff router STALE").is_none());
        assert!(parse_ip_neigh_line("192.168.1.100").is_none());
    }

    #[test]
    fn test_parse_arping_reply() {
        let output = "ARPING 192.168.1.1 from 192.168.1.23 eth0\n\
Unicast reply from 192.168.1.1 [AA:BB:CC:DD:EE:FF]  0.713ms\n\
Sent 1 probes (1 broadcast(s))\n\
Received 1 response(s)\n";
        let target = Ipv4Addr::new(192, 168, 1, 1);
        assert_eq!(parse_arping_reply(output, target).as_deref(), Some("AA:BB:CC:DD:EE:FF"));
        assert_eq!(parse_arping_reply(output, Ipv4Addr::new(192, 168, 1, 10)), None);
        assert_eq!(parse_arping_reply("Sent 1 probes\nReceived 0 response(s)\n", target), None);
    }

    #[tokio::test]
    async fn test_sweep_seeds_resolves_and_bounds_concurrency() {
        let table = vec![
            NeighborEntry {
                ip: Ipv4Addr::new(192, 168, 1, 2),
                mac: "aa:bb:cc:00:00:02".to_string(),
                state: NeighborState::Stale,
            },
            NeighborEntry {
                ip: Ipv4Addr::new(192, 168, 1, 3),
                mac: String::new(),
                state: NeighborState::Failed,
            },
            NeighborEntry {
                ip: Ipv4Addr::new(10, 9, 9, 9),
                mac: "aa:bb:cc:00:00:99".to_string(),
                state: NeighborState::Reachable,
            },
        ];
        let resolver = Arc::new(ScriptedResolver::new(table));
        let source = ArpSweepSource::new(resolver.clone(), config(3));

        let report = source.discover(&segment(), &CancellationToken::new()).await;

        assert!(report.error.is_none());
        let addresses: Vec<IpAddr> = report.observations.iter().filter_map(|o| o.address).collect();
        assert_eq!(
            addresses,
            vec![
                IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)),
                IpAddr::V4(Ipv4Addr::new(192, 168, 1, 2)),
                IpAddr::V4(Ipv4Addr::new(192, 168, 1, 5)),
            ]
        );
        assert_eq!(
            report.observations[0].hardware_address.as_deref(),
            Some("aa:bb:cc:00:00:01")
        );
        assert!(resolver.max_in_flight.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_cancelled_sweep_keeps_seeded_entries() {
        let table = vec![NeighborEntry {
            ip: Ipv4Addr::new(192, 168, 1, 2),
            mac: "aa:bb:cc:00:00:02".to_string(),
            state: NeighborState::Reachable,
        }];
        let source = ArpSweepSource::new(Arc::new(ScriptedResolver::new(table)), config(1));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = source.discover(&segment(), &cancel).await;
        assert!(matches!(report.error, Some(DiscoverError::Cancelled)));
        assert_eq!(report.observations.len(), 1);
    }

    #[test]
    fn test_arping_exit_codes() {
        let target = Ipv4Addr::new(192, 168, 1, 1);
        let reply = "Unicast reply from 192.168.1.1 [AA:BB:CC:DD:EE:FF]  0.713ms\n";

        assert_eq!(
            arping_outcome("arping", Some(0), reply, "", target).unwrap().as_deref(),
            Some("AA:BB:CC:DD:EE:FF")
        );
        assert_eq!(arping_outcome("arping", Some(1), "Received 0 response(s)\n", "", target).unwrap(), None);

        let err = arping_outcome("arping", Some(2), "", "socket: Operation not permitted\n", target).unwrap_err();
        match err {
            DiscoverError::ToolFailed { code, stderr, .. } => {
                assert_eq!(code, 2);
                assert_eq!(stderr, "socket: Operation not permitted");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(arping_outcome("arping", None, "", "", target).is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_arping_without_permission_is_an_error() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("arping");
        std::fs::write(&script, "#!/bin/sh\necho 'socket: Operation not permitted' >&2\nexit 2\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let resolver = ArpingResolver::new(script.to_str().unwrap());
        let result = resolver.resolve("eth0", Ipv4Addr::new(10, 9, 9, 1)).await;
        assert!(matches!(result, Err(DiscoverError::ToolFailed { code: 2, .. })));
    }

    #[tokio::test]
    async fn test_broken_arping_fails_the_sweep() {
        let resolver = Arc::new(BrokenTools {
            table_fails: false,
            resolve_fails: true,
        });
        let report = ArpSweepSource::new(resolver, config(4))
            .discover(&segment(), &CancellationToken::new())
            .await;

        assert!(matches!(report.error, Some(DiscoverError::ToolFailed { code: 2, .. })));
        // Seeded entries survive.
        assert_eq!(report.observations.len(), 1);
    }

    #[tokio::test]
    async fn test_neighbor_table_failure_is_reported() {
        let resolver = Arc::new(BrokenTools {
            table_fails: true,
            resolve_fails: false,
        });
        let report = ArpSweepSource::new(resolver, config(4))
            .discover(&segment(), &CancellationToken::new())
            .await;

        match &report.error {
            Some(DiscoverError::ToolFailed { tool, .. }) => assert_eq!(tool, "ip"),
            other => panic!("unexpected error: {other:?}"),
        }
        let addresses: Vec<IpAddr> = report.observations.iter().filter_map(|o| o.address).collect();
        assert_eq!(addresses, vec![IpAddr::V4(Ipv4Addr::new(192, 168, 1, 4))]);
    }

    #[test]
    fn test_targets_skip_own_address_and_known() {
        let source = ArpSweepSource::new(Arc::new(ScriptedResolver::new(Vec::new())), config(50));
        let mut known = BTreeMap::new();
        known.insert(Ipv4Addr::new(192, 168, 1, 1), "aa".to_string());
        let targets = source.targets(&segment(), &known);
        // /28 has 14 hosts; minus our own address (.23 is outside) and .1
        assert_eq!(targets.len(), 13);
        assert!(!targets.contains(&Ipv4Addr::new(192, 168, 1, 1)));
    }
}
