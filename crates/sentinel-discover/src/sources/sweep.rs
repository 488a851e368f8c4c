//! Address sweep of the local subnet with an nmap ping scan.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sentinel_core::{Observation, Technique};
use tokio_util::sync::CancellationToken;

use crate::config::SweepConfig;
use crate::error::DiscoverError;
use crate::interface::LocalSegment;
use crate::nmap::NmapScanner;
use crate::nmap_xml::NmapRun;
use crate::sources::{DiscoverySource, SourceReport};

#[derive(Debug, Clone)]
pub struct SweepSource {
    scanner: NmapScanner,
    config: SweepConfig,
}

impl SweepSource {
    pub fn new(scanner: NmapScanner, config: SweepConfig) -> Self {
        Self { scanner, config }
    }
}

#[async_trait]
impl DiscoverySource for SweepSource {
    fn technique(&self) -> Technique {
        Technique::Nmap
    }

    fn time_bound(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    async fn discover(&self, segment: &LocalSegment, cancel: &CancellationToken) -> SourceReport {
        let target = segment.subnet.to_string();
        tracing::info!(target = %target, profile = ?self.config.profile, "Starting address sweep");

        let scan = self.scanner.scan(&target, &self.config.profile, self.time_bound());
        let result = tokio::select! {
            _ = cancel.cancelled() => return SourceReport::failed(Technique::Nmap, DiscoverError::Cancelled),
            result = scan => result,
        };

        match result {
            Ok(scan) => {
                let observations = observations_from_run(&scan.nmap_run, Utc::now());
                tracing::info!(
                    target = %target,
                    hosts_up = observations.len(),
                    duration_ms = scan.duration.as_millis(),
                    "Address sweep complete"
                );
                SourceReport::complete(Technique::Nmap, observations)
            }
            Err(e) => SourceReport::failed(Technique::Nmap, e),
        }
    }
}

/// One observation per host nmap reported up.
pub fn observations_from_run(run: &NmapRun, seen_at: DateTime<Utc>) -> Vec<Observation> {
    run.hosts
        .iter()
        .filter(|h| h.is_up())
        .map(|host| {
            let mut obs = Observation::new(Technique::Nmap).seen_at(seen_at);
            if let Some(ip) = host.ipv4() {
                obs = obs.with_address(IpAddr::V4(ip));
            }
            if let Some(mac) = host.mac() {
                obs = obs.with_hardware_address(mac.to_lowercase());
            }
            if let Some(vendor) = host.vendor() {
                obs = obs.with_vendor(vendor);
            }
            if let Some(hostname) = host.hostname() {
                obs = obs.with_hostname(hostname);
            }
            obs
        })
        .collect()
}
