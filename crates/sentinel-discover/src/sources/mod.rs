//! Discovery sources.
//!
//! A source observes the segment for a bounded time and reports raw,
//! unmerged sightings. Sources never share state; the collector merges
//! their reports after all of them have joined.

pub mod arp;
pub mod lldp;
pub mod sweep;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sentinel_core::{Observation, Technique};
use tokio_util::sync::CancellationToken;

use crate::config::{DiscoverConfig, SourceKind};
use crate::error::DiscoverError;
use crate::interface::LocalSegment;
use crate::nmap::NmapScanner;

/// What one source produced: everything it saw, plus the error that cut
/// it short, if any.
#[derive(Debug)]
pub struct SourceReport {
    pub technique: Technique,
    pub observations: Vec<Observation>,
    pub error: Option<DiscoverError>,
}

impl SourceReport {
    pub fn complete(technique: Technique, observations: Vec<Observation>) -> Self {
        Self {
            technique,
            observations,
            error: None,
        }
    }

    pub fn partial(technique: Technique, observations: Vec<Observation>, error: DiscoverError) -> Self {
        Self {
            technique,
            observations,
            error: Some(error),
        }
    }

    pub fn failed(technique: Technique, error: DiscoverError) -> Self {
        Self::partial(technique, Vec::new(), error)
    }
}

#[async_trait]
pub trait DiscoverySource: Send + Sync {
    fn technique(&self) -> Technique;

    /// Upper bound on a single `discover` call.
    fn time_bound(&self) -> Duration;

    /// Observe the segment. Must return at or before `time_bound`, and
    /// promptly once `cancel` fires, with whatever was seen so far.
    async fn discover(&self, segment: &LocalSegment, cancel: &CancellationToken) -> SourceReport;
}

/// Build the configured sources, in configuration order.
pub fn from_config(config: &DiscoverConfig) -> Vec<Arc<dyn DiscoverySource>> {
    config
        .sources
        .iter()
        .map(|kind| -> Arc<dyn DiscoverySource> {
            match kind {
                SourceKind::Lldp => Arc::new(lldp::LldpSource::new(config.lldp.clone())),
                SourceKind::Sweep => Arc::new(sweep::SweepSource::new(
                    NmapScanner::new(&config.nmap_path),
                    config.sweep.clone(),
                )),
                SourceKind::Arp => Arc::new(arp::ArpSweepSource::new(
                    Arc::new(arp::ArpingResolver::new(&config.arp.arping_path)),
                    config.arp.clone(),
                )),
            }
        })
        .collect()
}
