//! The discovery pipeline: collect, reachability, enrich.
//!
//! Stages run strictly in sequence; each one is a join barrier for the
//! next. A single cancellation token reaches every stage. When it fires,
//! the running stage keeps what its finished units produced, later stages
//! are skipped, and the partial inventory is still returned.

use std::sync::Arc;

use sentinel_core::{Inventory, MergeStats};
use tokio_util::sync::CancellationToken;

use crate::config::DiscoverConfig;
use crate::interface::LocalSegment;
use crate::probe::Probes;
use crate::sources::{self, DiscoverySource};
use crate::stages::collect;
use crate::stages::enrich::EnrichStage;
use crate::stages::reachability::ReachabilityStage;
use crate::stages::StageReport;

/// Result of one pipeline run.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub inventory: Inventory,
    pub merge: MergeStats,
    /// Reports of the stages that ran, in order.
    pub reports: Vec<StageReport>,
    pub cancelled: bool,
}

pub struct Pipeline {
    sources: Vec<Arc<dyn DiscoverySource>>,
    reachability: ReachabilityStage,
    enrich: EnrichStage,
}

impl Pipeline {
    pub fn new(
        sources: Vec<Arc<dyn DiscoverySource>>,
        probes: Probes,
        config: &DiscoverConfig,
    ) -> Self {
        Self {
            sources,
            reachability: ReachabilityStage::new(Arc::clone(&probes.pinger), &config.reachability),
            enrich: EnrichStage::new(probes, &config.enrichment, &config.snmp),
        }
    }

    /// Pipeline wired to the system tools named in `config`.
    pub fn from_config(config: &DiscoverConfig) -> Self {
        Self::new(sources::from_config(config), Probes::from_config(config), config)
    }

    pub async fn run(&self, segment: &LocalSegment, cancel: &CancellationToken) -> PipelineOutcome {
        tracing::info!(
            segment = %segment,
            sources = self.sources.len(),
            "Discovery pipeline started"
        );

        let mut inventory = Inventory::new();
        let mut reports = Vec::with_capacity(3);

        let (collected, merge) = collect::collect(&self.sources, segment, &mut inventory, cancel).await;
        let mut cancelled = collected.cancelled;
        reports.push(collected);

        if !cancelled {
            let report = self.reachability.run(&mut inventory, cancel).await;
            cancelled = report.cancelled;
            reports.push(report);
        }

        if !cancelled {
            let report = self.enrich.run(&mut inventory, cancel).await;
            cancelled = report.cancelled;
            reports.push(report);
        }

        if cancelled {
            tracing::warn!(
                records = inventory.len(),
                stages_run = reports.len(),
                "Discovery pipeline cancelled, returning partial inventory"
            );
        } else {
            tracing::info!(records = inventory.len(), "Discovery pipeline complete");
        }

        PipelineOutcome {
            inventory,
            merge,
            reports,
            cancelled,
        }
    }
}
