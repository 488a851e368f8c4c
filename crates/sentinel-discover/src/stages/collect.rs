//! Collection: run every discovery source concurrently, then merge.

use std::sync::Arc;
use std::time::Duration;

use sentinel_core::{Inventory, MergeStats, Observation};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::DiscoverError;
use crate::interface::LocalSegment;
use crate::sources::{DiscoverySource, SourceReport};
use crate::stages::StageReport;

/// Slack on top of a source's own bound before it is abandoned.
const SOURCE_GRACE: Duration = Duration::from_secs(2);

/// Run all sources and merge their observations into `inventory`.
///
/// A source error or overrun costs only that source's observations.
pub async fn collect(
    sources: &[Arc<dyn DiscoverySource>],
    segment: &LocalSegment,
    inventory: &mut Inventory,
    cancel: &CancellationToken,
) -> (StageReport, MergeStats) {
    let mut report = StageReport::new("collect");
    let mut tasks = JoinSet::new();

    for source in sources {
        let source = Arc::clone(source);
        let segment = segment.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let technique = source.technique();
            let bound = source.time_bound();
            tracing::info!(source = %technique, bound_secs = bound.as_secs(), "Starting discovery source");
            match tokio::time::timeout(bound + SOURCE_GRACE, source.discover(&segment, &cancel)).await {
                Ok(report) => report,
                Err(_) => SourceReport::failed(
                    technique,
                    DiscoverError::Timeout {
                        operation: format!("{technique} discovery"),
                        elapsed: bound + SOURCE_GRACE,
                    },
                ),
            }
        });
        report.dispatched += 1;
    }

    let mut observations: Vec<Observation> = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let source_report = match joined {
            Ok(source_report) => source_report,
            Err(e) => {
                report.failed += 1;
                tracing::warn!(error = %e, "Discovery source task panicked");
                continue;
            }
        };
        report.completed += 1;

        let seen = source_report.observations.len();
        match &source_report.error {
            Some(DiscoverError::Cancelled) => {
                report.cancelled = true;
                tracing::warn!(source = %source_report.technique, observations = seen, "Discovery source cancelled");
            }
            Some(e) => {
                report.failed += 1;
                tracing::warn!(source = %source_report.technique, observations = seen, error = %e, "Discovery source failed");
            }
            None => {
                tracing::info!(source = %source_report.technique, observations = seen, "Discovery source finished");
            }
        }
        observations.extend(source_report.observations);
    }

    report.cancelled |= cancel.is_cancelled();

    let stats = inventory.merge_all(observations);
    tracing::info!(
        inserted = stats.inserted,
        merged = stats.merged,
        discarded = stats.discarded,
        records = inventory.len(),
        "Observations merged"
    );
    report.log();

    (report, stats)
}
