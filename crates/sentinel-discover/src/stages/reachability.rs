//! Reachability: one echo probe per record under a bounded pool.

use std::sync::Arc;
use std::time::Duration;

use sentinel_core::Inventory;
use tokio_util::sync::CancellationToken;

use crate::config::ReachabilityConfig;
use crate::probe::Pinger;
use crate::stages::{self, StageReport, UnitOutcome};

pub struct ReachabilityStage {
    pinger: Arc<dyn Pinger>,
    workers: usize,
    timeout: Duration,
}

impl ReachabilityStage {
    pub fn new(pinger: Arc<dyn Pinger>, config: &ReachabilityConfig) -> Self {
        Self {
            pinger,
            workers: config.workers,
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }

    /// Probe every record. Returns once all dispatched probes have
    /// finished or cancellation has aborted them.
    pub async fn run(&self, inventory: &mut Inventory, cancel: &CancellationToken) -> StageReport {
        let snapshots = inventory.records().cloned().collect();
        let timeout = self.timeout;
        tracing::info!(records = inventory.len(), workers = self.workers, "Starting reachability stage");

        let (finished, report) = stages::run_bounded("reachability", snapshots, self.workers, cancel, |mut record| {
            let pinger = Arc::clone(&self.pinger);
            async move {
                let address = record.address;
                let faults = match tokio::time::timeout(timeout, pinger.ping(address, timeout)).await {
                    Ok(Ok(rtt)) => {
                        record.mark_active(rtt);
                        tracing::debug!(address = %address, latency_ms = record.latency_ms(), "Host active");
                        0
                    }
                    Ok(Err(e)) => {
                        record.mark_inactive();
                        tracing::debug!(address = %address, error = %e, "Host inactive");
                        1
                    }
                    Err(_) => {
                        record.mark_inactive();
                        tracing::debug!(address = %address, timeout_ms = timeout.as_millis(), "Echo probe timed out");
                        1
                    }
                };
                UnitOutcome { record, faults }
            }
        })
        .await;

        stages::write_back(inventory, finished);
        report.log();
        report
    }
}
