//! Pipeline stages.
//!
//! Collection runs every source concurrently and merges once they have all
//! joined. Reachability and enrichment share one worker-pool shape: each
//! unit receives an owned snapshot of one record, and the finished records
//! come back through the `JoinSet` to be written into the inventory by the
//! stage, on a single task. No two workers ever hold the same record.

pub mod collect;
pub mod enrich;
pub mod reachability;

use std::future::Future;
use std::sync::Arc;

use sentinel_core::{Inventory, Record};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Tally of one stage run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub stage: &'static str,
    /// Units that were started.
    pub dispatched: usize,
    /// Units that ran to the end, successfully or not.
    pub completed: usize,
    /// Completed units that hit at least one fault, plus units that panicked.
    pub failed: usize,
    /// The stage was cut short by cancellation.
    pub cancelled: bool,
}

impl StageReport {
    pub fn new(stage: &'static str) -> Self {
        Self {
            stage,
            ..Self::default()
        }
    }

    pub(crate) fn log(&self) {
        if self.cancelled {
            tracing::warn!(
                stage = self.stage,
                dispatched = self.dispatched,
                completed = self.completed,
                failed = self.failed,
                "Stage cancelled, keeping completed units"
            );
        } else {
            tracing::info!(
                stage = self.stage,
                dispatched = self.dispatched,
                completed = self.completed,
                failed = self.failed,
                "Stage complete"
            );
        }
    }
}

/// A worker's finished record and how many of its steps failed.
#[derive(Debug)]
pub(crate) struct UnitOutcome {
    pub record: Record,
    pub faults: usize,
}

/// Run `unit` over `records` with at most `workers` in flight.
///
/// Dispatch waits for a free slot. On cancellation no further unit is
/// dispatched and in-flight ones are aborted; records from units that
/// already finished are still returned.
pub(crate) async fn run_bounded<F, Fut>(
    stage: &'static str,
    records: Vec<Record>,
    workers: usize,
    cancel: &CancellationToken,
    unit: F,
) -> (Vec<Record>, StageReport)
where
    F: Fn(Record) -> Fut,
    Fut: Future<Output = UnitOutcome> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut tasks = JoinSet::new();
    let mut report = StageReport::new(stage);

    for record in records {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                report.cancelled = true;
                break;
            }
            permit = Arc::clone(&semaphore).acquire_owned() => permit,
        };
        let Ok(permit) = permit else { break };

        let work = unit(record);
        tasks.spawn(async move {
            let outcome = work.await;
            drop(permit);
            outcome
        });
        report.dispatched += 1;
    }

    if report.cancelled {
        tasks.abort_all();
    }

    let mut finished = Vec::with_capacity(report.dispatched);
    loop {
        let joined = tokio::select! {
            biased;
            _ = cancel.cancelled(), if !report.cancelled => {
                report.cancelled = true;
                tasks.abort_all();
                continue;
            }
            joined = tasks.join_next() => joined,
        };

        match joined {
            None => break,
            Some(Ok(outcome)) => {
                report.completed += 1;
                if outcome.faults > 0 {
                    report.failed += 1;
                }
                finished.push(outcome.record);
            }
            Some(Err(e)) if e.is_cancelled() => {}
            Some(Err(e)) => {
                report.failed += 1;
                tracing::warn!(stage, error = %e, "Stage worker panicked");
            }
        }
    }

    (finished, report)
}

/// Write worker results back into the inventory.
pub(crate) fn write_back(inventory: &mut Inventory, records: Vec<Record>) {
    for record in records {
        let address = record.address;
        if let Err(e) = inventory.update(record) {
            tracing::warn!(address = %address, error = %e, "Dropping result for unknown record");
        }
    }
}
