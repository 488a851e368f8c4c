//! The address-keyed device inventory.
//!
//! Every stage of the pipeline reads and writes devices through
//! [`Inventory`]. It admits only addressed observations, holds at most one
//! [`Record`] per address and iterates in address order, which is also the
//! presentation order.

use std::collections::BTreeMap;
use std::net::IpAddr;

use serde::Serialize;

use crate::error::{Result, SentinelError};
use crate::types::{Observation, Record};

/// What happened to a single observation fed to the inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// First sighting of this address; a new record was created.
    Inserted,
    /// Merged into an existing record.
    Merged,
    /// No address, so it cannot be merged.
    Discarded,
}

/// Tally of a batch merge.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub inserted: usize,
    pub merged: usize,
    pub discarded: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Inventory {
    records: BTreeMap<IpAddr, Record>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one observation by address.
    pub fn observe(&mut self, obs: &Observation) -> MergeOutcome {
        let Some(address) = obs.address else {
            return MergeOutcome::Discarded;
        };
        match self.records.get_mut(&address) {
            Some(existing) => {
                existing.absorb(obs);
                MergeOutcome::Merged
            }
            None => match Record::from_observation(obs) {
                Some(record) => {
                    self.records.insert(address, record);
                    MergeOutcome::Inserted
                }
                None => MergeOutcome::Discarded,
            },
        }
    }

    /// Merge a whole batch of observations.
    ///
    /// The batch is sorted into canonical order first, so the resulting
    /// records do not depend on the order or grouping in which sightings
    /// arrived.
    pub fn merge_all(&mut self, mut observations: Vec<Observation>) -> MergeStats {
        observations.sort();
        let mut stats = MergeStats::default();
        for obs in &observations {
            match self.observe(obs) {
                MergeOutcome::Inserted => stats.inserted += 1,
                MergeOutcome::Merged => stats.merged += 1,
                MergeOutcome::Discarded => {
                    tracing::debug!(
                        technique = %obs.technique,
                        hostname = ?obs.hostname,
                        hardware_address = ?obs.hardware_address,
                        "Discarding observation without address"
                    );
                    stats.discarded += 1;
                }
            }
        }
        stats
    }

    /// Write back a record produced by a worker from a snapshot.
    ///
    /// The record must already exist. Provenance of the stored record is
    /// unioned in so `source_protocols` can only grow.
    pub fn update(&mut self, mut record: Record) -> Result<()> {
        let existing = self
            .records
            .get_mut(&record.address)
            .ok_or(SentinelError::UnknownAddress(record.address))?;
        record.union_protocols(existing);
        record.touch(existing.last_seen);
        *existing = record;
        Ok(())
    }

    pub fn get(&self, address: &IpAddr) -> Option<&Record> {
        self.records.get(address)
    }

    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Consume the inventory into records sorted by address.
    pub fn into_sorted(self) -> Vec<Record> {
        self.records.into_values().collect()
    }
}
