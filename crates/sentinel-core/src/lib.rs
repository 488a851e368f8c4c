//! sentinel-core: Shared data model for Sentinel network discovery.
//!
//! This crate provides the types every pipeline stage agrees on:
//! - [`Observation`]: a raw sighting from one discovery technique
//! - [`Record`]: the canonical per-device value, keyed by address
//! - [`Inventory`]: the address-keyed map and its field-merge algorithm
//! - Common error types

pub mod error;
pub mod inventory;
pub mod types;

pub use error::SentinelError;
pub use inventory::{Inventory, MergeOutcome, MergeStats};
pub use types::{
    DeviceId, InterfaceCounters, Observation, Platform, Reachability, Record, Technique,
    LATENCY_UNMEASURED,
};
