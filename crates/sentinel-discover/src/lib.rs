//! sentinel-discover: local network inventory pipeline.
//!
//! Discovery sources (LLDP neighbors, nmap ping sweep, ARP sweep) run
//! concurrently and their sightings are merged by address. Every record is
//! then probed for reachability and enriched with names, open ports,
//! service banners and management counters before being presented.

pub mod command;
pub mod config;
pub mod error;
pub mod interface;
pub mod nmap;
pub mod nmap_xml;
pub mod pipeline;
pub mod present;
pub mod probe;
pub mod sources;
pub mod stages;

pub use error::{DiscoverError, Result};
pub use pipeline::{Pipeline, PipelineOutcome};
