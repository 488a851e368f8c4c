//! Nmap process wrapper.
//!
//! Executes nmap as a child process and parses the XML output into typed
//! Rust structs. Used by the address sweep source and the service
//! fingerprinter.

use std::time::{Duration, Instant};

use crate::command;
use crate::config::ScanProfile;
use crate::error::Result;
use crate::nmap_xml::{self, NmapRun};

/// Result of a single nmap execution.
pub struct ScanResult {
    /// Parsed nmap XML output.
    pub nmap_run: NmapRun,
    /// Wall-clock duration of the scan.
    pub duration: Duration,
}

/// Wrapper around the nmap binary.
#[derive(Debug, Clone)]
pub struct NmapScanner {
    nmap_path: String,
}

impl NmapScanner {
    pub fn new(nmap_path: &str) -> Self {
        Self {
            nmap_path: nmap_path.to_string(),
        }
    }

    /// Verify nmap is installed and accessible.
    pub async fn verify_installation(&self) -> Result<String> {
        let output =
            command::run_checked(&self.nmap_path, &["--version"], Duration::from_secs(10)).await?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Run nmap against `target` with `profile`, bounded by `limit`.
    ///
    /// Nmap is invoked with `-oX -` to write XML to stdout and is killed if
    /// it outlives the limit.
    pub async fn scan(&self, target: &str, profile: &ScanProfile, limit: Duration) -> Result<ScanResult> {
        let start = Instant::now();

        tracing::debug!(target = %target, profile = ?profile, "Starting nmap scan");

        let mut args: Vec<&str> = profile.nmap_flags();
        args.extend(["-oX", "-", "--noninteractive", target]);

        let output = command::run_checked(&self.nmap_path, &args, limit).await?;
        let duration = start.elapsed();

        let nmap_run = nmap_xml::parse_nmap_xml(&output.stdout)?;

        tracing::debug!(
            target = %target,
            hosts_up = nmap_run.hosts.iter().filter(|h| h.is_up()).count(),
            duration_ms = duration.as_millis(),
            "Nmap scan complete"
        );

        Ok(ScanResult {
            nmap_run,
            duration,
        })
    }
}
