//! CLI entry point for the sentinel-discover inventory pipeline.

use std::path::Path;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use sentinel_discover::config::{DiscoverConfig, SourceKind};
use sentinel_discover::interface;
use sentinel_discover::nmap::NmapScanner;
use sentinel_discover::present::{self, OutputFormat};
use sentinel_discover::Pipeline;

#[derive(Parser)]
#[command(name = "sentinel-discover")]
#[command(about = "Discover, probe and enrich the devices on the local network segment")]
struct Cli {
    /// Interface to discover on (default: first usable physical interface).
    #[arg(short, long)]
    interface: Option<String>,

    /// Subnet to sweep in CIDR notation (default: the interface's subnet).
    #[arg(short, long)]
    subnet: Option<String>,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    /// Discovery sources to run, comma separated: lldp, sweep, arp.
    #[arg(long, value_delimiter = ',')]
    sources: Option<Vec<SourceKind>>,

    /// Abort the run after this many seconds and present what was found.
    #[arg(long)]
    deadline: Option<u64>,

    /// Config file path, or prefix without extension (default: sentinel).
    #[arg(short, long, default_value = "sentinel")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let segment = interface::resolve_segment(config.interface.as_deref(), config.subnet.as_deref())?;
    tracing::info!(
        interface = %segment.interface,
        address = %segment.address,
        subnet = %segment.subnet,
        "Discovering on local segment"
    );

    if config.sources.contains(&SourceKind::Sweep) {
        match NmapScanner::new(&config.nmap_path).verify_installation().await {
            Ok(version) => tracing::info!(nmap_version = %version.lines().next().unwrap_or("").trim(), "Nmap verified"),
            Err(e) => tracing::warn!(error = %e, "Nmap unavailable, sweep and fingerprint steps will fail"),
        }
    }

    let cancel = CancellationToken::new();
    spawn_cancel_triggers(&cancel, &config);

    let pipeline = Pipeline::from_config(&config);
    let outcome = pipeline.run(&segment, &cancel).await;
    cancel.cancel();

    let records = outcome.inventory.into_sorted();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    present::presenter_for(cli.format).present(&records, &mut out)?;

    if outcome.cancelled {
        tracing::warn!(records = records.len(), "Run was cancelled; inventory is partial");
    }
    Ok(())
}

/// File, environment, then command-line flags, later winning.
fn load_config(cli: &Cli) -> anyhow::Result<DiscoverConfig> {
    let path = Path::new(&cli.config);
    let mut config = if path.extension().is_some() && path.is_file() {
        DiscoverConfig::from_file(path)?
    } else {
        DiscoverConfig::load(&cli.config)?
    };

    if let Some(interface) = &cli.interface {
        config.interface = Some(interface.clone());
    }
    if let Some(subnet) = &cli.subnet {
        config.subnet = Some(subnet.clone());
    }
    if let Some(sources) = &cli.sources {
        config.sources = sources.clone();
    }
    if let Some(secs) = cli.deadline {
        config.run_deadline_secs = Some(secs);
    }
    Ok(config)
}

/// Cancel on Ctrl-C or when the run deadline passes.
fn spawn_cancel_triggers(cancel: &CancellationToken, config: &DiscoverConfig) {
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = on_signal.cancelled() => {}
            result = tokio::signal::ctrl_c() => {
                match result {
                    Ok(()) => {
                        tracing::warn!("Interrupted, finishing with partial results");
                        on_signal.cancel();
                    }
                    Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl-C"),
                }
            }
        }
    });

    if let Some(deadline) = config.run_deadline() {
        let on_deadline = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = on_deadline.cancelled() => {}
                _ = tokio::time::sleep(deadline) => {
                    tracing::warn!(deadline_secs = deadline.as_secs(), "Run deadline reached");
                    on_deadline.cancel();
                }
            }
        });
    }
}
