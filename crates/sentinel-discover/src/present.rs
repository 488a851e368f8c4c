//! Rendering of the final inventory.

use std::io::Write;

use comfy_table::{Cell, Table};
use sentinel_core::Record;

use crate::error::Result;

/// Output formats selectable from the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

/// Writes records, already sorted by address, to `out`.
pub trait Presenter {
    fn present(&self, records: &[Record], out: &mut dyn Write) -> Result<()>;
}

pub fn presenter_for(format: OutputFormat) -> Box<dyn Presenter> {
    match format {
        OutputFormat::Table => Box::new(TablePresenter),
        OutputFormat::Json => Box::new(JsonPresenter),
    }
}

pub struct TablePresenter;

impl Presenter for TablePresenter {
    fn present(&self, records: &[Record], out: &mut dyn Write) -> Result<()> {
        let mut table = Table::new();
        table.set_header(vec![
            "Address",
            "Hostname",
            "MAC",
            "Vendor",
            "Type",
            "Status",
            "Latency (ms)",
            "Open ports",
            "In/Out octets",
            "Sources",
        ]);

        for record in records {
            let latency = match record.latency_ms() {
                ms if ms >= 0 => ms.to_string(),
                _ => "-".to_string(),
            };
            let ports = record
                .open_ports
                .iter()
                .map(u16::to_string)
                .collect::<Vec<_>>()
                .join(",");
            let octets = match (record.counters.in_octets, record.counters.out_octets) {
                (None, None) => String::new(),
                (inbound, outbound) => format!("{}/{}", or_dash(inbound), or_dash(outbound)),
            };

            table.add_row(vec![
                Cell::new(record.address),
                Cell::new(text(&record.hostname)),
                Cell::new(text(&record.hardware_address)),
                Cell::new(text(&record.vendor)),
                Cell::new(text(&record.device_type)),
                Cell::new(record.reachability.label()),
                Cell::new(latency),
                Cell::new(ports),
                Cell::new(octets),
                Cell::new(
                    record
                        .source_protocols
                        .iter()
                        .cloned()
                        .collect::<Vec<_>>()
                        .join(","),
                ),
            ]);
        }

        writeln!(out, "{table}")?;
        writeln!(out, "{} device(s)", records.len())?;
        Ok(())
    }
}

pub struct JsonPresenter;

impl Presenter for JsonPresenter {
    fn present(&self, records: &[Record], out: &mut dyn Write) -> Result<()> {
        let json = serde_json::to_string_pretty(records)?;
        writeln!(out, "{json}")?;
        Ok(())
    }
}

fn text(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("-")
}

fn or_dash(value: Option<u64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}
