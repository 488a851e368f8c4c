//! Error types for the sentinel-discover crate.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiscoverError {
    #[error("No usable network interface found")]
    NoUsableInterface,

    #[error("Interface {name} not found or has no IPv4 address")]
    InterfaceNotFound { name: String },

    #[error("Tool not found at path: {path}")]
    ToolNotFound { path: String },

    #[error("{tool} exited with code {code}: {stderr}")]
    ToolFailed {
        tool: String,
        code: i32,
        stderr: String,
    },

    #[error("{operation} timed out after {elapsed:?}")]
    Timeout {
        operation: String,
        elapsed: Duration,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Failed to parse nmap XML output: {0}")]
    XmlParse(String),

    #[error("Failed to parse {tool} output: {reason}")]
    OutputParse { tool: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DiscoverError>;
