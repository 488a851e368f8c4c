use std::net::IpAddr;

use thiserror::Error;

/// Errors raised by the inventory data model.
#[derive(Error, Debug)]
pub enum SentinelError {
    #[error("No record for address {0}")]
    UnknownAddress(IpAddr),
}

pub type Result<T> = std::result::Result<T, SentinelError>;
