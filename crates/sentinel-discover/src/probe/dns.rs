//! Reverse name resolution through the system resolver (`getent hosts`).

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;

use crate::command;
use crate::error::{DiscoverError, Result};
use crate::probe::NameResolver;

/// `getent` exits with 2 when the key is not found.
const GETENT_NOT_FOUND: i32 = 2;

#[derive(Debug, Clone)]
pub struct GetentResolver {
    getent_path: String,
    timeout: Duration,
}

impl GetentResolver {
    pub fn new(timeout: Duration) -> Self {
        Self {
            getent_path: "getent".to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl NameResolver for GetentResolver {
    async fn reverse(&self, address: IpAddr) -> Result<Option<String>> {
        let args = ["hosts".to_string(), address.to_string()];
        let output = command::run_tool(&self.getent_path, &args, self.timeout).await?;

        match output.status.code() {
            Some(0) => Ok(parse_getent_hosts(&String::from_utf8_lossy(&output.stdout))),
            Some(GETENT_NOT_FOUND) => Ok(None),
            code => Err(DiscoverError::ToolFailed {
                tool: self.getent_path.clone(),
                code: code.unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
        }
    }
}

/// First canonical name from `getent hosts` output
/// (`192.168.1.1     gateway.lan gateway`).
pub fn parse_getent_hosts(output: &str) -> Option<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(|name| name.trim_end_matches('.').to_string())
        .find(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_getent_hosts() {
        let output = "192.168.1.1     gateway.lan gateway\n";
        assert_eq!(parse_getent_hosts(output).as_deref(), Some("gateway.lan"));
    }

    #[test]
    fn test_trailing_dot_trimmed() {
        let output = "10.0.0.9        nas.example.com.\n";
        assert_eq!(parse_getent_hosts(output).as_deref(), Some("nas.example.com"));
    }

    #[test]
    fn test_empty_output() {
        assert_eq!(parse_getent_hosts(""), None);
        assert_eq!(parse_getent_hosts("10.0.0.9\n"), None);
    }
}
