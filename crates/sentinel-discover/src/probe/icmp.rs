//! ICMP echo via the system `ping` binary.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::command;
use crate::error::{DiscoverError, Result};
use crate::probe::Pinger;

/// Pings with `ping -c 1 -W <secs>`.
#[derive(Debug, Clone)]
pub struct SystemPinger {
    ping_path: String,
}

impl SystemPinger {
    pub fn new(ping_path: &str) -> Self {
        Self {
            ping_path: ping_path.to_string(),
        }
    }
}

impl Default for SystemPinger {
    fn default() -> Self {
        Self::new("ping")
    }
}

#[async_trait]
impl Pinger for SystemPinger {
    async fn ping(&self, address: IpAddr, timeout: Duration) -> Result<Duration> {
        // ping's -W only takes whole seconds; the process limit enforces the rest.
        let wait_secs = timeout.as_secs_f64().ceil().max(1.0) as u64;
        let args = [
            "-c".to_string(),
            "1".to_string(),
            "-W".to_string(),
            wait_secs.to_string(),
            address.to_string(),
        ];

        let start = Instant::now();
        let output = command::run_checked(&self.ping_path, &args, timeout).await?;
        let elapsed = start.elapsed();

        let stdout = String::from_utf8_lossy(&output.stdout);
        match parse_ping_rtt(&stdout) {
            Some(rtt) => Ok(rtt),
            None if elapsed <= timeout => Ok(elapsed),
            None => Err(DiscoverError::OutputParse {
                tool: self.ping_path.clone(),
                reason: "no round-trip time in reply".to_string(),
            }),
        }
    }
}

/// Extract the round-trip time from a `ping` reply line
/// (`... time=0.412 ms` or `... time<1ms`).
pub fn parse_ping_rtt(output: &str) -> Option<Duration> {
    let line = output.lines().find(|l| l.contains("time=") || l.contains("time<"))?;
    let idx = line.find("time=").or_else(|| line.find("time<"))?;
    let value: String = line[idx + 5..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let millis: f64 = value.parse().ok()?;
    Some(Duration::from_micros((millis * 1000.0).round() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_linux_reply() {
        let output = "PING 192.168.1.1 (192.168.1.1) 56(84) bytes of data.\n\
64 bytes from 192.168.1.1: icmp_seq=1 ttl=64 time=3.27 ms\n\
\n\
--- 192.168.1.1 ping statistics ---\n\
1 packets transmitted, 1 received, 0% packet loss, time 0ms\n";
        let rtt = parse_ping_rtt(output).unwrap();
        assert_eq!(rtt.as_micros(), 3270);
    }

    #[test]
    fn test_parse_sub_millisecond_reply() {
        let output = "Reply from 10.0.0.1: bytes=32 time<1ms TTL=128";
        assert_eq!(parse_ping_rtt(output), Some(Duration::from_millis(1)));
    }

    #[test]
    fn test_statistics_line_is_not_a_reply() {
        let output = "1 packets transmitted, 0 received, 100% packet loss, time 0ms";
        assert_eq!(parse_ping_rtt(output), None);
    }
}
