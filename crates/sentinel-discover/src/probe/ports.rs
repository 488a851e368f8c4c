//! TCP connect probing of a small well-known port list.

use std::collections::BTreeSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sentinel_core::Platform;
use tokio::net::TcpStream;
use tokio::task::JoinSet;

use crate::probe::PortProber;

/// Ports whose presence marks a Windows host.
const WINDOWS_PORTS: &[u16] = &[135, 139, 445, 3389];
const SSH_PORT: u16 = 22;

/// Full TCP handshake; the connection is dropped immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnectProber;

#[async_trait]
impl PortProber for TcpConnectProber {
    async fn is_open(&self, address: IpAddr, port: u16, timeout: Duration) -> bool {
        let target = SocketAddr::new(address, port);
        matches!(
            tokio::time::timeout(timeout, TcpStream::connect(target)).await,
            Ok(Ok(_))
        )
    }
}

/// Probe every port concurrently and return the open ones.
pub async fn probe_ports(
    prober: Arc<dyn PortProber>,
    address: IpAddr,
    ports: &[u16],
    timeout: Duration,
) -> BTreeSet<u16> {
    let mut tasks = JoinSet::new();
    for &port in ports {
        let prober = Arc::clone(&prober);
        tasks.spawn(async move { (port, prober.is_open(address, port, timeout).await) });
    }

    let mut open = BTreeSet::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((port, true)) => {
                open.insert(port);
            }
            Ok((_, false)) => {}
            Err(e) => tracing::warn!(address = %address, error = %e, "Port probe task failed"),
        }
    }
    open
}

/// Coarse platform guess from open ports.
pub fn guess_platform(open_ports: &BTreeSet<u16>) -> Platform {
    if WINDOWS_PORTS.iter().any(|p| open_ports.contains(p)) {
        Platform::Windows
    } else if open_ports.contains(&SSH_PORT) {
        Platform::Unix
    } else {
        Platform::Unknown
    }
}
