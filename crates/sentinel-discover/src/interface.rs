//! Default interface and local subnet resolution.
//!
//! The pipeline needs one interface name (for link-layer capture and the
//! address-resolution sweep) and one subnet (for the address sweep). When
//! neither is configured, the first up, non-loopback, non-virtual IPv4
//! interface wins. Failing to find one is the only fatal error of a run.

use std::fmt;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};

use crate::error::{DiscoverError, Result};

/// Interface name prefixes that never carry the physical segment.
const VIRTUAL_PREFIXES: &[&str] = &["lo", "docker", "br-", "veth", "virbr", "tun", "tap", "wg"];

/// The segment a run discovers on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSegment {
    pub interface: String,
    pub address: Ipv4Addr,
    pub subnet: Ipv4Net,
}

impl fmt::Display for LocalSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.interface, self.subnet)
    }
}

/// One IPv4 address bound to an interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceAddr {
    pub name: String,
    pub ip: Ipv4Addr,
    pub prefix_len: u8,
    /// Link state as the kernel reports it.
    pub is_up: bool,
}

/// Resolve the segment from the host's interfaces, honoring overrides.
pub fn resolve_segment(interface: Option<&str>, subnet: Option<&str>) -> Result<LocalSegment> {
    let interfaces = NetworkInterface::show().map_err(|e| {
        tracing::error!(error = %e, "Failed to enumerate network interfaces");
        DiscoverError::NoUsableInterface
    })?;

    let candidates: Vec<InterfaceAddr> = interfaces
        .into_iter()
        .flat_map(|iface| {
            let name = iface.name.clone();
            let is_up = link_is_up(&name);
            iface.addr.into_iter().filter_map(move |addr| match addr {
                Addr::V4(v4) => Some(InterfaceAddr {
                    name: name.clone(),
                    is_up,
                    ip: v4.ip,
                    prefix_len: v4
                        .netmask
                        .map(|m| u32::from(m).count_ones() as u8)
                        .unwrap_or(24),
                }),
                Addr::V6(_) => None,
            })
        })
        .collect();

    select_segment(&candidates, interface, subnet)
}

/// Pick the segment from a list of interface addresses.
pub fn select_segment(
    candidates: &[InterfaceAddr],
    interface: Option<&str>,
    subnet: Option<&str>,
) -> Result<LocalSegment> {
    let chosen = match interface {
        Some(wanted) => candidates
            .iter()
            .filter(|c| c.name == wanted)
            .min_by_key(|c| !is_usable(c))
            .ok_or_else(|| DiscoverError::InterfaceNotFound {
                name: wanted.to_string(),
            })?,
        None => candidates
            .iter()
            .find(|c| is_usable(c))
            .ok_or(DiscoverError::NoUsableInterface)?,
    };

    let subnet = match subnet {
        Some(cidr) => cidr
            .parse::<Ipv4Net>()
            .map_err(|e| DiscoverError::Config(format!("Invalid subnet {cidr}: {e}")))?
            .trunc(),
        None => Ipv4Net::new(chosen.ip, chosen.prefix_len)
            .map_err(|e| DiscoverError::Config(format!("Invalid prefix on {}: {e}", chosen.name)))?
            .trunc(),
    };

    Ok(LocalSegment {
        interface: chosen.name.clone(),
        address: chosen.ip,
        subnet,
    })
}

// network-interface does not expose link flags, so read sysfs. Hosts
// without it (non-Linux) treat every interface as up.
fn link_is_up(name: &str) -> bool {
    let state = std::fs::read_to_string(format!("/sys/class/net/{name}/operstate")).ok();
    operstate_is_up(state.as_deref())
}

/// `unknown` is what loopback and many tunnels report while passing traffic.
fn operstate_is_up(state: Option<&str>) -> bool {
    match state.map(str::trim) {
        Some("down") | Some("lowerlayerdown") | Some("notpresent") => false,
        _ => true,
    }
}

fn is_usable(candidate: &InterfaceAddr) -> bool {
    candidate.is_up
        && !candidate.ip.is_loopback()
        && !candidate.ip.is_link_local()
        && !candidate.ip.is_unspecified()
        && !VIRTUAL_PREFIXES
            .iter()
            .any(|prefix| candidate.name.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(name: &str, ip: [u8; 4], prefix_len: u8) -> InterfaceAddr {
        InterfaceAddr {
            name: name.to_string(),
            ip: Ipv4Addr::from(ip),
            prefix_len,
            is_up: true,
        }
    }

    fn host_interfaces() -> Vec<InterfaceAddr> {
        vec![
            addr("lo", [127, 0, 0, 1], 8),
            addr("docker0", [172, 17, 0, 1], 16),
            addr("eth0", [169, 254, 3, 3], 16),
            addr("eth0", [192, 168, 1, 23], 24),
            addr("wlan0", [10, 0, 0, 7], 22),
        ]
    }

    #[test]
    fn test_picks_first_physical_interface() {
        let segment = select_segment(&host_interfaces(), None, None).unwrap();
        assert_eq!(segment.interface, "eth0");
        assert_eq!(segment.address, Ipv4Addr::new(192, 168, 1, 23));
        assert_eq!(segment.subnet.to_string(), "192.168.1.0/24");
    }

    #[test]
    fn test_down_interface_is_skipped() {
        let mut interfaces = host_interfaces();
        for iface in interfaces.iter_mut().filter(|i| i.name == "eth0") {
            iface.is_up = false;
        }
        let segment = select_segment(&interfaces, None, None).unwrap();
        assert_eq!(segment.interface, "wlan0");
    }

    #[test]
    fn test_operstate() {
        assert!(operstate_is_up(Some("up\n")));
        assert!(operstate_is_up(Some("unknown\n")));
        assert!(operstate_is_up(None));
        assert!(!operstate_is_up(Some("down\n")));
        assert!(!operstate_is_up(Some("lowerlayerdown")));
    }

    #[test]
    fn test_interface_override() {
        let segment = select_segment(&host_interfaces(), Some("wlan0"), None).unwrap();
        assert_eq!(segment.subnet.to_string(), "10.0.0.0/22");
    }

    #[test]
    fn test_subnet_override_is_truncated() {
        let segment =
            select_segment(&host_interfaces(), None, Some("192.168.107.77/24")).unwrap();
        assert_eq!(segment.subnet.to_string(), "192.168.107.0/24");
    }

    #[test]
    fn test_no_usable_interface_is_fatal() {
        let only_virtual = vec![addr("lo", [127, 0, 0, 1], 8), addr("veth12", [10, 9, 0, 1], 24)];
        assert!(matches!(
            select_segment(&only_virtual, None, None),
            Err(DiscoverError::NoUsableInterface)
        ));
    }

    #[test]
    fn test_unknown_interface_override() {
        assert!(matches!(
            select_segment(&host_interfaces(), Some("eth9"), None),
            Err(DiscoverError::InterfaceNotFound { .. })
        ));
    }

    #[test]
    fn test_bad_subnet_override() {
        assert!(matches!(
            select_segment(&host_interfaces(), None, Some("not/a/subnet")),
            Err(DiscoverError::Config(_))
        ));
    }
}
