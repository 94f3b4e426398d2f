//! Network self-detection
//!
//! The advertised server IP (for DHCP next-server and boot URLs) is
//! auto-detected when the operator does not pin one: first up,
//! non-loopback interface with an IPv4 address.

use network_interface::{NetworkInterface, NetworkInterfaceConfig};
use std::net::Ipv4Addr;
use tracing::debug;

/// First non-loopback IPv4 address on the machine, with its interface
/// name
pub fn detect_interface() -> Option<(String, Ipv4Addr)> {
    let interfaces = NetworkInterface::show().ok()?;
    for iface in interfaces {
        for addr in &iface.addr {
            let ip = addr.ip();
            if let std::net::IpAddr::V4(v4) = ip {
                if v4.is_loopback() || v4.is_unspecified() {
                    continue;
                }
                debug!(iface = %iface.name, ip = %v4, "detected interface");
                return Some((iface.name.clone(), v4));
            }
        }
    }
    None
}

/// First IPv4 address on the named interface
pub fn interface_ip(name: &str) -> Option<Ipv4Addr> {
    let interfaces = NetworkInterface::show().ok()?;
    for iface in interfaces {
        if iface.name != name {
            continue;
        }
        for addr in &iface.addr {
            if let std::net::IpAddr::V4(v4) = addr.ip() {
                return Some(v4);
            }
        }
    }
    None
}
