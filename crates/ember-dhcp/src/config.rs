//! Proxy-DHCP configuration

use crate::packet::ClientArch;
use std::net::Ipv4Addr;

/// Configuration for the proxy-DHCP responder
#[derive(Debug, Clone)]
pub struct ProxyDhcpConfig {
    /// Server IP advertised as next-server and server identifier.
    /// Must be routable from the booting machines.
    pub server_ip: Ipv4Addr,

    /// Externally visible HTTP base URL (e.g. `http://10.0.0.2:8080`),
    /// used for iPXE chain URLs and HTTP-Boot binary URLs.
    pub server_url: String,

    /// IP address to bind the listening socket to
    pub bind_ip: Ipv4Addr,
}

impl ProxyDhcpConfig {
    /// Create a config advertising `server_ip` with the given HTTP base URL
    pub fn new(server_ip: Ipv4Addr, server_url: impl Into<String>) -> Self {
        Self {
            server_ip,
            server_url: server_url.into(),
            bind_ip: Ipv4Addr::UNSPECIFIED,
        }
    }

    /// Bare TFTP filename for a raw PXE client of the given architecture
    pub fn tftp_boot_file(&self, arch: ClientArch) -> &'static str {
        match arch {
            ClientArch::EfiX64 | ClientArch::EfiBc => "ipxe.efi",
            ClientArch::EfiArm64 => "ipxe-arm64.efi",
            // BIOS / IA32 / unknown → legacy chainloader
            _ => "undionly.kpxe",
        }
    }

    /// Full URL of the iPXE binary for an HTTP-Boot client
    pub fn http_boot_file(&self, arch: ClientArch) -> String {
        match arch {
            ClientArch::EfiArm64 => format!("{}/ipxe-arm64.efi", self.server_url),
            _ => format!("{}/ipxe.efi", self.server_url),
        }
    }

    /// Full URL of the boot script for a client already running iPXE.
    /// `${net0/mac}` is expanded by iPXE itself.
    pub fn boot_script_url(&self) -> String {
        format!("{}/boot.ipxe?mac=${{net0/mac}}", self.server_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ProxyDhcpConfig {
        ProxyDhcpConfig::new(Ipv4Addr::new(10, 0, 0, 2), "http://10.0.0.2:8080")
    }

    #[test]
    fn test_tftp_boot_file_by_arch() {
        let c = config();
        assert_eq!(c.tftp_boot_file(ClientArch::IntelX86Bios), "undionly.kpxe");
        assert_eq!(c.tftp_boot_file(ClientArch::EfiIa32), "undionly.kpxe");
        assert_eq!(c.tftp_boot_file(ClientArch::Unknown), "undionly.kpxe");
        assert_eq!(c.tftp_boot_file(ClientArch::EfiX64), "ipxe.efi");
        assert_eq!(c.tftp_boot_file(ClientArch::EfiBc), "ipxe.efi");
        assert_eq!(c.tftp_boot_file(ClientArch::EfiArm64), "ipxe-arm64.efi");
    }

    #[test]
    fn test_http_boot_file_by_arch() {
        let c = config();
        assert_eq!(
            c.http_boot_file(ClientArch::EfiX64),
            "http://10.0.0.2:8080/ipxe.efi"
        );
        assert_eq!(
            c.http_boot_file(ClientArch::EfiArm64),
            "http://10.0.0.2:8080/ipxe-arm64.efi"
        );
    }

    #[test]
    fn test_boot_script_url() {
        assert_eq!(
            config().boot_script_url(),
            "http://10.0.0.2:8080/boot.ipxe?mac=${net0/mac}"
        );
    }
}
