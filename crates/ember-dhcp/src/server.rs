//! Proxy-DHCP server loop
//!
//! Binds UDP/67 (falling back to 4011, the PXE boot server port, when 67
//! is unavailable) and answers eligible PXE/HTTP-Boot requests with boot
//! information only. Packet errors are logged and dropped; nothing a
//! client sends can take the loop down.

use crate::config::ProxyDhcpConfig;
use crate::error::{DhcpError, Result};
use crate::packet::{BootClass, BootRequest, ProxyReplyBuilder};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use tokio::net::UdpSocket;
use tracing::{debug, error, info, warn};

/// Proxy-DHCP server
pub struct ProxyDhcpServer {
    config: ProxyDhcpConfig,
}

impl ProxyDhcpServer {
    /// Create a new proxy-DHCP server
    pub fn new(config: ProxyDhcpConfig) -> Self {
        Self { config }
    }

    /// Run the responder until the shutdown signal flips
    pub async fn run(&self, shutdown: tokio::sync::watch::Receiver<bool>) -> Result<()> {
        let socket = self.bind_socket().await?;

        let mut buf = [0u8; 1500];
        let mut shutdown = shutdown;

        loop {
            tokio::select! {
                result = socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, src)) => {
                            if let Err(e) = self.handle_packet(&socket, &buf[..len], src).await {
                                error!(error = %e, "error handling DHCP packet");
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "error receiving packet");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("proxy-DHCP shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Bind UDP/67, falling back to UDP/4011 when 67 is taken or denied
    async fn bind_socket(&self) -> Result<UdpSocket> {
        match self.create_socket(67).await {
            Ok(socket) => {
                info!(ip = %self.config.bind_ip, port = 67, "proxy-DHCP listening");
                Ok(socket)
            }
            Err(e) => {
                warn!(error = %e, "cannot bind port 67, falling back to 4011");
                let socket = self.create_socket(4011).await?;
                info!(ip = %self.config.bind_ip, port = 4011, "proxy-DHCP listening");
                Ok(socket)
            }
        }
    }

    /// Create a broadcast-capable UDP socket on the given port
    async fn create_socket(&self, port: u16) -> Result<UdpSocket> {
        let bind_addr = SocketAddrV4::new(self.config.bind_ip, port);

        let socket = socket2::Socket::new(
            socket2::Domain::IPV4,
            socket2::Type::DGRAM,
            Some(socket2::Protocol::UDP),
        )
        .map_err(|e| DhcpError::BindFailed {
            addr: bind_addr.into(),
            source: e,
        })?;

        socket.set_reuse_address(true).ok();
        socket.set_broadcast(true).ok();

        socket
            .bind(&bind_addr.into())
            .map_err(|e| DhcpError::BindFailed {
                addr: bind_addr.into(),
                source: e,
            })?;

        socket
            .set_nonblocking(true)
            .map_err(|e| DhcpError::BindFailed {
                addr: bind_addr.into(),
                source: e,
            })?;

        let std_socket: std::net::UdpSocket = socket.into();
        UdpSocket::from_std(std_socket).map_err(|e| DhcpError::BindFailed {
            addr: bind_addr.into(),
            source: e,
        })
    }

    /// Handle a single incoming packet
    async fn handle_packet(&self, socket: &UdpSocket, data: &[u8], _src: SocketAddr) -> Result<()> {
        let request = match BootRequest::parse(data) {
            Ok(req) => req,
            Err(e) => {
                debug!(error = %e, "failed to parse DHCP packet");
                return Ok(());
            }
        };

        // Only DISCOVER/REQUEST from PXE or HTTP-Boot clients; everything
        // else belongs to the real DHCP server
        if !request.is_eligible() {
            return Ok(());
        }
        let boot_class = match request.boot_class {
            Some(c) => c,
            None => return Ok(()),
        };

        let boot_file = self.select_boot_file(&request, boot_class);

        debug!(
            mac = %request.mac_address,
            msg_type = ?request.message_type,
            arch = request.client_arch.name(),
            ipxe = request.is_ipxe,
            class = boot_class.vendor_class(),
            "boot request"
        );

        let reply =
            ProxyReplyBuilder::new(&request, self.config.server_ip, boot_class, boot_file.as_str())
                .build_bytes()?;

        // Proxy replies go to the broadcast address on the client port;
        // the client has no lease from us to unicast to
        let dest = SocketAddr::new(Ipv4Addr::BROADCAST.into(), 68);
        socket.send_to(&reply, dest).await?;

        info!(
            mac = %request.mac_address,
            boot_file = %boot_file,
            class = boot_class.vendor_class(),
            "sent boot offer"
        );

        Ok(())
    }

    /// Pick the boot filename (or URL) for this client
    fn select_boot_file(&self, request: &BootRequest, boot_class: BootClass) -> String {
        if request.is_ipxe {
            // Firmware chain complete: hand over the boot script
            self.config.boot_script_url()
        } else if boot_class == BootClass::HttpBoot {
            self.config.http_boot_file(request.client_arch)
        } else {
            self.config.tftp_boot_file(request.client_arch).to_string()
        }
    }
}

impl std::fmt::Debug for ProxyDhcpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyDhcpServer")
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::ClientArch;
    use dhcproto::v4::{DhcpOption, Message, MessageType, Opcode};
    use dhcproto::Encodable;

    fn server() -> ProxyDhcpServer {
        ProxyDhcpServer::new(ProxyDhcpConfig::new(
            Ipv4Addr::new(10, 0, 0, 2),
            "http://10.0.0.2:8080",
        ))
    }

    fn request(boot_class: BootClass, is_ipxe: bool, arch: ClientArch) -> BootRequest {
        let mut msg = Message::default();
        msg.set_opcode(Opcode::BootRequest);
        msg.set_xid(1);
        msg.set_chaddr(&[0, 0x11, 0x22, 0x33, 0x44, 0x55, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        msg.opts_mut()
            .insert(DhcpOption::MessageType(MessageType::Discover));
        msg.opts_mut().insert(DhcpOption::ClassIdentifier(
            boot_class.vendor_class().as_bytes().to_vec(),
        ));
        let bytes = msg.to_vec().unwrap();

        let mut req = BootRequest::parse(&bytes).unwrap();
        req.client_arch = arch;
        req.is_ipxe = is_ipxe;
        req
    }

    #[test]
    fn test_select_raw_pxe_bios() {
        let req = request(BootClass::Pxe, false, ClientArch::IntelX86Bios);
        assert_eq!(
            server().select_boot_file(&req, BootClass::Pxe),
            "undionly.kpxe"
        );
    }

    #[test]
    fn test_select_raw_pxe_efi_x64() {
        let req = request(BootClass::Pxe, false, ClientArch::EfiX64);
        assert_eq!(server().select_boot_file(&req, BootClass::Pxe), "ipxe.efi");
    }

    #[test]
    fn test_select_ipxe_chain() {
        let req = request(BootClass::Pxe, true, ClientArch::EfiX64);
        assert_eq!(
            server().select_boot_file(&req, BootClass::Pxe),
            "http://10.0.0.2:8080/boot.ipxe?mac=${net0/mac}"
        );
    }

    #[test]
    fn test_select_http_boot() {
        let req = request(BootClass::HttpBoot, false, ClientArch::EfiX64);
        assert_eq!(
            server().select_boot_file(&req, BootClass::HttpBoot),
            "http://10.0.0.2:8080/ipxe.efi"
        );

        let req = request(BootClass::HttpBoot, false, ClientArch::EfiArm64);
        assert_eq!(
            server().select_boot_file(&req, BootClass::HttpBoot),
            "http://10.0.0.2:8080/ipxe-arm64.efi"
        );
    }
}
