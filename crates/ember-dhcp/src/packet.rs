//! DHCP packet handling
//!
//! Parsing of incoming PXE/HTTP-Boot requests and construction of proxy
//! replies. A proxy reply never carries a lease: `yiaddr` stays 0.0.0.0.

use crate::error::{DhcpError, Result};
use dhcproto::v4::{DhcpOption, Message, MessageType, Opcode, OptionCode};
use dhcproto::{Decodable, Encodable};
use std::net::Ipv4Addr;

/// Client architecture types (RFC 4578, option 93)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientArch {
    /// Intel x86 BIOS
    IntelX86Bios = 0,
    /// EFI IA32
    EfiIa32 = 6,
    /// EFI x86_64
    EfiX64 = 7,
    /// EFI byte code
    EfiBc = 9,
    /// EFI ARM32
    EfiArm32 = 10,
    /// EFI ARM64
    EfiArm64 = 11,
    /// Unknown architecture
    Unknown = 255,
}

impl From<u16> for ClientArch {
    fn from(value: u16) -> Self {
        match value {
            0 => ClientArch::IntelX86Bios,
            6 => ClientArch::EfiIa32,
            7 => ClientArch::EfiX64,
            9 => ClientArch::EfiBc,
            10 => ClientArch::EfiArm32,
            11 => ClientArch::EfiArm64,
            _ => ClientArch::Unknown,
        }
    }
}

impl ClientArch {
    /// Short name used in log lines
    pub fn name(&self) -> &'static str {
        match self {
            ClientArch::IntelX86Bios => "bios",
            ClientArch::EfiIa32 => "efi-ia32",
            ClientArch::EfiX64 => "efi-x64",
            ClientArch::EfiBc => "efi-bc",
            ClientArch::EfiArm32 => "efi-arm32",
            ClientArch::EfiArm64 => "efi-arm64",
            ClientArch::Unknown => "unknown",
        }
    }
}

/// How the client identified itself in option 60
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootClass {
    /// Vendor class begins with "PXEClient"
    Pxe,
    /// Vendor class begins with "HTTPClient" (UEFI HTTP-Boot)
    HttpBoot,
}

impl BootClass {
    /// The vendor class string echoed back in replies
    pub fn vendor_class(&self) -> &'static str {
        match self {
            BootClass::Pxe => "PXEClient",
            BootClass::HttpBoot => "HTTPClient",
        }
    }
}

/// PXE vendor options (option 43): sub-option 6 (discovery control) = 8,
/// telling the firmware to skip multicast/broadcast boot-server discovery
/// and use the filename from DHCP directly.
pub const PXE_VENDOR_OPTS: [u8; 4] = [0x06, 0x01, 0x08, 0xff];

/// Parsed boot request with the fields the dispatcher cares about
#[derive(Debug, Clone)]
pub struct BootRequest {
    /// Original message
    pub message: Message,

    /// DISCOVER or REQUEST
    pub message_type: MessageType,

    /// Client MAC address, colon-separated lowercase
    pub mac_address: String,

    /// Client architecture (option 93), BIOS when absent
    pub client_arch: ClientArch,

    /// PXE or HTTP-Boot per option 60; None for ineligible clients
    pub boot_class: Option<BootClass>,

    /// Firmware chain is complete: user-class option 77 is "iPXE"
    pub is_ipxe: bool,

    /// Transaction ID
    pub xid: u32,
}

impl BootRequest {
    /// Parse a boot request from raw bytes
    pub fn parse(data: &[u8]) -> Result<Self> {
        let message =
            Message::from_bytes(data).map_err(|e| DhcpError::ParseError(e.to_string()))?;

        let message_type = message
            .opts()
            .get(OptionCode::MessageType)
            .and_then(|opt| {
                if let DhcpOption::MessageType(mt) = opt {
                    Some(mt.clone())
                } else {
                    None
                }
            })
            .ok_or_else(|| DhcpError::ParseError("missing message type".to_string()))?;

        let mac_bytes = message.chaddr();
        let mac_address = format!(
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            mac_bytes[0], mac_bytes[1], mac_bytes[2], mac_bytes[3], mac_bytes[4], mac_bytes[5]
        );

        let client_arch = message
            .opts()
            .get(OptionCode::ClientSystemArchitecture)
            .and_then(|opt| {
                if let DhcpOption::ClientSystemArchitecture(arch) = opt {
                    Some(ClientArch::from(u16::from(*arch)))
                } else {
                    None
                }
            })
            .unwrap_or(ClientArch::IntelX86Bios);

        let boot_class = message.opts().get(OptionCode::ClassIdentifier).and_then(|opt| {
            if let DhcpOption::ClassIdentifier(class) = opt {
                let s = String::from_utf8_lossy(class);
                if s.starts_with("PXEClient") {
                    Some(BootClass::Pxe)
                } else if s.starts_with("HTTPClient") {
                    Some(BootClass::HttpBoot)
                } else {
                    None
                }
            } else {
                None
            }
        });

        // Option 77: iPXE sends the plain string; some builds send it with
        // a one-byte length prefix.
        let is_ipxe = message
            .opts()
            .get(OptionCode::UserClass)
            .map(|opt| {
                if let DhcpOption::UserClass(user_class) = opt {
                    user_class.as_slice() == b"iPXE" || user_class.as_slice() == b"\x04iPXE"
                } else {
                    false
                }
            })
            .unwrap_or(false);

        Ok(Self {
            xid: message.xid(),
            message,
            message_type,
            mac_address,
            client_arch,
            boot_class,
            is_ipxe,
        })
    }

    /// A request we answer: DISCOVER/REQUEST from a PXE or HTTP-Boot client
    pub fn is_eligible(&self) -> bool {
        matches!(
            self.message_type,
            MessageType::Discover | MessageType::Request
        ) && self.boot_class.is_some()
    }
}

/// Proxy reply builder
pub struct ProxyReplyBuilder<'a> {
    request: &'a BootRequest,
    server_ip: Ipv4Addr,
    boot_class: BootClass,
    boot_file: String,
}

impl<'a> ProxyReplyBuilder<'a> {
    /// Create a reply builder for an eligible request
    pub fn new(
        request: &'a BootRequest,
        server_ip: Ipv4Addr,
        boot_class: BootClass,
        boot_file: impl Into<String>,
    ) -> Self {
        Self {
            request,
            server_ip,
            boot_class,
            boot_file: boot_file.into(),
        }
    }

    /// Build the reply message: OFFER for DISCOVER, ACK for REQUEST
    pub fn build(self) -> Result<Message> {
        let reply_type = match self.request.message_type {
            MessageType::Request => MessageType::Ack,
            _ => MessageType::Offer,
        };

        let mut reply = Message::default();
        reply.set_opcode(Opcode::BootReply);
        reply.set_xid(self.request.xid);
        reply.set_flags(self.request.message.flags());
        reply.set_chaddr(self.request.message.chaddr());
        reply.set_giaddr(self.request.message.giaddr());

        // Never lease an address
        reply.set_yiaddr(Ipv4Addr::UNSPECIFIED);

        // next-server only matters for the TFTP path; HTTP-Boot clients
        // get a full URL and must not be pointed at a TFTP server
        if self.boot_class == BootClass::Pxe {
            reply.set_siaddr(self.server_ip);
        } else {
            reply.set_siaddr(Ipv4Addr::UNSPECIFIED);
        }

        reply.set_fname_str(&self.boot_file);

        reply
            .opts_mut()
            .insert(DhcpOption::MessageType(reply_type));
        reply
            .opts_mut()
            .insert(DhcpOption::ServerIdentifier(self.server_ip));
        reply.opts_mut().insert(DhcpOption::BootfileName(
            self.boot_file.clone().into_bytes(),
        ));
        reply.opts_mut().insert(DhcpOption::ClassIdentifier(
            self.boot_class.vendor_class().as_bytes().to_vec(),
        ));

        if self.boot_class == BootClass::Pxe {
            reply
                .opts_mut()
                .insert(DhcpOption::VendorExtensions(PXE_VENDOR_OPTS.to_vec()));
        }

        Ok(reply)
    }

    /// Build and encode the reply to bytes
    pub fn build_bytes(self) -> Result<Vec<u8>> {
        let reply = self.build()?;
        reply
            .to_vec()
            .map_err(|e| DhcpError::EncodeError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_discover(mac: [u8; 6]) -> Message {
        let mut msg = Message::default();
        msg.set_opcode(Opcode::BootRequest);
        msg.set_xid(0x12345678);
        let mut chaddr = [0u8; 16];
        chaddr[..6].copy_from_slice(&mac);
        msg.set_chaddr(&chaddr);
        msg.opts_mut()
            .insert(DhcpOption::MessageType(MessageType::Discover));
        msg
    }

    fn parse(msg: &Message) -> BootRequest {
        BootRequest::parse(&msg.to_vec().unwrap()).unwrap()
    }

    #[test]
    fn test_client_arch_from_u16() {
        assert_eq!(ClientArch::from(0), ClientArch::IntelX86Bios);
        assert_eq!(ClientArch::from(7), ClientArch::EfiX64);
        assert_eq!(ClientArch::from(9), ClientArch::EfiBc);
        assert_eq!(ClientArch::from(11), ClientArch::EfiArm64);
        assert_eq!(ClientArch::from(999), ClientArch::Unknown);
    }

    #[test]
    fn test_parse_plain_dhcp_is_ineligible() {
        // No option 60: an ordinary DHCP client we must never answer
        let msg = base_discover([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        let req = parse(&msg);
        assert_eq!(req.boot_class, None);
        assert!(!req.is_eligible());
    }

    #[test]
    fn test_parse_pxe_discover() {
        let mut msg = base_discover([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        msg.opts_mut().insert(DhcpOption::ClassIdentifier(
            b"PXEClient:Arch:00000:UNDI:002001".to_vec(),
        ));

        let req = parse(&msg);
        assert_eq!(req.mac_address, "00:11:22:33:44:55");
        assert_eq!(req.boot_class, Some(BootClass::Pxe));
        assert_eq!(req.client_arch, ClientArch::IntelX86Bios);
        assert!(!req.is_ipxe);
        assert!(req.is_eligible());
    }

    #[test]
    fn test_parse_http_boot_client() {
        let mut msg = base_discover([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        msg.opts_mut().insert(DhcpOption::ClassIdentifier(
            b"HTTPClient:Arch:00016:UNDI:003001".to_vec(),
        ));

        let req = parse(&msg);
        assert_eq!(req.boot_class, Some(BootClass::HttpBoot));
        assert!(req.is_eligible());
    }

    #[test]
    fn test_parse_ipxe_user_class() {
        let mut msg = base_discover([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        msg.opts_mut()
            .insert(DhcpOption::ClassIdentifier(b"PXEClient".to_vec()));
        msg.opts_mut()
            .insert(DhcpOption::UserClass(b"iPXE".to_vec()));

        assert!(parse(&msg).is_ipxe);

        // Length-prefixed variant some iPXE builds emit
        let mut msg = base_discover([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        msg.opts_mut()
            .insert(DhcpOption::ClassIdentifier(b"PXEClient".to_vec()));
        msg.opts_mut()
            .insert(DhcpOption::UserClass(b"\x04iPXE".to_vec()));

        assert!(parse(&msg).is_ipxe);

        // A different user class is not iPXE
        let mut msg = base_discover([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        msg.opts_mut()
            .insert(DhcpOption::ClassIdentifier(b"PXEClient".to_vec()));
        msg.opts_mut()
            .insert(DhcpOption::UserClass(b"gPXE".to_vec()));

        assert!(!parse(&msg).is_ipxe);
    }

    #[test]
    fn test_bios_offer_reply() {
        let mut msg = base_discover([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        msg.opts_mut()
            .insert(DhcpOption::ClassIdentifier(b"PXEClient".to_vec()));

        let req = parse(&msg);
        let server_ip = Ipv4Addr::new(10, 0, 0, 2);
        let reply = ProxyReplyBuilder::new(&req, server_ip, BootClass::Pxe, "undionly.kpxe")
            .build()
            .unwrap();

        assert_eq!(reply.opcode(), Opcode::BootReply);
        assert_eq!(reply.xid(), 0x12345678);
        assert_eq!(reply.yiaddr(), Ipv4Addr::UNSPECIFIED);
        assert_eq!(reply.siaddr(), server_ip);
        assert_eq!(reply.fname_str().unwrap().unwrap(), "undionly.kpxe");

        match reply.opts().get(OptionCode::MessageType) {
            Some(DhcpOption::MessageType(MessageType::Offer)) => {}
            other => panic!("expected OFFER, got {:?}", other),
        }
        match reply.opts().get(OptionCode::ServerIdentifier) {
            Some(DhcpOption::ServerIdentifier(ip)) => assert_eq!(*ip, server_ip),
            other => panic!("expected server identifier, got {:?}", other),
        }
        match reply.opts().get(OptionCode::ClassIdentifier) {
            Some(DhcpOption::ClassIdentifier(class)) => {
                assert_eq!(class.as_slice(), b"PXEClient")
            }
            other => panic!("expected vendor class, got {:?}", other),
        }
        match reply.opts().get(OptionCode::VendorExtensions) {
            Some(DhcpOption::VendorExtensions(opts)) => {
                assert_eq!(opts.as_slice(), &[0x06, 0x01, 0x08, 0xff])
            }
            other => panic!("expected vendor extensions, got {:?}", other),
        }
    }

    #[test]
    fn test_http_boot_reply_has_no_next_server() {
        let mut msg = base_discover([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        msg.opts_mut()
            .insert(DhcpOption::ClassIdentifier(b"HTTPClient".to_vec()));

        let req = parse(&msg);
        let reply = ProxyReplyBuilder::new(
            &req,
            Ipv4Addr::new(10, 0, 0, 2),
            BootClass::HttpBoot,
            "http://10.0.0.2:8080/ipxe.efi",
        )
        .build()
        .unwrap();

        assert_eq!(reply.siaddr(), Ipv4Addr::UNSPECIFIED);
        assert_eq!(reply.yiaddr(), Ipv4Addr::UNSPECIFIED);
        assert_eq!(reply.fname_str().unwrap().unwrap(), "http://10.0.0.2:8080/ipxe.efi");
        match reply.opts().get(OptionCode::ClassIdentifier) {
            Some(DhcpOption::ClassIdentifier(class)) => {
                assert_eq!(class.as_slice(), b"HTTPClient")
            }
            other => panic!("expected vendor class, got {:?}", other),
        }
        // No PXE discovery-control for HTTP-Boot
        assert!(reply.opts().get(OptionCode::VendorExtensions).is_none());
    }

    #[test]
    fn test_request_gets_ack() {
        let mut msg = base_discover([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        msg.opts_mut()
            .insert(DhcpOption::MessageType(MessageType::Request));
        msg.opts_mut()
            .insert(DhcpOption::ClassIdentifier(b"PXEClient".to_vec()));

        let req = parse(&msg);
        let reply = ProxyReplyBuilder::new(&req, Ipv4Addr::new(10, 0, 0, 2), BootClass::Pxe, "ipxe.efi")
            .build()
            .unwrap();

        match reply.opts().get(OptionCode::MessageType) {
            Some(DhcpOption::MessageType(MessageType::Ack)) => {}
            other => panic!("expected ACK, got {:?}", other),
        }
    }
}
