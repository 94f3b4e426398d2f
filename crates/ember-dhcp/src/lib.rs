//! Ember Proxy-DHCP Responder
//!
//! This crate provides the proxy DHCP side of PXE/HTTP network boot. It
//! never assigns addresses: an existing DHCP server keeps handing out
//! leases, and ember answers the same broadcasts with boot information
//! only (next-server and boot filename).
//!
//! # Boot dispatch
//!
//! For every eligible DISCOVER/REQUEST the responder picks one of three
//! answers based on what is asking:
//!
//! - an iPXE client (user-class `iPXE`) gets the full HTTP URL of the
//!   boot script, closing the chainload loop
//! - a UEFI HTTP-Boot client gets the full HTTP URL of the
//!   architecture-appropriate iPXE binary
//! - raw PXE firmware gets a bare filename to fetch over TFTP from
//!   `next-server`
//!
//! Everything else is silently ignored.
//!
//! # Example
//!
//! ```ignore
//! use ember_dhcp::{ProxyDhcpConfig, ProxyDhcpServer};
//! use std::net::Ipv4Addr;
//!
//! let config = ProxyDhcpConfig::new(Ipv4Addr::new(10, 0, 0, 2), "http://10.0.0.2:8080");
//! let server = ProxyDhcpServer::new(config);
//!
//! let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! server.run(shutdown_rx).await?;
//! ```

pub mod config;
pub mod error;
pub mod packet;
pub mod server;

pub use config::*;
pub use error::*;
pub use packet::*;
pub use server::*;
