//! Ember TFTP Responder
//!
//! Read-only TFTP server used for exactly one job: handing chainloader
//! binaries to PXE firmware. Implements RFC 1350 reads with option
//! negotiation from RFC 2347 (options), RFC 2348 (block size) and
//! RFC 2349 (timeout / transfer size). Write requests are rejected.
//!
//! # Example
//!
//! ```ignore
//! use ember_tftp::{TftpServer, MemoryFileProvider};
//! use std::net::Ipv4Addr;
//! use std::sync::Arc;
//!
//! let mut provider = MemoryFileProvider::new();
//! provider.add_file("ipxe.efi", ipxe_bytes);
//!
//! let server = TftpServer::new(Ipv4Addr::UNSPECIFIED, 69, Arc::new(provider));
//! let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! server.run(shutdown_rx).await?;
//! ```

pub mod error;
pub mod packet;
pub mod server;

pub use error::*;
pub use packet::*;
pub use server::*;
