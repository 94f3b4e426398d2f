//! Error types for the proxy-DHCP responder.

use std::net::SocketAddr;
use thiserror::Error;

/// Error type for proxy-DHCP operations
#[derive(Debug, Error)]
pub enum DhcpError {
    /// Failed to bind to socket. Port 67 needs privilege; the server
    /// surfaces this clearly instead of silently doing nothing.
    #[error("failed to bind to {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse DHCP packet
    #[error("failed to parse DHCP packet: {0}")]
    ParseError(String),

    /// Failed to encode DHCP reply
    #[error("failed to encode DHCP reply: {0}")]
    EncodeError(String),

    /// Socket send error
    #[error("failed to send packet: {0}")]
    SendError(#[from] std::io::Error),
}

/// Result type for proxy-DHCP operations
pub type Result<T> = std::result::Result<T, DhcpError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn test_error_display() {
        let err = DhcpError::ParseError("short packet".to_string());
        assert_eq!(err.to_string(), "failed to parse DHCP packet: short packet");

        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 67);
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "permission denied");
        let err = DhcpError::BindFailed {
            addr,
            source: io_err,
        };
        assert!(err.to_string().contains("failed to bind"));
    }
}
