//! Error types for the TFTP responder.

use std::net::SocketAddr;
use thiserror::Error;

/// Error type for TFTP operations
#[derive(Debug, Error)]
pub enum TftpError {
    /// Failed to bind to socket
    #[error("failed to bind to {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// File not found
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// Invalid TFTP packet
    #[error("invalid TFTP packet: {0}")]
    InvalidPacket(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Transfer timed out waiting for the client
    #[error("transfer timeout for {filename}")]
    Timeout { filename: String },
}

/// Result type for TFTP operations
pub type Result<T> = std::result::Result<T, TftpError>;
