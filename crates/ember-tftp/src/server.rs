//! TFTP server loop
//!
//! RRQ-only. Each read request gets its own transfer task on an ephemeral
//! port, classic lockstep DATA/ACK with a 5 second per-block timeout and
//! 3 retries. Write requests are answered with an access violation.

use crate::error::{Result, TftpError};
use crate::packet::{ErrorCode, TftpOptions, TftpPacket};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Default block size (RFC 1350)
pub const DEFAULT_BLOCK_SIZE: u16 = 512;

/// Maximum block size we negotiate (RFC 2348)
pub const MAX_BLOCK_SIZE: u16 = 65464;

/// Per-block timeout in seconds
pub const BLOCK_TIMEOUT_SECS: u8 = 5;

/// Retries per block before the transfer is abandoned
pub const MAX_RETRIES: u32 = 3;

/// Trait for providing files to the TFTP server
#[async_trait]
pub trait FileProvider: Send + Sync {
    /// Get file contents by name
    async fn get_file(&self, name: &str) -> Option<Bytes>;
}

/// TFTP server
pub struct TftpServer {
    bind_ip: Ipv4Addr,
    port: u16,
    file_provider: Arc<dyn FileProvider>,
}

impl TftpServer {
    /// Create a new TFTP server
    pub fn new(bind_ip: Ipv4Addr, port: u16, file_provider: Arc<dyn FileProvider>) -> Self {
        Self {
            bind_ip,
            port,
            file_provider,
        }
    }

    /// Run the server until the shutdown signal flips
    pub async fn run(&self, shutdown: tokio::sync::watch::Receiver<bool>) -> Result<()> {
        let bind_addr = SocketAddrV4::new(self.bind_ip, self.port);

        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| TftpError::BindFailed {
                addr: bind_addr.into(),
                source: e,
            })?;

        info!(addr = %bind_addr, "TFTP listening");

        let mut buf = [0u8; 2048];
        let mut shutdown = shutdown;

        loop {
            tokio::select! {
                result = socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, src)) => {
                            let data = buf[..len].to_vec();
                            let file_provider = self.file_provider.clone();

                            // One task per request keeps slow clients from
                            // holding up the accept loop
                            tokio::spawn(async move {
                                if let Err(e) = handle_request(data, src, file_provider).await {
                                    error!(error = %e, client = %src, "TFTP request failed");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "error receiving packet");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("TFTP shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

/// Handle a single TFTP request
async fn handle_request(
    data: Vec<u8>,
    client: SocketAddr,
    file_provider: Arc<dyn FileProvider>,
) -> Result<()> {
    let packet = TftpPacket::parse(&data)?;

    match packet {
        TftpPacket::ReadRequest {
            filename,
            mode: _,
            options,
        } => handle_read_request(client, &filename, options, file_provider).await,
        TftpPacket::WriteRequest { .. } => {
            send_error(client, ErrorCode::AccessViolation, "writes not supported").await
        }
        _ => send_error(client, ErrorCode::IllegalOperation, "unexpected packet").await,
    }
}

/// Serve one read request
async fn handle_read_request(
    client: SocketAddr,
    filename: &str,
    options: TftpOptions,
    file_provider: Arc<dyn FileProvider>,
) -> Result<()> {
    let filename = filename.trim_start_matches('/');
    debug!(client = %client, filename = %filename, "read request");

    let file_data = match file_provider.get_file(filename).await {
        Some(data) => data,
        None => {
            warn!(client = %client, filename = %filename, "file not found");
            return send_error(client, ErrorCode::FileNotFound, "file not found").await;
        }
    };

    let file_size = file_data.len() as u64;

    // Ephemeral port for the transfer; the well-known port stays free for
    // new requests (RFC 1350 TID rules)
    let transfer_socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .map_err(TftpError::IoError)?;

    let mut block_size = options
        .blksize
        .map(|b| b.clamp(8, MAX_BLOCK_SIZE))
        .unwrap_or(DEFAULT_BLOCK_SIZE);
    let timeout_duration = Duration::from_secs(u64::from(BLOCK_TIMEOUT_SECS));

    // RFC 2347: reply with an OACK echoing only the options the client
    // asked for; if the client rejects it, fall back to 512-byte blocks
    if !options.is_empty() {
        let oack = TftpPacket::oack(TftpOptions {
            blksize: options.blksize.map(|_| block_size),
            tsize: options.tsize.map(|_| file_size),
            timeout: options.timeout,
        });
        transfer_socket
            .send_to(&oack.encode(), client)
            .await
            .map_err(TftpError::IoError)?;

        let mut ack_buf = [0u8; 512];
        match timeout(timeout_duration, transfer_socket.recv_from(&mut ack_buf)).await {
            Ok(Ok((len, _))) => match TftpPacket::parse(&ack_buf[..len])? {
                TftpPacket::Ack { block: 0 } => {}
                TftpPacket::Error { code, message } => {
                    warn!(
                        client = %client,
                        code = ?code,
                        message = %message,
                        "client rejected OACK, falling back to defaults"
                    );
                    block_size = DEFAULT_BLOCK_SIZE;
                }
                _ => {
                    return send_error_on(
                        &transfer_socket,
                        client,
                        ErrorCode::IllegalOperation,
                        "expected ACK 0",
                    )
                    .await;
                }
            },
            Ok(Err(e)) => return Err(TftpError::IoError(e)),
            Err(_) => {
                return Err(TftpError::Timeout {
                    filename: filename.to_string(),
                });
            }
        }
    }

    // Lockstep transfer: send block, wait for its ACK, retry up to 3 times
    let block_size = block_size as usize;
    let mut block_num: u16 = 1;
    let mut offset: usize = 0;

    loop {
        let end = (offset + block_size).min(file_data.len());
        let block_data = file_data.slice(offset..end);
        // A short (or empty) block signals end of transfer per RFC 1350
        let is_last = block_data.len() < block_size;

        let data_packet = TftpPacket::data(block_num, block_data).encode();

        let mut retries = 0;
        loop {
            transfer_socket
                .send_to(&data_packet, client)
                .await
                .map_err(TftpError::IoError)?;

            let mut ack_buf = [0u8; 512];
            match timeout(timeout_duration, transfer_socket.recv_from(&mut ack_buf)).await {
                Ok(Ok((len, _))) => match TftpPacket::parse(&ack_buf[..len])? {
                    TftpPacket::Ack { block } if block == block_num => break,
                    TftpPacket::Ack { .. } => {
                        // Stale ACK from an earlier block; keep waiting
                        continue;
                    }
                    TftpPacket::Error { code, message } => {
                        warn!(client = %client, code = ?code, message = %message, "client aborted");
                        return Ok(());
                    }
                    _ => {
                        retries += 1;
                        if retries >= MAX_RETRIES {
                            return Err(TftpError::Timeout {
                                filename: filename.to_string(),
                            });
                        }
                    }
                },
                Ok(Err(e)) => return Err(TftpError::IoError(e)),
                Err(_) => {
                    retries += 1;
                    if retries >= MAX_RETRIES {
                        return Err(TftpError::Timeout {
                            filename: filename.to_string(),
                        });
                    }
                    debug!(client = %client, block = block_num, retry = retries, "block timeout, retransmitting");
                }
            }
        }

        offset = end;
        if is_last {
            break;
        }
        block_num = block_num.wrapping_add(1);
    }

    info!(client = %client, filename = %filename, bytes = file_size, "transfer completed");
    Ok(())
}

/// Send an error packet from a fresh socket
async fn send_error(client: SocketAddr, code: ErrorCode, message: &str) -> Result<()> {
    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .map_err(TftpError::IoError)?;
    send_error_on(&socket, client, code, message).await
}

/// Send an error packet on an existing socket
async fn send_error_on(
    socket: &UdpSocket,
    client: SocketAddr,
    code: ErrorCode,
    message: &str,
) -> Result<()> {
    let error = TftpPacket::error(code, message);
    socket
        .send_to(&error.encode(), client)
        .await
        .map_err(TftpError::IoError)?;
    Ok(())
}

impl std::fmt::Debug for TftpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TftpServer")
            .field("bind_ip", &self.bind_ip)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

/// In-memory file provider; the chainloader store is one of these
pub struct MemoryFileProvider {
    files: HashMap<String, Bytes>,
}

impl MemoryFileProvider {
    /// Create an empty provider
    pub fn new() -> Self {
        Self {
            files: HashMap::new(),
        }
    }

    /// Add a file
    pub fn add_file(&mut self, name: impl Into<String>, data: impl Into<Bytes>) {
        self.files.insert(name.into(), data.into());
    }

    /// Number of files held
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the provider holds no files
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl Default for MemoryFileProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileProvider for MemoryFileProvider {
    async fn get_file(&self, name: &str) -> Option<Bytes> {
        self.files.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_file_provider_get() {
        let mut provider = MemoryFileProvider::new();
        provider.add_file("ipxe.efi", Bytes::from_static(b"fake ipxe binary"));

        let file = provider.get_file("ipxe.efi").await;
        assert_eq!(&file.unwrap()[..], b"fake ipxe binary");

        assert!(provider.get_file("nonexistent").await.is_none());
    }

    #[tokio::test]
    async fn test_rrq_lockstep_transfer() {
        // Server side on an ephemeral main port, driven by a scripted client
        let mut provider = MemoryFileProvider::new();
        let payload: Vec<u8> = (0..1200u16).map(|i| (i % 251) as u8).collect();
        provider.add_file("undionly.kpxe", payload.clone());
        let provider = Arc::new(provider);

        let server_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server_socket.local_addr().unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client_addr = client.local_addr().unwrap();

        // Fire the RRQ at the main socket, then serve it the way run() would
        let rrq = TftpPacket::ReadRequest {
            filename: "undionly.kpxe".to_string(),
            mode: crate::packet::TransferMode::Octet,
            options: TftpOptions::default(),
        };
        client.send_to(&rrq.encode(), server_addr).await.unwrap();

        let mut buf = [0u8; 2048];
        let (len, src) = server_socket.recv_from(&mut buf).await.unwrap();
        assert_eq!(src, client_addr);
        let data = buf[..len].to_vec();
        let server = tokio::spawn(async move { handle_request(data, src, provider).await });

        // Client side: collect DATA blocks, ACK each
        let mut received = Vec::new();
        loop {
            let mut buf = [0u8; 2048];
            let (len, transfer_addr) = client.recv_from(&mut buf).await.unwrap();
            match TftpPacket::parse(&buf[..len]).unwrap() {
                TftpPacket::Data { block, data } => {
                    received.extend_from_slice(&data);
                    client
                        .send_to(&TftpPacket::ack(block).encode(), transfer_addr)
                        .await
                        .unwrap();
                    if data.len() < DEFAULT_BLOCK_SIZE as usize {
                        break;
                    }
                }
                other => panic!("expected DATA, got {:?}", other),
            }
        }

        assert_eq!(received, payload);
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_rrq_unknown_file_gets_error() {
        let provider = Arc::new(MemoryFileProvider::new());
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client_addr = client.local_addr().unwrap();

        let rrq = TftpPacket::ReadRequest {
            filename: "missing.bin".to_string(),
            mode: crate::packet::TransferMode::Octet,
            options: TftpOptions::default(),
        };
        handle_request(rrq.encode().to_vec(), client_addr, provider)
            .await
            .unwrap();

        let mut buf = [0u8; 512];
        let (len, _) = client.recv_from(&mut buf).await.unwrap();
        match TftpPacket::parse(&buf[..len]).unwrap() {
            TftpPacket::Error { code, .. } => assert_eq!(code, ErrorCode::FileNotFound),
            other => panic!("expected ERROR, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wrq_rejected() {
        let provider = Arc::new(MemoryFileProvider::new());
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client_addr = client.local_addr().unwrap();

        let wrq = TftpPacket::WriteRequest {
            filename: "upload.bin".to_string(),
            mode: crate::packet::TransferMode::Octet,
            options: TftpOptions::default(),
        };
        handle_request(wrq.encode().to_vec(), client_addr, provider)
            .await
            .unwrap();

        let mut buf = [0u8; 512];
        let (len, _) = client.recv_from(&mut buf).await.unwrap();
        match TftpPacket::parse(&buf[..len]).unwrap() {
            TftpPacket::Error { code, .. } => assert_eq!(code, ErrorCode::AccessViolation),
            other => panic!("expected ERROR, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rrq_with_options_gets_oack() {
        let mut provider = MemoryFileProvider::new();
        provider.add_file("ipxe.efi", vec![7u8; 4000]);
        let provider = Arc::new(provider);

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client_addr = client.local_addr().unwrap();

        let rrq = TftpPacket::ReadRequest {
            filename: "ipxe.efi".to_string(),
            mode: crate::packet::TransferMode::Octet,
            options: TftpOptions {
                blksize: Some(1428),
                tsize: Some(0),
                timeout: None,
            },
        };
        let server = tokio::spawn(handle_request(
            rrq.encode().to_vec(),
            client_addr,
            provider,
        ));

        let mut buf = [0u8; 2048];
        let (len, transfer_addr) = client.recv_from(&mut buf).await.unwrap();
        match TftpPacket::parse(&buf[..len]).unwrap() {
            TftpPacket::Oack { options } => {
                assert_eq!(options.blksize, Some(1428));
                assert_eq!(options.tsize, Some(4000));
            }
            other => panic!("expected OACK, got {:?}", other),
        }

        // ACK 0 accepts the options, then drain the transfer
        client
            .send_to(&TftpPacket::ack(0).encode(), transfer_addr)
            .await
            .unwrap();

        let mut received = 0usize;
        loop {
            let (len, _) = client.recv_from(&mut buf).await.unwrap();
            match TftpPacket::parse(&buf[..len]).unwrap() {
                TftpPacket::Data { block, data } => {
                    received += data.len();
                    client
                        .send_to(&TftpPacket::ack(block).encode(), transfer_addr)
                        .await
                        .unwrap();
                    if data.len() < 1428 {
                        break;
                    }
                }
                other => panic!("expected DATA, got {:?}", other),
            }
        }
        assert_eq!(received, 4000);
        server.await.unwrap().unwrap();
    }
}
