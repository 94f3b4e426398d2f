//! Server configuration
//!
//! Assembled by the binary from flags/env and handed to `run()`.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

/// Everything the server needs to come up
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Data directory: database, images/, profiles/, ipxe/
    pub data_dir: PathBuf,
    /// TFTP listen address, e.g. ":69"
    pub tftp_addr: String,
    /// HTTP listen address, e.g. ":8080"
    pub http_addr: String,
    /// HTTPS listen address, e.g. ":8443"
    pub https_addr: String,
    /// TLS certificate PEM path; HTTPS runs only when cert+key are set
    pub tls_cert: String,
    /// TLS key PEM path
    pub tls_key: String,
    /// Redirect browser HTTP to HTTPS (boot chain always excluded)
    pub https_redirect: bool,
    /// Externally visible base URL; auto-detected when empty
    pub server_url: String,
    /// Catalog manifest URL
    pub catalog_url: String,
    /// Run the proxy-DHCP responder
    pub proxy_dhcp: bool,
    /// Interface for proxy DHCP; auto-detected when empty
    pub dhcp_iface: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            tftp_addr: ":69".to_string(),
            http_addr: ":8080".to_string(),
            https_addr: ":8443".to_string(),
            tls_cert: String::new(),
            tls_key: String::new(),
            https_redirect: false,
            server_url: String::new(),
            catalog_url: String::new(),
            proxy_dhcp: false,
            dhcp_iface: String::new(),
        }
    }
}

impl ServerConfig {
    /// Resolve the advertised base URL: the pinned one, or http:// on the
    /// detected server IP and HTTP port.
    pub fn effective_server_url(&self, detected_ip: Option<Ipv4Addr>) -> String {
        if !self.server_url.is_empty() {
            return self.server_url.trim_end_matches('/').to_string();
        }
        let ip = detected_ip.unwrap_or(Ipv4Addr::LOCALHOST);
        match addr_port(&self.http_addr) {
            80 => format!("http://{}", ip),
            port => format!("http://{}:{}", ip, port),
        }
    }

    /// Port of the HTTPS listener, for redirect targets
    pub fn https_port(&self) -> u16 {
        addr_port(&self.https_addr)
    }
}

/// Parse a listen address like ":8080" or "0.0.0.0:8080" into a bindable
/// socket address (empty host binds all interfaces).
pub fn parse_listen_addr(addr: &str, default_port: u16) -> SocketAddr {
    let (host, port) = match addr.rsplit_once(':') {
        Some((host, port)) => (host, port.parse().unwrap_or(default_port)),
        None => ("", addr.parse().unwrap_or(default_port)),
    };
    let ip = if host.is_empty() {
        Ipv4Addr::UNSPECIFIED
    } else {
        host.parse().unwrap_or(Ipv4Addr::UNSPECIFIED)
    };
    SocketAddr::from((ip, port))
}

fn addr_port(addr: &str) -> u16 {
    addr.rsplit_once(':')
        .and_then(|(_, p)| p.parse().ok())
        .unwrap_or(80)
}
