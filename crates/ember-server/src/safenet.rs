//! SSRF-guarded outbound HTTP
//!
//! Catalog files and webhook deliveries go to operator- and
//! manifest-supplied URLs; none of them may be tricked into reaching the
//! server's own network. The guard resolves the host first, rejects the
//! request if any resolved address is private/loopback/link-local, and
//! pins the connection to the vetted addresses so a racing DNS change
//! cannot swap one in afterwards. Redirects are not followed for the
//! same reason.

use reqwest::redirect::Policy;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use thiserror::Error;
use tokio::net::lookup_host;
use url::{Host, Url};

/// Error type for guarded requests
#[derive(Debug, Error)]
pub enum SafenetError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("unsupported URL scheme {0:?}")]
    UnsupportedScheme(String),

    #[error("URL has no host")]
    NoHost,

    #[error("failed to resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("blocked connection to private IP {ip} (resolved from {host})")]
    BlockedPrivateIp { ip: IpAddr, host: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Is this an address we refuse to dial?
pub fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_private()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                // fe80::/10 link-local
                || (v6.segments()[0] & 0xffc0) == 0xfe80
                // fc00::/7 unique-local
                || (v6.segments()[0] & 0xfe00) == 0xfc00
        }
    }
}

/// Outbound HTTP client that refuses private destinations
#[derive(Debug, Clone)]
pub struct SafeClient {
    timeout: Duration,
}

impl SafeClient {
    /// Create a guarded client with a total per-request timeout
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Validate scheme/host and resolve+vet the destination. Returns a
    /// client pinned to the vetted addresses plus the parsed URL.
    async fn prepare(&self, raw_url: &str) -> Result<(reqwest::Client, Url), SafenetError> {
        let url = Url::parse(raw_url).map_err(|e| SafenetError::InvalidUrl(e.to_string()))?;

        match url.scheme() {
            "http" | "https" => {}
            other => return Err(SafenetError::UnsupportedScheme(other.to_string())),
        }

        let host = url.host().ok_or(SafenetError::NoHost)?.to_owned();
        let port = url.port_or_known_default().unwrap_or(80);

        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .redirect(Policy::none());

        match host {
            Host::Ipv4(ip) => {
                if is_private_ip(IpAddr::V4(ip)) {
                    return Err(SafenetError::BlockedPrivateIp {
                        ip: IpAddr::V4(ip),
                        host: ip.to_string(),
                    });
                }
            }
            Host::Ipv6(ip) => {
                if is_private_ip(IpAddr::V6(ip)) {
                    return Err(SafenetError::BlockedPrivateIp {
                        ip: IpAddr::V6(ip),
                        host: ip.to_string(),
                    });
                }
            }
            Host::Domain(ref domain) => {
                let addrs: Vec<SocketAddr> = lookup_host((domain.as_str(), port))
                    .await
                    .map_err(|source| SafenetError::Resolve {
                        host: domain.to_string(),
                        source,
                    })?
                    .collect();

                // Every resolved address must be public before any dial
                for addr in &addrs {
                    if is_private_ip(addr.ip()) {
                        return Err(SafenetError::BlockedPrivateIp {
                            ip: addr.ip(),
                            host: domain.to_string(),
                        });
                    }
                }

                builder = builder.resolve_to_addrs(domain, &addrs);
            }
        }

        let client = builder.build()?;
        Ok((client, url))
    }

    /// GET the URL through the guard
    pub async fn get(&self, raw_url: &str) -> Result<reqwest::Response, SafenetError> {
        let (client, url) = self.prepare(raw_url).await?;
        Ok(client.get(url).send().await?)
    }

    /// POST a JSON body with optional extra headers through the guard
    pub async fn post_json(
        &self,
        raw_url: &str,
        body: Vec<u8>,
        headers: &[(&str, String)],
    ) -> Result<reqwest::Response, SafenetError> {
        let (client, url) = self.prepare(raw_url).await?;
        let mut req = client
            .post(url)
            .header("Content-Type", "application/json")
            .body(body);
        for (name, value) in headers {
            req = req.header(*name, value);
        }
        Ok(req.send().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_private_v4_ranges() {
        for ip in [
            "127.0.0.1",
            "127.8.8.8",
            "10.0.0.1",
            "10.255.255.255",
            "172.16.0.1",
            "172.31.200.9",
            "192.168.1.1",
            "169.254.10.10",
            "0.0.0.0",
        ] {
            let ip: Ipv4Addr = ip.parse().unwrap();
            assert!(is_private_ip(IpAddr::V4(ip)), "{} should be private", ip);
        }
    }

    #[test]
    fn test_public_v4_allowed() {
        for ip in ["1.1.1.1", "8.8.8.8", "172.15.0.1", "172.32.0.1", "11.0.0.1"] {
            let ip: Ipv4Addr = ip.parse().unwrap();
            assert!(!is_private_ip(IpAddr::V4(ip)), "{} should be public", ip);
        }
    }

    #[test]
    fn test_private_v6_ranges() {
        for ip in ["::1", "::", "fe80::1", "fc00::1", "fdab::17"] {
            let ip: Ipv6Addr = ip.parse().unwrap();
            assert!(is_private_ip(IpAddr::V6(ip)), "{} should be private", ip);
        }
        let public: Ipv6Addr = "2606:4700:4700::1111".parse().unwrap();
        assert!(!is_private_ip(IpAddr::V6(public)));
    }

    #[tokio::test]
    async fn test_rejects_bad_schemes_and_hosts() {
        let client = SafeClient::new(Duration::from_secs(1));

        assert!(matches!(
            client.get("ftp://mirror.example/file").await,
            Err(SafenetError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            client.get("file:///etc/passwd").await,
            Err(SafenetError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            client.get("not a url").await,
            Err(SafenetError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_blocks_private_ip_literals_without_dialing() {
        let client = SafeClient::new(Duration::from_secs(1));

        for url in [
            "http://127.0.0.1/secret",
            "http://127.0.0.1:8080/secret",
            "http://10.0.0.5/metadata",
            "http://192.168.1.1/admin",
            "http://169.254.169.254/latest/meta-data/",
            "http://[::1]/secret",
            "http://[fc00::1]/x",
        ] {
            match client.get(url).await {
                Err(SafenetError::BlockedPrivateIp { .. }) => {}
                other => panic!("{} should be blocked, got {:?}", url, other.map(|_| ())),
            }
        }
    }

    #[tokio::test]
    async fn test_blocks_names_resolving_to_loopback() {
        let client = SafeClient::new(Duration::from_secs(1));
        // localhost resolves to loopback everywhere we run tests
        match client.get("http://localhost:9/x").await {
            Err(SafenetError::BlockedPrivateIp { ip, host }) => {
                assert!(ip.is_loopback());
                assert_eq!(host, "localhost");
            }
            other => panic!("localhost should be blocked, got {:?}", other.map(|_| ())),
        }
    }
}
