//! Ember server
//!
//! Wires the four long-lived tasks (TFTP loop, HTTP listener(s),
//! proxy-DHCP loop, event dispatcher) around the shared store and one
//! cancellation signal. A single boot event flows DHCP → TFTP → HTTP →
//! callback bound to one machine identity; everything here exists to
//! keep that chain coherent.

pub mod auth;
pub mod bootfiles;
pub mod catalog;
pub mod config;
pub mod events;
pub mod http;
pub mod netutil;
pub mod profiles;
pub mod safenet;
pub mod session;
pub mod signer;
pub mod state;
pub mod store;

use crate::auth::AuthCache;
use crate::bootfiles::ChainloaderStore;
use crate::config::{parse_listen_addr, ServerConfig};
use crate::events::EventSender;
use crate::store::Store;
use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Shared state handed to every HTTP handler. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub config: Arc<ServerConfig>,
    pub auth: Arc<AuthCache>,
    pub events: EventSender,
    pub chainloaders: Arc<ChainloaderStore>,
}

impl AppState {
    /// Base URL for links embedded in scripts and configs: the pinned
    /// server URL, else derived from the request's Host.
    pub fn server_url(&self, request_host: &str) -> String {
        if !self.config.server_url.is_empty() {
            self.config.server_url.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", request_host)
        }
    }

    /// Signing key for URL tokens, if auth is configured
    pub async fn signing_key(&self) -> Option<Vec<u8>> {
        let snap = self.auth.snapshot(&self.store).await;
        if snap.signing_key.is_empty() {
            None
        } else {
            Some(snap.signing_key)
        }
    }
}

/// Run the server until the shutdown signal flips to `true`.
pub async fn run(config: ServerConfig, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    let config = Arc::new(config);

    let store = Store::open(&config.data_dir)
        .await
        .context("open database")?;

    let chainloaders = Arc::new(ChainloaderStore::load(&config.data_dir.join("ipxe")).await);
    if chainloaders.loaded_count() == 0 {
        warn!("no chainloader binaries found; place them under {}/ipxe", config.data_dir.display());
    }

    let (events, dispatcher) = events::channel(store.clone());

    let state = AppState {
        store,
        config: config.clone(),
        auth: Arc::new(AuthCache::new()),
        events,
        chainloaders: chainloaders.clone(),
    };

    let mut tasks = tokio::task::JoinSet::new();

    // Event dispatcher
    {
        let shutdown = shutdown.clone();
        tasks.spawn(async move {
            dispatcher.run(shutdown).await;
        });
    }

    // TFTP responder serving the chainloader store
    {
        let addr = parse_listen_addr(&config.tftp_addr, 69);
        let ip = match addr.ip() {
            std::net::IpAddr::V4(v4) => v4,
            _ => std::net::Ipv4Addr::UNSPECIFIED,
        };
        let server = ember_tftp::TftpServer::new(ip, addr.port(), chainloaders);
        let shutdown = shutdown.clone();
        tasks.spawn(async move {
            if let Err(e) = server.run(shutdown).await {
                error!(error = %e, "TFTP server failed");
            }
        });
    }

    // Proxy-DHCP responder
    if config.proxy_dhcp {
        let detected = if config.dhcp_iface.is_empty() {
            netutil::detect_interface()
        } else {
            netutil::interface_ip(&config.dhcp_iface)
                .map(|ip| (config.dhcp_iface.clone(), ip))
        };

        match detected {
            Some((iface, server_ip)) => {
                let server_url = config.effective_server_url(Some(server_ip));
                info!(iface = %iface, ip = %server_ip, url = %server_url, "proxy-DHCP enabled");
                let dhcp_config = ember_dhcp::ProxyDhcpConfig::new(server_ip, server_url);
                let server = ember_dhcp::ProxyDhcpServer::new(dhcp_config);
                let shutdown = shutdown.clone();
                tasks.spawn(async move {
                    if let Err(e) = server.run(shutdown).await {
                        error!(error = %e, "proxy-DHCP server failed");
                    }
                });
            }
            None => {
                error!(iface = %config.dhcp_iface, "no usable interface for proxy DHCP");
            }
        }
    }

    let router = http::routes::router(state);

    // HTTP listener
    {
        let addr = parse_listen_addr(&config.http_addr, 8080);
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("bind HTTP listener on {}", addr))?;
        info!(addr = %addr, "HTTP listening");

        let router = router.clone();
        let mut shutdown_rx = shutdown.clone();
        tasks.spawn(async move {
            let serve = axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });
            if let Err(e) = serve.await {
                error!(error = %e, "HTTP server failed");
            }
        });
    }

    // HTTPS listener, only with an operator-supplied cert/key pair;
    // anything missing or unloadable degrades to HTTP-only
    if !config.tls_cert.is_empty() && !config.tls_key.is_empty() {
        match axum_server::tls_rustls::RustlsConfig::from_pem_file(&config.tls_cert, &config.tls_key)
            .await
        {
            Ok(tls_config) => {
                let addr = parse_listen_addr(&config.https_addr, 8443);
                info!(addr = %addr, "HTTPS listening");

                let handle = axum_server::Handle::new();
                {
                    let handle = handle.clone();
                    let mut shutdown_rx = shutdown.clone();
                    tokio::spawn(async move {
                        let _ = shutdown_rx.changed().await;
                        handle.graceful_shutdown(Some(std::time::Duration::from_secs(5)));
                    });
                }

                let router = router.clone();
                tasks.spawn(async move {
                    let serve = axum_server::bind_rustls(addr, tls_config)
                        .handle(handle)
                        .serve(router.into_make_service_with_connect_info::<SocketAddr>());
                    if let Err(e) = serve.await {
                        error!(error = %e, "HTTPS server failed");
                    }
                });
            }
            Err(e) => {
                warn!(error = %e, "failed to load TLS material, continuing HTTP-only");
            }
        }
    }

    // Wait for every task to drain after the shutdown signal
    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            error!(error = %e, "task panicked");
        }
    }

    info!("server stopped");
    Ok(())
}
