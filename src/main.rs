// Main binary that starts the provisioning server
use clap::Parser;
use color_eyre::eyre::Result;
use ember_server::config::ServerConfig;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, registry, util::SubscriberInitExt, EnvFilter};

/// Bare-metal provisioning server: PXE/HTTP boot dispatch and machine
/// lifecycle. Every flag is mirrored by an EMBER_* environment variable;
/// the flag wins when both are present.
#[derive(Parser, Debug)]
#[command(author, version, about = "Ember bare-metal provisioning server", long_about = None)]
struct Cli {
    /// Data directory (database, images, profiles, chainloaders)
    #[arg(long, env = "EMBER_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// TFTP listen address
    #[arg(long, env = "EMBER_TFTP_ADDR", default_value = ":69")]
    tftp_addr: String,

    /// HTTP listen address
    #[arg(long, env = "EMBER_HTTP_ADDR", default_value = ":8080")]
    http_addr: String,

    /// HTTPS listen address
    #[arg(long, env = "EMBER_HTTPS_ADDR", default_value = ":8443")]
    https_addr: String,

    /// TLS certificate file (HTTPS disabled if empty)
    #[arg(long, env = "EMBER_TLS_CERT", default_value = "")]
    tls_cert: String,

    /// TLS key file (HTTPS disabled if empty)
    #[arg(long, env = "EMBER_TLS_KEY", default_value = "")]
    tls_key: String,

    /// Redirect HTTP to HTTPS (iPXE clients and the boot chain excluded)
    #[arg(long, env = "EMBER_HTTPS_REDIRECT", default_value_t = false)]
    https_redirect: bool,

    /// Externally visible server URL for boot scripts (auto-detect if empty)
    #[arg(long, env = "EMBER_SERVER_URL", default_value = "")]
    server_url: String,

    /// Image catalog URL
    #[arg(
        long,
        env = "EMBER_CATALOG_URL",
        default_value = "https://raw.githubusercontent.com/emberlabs/ember-catalog/main/catalog.json"
    )]
    catalog_url: String,

    /// Enable the proxy-DHCP responder for PXE boot
    #[arg(long, env = "EMBER_PROXY_DHCP", default_value_t = false)]
    proxy_dhcp: bool,

    /// Network interface for proxy DHCP (auto-detect if empty)
    #[arg(long, env = "EMBER_DHCP_IFACE", default_value = "")]
    dhcp_iface: String,

    /// Verbose output
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let default_level = if cli.verbose { "debug" } else { "info" };
    let directives = format!(
        "ember={level},ember_server={level},ember_dhcp={level},ember_tftp={level},tower=warn,hyper=warn,sqlx=warn,reqwest=warn",
        level = default_level
    );
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));
    registry().with(filter).with(fmt::layer().with_writer(std::io::stderr)).init();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    let config = ServerConfig {
        data_dir: cli.data_dir,
        tftp_addr: cli.tftp_addr,
        http_addr: cli.http_addr,
        https_addr: cli.https_addr,
        tls_cert: cli.tls_cert,
        tls_key: cli.tls_key,
        https_redirect: cli.https_redirect,
        server_url: cli.server_url,
        catalog_url: cli.catalog_url,
        proxy_dhcp: cli.proxy_dhcp,
        dhcp_iface: cli.dhcp_iface,
    };

    ember_server::run(config, shutdown_rx)
        .await
        .map_err(|e| color_eyre::eyre::eyre!(e))?;
    Ok(())
}
