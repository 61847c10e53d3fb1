//! Standalone MCP server binary for the PacketProxy packet store.
//!
//! Serves `get_history`, `get_configs`, `get_packet_detail` and
//! `resend_packet` over stdio.
//!
//! Usage:
//! ```
//! cargo run -p packetproxy_core --bin packetproxy_mcp -- --storage-path ./packetproxy_data
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use packetproxy_core::api::PacketService;
use packetproxy_core::auth::{FileTrustStore, StaticTrustStore, TrustStore};
use packetproxy_core::config::{ConfigRegistry, ConfigSnapshot, ServiceConfig};
use packetproxy_core::logging::init_logging;
use packetproxy_core::mcp::PacketProxyServer;
use packetproxy_core::storage::PacketStore;
use packetproxy_core::transport::ReqwestTransport;
use rmcp::ServiceExt;
use tokio::io::{stdin, stdout};

/// PacketProxy MCP server
#[derive(Parser, Debug)]
#[command(name = "packetproxy_mcp")]
#[command(about = "Serve the PacketProxy packet store and resend engine over MCP stdio")]
struct Args {
    /// Directory for the packet database and access token
    #[arg(long)]
    storage_path: Option<PathBuf>,

    /// JSON configuration snapshot exposed through get_configs
    #[arg(long)]
    config: Option<PathBuf>,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Per-attempt dispatch timeout in milliseconds
    #[arg(long, default_value_t = 30_000)]
    timeout_ms: u64,

    /// Accept invalid TLS certificates when resending
    #[arg(long)]
    accept_invalid_certs: bool,

    /// Access token for resend_packet; generated and stored under the storage path when omitted
    #[arg(long, env = "PACKETPROXY_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _log_guard = init_logging(args.log_dir.as_deref())?;

    let config = ServiceConfig {
        storage_path: args
            .storage_path
            .unwrap_or_else(ServiceConfig::default_storage_path),
        dispatch_timeout: Duration::from_millis(args.timeout_ms),
        accept_invalid_certs: args.accept_invalid_certs,
        ..ServiceConfig::default()
    };
    config
        .ensure_storage_dir()
        .with_context(|| format!("creating {}", config.storage_path.display()))?;

    tracing::info!("Starting PacketProxy MCP server (rmcp SDK)");

    let store = Arc::new(PacketStore::open(&config.storage_path, config.ring_size)?);
    let transport = Arc::new(ReqwestTransport::new(
        config.dispatch_timeout,
        config.accept_invalid_certs,
    )?);

    let trust: Arc<dyn TrustStore> = match args.access_token {
        Some(token) => Arc::new(StaticTrustStore::new(token)),
        None => {
            let file_store = FileTrustStore::new(config.storage_path.clone());
            file_store.ensure_token()?;
            tracing::info!(
                "resend_packet access token stored at {}",
                file_store.secret_path().display()
            );
            Arc::new(file_store)
        }
    };

    let snapshot = match &args.config {
        Some(path) => ConfigSnapshot::load(path)?,
        None => ConfigSnapshot::default(),
    };
    let configs = ConfigRegistry::new(snapshot)?;

    let service = PacketService::new(store, transport, trust, configs, &config);
    tracing::info!(
        "PacketProxy MCP server ready (storage: {})",
        config.storage_path.display()
    );

    let server = PacketProxyServer::new(Arc::new(service));
    let service = server.serve((stdin(), stdout())).await?;
    service.waiting().await?;

    Ok(())
}
