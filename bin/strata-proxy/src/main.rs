//! Strata Proxy - gateway node
//!
//! Stateless gateway over the bucket/object namespace. One proxy is the
//! primary and owns write access to the cluster-wide metadata; the others
//! forward control-plane writes to it. Data requests are redirected to the
//! owning target.

mod handlers;
mod state;
mod txn;

use anyhow::Result;
use clap::Parser;
use serde::Deserialize;
use state::ProxyState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use strata_cluster::Snode;
use strata_common::{NodeId, NodeRole};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "strata-proxy")]
#[command(about = "Strata gateway node")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/strata/proxy.toml")]
    config: String,

    /// Listen address
    #[arg(short, long)]
    listen: Option<String>,

    /// Advertise address (how other nodes reach this proxy)
    #[arg(long)]
    advertise_addr: Option<String>,

    /// Run as the primary proxy
    #[arg(long)]
    primary: bool,

    /// Primary proxy endpoint (non-primary proxies join through it)
    #[arg(long)]
    primary_endpoint: Option<String>,

    /// Node id (generated when not set)
    #[arg(long)]
    node_id: Option<String>,

    /// Data directory for persisted cluster metadata
    #[arg(long)]
    data_dir: Option<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    proxy: ProxyConfig,
    #[serde(default)]
    cluster: strata_common::config::Config,
    #[serde(default)]
    logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
struct ProxyConfig {
    #[serde(default)]
    node_id: Option<String>,
    #[serde(default = "default_listen")]
    listen: String,
    #[serde(default)]
    advertise_addr: Option<String>,
    #[serde(default)]
    primary: bool,
    #[serde(default)]
    primary_endpoint: Option<String>,
    #[serde(default = "default_data_dir")]
    data_dir: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            listen: default_listen(),
            advertise_addr: None,
            primary: false,
            primary_endpoint: None,
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct LoggingConfig {
    #[serde(default = "default_log_level")]
    level: String,
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_data_dir() -> String {
    "./proxy-data".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let file_cfg: FileConfig = if std::path::Path::new(&args.config).exists() {
        let raw = std::fs::read_to_string(&args.config)?;
        toml::from_str(&raw).unwrap_or_else(|e| {
            eprintln!("Warning: failed to parse config file: {e}");
            FileConfig::default()
        })
    } else {
        FileConfig::default()
    };

    let listen = args.listen.unwrap_or(file_cfg.proxy.listen);
    let is_primary = args.primary || file_cfg.proxy.primary;
    let primary_endpoint = args.primary_endpoint.or(file_cfg.proxy.primary_endpoint);
    let data_dir = PathBuf::from(args.data_dir.unwrap_or(file_cfg.proxy.data_dir));
    let node_id = args
        .node_id
        .or(file_cfg.proxy.node_id)
        .unwrap_or_else(|| format!("p-{}", &uuid::Uuid::new_v4().to_string()[..8]));
    let log_level = if args.log_level != "info" {
        args.log_level
    } else {
        file_cfg.logging.level
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let addr: SocketAddr = listen.parse()?;
    let advertise = args
        .advertise_addr
        .or(file_cfg.proxy.advertise_addr)
        .unwrap_or_else(|| {
            if listen.starts_with("0.0.0.0") {
                format!("http://127.0.0.1:{}", addr.port())
            } else {
                format!("http://{listen}")
            }
        });
    let snode = Snode::new(NodeId::new(node_id.clone()), NodeRole::Proxy, advertise);

    info!(
        "starting strata proxy {node_id} ({})",
        if is_primary { "primary" } else { "non-primary" }
    );
    if !is_primary && primary_endpoint.is_none() {
        anyhow::bail!("non-primary proxy needs --primary-endpoint");
    }

    let state = Arc::new(ProxyState::new(
        snode,
        is_primary,
        primary_endpoint,
        data_dir,
        Arc::new(file_cfg.cluster),
    )?);

    if !is_primary {
        let join_state = Arc::clone(&state);
        tokio::spawn(async move {
            for attempt in 1..=30u32 {
                match join_state.join_cluster().await {
                    Ok(()) => {
                        info!("joined cluster");
                        return;
                    }
                    Err(e) => {
                        warn!(attempt, %e, "cluster join failed; retrying");
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        });
    }

    let app = handlers::router(Arc::clone(&state));
    info!("listening on {addr}");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("shutting down");
        })
        .await?;

    info!("proxy shut down gracefully");
    Ok(())
}
