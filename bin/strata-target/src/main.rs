//! Strata Target - storage node
//!
//! Owns one or more mountpaths, stores object payloads and their sidecar
//! metadata, and participates in EC, listing, and the cluster's two-phase
//! bucket transactions.

mod handlers;
mod mirror;
mod rungroup;
mod s3;
mod state;
mod txn;

use anyhow::Result;
use clap::Parser;
use serde::Deserialize;
use state::TargetState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use strata_cluster::Snode;
use strata_common::{NodeId, NodeRole};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "strata-target")]
#[command(about = "Strata storage node")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/strata/target.toml")]
    config: String,

    /// Listen address
    #[arg(short, long)]
    listen: Option<String>,

    /// Advertise address (how other nodes reach this target)
    #[arg(long)]
    advertise_addr: Option<String>,

    /// Mountpaths to use for storage
    #[arg(long)]
    mountpaths: Vec<String>,

    /// Primary proxy endpoint
    #[arg(long)]
    proxy_endpoint: Option<String>,

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

/// Configuration file structure
#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    target: TargetConfig,
    #[serde(default)]
    cluster: strata_common::config::Config,
    #[serde(default)]
    logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
struct TargetConfig {
    #[serde(default)]
    node_id: Option<String>,
    #[serde(default = "default_listen")]
    listen: String,
    #[serde(default)]
    advertise_addr: Option<String>,
    #[serde(default = "default_proxy_endpoint")]
    proxy_endpoint: String,
    #[serde(default)]
    mountpaths: Vec<String>,
    #[serde(default = "default_data_dir")]
    data_dir: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            listen: default_listen(),
            advertise_addr: None,
            proxy_endpoint: default_proxy_endpoint(),
            mountpaths: Vec::new(),
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
    "0.0.0.0:8081".to_string()
}

fn default_proxy_endpoint() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_data_dir() -> String {
    "./target-data".to_string()
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

    // CLI takes precedence over the config file
    let listen = args.listen.unwrap_or(file_cfg.target.listen);
    let proxy_endpoint = args
        .proxy_endpoint
        .unwrap_or(file_cfg.target.proxy_endpoint);
    let mountpaths = if args.mountpaths.is_empty() {
        file_cfg.target.mountpaths
    } else {
        args.mountpaths
    };
    let data_dir = PathBuf::from(args.data_dir.unwrap_or(file_cfg.target.data_dir));
    let node_id = args
        .node_id
        .or(file_cfg.target.node_id)
        .unwrap_or_else(|| format!("t-{}", &uuid::Uuid::new_v4().to_string()[..8]));
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

    info!("starting strata target {node_id}");
    if mountpaths.is_empty() {
        error!("no mountpaths specified; use --mountpaths or configure them in {}", args.config);
        std::process::exit(1);
    }

    let addr: SocketAddr = listen.parse()?;
    let advertise = args
        .advertise_addr
        .or(file_cfg.target.advertise_addr)
        .unwrap_or_else(|| {
            if listen.starts_with("0.0.0.0") {
                format!("http://127.0.0.1:{}", addr.port())
            } else {
                format!("http://{listen}")
            }
        });
    let snode = Snode::new(NodeId::new(node_id), NodeRole::Target, advertise.clone());

    let state = Arc::new(TargetState::new(
        snode,
        mountpaths,
        data_dir,
        proxy_endpoint.clone(),
        Arc::new(file_cfg.cluster),
    )?);

    // register with the primary and pull current cluster metadata
    let join_state = Arc::clone(&state);
    tokio::spawn(async move {
        for attempt in 1..=30u32 {
            match join_state.join_cluster().await {
                Ok(()) => {
                    info!("joined cluster via {}", join_state.proxy_endpoint());
                    return;
                }
                Err(e) => {
                    warn!(attempt, %e, "cluster join failed; retrying");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
        error!("giving up on cluster join");
    });

    let app = handlers::router(Arc::clone(&state));
    info!("listening on {addr}");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("shutting down");
        })
        .await?;

    state.shutdown();
    info!("target shut down gracefully");
    Ok(())
}
