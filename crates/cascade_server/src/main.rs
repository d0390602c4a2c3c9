//! CASCADE node
//!
//! Runs one replay node: ingress on `/`, live count on `/status`.

#![warn(missing_docs)]
#![warn(clippy::all)]

use anyhow::{Context, Result};
use cascade_core::{NodeId, StoreKind};
use cascade_runtime::NodeConfig;
use cascade_server::{ApiServer, StoreChoice, assign_identity, build_executor, load_config, parse_peer};
use clap::{Parser, ValueEnum};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cascade-node")]
#[command(about = "CASCADE replay node", long_about = None)]
struct Args {
    /// Node identity
    #[arg(long, env = "CONTAINER_NAME")]
    identity: Option<String>,

    /// Nodes that skip injected latency (comma separated)
    #[arg(long, env = "CASCADE_SPECIAL_NODES", value_delimiter = ',')]
    special_nodes: Vec<String>,

    /// Base configuration (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address
    #[arg(long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Ingress port of this and every peer
    #[arg(short, long)]
    port: Option<u16>,

    /// Explicit peer address, "node=host:port", repeatable
    #[arg(long = "peer")]
    peers: Vec<String>,

    /// Key-value store port
    #[arg(long)]
    redis_port: Option<u16>,

    /// Document store port
    #[arg(long)]
    mongodb_port: Option<u16>,

    /// Relational store port
    #[arg(long)]
    postgres_port: Option<u16>,

    /// Store backend
    #[arg(long, value_enum, default_value_t = StoreArg::Memory)]
    store: StoreArg,

    /// Directory for embedded store files
    #[arg(long, default_value = "./data")]
    store_dir: PathBuf,

    /// Transaction log directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Longest forward chain accepted
    #[arg(long)]
    max_hops: Option<u32>,

    /// Diagnostic output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum StoreArg {
    Memory,
    Embedded,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("cascade=info,tower_http=info"));
    match format {
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

async fn node_config(args: &Args) -> Result<NodeConfig> {
    let config = match &args.config {
        Some(path) => load_config(path).await?,
        None => NodeConfig::default(),
    };
    let mut config = assign_identity(config, args.identity.as_deref())?;
    let special: Vec<NodeId> = args
        .special_nodes
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(NodeId::from)
        .collect();
    if !special.is_empty() {
        config = config.with_special_nodes(special);
    }
    if let Some(port) = args.port {
        config = config.with_port(port);
    }
    for (kind, port) in [
        (StoreKind::KeyValue, args.redis_port),
        (StoreKind::Document, args.mongodb_port),
        (StoreKind::Relational, args.postgres_port),
    ] {
        if let Some(port) = port {
            config = config.with_store_port(kind, port);
        }
    }
    if let Some(dir) = &args.log_dir {
        config = config.with_log_dir(dir.clone());
    }
    if let Some(max_hops) = args.max_hops {
        config = config.with_max_hops(max_hops);
    }
    Ok(config)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    let config = node_config(&args).await?;
    let peers = args
        .peers
        .iter()
        .map(String::as_str)
        .map(parse_peer)
        .collect::<Result<Vec<_>, _>>()?;
    let store = match args.store {
        StoreArg::Memory => StoreChoice::Memory,
        StoreArg::Embedded => StoreChoice::Embedded(args.store_dir.clone()),
    };

    tracing::info!(
        node = %config.identity,
        special = config.is_special(),
        port = config.port,
        max_hops = config.max_hops,
        peers = peers.len(),
        "node starting"
    );

    let addr = SocketAddr::new(args.bind, config.port);
    let executor = build_executor(config, peers, store).await?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    let server = ApiServer::new(executor.clone());
    server.serve(listener, shutdown_signal()).await?;

    let pending = executor.detached().pending();
    if pending > 0 {
        tracing::info!(pending, "waiting for detached work");
    }
    executor.detached().drain().await;
    tracing::info!("node stopped");

    Ok(())
}
