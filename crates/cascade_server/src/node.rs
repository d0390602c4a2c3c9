//! Node assembly: configuration file, peer overrides and store selection.

use cascade_core::NodeId;
use cascade_log::{LogError, TxnLog};
use cascade_runtime::{HttpTransport, NodeConfig, NodeExecutor, NodeResolver};
use cascade_storage::{DataStoreAdapter, EmbeddedConnector, MemoryConnector, StoreConnector};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Node setup errors
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    /// Config file unreadable
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        /// Config file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
    /// Config file is not a valid node config
    #[error("invalid config {path}: {source}")]
    ConfigParse {
        /// Config file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },
    /// No identity was assigned by flag, environment or config file
    #[error("node identity is required (--identity or CONTAINER_NAME)")]
    MissingIdentity,
    /// A `--peer` value was not `node=address`
    #[error("invalid peer '{0}', expected node=host:port")]
    Peer(String),
    /// The transaction log could not be opened
    #[error(transparent)]
    Log(#[from] LogError),
}

/// Where data-op calls land
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChoice {
    /// Process-local maps; contents vanish on exit
    Memory,
    /// One redb file per store address under the given directory
    Embedded(PathBuf),
}

/// Parse `node=host:port`
///
/// # Errors
///
/// Returns error if either side is empty or the `=` is missing
pub fn parse_peer(value: &str) -> Result<(NodeId, String), SetupError> {
    match value.split_once('=') {
        Some((node, address)) if !node.trim().is_empty() && !address.trim().is_empty() => {
            Ok((NodeId::new(node.trim()), address.trim().to_string()))
        }
        _ => Err(SetupError::Peer(value.to_string())),
    }
}

/// Read a JSON node config; absent fields take their defaults
///
/// # Errors
///
/// Returns error if the file is unreadable or malformed
pub async fn load_config(path: &Path) -> Result<NodeConfig, SetupError> {
    let raw = tokio::fs::read(path)
        .await
        .map_err(|source| SetupError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
    serde_json::from_slice(&raw).map_err(|source| SetupError::ConfigParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Apply an identity override and insist the result is non-empty
///
/// # Errors
///
/// Returns error if neither `identity` nor the config names this node
pub fn assign_identity(mut config: NodeConfig, identity: Option<&str>) -> Result<NodeConfig, SetupError> {
    if let Some(identity) = identity.map(str::trim).filter(|s| !s.is_empty()) {
        config.identity = NodeId::new(identity);
    }
    if config.identity.as_str().trim().is_empty() {
        return Err(SetupError::MissingIdentity);
    }
    Ok(config)
}

/// Wire an executor from `config`: per-node log, store adapter and HTTP peer transport
///
/// # Errors
///
/// Returns error if the transaction log cannot be opened
pub async fn build_executor(
    config: NodeConfig,
    peers: Vec<(NodeId, String)>,
    store: StoreChoice,
) -> Result<NodeExecutor, SetupError> {
    let log = TxnLog::for_node(&config.log_dir, &config.identity, config.rotation).await?;
    tracing::info!(path = %log.path().display(), "transaction log open");

    let connector: Arc<dyn StoreConnector> = match store {
        StoreChoice::Memory => Arc::new(MemoryConnector::new()),
        StoreChoice::Embedded(root) => Arc::new(EmbeddedConnector::new(root)),
    };
    let stores = DataStoreAdapter::new(connector).with_ports(config.store_ports.clone());

    let resolver = NodeResolver::new(config.port).with_overrides(peers);
    let transport = HttpTransport::new(resolver);

    Ok(NodeExecutor::new(
        config,
        Arc::new(log),
        Arc::new(stores),
        Arc::new(transport),
    ))
}
