//! Node configuration.

use crate::latency::LatencyModel;
use crate::retry::RetryPolicy;
use crate::transport::DEFAULT_INGRESS_PORT;
use cascade_core::{NodeId, StoreKind};
use cascade_log::RotationPolicy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration of one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// This node's identity; empty until assigned
    pub identity: NodeId,
    /// Nodes that skip injected latency
    pub special_nodes: BTreeSet<NodeId>,
    /// Injected latency distribution
    pub latency: LatencyModel,
    /// Policy for synchronous forwards
    pub retry: RetryPolicy,
    /// Sync data ops slower than this get a warning
    pub slow_call_threshold: Duration,
    /// Longest forward chain accepted before refusing a transaction
    pub max_hops: u32,
    /// Ingress port of this and every peer node
    pub port: u16,
    /// Per-kind store port overrides
    pub store_ports: BTreeMap<StoreKind, u16>,
    /// Directory holding `<identity>_log.csv`
    pub log_dir: PathBuf,
    /// Log rotation
    pub rotation: RotationPolicy,
}

impl NodeConfig {
    /// Configuration for `identity` with everything else defaulted
    #[must_use]
    pub fn new(identity: impl Into<NodeId>) -> Self {
        Self {
            identity: identity.into(),
            ..Self::default()
        }
    }

    /// Set the special node set
    #[must_use]
    pub fn with_special_nodes(mut self, nodes: impl IntoIterator<Item = NodeId>) -> Self {
        self.special_nodes = nodes.into_iter().collect();
        self
    }

    /// Set the latency model
    #[must_use]
    pub fn with_latency(mut self, latency: LatencyModel) -> Self {
        self.latency = latency;
        self
    }

    /// Set the forward retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the slow-call threshold
    #[must_use]
    pub fn with_slow_call_threshold(mut self, threshold: Duration) -> Self {
        self.slow_call_threshold = threshold;
        self
    }

    /// Set the hop limit
    #[must_use]
    pub fn with_max_hops(mut self, max_hops: u32) -> Self {
        self.max_hops = max_hops;
        self
    }

    /// Set the ingress port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Override the port of one store kind
    #[must_use]
    pub fn with_store_port(mut self, kind: StoreKind, port: u16) -> Self {
        self.store_ports.insert(kind, port);
        self
    }

    /// Set the log directory
    #[must_use]
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self
    }

    /// Set log rotation
    #[must_use]
    pub fn with_rotation(mut self, rotation: RotationPolicy) -> Self {
        self.rotation = rotation;
        self
    }

    /// Whether this node skips injected latency
    #[must_use]
    pub fn is_special(&self) -> bool {
        self.special_nodes.contains(&self.identity)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            identity: NodeId::new(String::new()),
            special_nodes: BTreeSet::new(),
            latency: LatencyModel::default(),
            retry: RetryPolicy::default(),
            slow_call_threshold: Duration::from_millis(20),
            max_hops: 64,
            port: DEFAULT_INGRESS_PORT,
            store_ports: BTreeMap::new(),
            log_dir: PathBuf::from("./logs"),
            rotation: RotationPolicy::default(),
        }
    }
}
