//! Driver configuration.

use crate::dispatch::DispatchMode;
use cascade_core::NodeId;
use cascade_log::RotationPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Workload driver configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Target aggregate sends per second
    pub rate: f64,
    /// Concurrent pacing lanes
    pub shards: usize,
    /// Pool or direct dispatch
    pub dispatch: DispatchMode,
    /// Bound on each send
    pub request_timeout: Duration,
    /// Identity written to dispatch records
    pub sender: NodeId,
    /// Dispatch log file
    pub log_path: PathBuf,
    /// Dispatch log rotation
    pub rotation: RotationPolicy,
}

impl DriverConfig {
    /// Set the target rate
    #[must_use]
    pub fn with_rate(mut self, rate: f64) -> Self {
        self.rate = rate;
        self
    }

    /// Set the shard count
    #[must_use]
    pub fn with_shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }

    /// Set the dispatch mode
    #[must_use]
    pub fn with_dispatch(mut self, dispatch: DispatchMode) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Set the per-send timeout
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the sender identity
    #[must_use]
    pub fn with_sender(mut self, sender: impl Into<NodeId>) -> Self {
        self.sender = sender.into();
        self
    }

    /// Set the dispatch log path
    #[must_use]
    pub fn with_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = path.into();
        self
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            rate: 600.0,
            shards: 4,
            dispatch: DispatchMode::default(),
            request_timeout: Duration::from_secs(10),
            sender: NodeId::from("cascade_client"),
            log_path: PathBuf::from("./logs/client_log.csv"),
            rotation: RotationPolicy::default(),
        }
    }
}
