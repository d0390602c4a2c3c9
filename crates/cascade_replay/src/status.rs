//! Post-run status drain.
//!
//! After the last dispatch, nodes may still be working through forwarded
//! transactions. The driver polls each node's `/status` endpoint until it
//! reports no live executions.

use async_trait::async_trait;
use bytes::Bytes;
use cascade_core::NodeId;
use http_body_util::{BodyExt, Empty};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;

static ALIVE_COUNT: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"Alive request count: (\d+)").ok());

/// Extract the live execution count from a `/status` body
#[must_use]
pub fn parse_alive_count(body: &str) -> Option<u64> {
    ALIVE_COUNT
        .as_ref()?
        .captures(body)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Source of a node's live execution count
#[async_trait]
pub trait StatusProbe: Send + Sync {
    /// Live executions at `node`; `None` if the reply had no count
    ///
    /// # Errors
    ///
    /// Returns a description of the failure if the node cannot be queried
    async fn alive(&self, node: &NodeId) -> Result<Option<u64>, String>;
}

/// Queries `http://<node>:<port>/status`
#[derive(Clone)]
pub struct HttpStatusProbe {
    client: Client<HttpConnector, Empty<Bytes>>,
    port: u16,
}

impl HttpStatusProbe {
    /// Probe nodes on `port`
    #[must_use]
    pub fn new(port: u16) -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
            port,
        }
    }
}

#[async_trait]
impl StatusProbe for HttpStatusProbe {
    async fn alive(&self, node: &NodeId) -> Result<Option<u64>, String> {
        let uri: http::Uri = format!("http://{}:{}/status", node, self.port)
            .parse()
            .map_err(|e: http::uri::InvalidUri| e.to_string())?;
        let response = self.client.get(uri).await.map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("status {}", response.status()));
        }
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| e.to_string())?
            .to_bytes();
        Ok(parse_alive_count(&String::from_utf8_lossy(&body)))
    }
}

/// How one node's drain ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Reported zero live executions
    Idle,
    /// Could not be queried; skipped
    Unreachable(String),
    /// Still busy when the deadline passed
    TimedOut {
        /// Last reported count
        alive: u64,
    },
}

/// Poll every node in turn until it is idle, unreachable, or `deadline` passes
pub async fn wait_for_idle(
    probe: &dyn StatusProbe,
    nodes: &[NodeId],
    poll_interval: Duration,
    deadline: Duration,
) -> Vec<(NodeId, DrainOutcome)> {
    let give_up = tokio::time::Instant::now() + deadline;
    let mut outcomes = Vec::with_capacity(nodes.len());

    for node in nodes {
        let outcome = loop {
            match probe.alive(node).await {
                Err(reason) => {
                    tracing::warn!(%node, error = %reason, "status query failed");
                    break DrainOutcome::Unreachable(reason);
                }
                Ok(Some(0)) => break DrainOutcome::Idle,
                Ok(alive) => {
                    let alive = alive.unwrap_or(0);
                    if alive > 0 {
                        tracing::info!(%node, alive, "node still has live requests");
                    }
                    if tokio::time::Instant::now() >= give_up {
                        break DrainOutcome::TimedOut { alive };
                    }
                }
            }
            tokio::time::sleep(poll_interval).await;
        };
        outcomes.push((node.clone(), outcome));
    }
    outcomes
}
