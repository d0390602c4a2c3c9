//! Non-blocking dispatch of root transactions.
//!
//! Shards hand each send to a [`Dispatcher`] and return to their pacing loop
//! immediately. In pool mode a semaphore caps how many sends are in flight;
//! queued sends wait for a permit inside their own task, never in the shard.

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;

/// Port a starting node listens on, by declared node type
#[must_use]
pub fn ingress_port_for(node_type: &str) -> u16 {
    match node_type {
        "Redis" => 6379,
        "MongoDB" => 27017,
        "Postgres" => 5432,
        _ => 5000,
    }
}

/// How dispatches are executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// At most `workers` sends in flight
    Pool {
        /// Concurrency cap
        workers: usize,
    },
    /// Every send runs as soon as it is submitted
    Direct,
}

impl Default for DispatchMode {
    fn default() -> Self {
        Self::Pool { workers: 20 }
    }
}

/// Send errors
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The request could not be built
    #[error("invalid request to {address}: {reason}")]
    InvalidRequest {
        /// Destination
        address: String,
        /// Failure description
        reason: String,
    },
    /// Network failure
    #[error("request to {address} failed: {reason}")]
    Request {
        /// Destination
        address: String,
        /// Failure description
        reason: String,
    },
    /// Non-success response
    #[error("{address} returned status {status}")]
    Status {
        /// Destination
        address: String,
        /// HTTP status code
        status: u16,
    },
    /// No response in time
    #[error("request to {address} timed out after {after:?}")]
    Timeout {
        /// Destination
        address: String,
        /// Timeout that elapsed
        after: Duration,
    },
}

/// Delivers a payload to a node's ingress endpoint
#[async_trait]
pub trait DispatchSink: Send + Sync {
    /// POST `payload` to `address` (`host:port`)
    ///
    /// # Errors
    ///
    /// Returns error on network failure or non-success status
    async fn deliver(&self, address: &str, payload: Bytes) -> Result<(), SendError>;
}

/// Shared pooled HTTP client used by the driver
#[derive(Clone)]
pub struct HttpSink {
    client: Client<HttpConnector, Full<Bytes>>,
}

impl HttpSink {
    /// Create a sink with a fresh connection pool
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
        }
    }
}

impl Default for HttpSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DispatchSink for HttpSink {
    async fn deliver(&self, address: &str, payload: Bytes) -> Result<(), SendError> {
        let request = http::Request::builder()
            .method(http::Method::POST)
            .uri(format!("http://{}/", address))
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Full::new(payload))
            .map_err(|e| SendError::InvalidRequest {
                address: address.to_string(),
                reason: e.to_string(),
            })?;
        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| SendError::Request {
                address: address.to_string(),
                reason: e.to_string(),
            })?;
        if response.status() != http::StatusCode::OK {
            return Err(SendError::Status {
                address: address.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}

/// Runs submitted sends off the pacing path
#[derive(Debug, Clone)]
pub struct Dispatcher {
    permits: Option<Arc<Semaphore>>,
    tracker: TaskTracker,
}

impl Dispatcher {
    /// Create a dispatcher for `mode`
    #[must_use]
    pub fn new(mode: DispatchMode) -> Self {
        let permits = match mode {
            DispatchMode::Pool { workers } => Some(Arc::new(Semaphore::new(workers.max(1)))),
            DispatchMode::Direct => None,
        };
        Self {
            permits,
            tracker: TaskTracker::new(),
        }
    }

    /// Submit one send; returns immediately
    pub fn submit<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = self.permits.clone();
        self.tracker.spawn(async move {
            let _permit = match permits {
                Some(permits) => match permits.acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => return,
                },
                None => None,
            };
            job.await;
        });
    }

    /// Sends submitted but not yet finished
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for every submitted send
    pub async fn finish(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}
