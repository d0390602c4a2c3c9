//! Peer transport.
//!
//! Forwards a serialized transaction to another node's ingress endpoint. The
//! HTTP implementation shares one pooled client across every execution.

use async_trait::async_trait;
use bytes::Bytes;
use cascade_core::NodeId;
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use std::collections::HashMap;
use std::time::Duration;

/// Header carrying how many forwards led to the current request
pub const HOPS_HEADER: &str = "x-cascade-hops";

/// Status a node answers with when it refuses a transaction at its hop limit
pub const LOOP_DETECTED_STATUS: u16 = 508;

/// Default ingress port of every node
pub const DEFAULT_INGRESS_PORT: u16 = 5000;

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The request could not be built
    #[error("invalid request to {target}: {reason}")]
    InvalidRequest {
        /// Destination node
        target: NodeId,
        /// Failure description
        reason: String,
    },
    /// Connecting or exchanging the request failed
    #[error("request to {target} failed: {reason}")]
    Request {
        /// Destination node
        target: NodeId,
        /// Failure description
        reason: String,
    },
    /// The peer answered with a non-success status
    #[error("{target} returned status {status}: {body}")]
    Status {
        /// Destination node
        target: NodeId,
        /// HTTP status code
        status: u16,
        /// Response body, trimmed
        body: String,
    },
    /// No answer within the attempt timeout
    #[error("request to {target} timed out after {after:?}")]
    Timeout {
        /// Destination node
        target: NodeId,
        /// Timeout that elapsed
        after: Duration,
    },
}

impl TransportError {
    /// Whether the peer refused the transaction for exceeding its hop limit
    ///
    /// A refusal is deterministic; resending the same payload is refused again.
    #[must_use]
    pub fn is_loop_refusal(&self) -> bool {
        matches!(self, Self::Status { status, .. } if *status == LOOP_DETECTED_STATUS)
    }
}

/// Sends transactions to peer nodes
#[async_trait]
pub trait NodeTransport: Send + Sync {
    /// Deliver `payload` to `target`; `Ok` means the peer acknowledged success
    ///
    /// # Errors
    ///
    /// Returns error on any network failure or non-success response
    async fn send(&self, target: &NodeId, payload: Bytes, hops: u32) -> Result<(), TransportError>;
}

/// Maps logical node ids to `host:port`
#[derive(Debug, Clone)]
pub struct NodeResolver {
    port: u16,
    overrides: HashMap<NodeId, String>,
}

impl NodeResolver {
    /// Resolve every node as `<node_id>:<port>`
    #[must_use]
    pub fn new(port: u16) -> Self {
        Self {
            port,
            overrides: HashMap::new(),
        }
    }

    /// Pin `node` to an explicit address
    #[must_use]
    pub fn with_override(mut self, node: NodeId, address: impl Into<String>) -> Self {
        self.overrides.insert(node, address.into());
        self
    }

    /// Pin several nodes at once
    #[must_use]
    pub fn with_overrides(mut self, overrides: impl IntoIterator<Item = (NodeId, String)>) -> Self {
        self.overrides.extend(overrides);
        self
    }

    /// Address of `node`
    #[must_use]
    pub fn resolve(&self, node: &NodeId) -> String {
        self.overrides
            .get(node)
            .cloned()
            .unwrap_or_else(|| format!("{}:{}", node, self.port))
    }
}

impl Default for NodeResolver {
    fn default() -> Self {
        Self::new(DEFAULT_INGRESS_PORT)
    }
}

/// HTTP/1.1 transport over a pooled hyper client
#[derive(Clone)]
pub struct HttpTransport {
    client: Client<HttpConnector, Full<Bytes>>,
    resolver: NodeResolver,
}

impl HttpTransport {
    /// Create a transport resolving peers with `resolver`
    #[must_use]
    pub fn new(resolver: NodeResolver) -> Self {
        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .build_http();
        Self { client, resolver }
    }

    /// Resolver in use
    #[must_use]
    pub fn resolver(&self) -> &NodeResolver {
        &self.resolver
    }
}

#[async_trait]
impl NodeTransport for HttpTransport {
    async fn send(&self, target: &NodeId, payload: Bytes, hops: u32) -> Result<(), TransportError> {
        let uri = format!("http://{}/", self.resolver.resolve(target));
        let request = http::Request::builder()
            .method(http::Method::POST)
            .uri(uri)
            .header(http::header::CONTENT_TYPE, "application/json")
            .header(HOPS_HEADER, hops.to_string())
            .body(Full::new(payload))
            .map_err(|e| TransportError::InvalidRequest {
                target: target.clone(),
                reason: e.to_string(),
            })?;

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| TransportError::Request {
                target: target.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status == http::StatusCode::OK {
            return Ok(());
        }

        let body = match response.into_body().collect().await {
            Ok(collected) => String::from_utf8_lossy(&collected.to_bytes()).trim().to_string(),
            Err(_) => String::new(),
        };
        Err(TransportError::Status {
            target: target.clone(),
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolver_default_and_override() {
        let resolver = NodeResolver::default()
            .with_override(NodeId::from("n2"), "127.0.0.1:5002");
        assert_eq!(resolver.resolve(&NodeId::from("n1")), "n1:5000");
        assert_eq!(resolver.resolve(&NodeId::from("n2")), "127.0.0.1:5002");
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_request_error() {
        // Port 9 on localhost refuses connections on any sane test host.
        let transport = HttpTransport::new(
            NodeResolver::default().with_override(NodeId::from("gone"), "127.0.0.1:9"),
        );
        let err = transport
            .send(&NodeId::from("gone"), Bytes::from_static(b"{}"), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Request { .. }));
    }
}
