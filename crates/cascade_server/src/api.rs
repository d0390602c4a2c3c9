//! Ingress API.
//!
//! `/` accepts one trace packet and executes it at this node before replying.
//! `/status` reports how many executions are live, in the literal form
//! `Alive request count: <N>` that monitoring scrapes.

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use bytes::Bytes;
use cascade_core::Transaction;
use cascade_runtime::{ExecutionError, HOPS_HEADER, NodeExecutor};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// HTTP front of one node
#[derive(Clone)]
pub struct ApiServer {
    executor: NodeExecutor,
}

impl ApiServer {
    /// Serve `executor`
    #[must_use]
    pub fn new(executor: NodeExecutor) -> Self {
        Self { executor }
    }

    /// Executor behind the routes
    #[must_use]
    pub fn executor(&self) -> &NodeExecutor {
        &self.executor
    }

    /// Routes with request tracing attached
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(ingest).post(ingest))
            .route("/status", get(status))
            .layer(TraceLayer::new_for_http())
            .with_state(self.executor.clone())
    }

    /// Accept connections on `listener` until `shutdown` resolves
    ///
    /// # Errors
    ///
    /// Returns error if the listener fails
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(%addr, node = %self.executor.identity(), "ingress listening");
        }
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
    }
}

/// Hop count carried by a forwarded request; 0 when absent
fn hop_count(headers: &HeaderMap) -> Result<u32, String> {
    match headers.get(HOPS_HEADER) {
        None => Ok(0),
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .ok_or_else(|| format!("bad {} header", HOPS_HEADER)),
    }
}

/// A hop-limit refusal anywhere below keeps its 508 on the way up
fn failure_status(err: &ExecutionError) -> StatusCode {
    match err {
        ExecutionError::HopLimit { .. } => StatusCode::LOOP_DETECTED,
        ExecutionError::Forward { .. } if err.is_loop() => StatusCode::LOOP_DETECTED,
        ExecutionError::Transaction(_) => StatusCode::BAD_REQUEST,
        ExecutionError::DataOp { .. } | ExecutionError::Forward { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn ingest(
    State(executor): State<NodeExecutor>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, String) {
    let hops = match hop_count(&headers) {
        Ok(hops) => hops,
        Err(reason) => return (StatusCode::BAD_REQUEST, format!("invalid request: {}\n", reason)),
    };
    let txn = match Transaction::from_slice(&body) {
        Ok(txn) => Arc::new(txn),
        Err(err) => {
            tracing::warn!(node = %executor.identity(), error = %err, "rejected trace packet");
            return (StatusCode::BAD_REQUEST, format!("invalid request: {}\n", err));
        }
    };

    // Run detached from the connection so a caller hanging up does not cut
    // the call list short.
    let task = tokio::spawn(async move { executor.execute(txn, hops).await });
    match task.await {
        Ok(Ok(report)) => {
            tracing::debug!(tid = %report.tid, calls = report.calls, trail = %report.trail, "executed");
            (StatusCode::OK, "ok\n".to_string())
        }
        Ok(Err(err)) => (
            failure_status(&err),
            format!("Error processing trace packet: {}\n", err),
        ),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Error processing trace packet: {}\n", err),
        ),
    }
}

async fn status(State(executor): State<NodeExecutor>) -> String {
    format!("Alive request count: {}\n", executor.inflight().current())
}
