//! CASCADE Runtime
//!
//! Node-side execution of replayed transactions: latency injection, call-list
//! interpretation, data-store calls, retried forwards to peers and detached
//! async work.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod detached;
pub mod executor;
pub mod inflight;
pub mod latency;
pub mod retry;
pub mod transport;

pub use config::NodeConfig;
pub use detached::DetachedTasks;
pub use executor::{ExecState, ExecutionError, ExecutionReport, NodeExecutor, Trail};
pub use inflight::{InflightCounter, InflightGuard};
pub use latency::LatencyModel;
pub use retry::{ForwardOutcome, RetryPolicy, forward_with_retry};
pub use transport::{
    DEFAULT_INGRESS_PORT, HOPS_HEADER, HttpTransport, LOOP_DETECTED_STATUS, NodeResolver, NodeTransport,
    TransportError,
};
