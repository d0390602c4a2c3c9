//! CASCADE Replay
//!
//! Client side of a replay: the trace catalog, shard partitioning, rate-paced
//! dispatch of root transactions and the post-run status drain.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod catalog;
pub mod config;
pub mod dispatch;
pub mod driver;
pub mod shard;
pub mod status;

pub use catalog::{CatalogError, CatalogSummary, TraceCatalog};
pub use config::DriverConfig;
pub use dispatch::{DispatchMode, DispatchSink, Dispatcher, HttpSink, SendError, ingress_port_for};
pub use driver::{DriverError, RunReport, WorkloadDriver};
pub use shard::{partition, shard_interval};
pub use status::{DrainOutcome, HttpStatusProbe, StatusProbe, parse_alive_count, wait_for_idle};
