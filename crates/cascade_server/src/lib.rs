//! CASCADE Server
//!
//! Ingress HTTP server for one replay node, plus the wiring that turns a node
//! configuration into a running executor.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod node;

pub use api::ApiServer;
pub use node::{SetupError, StoreChoice, assign_identity, build_executor, load_config, parse_peer};
