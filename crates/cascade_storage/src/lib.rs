//! CASCADE Storage
//!
//! Data-store adapter used by the node executor. Backends are reached through
//! a [`StoreConnector`]; the [`DataStoreAdapter`] caches one handle per
//! `(store kind, address)` and verifies every write by reading it back.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapter;
pub mod backend;
pub mod embedded;
pub mod memory;

pub use adapter::{DataStoreAdapter, StoreHandle};
pub use backend::{StoreBackend, StoreConnector, StoreError};
pub use embedded::EmbeddedConnector;
pub use memory::{MemoryBackend, MemoryConnector};
