//! Backend and connector traits.

use async_trait::async_trait;
use cascade_core::StoreKind;
use std::sync::Arc;

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Establishing a connection failed
    #[error("failed to connect to {kind} at {address}: {reason}")]
    Connect {
        /// Store kind
        kind: StoreKind,
        /// Store address
        address: String,
        /// Failure description
        reason: String,
    },
    /// The backend rejected or failed an operation
    #[error("{kind} at {address} failed: {reason}")]
    Backend {
        /// Store kind
        kind: StoreKind,
        /// Store address
        address: String,
        /// Failure description
        reason: String,
    },
    /// Read-after-write returned something other than what was written
    #[error("write of {key} to {address} did not read back")]
    Verification {
        /// Store address
        address: String,
        /// Object key
        key: String,
    },
}

/// One established connection to a store
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Insert or replace the value stored under `key`
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails the write
    async fn upsert(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Fetch the value stored under `key`
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails the read
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
}

/// Opens backends by kind and address
#[async_trait]
pub trait StoreConnector: Send + Sync {
    /// Connect to the store of `kind` listening at `address`
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable
    async fn connect(
        &self,
        kind: StoreKind,
        address: &str,
    ) -> Result<Arc<dyn StoreBackend>, StoreError>;
}
