//! Connection-cached data-store adapter.

use crate::backend::{StoreBackend, StoreConnector, StoreError};
use cascade_core::{NodeId, StoreKind};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Cached connection to one store
#[derive(Clone)]
pub struct StoreHandle {
    kind: StoreKind,
    address: Arc<str>,
    backend: Arc<dyn StoreBackend>,
}

impl StoreHandle {
    /// Store kind
    #[must_use]
    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    /// Address the handle is connected to
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }
}

impl fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreHandle")
            .field("kind", &self.kind)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Data-store adapter shared by every execution on a node
///
/// Handles are cached per `(kind, address)`. The first connection to an
/// address is established under a guard so concurrent executions never open
/// duplicate connections.
pub struct DataStoreAdapter {
    connector: Arc<dyn StoreConnector>,
    ports: HashMap<StoreKind, u16>,
    handles: RwLock<HashMap<(StoreKind, String), StoreHandle>>,
    connect_guard: Mutex<()>,
}

impl DataStoreAdapter {
    /// Create an adapter using each store kind's default port
    #[must_use]
    pub fn new(connector: Arc<dyn StoreConnector>) -> Self {
        Self {
            connector,
            ports: StoreKind::ALL
                .iter()
                .map(|kind| (*kind, kind.default_port()))
                .collect(),
            handles: RwLock::new(HashMap::new()),
            connect_guard: Mutex::new(()),
        }
    }

    /// Override the port used for one store kind
    #[must_use]
    pub fn with_port(mut self, kind: StoreKind, port: u16) -> Self {
        self.ports.insert(kind, port);
        self
    }

    /// Override several ports at once
    #[must_use]
    pub fn with_ports(mut self, ports: impl IntoIterator<Item = (StoreKind, u16)>) -> Self {
        self.ports.extend(ports);
        self
    }

    /// Port the adapter uses for `kind`
    #[must_use]
    pub fn port(&self, kind: StoreKind) -> u16 {
        self.ports
            .get(&kind)
            .copied()
            .unwrap_or_else(|| kind.default_port())
    }

    /// Network address of the `kind` store hosted by `target`
    #[must_use]
    pub fn address_for(&self, kind: StoreKind, target: &NodeId) -> String {
        format!("{}:{}", target, self.port(kind))
    }

    /// Number of cached handles
    pub async fn cached(&self) -> usize {
        self.handles.read().await.len()
    }

    /// Return the cached handle for `(kind, address)`, connecting on first use
    ///
    /// # Errors
    ///
    /// Returns error if the first connection fails; nothing is cached then
    pub async fn connect_or_reuse(
        &self,
        kind: StoreKind,
        address: &str,
    ) -> Result<StoreHandle, StoreError> {
        let key = (kind, address.to_string());
        if let Some(handle) = self.handles.read().await.get(&key) {
            return Ok(handle.clone());
        }

        let _guard = self.connect_guard.lock().await;
        // Another execution may have connected while we waited.
        if let Some(handle) = self.handles.read().await.get(&key) {
            return Ok(handle.clone());
        }

        let backend = self.connector.connect(kind, address).await?;
        let handle = StoreHandle {
            kind,
            address: Arc::from(address),
            backend,
        };
        self.handles.write().await.insert(key, handle.clone());
        tracing::info!(%kind, address, "connected to data store");
        Ok(handle)
    }

    /// Upsert `value` under `key`, then read the key back to confirm it exists
    ///
    /// The read-back checks presence only; a concurrent writer to the same key
    /// may already have replaced `value`.
    ///
    /// # Errors
    ///
    /// Returns error if the write fails or the key does not read back
    pub async fn write(&self, handle: &StoreHandle, key: &str, value: &str) -> Result<(), StoreError> {
        handle.backend.upsert(key, value).await?;
        match handle.backend.get(key).await? {
            Some(_) => Ok(()),
            None => Err(StoreError::Verification {
                address: handle.address.to_string(),
                key: key.to_string(),
            }),
        }
    }

    /// Read the value stored under `key`
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails the read
    pub async fn read(&self, handle: &StoreHandle, key: &str) -> Result<Option<String>, StoreError> {
        handle.backend.get(key).await
    }
}

impl fmt::Debug for DataStoreAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataStoreAdapter")
            .field("ports", &self.ports)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedded::EmbeddedConnector;
    use crate::memory::MemoryConnector;
    use async_trait::async_trait;

    fn adapter() -> (DataStoreAdapter, MemoryConnector) {
        let connector = MemoryConnector::new();
        (DataStoreAdapter::new(Arc::new(connector.clone())), connector)
    }

    #[tokio::test]
    async fn test_write_then_read_returns_written_value() {
        let (adapter, _) = adapter();
        let handle = adapter
            .connect_or_reuse(StoreKind::KeyValue, "db1:6379")
            .await
            .unwrap();
        adapter.write(&handle, "obj", "v1").await.unwrap();
        assert_eq!(adapter.read(&handle, "obj").await.unwrap().as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn test_second_write_overwrites() {
        let (adapter, _) = adapter();
        let handle = adapter
            .connect_or_reuse(StoreKind::Document, "db1:27017")
            .await
            .unwrap();
        adapter.write(&handle, "obj", "v1").await.unwrap();
        adapter.write(&handle, "obj", "v2").await.unwrap();
        assert_eq!(adapter.read(&handle, "obj").await.unwrap().as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn test_read_missing_key_is_absent() {
        let (adapter, _) = adapter();
        let handle = adapter
            .connect_or_reuse(StoreKind::Relational, "db1:5432")
            .await
            .unwrap();
        assert!(adapter.read(&handle, "nothing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_first_connect_connects_once() {
        let (adapter, connector) = adapter();
        let adapter = Arc::new(adapter);
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let adapter = Arc::clone(&adapter);
            tasks.push(tokio::spawn(async move {
                adapter
                    .connect_or_reuse(StoreKind::KeyValue, "shared:6379")
                    .await
                    .unwrap()
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(connector.connect_count(), 1);
        assert_eq!(adapter.cached().await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_to_one_key_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = Arc::new(DataStoreAdapter::new(Arc::new(EmbeddedConnector::new(dir.path()))));
        let handle = adapter
            .connect_or_reuse(StoreKind::KeyValue, "db1:6379")
            .await
            .unwrap();

        let mut tasks = Vec::new();
        for i in 0..200 {
            let adapter = Arc::clone(&adapter);
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                adapter.write(&handle, "shared-object", &format!("v{}", i)).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        let last = adapter.read(&handle, "shared-object").await.unwrap().unwrap();
        assert!(last.starts_with('v'));
    }

    #[test]
    fn test_address_for_uses_port_overrides() {
        let (adapter, _) = adapter();
        let adapter = adapter.with_port(StoreKind::KeyValue, 16379);
        let target = NodeId::from("db7");
        assert_eq!(adapter.address_for(StoreKind::KeyValue, &target), "db7:16379");
        assert_eq!(adapter.address_for(StoreKind::Document, &target), "db7:27017");
        assert_eq!(adapter.address_for(StoreKind::Relational, &target), "db7:5432");
    }

    struct LossyBackend;

    #[async_trait]
    impl StoreBackend for LossyBackend {
        async fn upsert(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
            Ok(())
        }

        async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Ok(None)
        }
    }

    struct LossyConnector;

    #[async_trait]
    impl StoreConnector for LossyConnector {
        async fn connect(
            &self,
            _kind: StoreKind,
            _address: &str,
        ) -> Result<Arc<dyn StoreBackend>, StoreError> {
            Ok(Arc::new(LossyBackend))
        }
    }

    #[tokio::test]
    async fn test_write_that_does_not_read_back_fails() {
        let adapter = DataStoreAdapter::new(Arc::new(LossyConnector));
        let handle = adapter
            .connect_or_reuse(StoreKind::KeyValue, "lossy:6379")
            .await
            .unwrap();
        let err = adapter.write(&handle, "k", "v").await.unwrap_err();
        assert!(matches!(err, StoreError::Verification { .. }));
    }
}
