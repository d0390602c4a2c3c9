//! In-process backend.
//!
//! Every address maps to one shared map, so two connections to the same
//! address observe each other's writes.

use crate::backend::{StoreBackend, StoreConnector, StoreError};
use async_trait::async_trait;
use cascade_core::StoreKind;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Object map behind one address
#[derive(Debug, Default)]
pub struct MemoryBackend {
    objects: RwLock<HashMap<String, String>>,
}

impl MemoryBackend {
    /// Number of stored objects
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    /// Whether nothing is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    async fn upsert(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut objects = self.objects.write().map_err(|_| poisoned())?;
        objects.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let objects = self.objects.read().map_err(|_| poisoned())?;
        Ok(objects.get(key).cloned())
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend {
        kind: StoreKind::KeyValue,
        address: "memory".to_string(),
        reason: "lock poisoned".to_string(),
    }
}

/// Connector handing out [`MemoryBackend`]s
#[derive(Debug, Default, Clone)]
pub struct MemoryConnector {
    stores: Arc<Mutex<HashMap<(StoreKind, String), Arc<MemoryBackend>>>>,
    connects: Arc<AtomicUsize>,
}

impl MemoryConnector {
    /// Create an empty connector
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times [`StoreConnector::connect`] was called
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Backend for an address, if anything connected to it
    #[must_use]
    pub fn backend(&self, kind: StoreKind, address: &str) -> Option<Arc<MemoryBackend>> {
        let stores = self.stores.lock().ok()?;
        stores.get(&(kind, address.to_string())).cloned()
    }
}

#[async_trait]
impl StoreConnector for MemoryConnector {
    async fn connect(
        &self,
        kind: StoreKind,
        address: &str,
    ) -> Result<Arc<dyn StoreBackend>, StoreError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let mut stores = self.stores.lock().map_err(|_| StoreError::Connect {
            kind,
            address: address.to_string(),
            reason: "lock poisoned".to_string(),
        })?;
        let backend: Arc<dyn StoreBackend> = stores
            .entry((kind, address.to_string()))
            .or_default()
            .clone();
        Ok(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_address_shares_objects() {
        let connector = MemoryConnector::new();
        let a = connector.connect(StoreKind::KeyValue, "db:6379").await.unwrap();
        let b = connector.connect(StoreKind::KeyValue, "db:6379").await.unwrap();
        a.upsert("k", "v").await.unwrap();
        assert_eq!(b.get("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_kinds_are_isolated() {
        let connector = MemoryConnector::new();
        let kv = connector.connect(StoreKind::KeyValue, "db").await.unwrap();
        let doc = connector.connect(StoreKind::Document, "db").await.unwrap();
        kv.upsert("k", "v").await.unwrap();
        assert!(doc.get("k").await.unwrap().is_none());
        assert_eq!(connector.backend(StoreKind::KeyValue, "db").unwrap().len(), 1);
    }
}
