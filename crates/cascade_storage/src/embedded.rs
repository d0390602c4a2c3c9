//! Embedded backend on redb.
//!
//! Each `(kind, address)` pair gets its own database file under a root
//! directory, so a single host can stand in for every store a trace names.
//! redb is synchronous; all calls run on the blocking pool.

use crate::backend::{StoreBackend, StoreConnector, StoreError};
use async_trait::async_trait;
use cascade_core::StoreKind;
use redb::{Database, TableDefinition};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const OBJECTS: TableDefinition<&str, &str> = TableDefinition::new("objects");

/// Connector opening one redb file per store address
#[derive(Debug, Clone)]
pub struct EmbeddedConnector {
    root: PathBuf,
}

impl EmbeddedConnector {
    /// Create a connector storing databases under `root`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Database file backing `address`
    #[must_use]
    pub fn database_path(&self, kind: StoreKind, address: &str) -> PathBuf {
        let sanitized: String = address
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
            .collect();
        self.root
            .join(format!("{}-{}.redb", kind.wire_name().to_lowercase(), sanitized))
    }
}

#[async_trait]
impl StoreConnector for EmbeddedConnector {
    async fn connect(
        &self,
        kind: StoreKind,
        address: &str,
    ) -> Result<Arc<dyn StoreBackend>, StoreError> {
        let path = self.database_path(kind, address);
        let root = self.root.clone();
        let connect_err = |reason: String| StoreError::Connect {
            kind,
            address: address.to_string(),
            reason,
        };

        let db = tokio::task::spawn_blocking(move || open_database(&root, &path))
            .await
            .map_err(|e| connect_err(e.to_string()))?
            .map_err(connect_err)?;

        tracing::debug!(%kind, address, "opened embedded store");
        Ok(Arc::new(EmbeddedBackend {
            kind,
            address: address.to_string(),
            db: Arc::new(db),
        }))
    }
}

fn open_database(root: &Path, path: &Path) -> Result<Database, String> {
    std::fs::create_dir_all(root).map_err(|e| e.to_string())?;
    let db = Database::create(path).map_err(|e| e.to_string())?;
    // Create the table up front so readers never see it missing.
    let txn = db.begin_write().map_err(|e| e.to_string())?;
    txn.open_table(OBJECTS).map_err(|e| e.to_string())?;
    txn.commit().map_err(|e| e.to_string())?;
    Ok(db)
}

struct EmbeddedBackend {
    kind: StoreKind,
    address: String,
    db: Arc<Database>,
}

impl EmbeddedBackend {
    fn failed(&self, reason: impl ToString) -> StoreError {
        StoreError::Backend {
            kind: self.kind,
            address: self.address.clone(),
            reason: reason.to_string(),
        }
    }
}

fn put(db: &Database, key: &str, value: &str) -> Result<(), redb::Error> {
    let txn = db.begin_write()?;
    {
        let mut table = txn.open_table(OBJECTS)?;
        table.insert(key, value)?;
    }
    txn.commit()?;
    Ok(())
}

fn fetch(db: &Database, key: &str) -> Result<Option<String>, redb::Error> {
    let txn = db.begin_read()?;
    let table = txn.open_table(OBJECTS)?;
    let value = table.get(key)?.map(|v| v.value().to_string());
    Ok(value)
}

#[async_trait]
impl StoreBackend for EmbeddedBackend {
    async fn upsert(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let db = Arc::clone(&self.db);
        let (key, value) = (key.to_string(), value.to_string());
        tokio::task::spawn_blocking(move || put(&db, &key, &value))
            .await
            .map_err(|e| self.failed(e))?
            .map_err(|e| self.failed(e))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let db = Arc::clone(&self.db);
        let key = key.to_string();
        tokio::task::spawn_blocking(move || fetch(&db, &key))
            .await
            .map_err(|e| self.failed(e))?
            .map_err(|e| self.failed(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_path_is_sanitized() {
        let connector = EmbeddedConnector::new("/data");
        let path = connector.database_path(StoreKind::Document, "mongo-1:27017");
        assert_eq!(path, PathBuf::from("/data/mongodb-mongo-1_27017.redb"));
    }

    #[tokio::test]
    async fn test_upsert_get_and_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let connector = EmbeddedConnector::new(dir.path());
        let store = connector
            .connect(StoreKind::Relational, "pg:5432")
            .await
            .unwrap();

        assert!(store.get("k1").await.unwrap().is_none());
        store.upsert("k1", "first").await.unwrap();
        assert_eq!(store.get("k1").await.unwrap().as_deref(), Some("first"));
        store.upsert("k1", "second").await.unwrap();
        assert_eq!(store.get("k1").await.unwrap().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_data_survives_reconnect() {
        let dir = tempfile::tempdir().unwrap();
        let connector = EmbeddedConnector::new(dir.path());
        {
            let store = connector.connect(StoreKind::KeyValue, "r:6379").await.unwrap();
            store.upsert("k", "v").await.unwrap();
        }
        let store = connector.connect(StoreKind::KeyValue, "r:6379").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    }
}
