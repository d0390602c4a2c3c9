//! Trace catalog.
//!
//! The catalog is a JSON object mapping transaction ids to trace packets. It
//! is loaded whole or not at all: one malformed entry rejects the file.

use cascade_core::{CoreError, StoreKind, Transaction, TxnId};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Catalog loading errors
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// The file could not be read
    #[error("failed to read catalog {path}: {source}")]
    Io {
        /// Catalog file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
    /// The document is not a JSON object of objects
    #[error("catalog is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    /// One entry failed validation
    #[error("catalog entry {key}: {source}")]
    Entry {
        /// Key of the offending entry
        key: String,
        /// Validation failure
        #[source]
        source: CoreError,
    },
    /// Two entries carry the same transaction id
    #[error("catalog entry {key}: transaction id {tid} already used by an earlier entry")]
    DuplicateTid {
        /// Key of the later entry
        key: String,
        /// Shared transaction id
        tid: TxnId,
    },
}

/// Read-only set of transactions to replay, in file order
#[derive(Debug, Clone, Default)]
pub struct TraceCatalog {
    entries: IndexMap<TxnId, Arc<Transaction>>,
}

impl TraceCatalog {
    /// Load a catalog file
    ///
    /// # Errors
    ///
    /// Returns error if the file is unreadable or any entry is malformed
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await.map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let catalog = Self::from_slice(&bytes)?;
        tracing::info!(path = %path.display(), transactions = catalog.len(), "loaded trace catalog");
        Ok(catalog)
    }

    /// Parse a catalog from JSON bytes
    ///
    /// # Errors
    ///
    /// Returns error if the document or any entry is malformed, or if two
    /// entries share a transaction id
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CatalogError> {
        let raw: IndexMap<String, Value> = serde_json::from_slice(bytes)?;
        let mut catalog = Self {
            entries: IndexMap::with_capacity(raw.len()),
        };
        for (key, value) in raw {
            let txn = Transaction::from_catalog_entry(&key, value)
                .map_err(|source| CatalogError::Entry { key: key.clone(), source })?;
            catalog.insert(key, txn)?;
        }
        Ok(catalog)
    }

    /// Parse a catalog from a JSON string
    ///
    /// # Errors
    ///
    /// Returns error if the document or any entry is malformed
    pub fn from_json_str(json: &str) -> Result<Self, CatalogError> {
        Self::from_slice(json.as_bytes())
    }

    /// Build a catalog from already-validated transactions
    ///
    /// # Errors
    ///
    /// Returns error if two transactions share an id
    pub fn from_transactions(txns: impl IntoIterator<Item = Transaction>) -> Result<Self, CatalogError> {
        let mut catalog = Self::default();
        for txn in txns {
            catalog.insert(txn.id().to_string(), txn)?;
        }
        Ok(catalog)
    }

    fn insert(&mut self, key: String, txn: Transaction) -> Result<(), CatalogError> {
        if self.entries.contains_key(txn.id()) {
            return Err(CatalogError::DuplicateTid {
                key,
                tid: txn.id().clone(),
            });
        }
        self.entries.insert(txn.id().clone(), Arc::new(txn));
        Ok(())
    }

    /// Number of transactions
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalog is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up one transaction
    #[must_use]
    pub fn get(&self, id: &TxnId) -> Option<&Arc<Transaction>> {
        self.entries.get(id)
    }

    /// Transactions in file order
    pub fn transactions(&self) -> impl Iterator<Item = &Arc<Transaction>> {
        self.entries.values()
    }

    /// Transactions the driver would actually send
    #[must_use]
    pub fn dispatchable(&self) -> usize {
        self.transactions()
            .filter(|t| t.starting_point().is_some())
            .count()
    }

    /// Aggregate figures for inspection
    #[must_use]
    pub fn summary(&self) -> CatalogSummary {
        let mut summary = CatalogSummary {
            transactions: self.len(),
            ..CatalogSummary::default()
        };
        for txn in self.transactions() {
            if let Some(start) = txn.starting_point() {
                summary.dispatchable += 1;
                *summary
                    .by_starting_node
                    .entry(start.node.to_string())
                    .or_default() += 1;
            }
            summary.calls += txn.node_calls().values().map(Vec::len).sum::<usize>();
            for op in txn.data_ops().values() {
                *summary.data_ops_by_store.entry(op.store_kind).or_default() += 1;
            }
        }
        summary
    }
}

/// Catalog statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CatalogSummary {
    /// Total transactions
    pub transactions: usize,
    /// Transactions with a usable starting node
    pub dispatchable: usize,
    /// Calls across every node of every transaction
    pub calls: usize,
    /// Dispatchable transactions per starting node
    pub by_starting_node: BTreeMap<String, usize>,
    /// Data ops per store kind
    pub data_ops_by_store: BTreeMap<StoreKind, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CATALOG: &str = r#"{
        "b": {
            "initial_node": "n1", "initial_node_type": "Python",
            "node_calls_dict": {"n1": [["n2", -1, 0], ["db1", 0, 1]]},
            "data_ops_dict": {"0": {"op_type": "write", "op_obj_id": "k", "db": "Redis"}}
        },
        "a": {"initial_node": "n1", "initial_node_type": "Python", "node_calls_dict": {"n1": [["n2", -1, 0]]}},
        "c": {"initial_node": 7, "initial_node_type": "Python"},
        "d": {"initial_node": "n3"}
    }"#;

    #[test]
    fn test_keeps_file_order_and_fills_tid() {
        let catalog = TraceCatalog::from_json_str(CATALOG).unwrap();
        let ids: Vec<_> = catalog.transactions().map(|t| t.id().to_string()).collect();
        assert_eq!(ids, vec!["b", "a", "c", "d"]);
        assert!(catalog.get(&TxnId::from("a")).is_some());
    }

    #[test]
    fn test_summary() {
        let summary = TraceCatalog::from_json_str(CATALOG).unwrap().summary();
        assert_eq!(summary.transactions, 4);
        assert_eq!(summary.dispatchable, 2);
        assert_eq!(summary.calls, 3);
        assert_eq!(summary.by_starting_node.get("n1"), Some(&2));
        assert_eq!(summary.data_ops_by_store.get(&StoreKind::KeyValue), Some(&1));
    }

    #[test]
    fn test_one_bad_entry_rejects_everything() {
        let err = TraceCatalog::from_json_str(
            r#"{"ok": {}, "bad": {"node_calls_dict": {"n1": [["db", 3, 0]]}}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, CatalogError::Entry { ref key, .. } if key == "bad"));
    }

    #[test]
    fn test_shared_tid_rejects_the_catalog() {
        let err = TraceCatalog::from_json_str(
            r#"{
                "k1": {"tid": "same", "initial_node": "n1", "initial_node_type": "Python"},
                "k2": {"tid": "same", "initial_node": "n2", "initial_node_type": "Python"}
            }"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CatalogError::DuplicateTid { ref key, ref tid } if key == "k2" && tid.as_str() == "same"
        ));

        // a key that matches another entry's explicit tid collides as well
        let err = TraceCatalog::from_json_str(r#"{"a": {}, "b": {"tid": "a"}}"#).unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateTid { ref key, .. } if key == "b"));
    }

    #[test]
    fn test_not_json() {
        assert!(matches!(
            TraceCatalog::from_json_str("[1, 2").unwrap_err(),
            CatalogError::Parse(_)
        ));
        assert!(matches!(
            TraceCatalog::from_json_str("[]").unwrap_err(),
            CatalogError::Parse(_)
        ));
    }

    #[tokio::test]
    async fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CATALOG.as_bytes()).unwrap();
        let catalog = TraceCatalog::load(file.path()).await.unwrap();
        assert_eq!(catalog.len(), 4);
        assert_eq!(catalog.dispatchable(), 2);

        let missing = TraceCatalog::load(file.path().with_extension("missing")).await;
        assert!(matches!(missing, Err(CatalogError::Io { .. })));
    }
}
