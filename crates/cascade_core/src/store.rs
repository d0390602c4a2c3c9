//! Data-store kinds and operation types.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Kind of backing data store a data operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StoreKind {
    /// Key-value store (Redis-like)
    KeyValue,
    /// Document store (MongoDB-like)
    Document,
    /// Relational store (Postgres-like)
    Relational,
}

impl StoreKind {
    /// All store kinds
    pub const ALL: [StoreKind; 3] = [Self::KeyValue, Self::Document, Self::Relational];

    /// Default network port for this kind of store
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::KeyValue => 6379,
            Self::Document => 27017,
            Self::Relational => 5432,
        }
    }

    /// Name used in trace payloads
    #[must_use]
    pub const fn wire_name(self) -> &'static str {
        match self {
            Self::KeyValue => "Redis",
            Self::Document => "MongoDB",
            Self::Relational => "Postgres",
        }
    }
}

impl std::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl FromStr for StoreKind {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "Redis" | "KeyValue" => Ok(Self::KeyValue),
            "MongoDB" | "Document" => Ok(Self::Document),
            "Postgres" | "Relational" => Ok(Self::Relational),
            other => Err(CoreError::UnknownStoreKind {
                name: other.to_string(),
            }),
        }
    }
}

/// Read or write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpType {
    /// Read an object by key
    Read,
    /// Upsert an object by key
    Write,
}

impl OpType {
    /// Name used in trace payloads
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

impl FromStr for OpType {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            other => Err(CoreError::UnknownOpType {
                name: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ports() {
        assert_eq!(StoreKind::KeyValue.default_port(), 6379);
        assert_eq!(StoreKind::Document.default_port(), 27017);
        assert_eq!(StoreKind::Relational.default_port(), 5432);
    }

    #[test]
    fn test_parse_both_spellings() {
        assert_eq!("Redis".parse::<StoreKind>().unwrap(), StoreKind::KeyValue);
        assert_eq!("Document".parse::<StoreKind>().unwrap(), StoreKind::Document);
        assert_eq!("Postgres".parse::<StoreKind>().unwrap(), StoreKind::Relational);
        assert!("Cassandra".parse::<StoreKind>().is_err());
    }

    #[test]
    fn test_op_type_parse() {
        assert_eq!("read".parse::<OpType>().unwrap(), OpType::Read);
        assert_eq!("write".parse::<OpType>().unwrap(), OpType::Write);
        assert_eq!(
            "delete".parse::<OpType>().unwrap_err(),
            CoreError::UnknownOpType {
                name: "delete".to_string()
            }
        );
    }
}
