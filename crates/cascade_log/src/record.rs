//! Log record schema.
//!
//! One record per line: `tid,node,logged_time,entry_type,message`, with
//! RFC 4180 quoting for fields that contain separators or quotes.

use cascade_core::{NodeId, StoreKind, Timestamp, TxnId};
use serde::{Deserialize, Serialize};

/// Kind of log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    /// Node handled the transaction locally (logger node)
    Leaf,
    /// A synchronous data op completed
    Sync,
    /// An asynchronous data op was launched
    Async,
    /// The driver dispatched a transaction
    Dispatch,
}

impl EntryKind {
    /// Label written to the log
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Leaf => "Leaf",
            Self::Sync => "Sync",
            Self::Async => "Async",
            Self::Dispatch => "Dispatch",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "Leaf" => Some(Self::Leaf),
            "Sync" => Some(Self::Sync),
            "Async" => Some(Self::Async),
            "Dispatch" => Some(Self::Dispatch),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of a transaction log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Transaction id
    pub tid: String,
    /// Identity of the node (or driver) writing the record
    pub node: String,
    /// Wall clock time the record was produced
    pub logged_at: Timestamp,
    /// Entry kind
    pub kind: EntryKind,
    /// Free-form message (store kind for data ops, empty otherwise)
    pub message: String,
}

impl LogRecord {
    /// Create a record stamped with the current time
    #[must_use]
    pub fn new(tid: &TxnId, node: &NodeId, kind: EntryKind, message: impl Into<String>) -> Self {
        Self {
            tid: tid.to_string(),
            node: node.to_string(),
            logged_at: Timestamp::now(),
            kind,
            message: message.into(),
        }
    }

    /// Logger-node record
    #[must_use]
    pub fn leaf(tid: &TxnId, node: &NodeId) -> Self {
        Self::new(tid, node, EntryKind::Leaf, "")
    }

    /// Completed synchronous data op
    #[must_use]
    pub fn sync_op(tid: &TxnId, node: &NodeId, store: StoreKind) -> Self {
        Self::new(tid, node, EntryKind::Sync, store.wire_name())
    }

    /// Launched asynchronous data op
    #[must_use]
    pub fn async_op(tid: &TxnId, node: &NodeId, store: StoreKind) -> Self {
        Self::new(tid, node, EntryKind::Async, store.wire_name())
    }

    /// Driver dispatch
    #[must_use]
    pub fn dispatch(tid: &TxnId, sender: &NodeId) -> Self {
        Self::new(tid, sender, EntryKind::Dispatch, "")
    }

    /// Encode as one CSV line, including the trailing newline
    #[must_use]
    pub fn to_csv_line(&self) -> String {
        let logged_at = self.logged_at.to_string();
        let fields = [
            self.tid.as_str(),
            self.node.as_str(),
            logged_at.as_str(),
            self.kind.as_str(),
            self.message.as_str(),
        ];
        let mut line = String::with_capacity(64);
        for (i, field) in fields.iter().enumerate() {
            if i > 0 {
                line.push(',');
            }
            push_field(&mut line, field);
        }
        line.push('\n');
        line
    }

    /// Parse one CSV line as written by [`LogRecord::to_csv_line`]
    #[must_use]
    pub fn from_csv_line(line: &str) -> Option<Self> {
        let fields = split_fields(line.trim_end_matches(['\n', '\r']))?;
        let [tid, node, logged_at, kind, message]: [String; 5] = fields.try_into().ok()?;
        Some(Self {
            tid,
            node,
            logged_at: Timestamp::from_micros(logged_at.parse().ok()?),
            kind: EntryKind::parse(&kind)?,
            message,
        })
    }
}

fn push_field(out: &mut String, field: &str) {
    if field.contains([',', '"', '\n', '\r']) {
        out.push('"');
        out.push_str(&field.replace('"', "\"\""));
        out.push('"');
    } else {
        out.push_str(field);
    }
}

fn split_fields(line: &str) -> Option<Vec<String>> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars().peekable();
    let mut quoted = false;

    while let Some(c) = chars.next() {
        match (quoted, c) {
            (false, ',') => fields.push(std::mem::take(&mut current)),
            (false, '"') if current.is_empty() => quoted = true,
            (true, '"') => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    current.push('"');
                } else {
                    quoted = false;
                }
            }
            (_, c) => current.push(c),
        }
    }
    if quoted {
        return None;
    }
    fields.push(current);
    Some(fields)
}
