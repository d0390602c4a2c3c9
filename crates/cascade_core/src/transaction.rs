//! Transactions (trace packets) and their call graphs.
//!
//! A [`Transaction`] is decoded and validated once, at the edge. After that it
//! is immutable and shared read-only (usually behind an `Arc`) by every
//! concurrent execution that touches it.

use crate::error::{CoreError, CoreResult};
use crate::id::{DataOpId, NodeId, TxnId};
use crate::store::{OpType, StoreKind};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A data-store operation referenced by one or more calls
#[derive(Debug, Clone, PartialEq)]
pub struct DataOp {
    /// Read or write
    pub op_type: OpType,
    /// Key of the object being read or written
    pub object_id: String,
    /// Which kind of store serves this op
    pub store_kind: StoreKind,
    /// Declared object size, carried through untouched
    pub object_size: Option<Value>,
}

/// What a call does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallAction {
    /// Forward the whole transaction to the target node
    Forward,
    /// Run a data operation against the store hosted at the target
    DataOp(DataOpId),
}

/// Whether the caller waits for the callee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallMode {
    /// Caller waits for completion before continuing its call list
    Sync,
    /// Fire-and-forget
    Async,
}

impl CallMode {
    /// True for [`CallMode::Async`]
    #[must_use]
    pub const fn is_async(self) -> bool {
        matches!(self, Self::Async)
    }
}

/// One edge in a node's call list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    /// Node being called (for data ops, the host of the store)
    pub target: NodeId,
    /// Forward or data op
    pub action: CallAction,
    /// Sync or async
    pub mode: CallMode,
}

impl Call {
    /// A forward call
    #[must_use]
    pub fn forward(target: impl Into<NodeId>, mode: CallMode) -> Self {
        Self {
            target: target.into(),
            action: CallAction::Forward,
            mode,
        }
    }

    /// A data-op call
    #[must_use]
    pub fn data_op(target: impl Into<NodeId>, op: DataOpId, mode: CallMode) -> Self {
        Self {
            target: target.into(),
            action: CallAction::DataOp(op),
            mode,
        }
    }
}

/// Where the driver delivers a transaction first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartingPoint {
    /// Node that starts the transaction
    pub node: NodeId,
    /// Declared type of that node (e.g. "Python")
    pub node_type: String,
}

/// A validated, immutable trace packet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "wire::WireTransaction", into = "wire::WireTransaction")]
pub struct Transaction {
    id: TxnId,
    node_calls: IndexMap<NodeId, Vec<Call>>,
    data_ops: IndexMap<DataOpId, DataOp>,
    logger_nodes: IndexSet<NodeId>,
    initial_node: Option<Value>,
    initial_node_type: Option<Value>,
}

impl Transaction {
    /// Build a transaction, checking that every data-op call resolves
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnresolvedDataOp`] if a call names an op id that
    /// `data_ops` does not contain.
    pub fn new(
        id: TxnId,
        node_calls: IndexMap<NodeId, Vec<Call>>,
        data_ops: IndexMap<DataOpId, DataOp>,
        logger_nodes: IndexSet<NodeId>,
    ) -> CoreResult<Self> {
        for call in node_calls.values().flatten() {
            if let CallAction::DataOp(op) = call.action {
                if !data_ops.contains_key(&op) {
                    return Err(CoreError::UnresolvedDataOp {
                        tid: id.to_string(),
                        op_id: i64::from(op.as_u32()),
                    });
                }
            }
        }
        Ok(Self {
            id,
            node_calls,
            data_ops,
            logger_nodes,
            initial_node: None,
            initial_node_type: None,
        })
    }

    /// Set the starting node and its type
    #[must_use]
    pub fn with_starting_point(mut self, node: &NodeId, node_type: &str) -> Self {
        self.initial_node = Some(Value::String(node.to_string()));
        self.initial_node_type = Some(Value::String(node_type.to_string()));
        self
    }

    /// Decode and validate a JSON payload
    ///
    /// # Errors
    ///
    /// Returns error if the payload is not a well-formed transaction
    pub fn from_slice(bytes: &[u8]) -> CoreResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Decode a catalog entry, using `key` as the id if the entry has no `tid`
    ///
    /// # Errors
    ///
    /// Returns error if the entry is not a well-formed transaction
    pub fn from_catalog_entry(key: &str, mut value: Value) -> CoreResult<Self> {
        if let Value::Object(map) = &mut value {
            map.entry("tid")
                .or_insert_with(|| Value::String(key.to_string()));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Encode to the self-describing JSON payload
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json_bytes(&self) -> CoreResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Transaction id
    #[must_use]
    pub fn id(&self) -> &TxnId {
        &self.id
    }

    /// Call list for `node`; empty when the node is a leaf for this transaction
    #[must_use]
    pub fn calls_for(&self, node: &NodeId) -> &[Call] {
        self.node_calls.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All call lists
    #[must_use]
    pub fn node_calls(&self) -> &IndexMap<NodeId, Vec<Call>> {
        &self.node_calls
    }

    /// Resolve a data op
    #[must_use]
    pub fn data_op(&self, id: DataOpId) -> Option<&DataOp> {
        self.data_ops.get(&id)
    }

    /// All data ops
    #[must_use]
    pub fn data_ops(&self) -> &IndexMap<DataOpId, DataOp> {
        &self.data_ops
    }

    /// Whether `node` must append a log record for this transaction
    #[must_use]
    pub fn is_logger(&self, node: &NodeId) -> bool {
        self.logger_nodes.contains(node)
    }

    /// Starting node and type, if both are present and are strings
    #[must_use]
    pub fn starting_point(&self) -> Option<StartingPoint> {
        match (&self.initial_node, &self.initial_node_type) {
            (Some(Value::String(node)), Some(Value::String(node_type))) => Some(StartingPoint {
                node: NodeId::new(node.clone()),
                node_type: node_type.clone(),
            }),
            _ => None,
        }
    }
}

mod wire {
    //! JSON shape of a trace packet.

    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub(super) struct WireTransaction {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tid: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        initial_node: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        initial_node_type: Option<Value>,
        #[serde(default, rename = "node_calls_dict")]
        node_calls: IndexMap<String, Vec<WireCall>>,
        #[serde(default, rename = "data_ops_dict")]
        data_ops: IndexMap<String, WireDataOp>,
        #[serde(default)]
        logger_nodes: Vec<String>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub(super) struct WireDataOp {
        op_type: String,
        op_obj_id: String,
        db: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        op_obj_size: Option<Value>,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(untagged)]
    enum AsyncFlag {
        Bool(bool),
        Int(i64),
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(untagged)]
    enum WireCallRepr {
        Full(String, i64, AsyncFlag),
        Short(String, i64),
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(try_from = "WireCallRepr", into = "(String, i64, u8)")]
    pub(super) struct WireCall {
        target: String,
        op_id: i64,
        is_async: bool,
    }

    impl TryFrom<WireCallRepr> for WireCall {
        type Error = String;

        fn try_from(repr: WireCallRepr) -> Result<Self, String> {
            let (target, op_id, flag) = match repr {
                WireCallRepr::Full(target, op_id, flag) => (target, op_id, flag),
                WireCallRepr::Short(target, op_id) => (target, op_id, AsyncFlag::Int(0)),
            };
            let is_async = match flag {
                AsyncFlag::Bool(b) => b,
                AsyncFlag::Int(0) => false,
                AsyncFlag::Int(1) => true,
                AsyncFlag::Int(other) => return Err(format!("invalid async flag {}", other)),
            };
            Ok(Self {
                target,
                op_id,
                is_async,
            })
        }
    }

    impl From<WireCall> for (String, i64, u8) {
        fn from(call: WireCall) -> Self {
            (call.target, call.op_id, u8::from(call.is_async))
        }
    }

    impl TryFrom<WireTransaction> for Transaction {
        type Error = CoreError;

        fn try_from(wire: WireTransaction) -> CoreResult<Self> {
            let tid = wire.tid.ok_or_else(|| CoreError::MissingField {
                field: "tid".to_string(),
            })?;

            let mut data_ops = IndexMap::with_capacity(wire.data_ops.len());
            for (key, op) in wire.data_ops {
                let raw: u32 = key.parse().map_err(|_| {
                    CoreError::malformed(&tid, format!("data op id {:?} is not an integer", key))
                })?;
                let op_type = op
                    .op_type
                    .parse::<OpType>()
                    .map_err(|e: CoreError| CoreError::malformed(&tid, e.to_string()))?;
                let store_kind = op
                    .db
                    .parse::<StoreKind>()
                    .map_err(|e: CoreError| CoreError::malformed(&tid, e.to_string()))?;
                data_ops.insert(
                    DataOpId::from_raw(raw),
                    DataOp {
                        op_type,
                        object_id: op.op_obj_id,
                        store_kind,
                        object_size: op.op_obj_size,
                    },
                );
            }

            let mut node_calls = IndexMap::with_capacity(wire.node_calls.len());
            for (node, calls) in wire.node_calls {
                let mut decoded = Vec::with_capacity(calls.len());
                for call in calls {
                    let action = match call.op_id {
                        DataOpId::FORWARD_SENTINEL => CallAction::Forward,
                        raw if raw >= 0 => {
                            let id = u32::try_from(raw)
                                .map(DataOpId::from_raw)
                                .map_err(|_| CoreError::UnresolvedDataOp {
                                    tid: tid.clone(),
                                    op_id: raw,
                                })?;
                            CallAction::DataOp(id)
                        }
                        raw => {
                            return Err(CoreError::malformed(
                                &tid,
                                format!("negative data op id {}", raw),
                            ));
                        }
                    };
                    let mode = if call.is_async {
                        CallMode::Async
                    } else {
                        CallMode::Sync
                    };
                    decoded.push(Call {
                        target: NodeId::new(call.target),
                        action,
                        mode,
                    });
                }
                node_calls.insert(NodeId::new(node), decoded);
            }

            let logger_nodes = wire.logger_nodes.into_iter().map(NodeId::new).collect();
            let mut txn = Transaction::new(TxnId::new(tid), node_calls, data_ops, logger_nodes)?;
            txn.initial_node = wire.initial_node;
            txn.initial_node_type = wire.initial_node_type;
            Ok(txn)
        }
    }

    impl From<Transaction> for WireTransaction {
        fn from(txn: Transaction) -> Self {
            let node_calls = txn
                .node_calls
                .into_iter()
                .map(|(node, calls)| {
                    let calls = calls
                        .into_iter()
                        .map(|call| WireCall {
                            target: call.target.to_string(),
                            op_id: match call.action {
                                CallAction::Forward => DataOpId::FORWARD_SENTINEL,
                                CallAction::DataOp(id) => i64::from(id.as_u32()),
                            },
                            is_async: call.mode.is_async(),
                        })
                        .collect();
                    (node.to_string(), calls)
                })
                .collect();
            let data_ops = txn
                .data_ops
                .into_iter()
                .map(|(id, op)| {
                    (
                        id.to_string(),
                        WireDataOp {
                            op_type: op.op_type.as_str().to_string(),
                            op_obj_id: op.object_id,
                            db: op.store_kind.wire_name().to_string(),
                            op_obj_size: op.object_size,
                        },
                    )
                })
                .collect();
            Self {
                tid: Some(txn.id.to_string()),
                initial_node: txn.initial_node,
                initial_node_type: txn.initial_node_type,
                node_calls,
                data_ops,
                logger_nodes: txn.logger_nodes.into_iter().map(|n| n.to_string()).collect(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "tid": "a",
            "initial_node": "n1",
            "initial_node_type": "Python",
            "node_calls_dict": {
                "n1": [["n2", -1, 0], ["db1", 0, 1], ["db1", 1]]
            },
            "data_ops_dict": {
                "0": {"op_type": "write", "op_obj_id": "k1", "db": "Redis", "op_obj_size": 1000},
                "1": {"op_type": "read", "op_obj_id": "k1", "db": "MongoDB"}
            },
            "logger_nodes": ["n2"]
        })
    }

    #[test]
    fn test_decode_sample() {
        let txn: Transaction = serde_json::from_value(sample()).unwrap();
        assert_eq!(txn.id().as_str(), "a");

        let calls = txn.calls_for(&NodeId::from("n1"));
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0], Call::forward("n2", CallMode::Sync));
        assert_eq!(
            calls[1],
            Call::data_op("db1", DataOpId::from_raw(0), CallMode::Async)
        );
        assert_eq!(calls[2].mode, CallMode::Sync);

        let op = txn.data_op(DataOpId::from_raw(0)).unwrap();
        assert_eq!(op.op_type, OpType::Write);
        assert_eq!(op.store_kind, StoreKind::KeyValue);
        assert_eq!(op.object_id, "k1");

        assert!(txn.is_logger(&NodeId::from("n2")));
        assert!(!txn.is_logger(&NodeId::from("n1")));
    }

    #[test]
    fn test_leaf_has_empty_call_list() {
        let txn: Transaction = serde_json::from_value(sample()).unwrap();
        assert!(txn.calls_for(&NodeId::from("n2")).is_empty());
    }

    #[test]
    fn test_reencode_preserves_shape() {
        let txn: Transaction = serde_json::from_value(sample()).unwrap();
        let bytes = txn.to_json_bytes().unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["node_calls_dict"]["n1"][2], json!(["db1", 1, 0]));
        assert_eq!(value["data_ops_dict"]["0"]["op_obj_size"], json!(1000));
        assert_eq!(value["initial_node_type"], json!("Python"));

        let again = Transaction::from_slice(&bytes).unwrap();
        assert_eq!(again, txn);
    }

    #[test]
    fn test_unresolved_op_is_rejected() {
        let mut value = sample();
        value["node_calls_dict"]["n1"] = json!([["db1", 9, 0]]);
        let err = Transaction::from_slice(value.to_string().as_bytes()).unwrap_err();
        assert!(err.to_string().contains("unknown data op 9"));
    }

    #[test]
    fn test_missing_tid_is_rejected() {
        let mut value = sample();
        value.as_object_mut().unwrap().remove("tid");
        let err = Transaction::from_slice(value.to_string().as_bytes()).unwrap_err();
        assert!(err.to_string().contains("tid"));
    }

    #[test]
    fn test_wrong_types_are_rejected() {
        let mut value = sample();
        value["node_calls_dict"] = json!(["not", "a", "map"]);
        assert!(Transaction::from_slice(value.to_string().as_bytes()).is_err());

        let mut value = sample();
        value["node_calls_dict"]["n1"] = json!([["n2", -3, 0]]);
        assert!(Transaction::from_slice(value.to_string().as_bytes()).is_err());

        let mut value = sample();
        value["node_calls_dict"]["n1"] = json!([["n2", -1, 7]]);
        assert!(Transaction::from_slice(value.to_string().as_bytes()).is_err());

        let mut value = sample();
        value["data_ops_dict"]["0"]["db"] = json!("Cassandra");
        assert!(Transaction::from_slice(value.to_string().as_bytes()).is_err());
    }

    #[test]
    fn test_starting_point_requires_strings() {
        let txn: Transaction = serde_json::from_value(sample()).unwrap();
        let start = txn.starting_point().unwrap();
        assert_eq!(start.node.as_str(), "n1");
        assert_eq!(start.node_type, "Python");

        let mut value = sample();
        value["initial_node"] = json!(42);
        let txn: Transaction = serde_json::from_value(value).unwrap();
        assert!(txn.starting_point().is_none());

        let mut value = sample();
        value.as_object_mut().unwrap().remove("initial_node_type");
        let txn: Transaction = serde_json::from_value(value).unwrap();
        assert!(txn.starting_point().is_none());
    }

    #[test]
    fn test_catalog_entry_takes_key_as_tid() {
        let mut value = sample();
        value.as_object_mut().unwrap().remove("tid");
        let txn = Transaction::from_catalog_entry("from-key", value).unwrap();
        assert_eq!(txn.id().as_str(), "from-key");
    }

    #[test]
    fn test_async_flag_accepts_bool() {
        let value = json!({
            "tid": "b",
            "node_calls_dict": {"n1": [["n2", -1, true]]}
        });
        let txn: Transaction = serde_json::from_value(value).unwrap();
        assert_eq!(txn.calls_for(&NodeId::from("n1"))[0].mode, CallMode::Async);
    }

    #[test]
    fn test_builder_rejects_dangling_op() {
        let mut calls = IndexMap::new();
        calls.insert(
            NodeId::from("n1"),
            vec![Call::data_op("db", DataOpId::from_raw(4), CallMode::Sync)],
        );
        let err = Transaction::new(TxnId::from("t"), calls, IndexMap::new(), IndexSet::new());
        assert!(matches!(err, Err(CoreError::UnresolvedDataOp { op_id: 4, .. })));
    }
}
