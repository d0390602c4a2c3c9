//! Per-node transaction executor.
//!
//! Each node interprets its own slice of a transaction's call graph: inject
//! latency, maybe log, then walk its call list in order. Sync calls are
//! awaited and abort the list on failure; async calls are detached.

use crate::config::NodeConfig;
use crate::detached::DetachedTasks;
use crate::inflight::InflightCounter;
use crate::retry::forward_with_retry;
use crate::transport::{NodeTransport, TransportError};
use bytes::Bytes;
use cascade_core::{
    Call, CallAction, CoreError, DataOp, DataOpId, NodeId, OpType, StoreKind, Transaction, TxnId,
};
use cascade_log::{LogRecord, TxnLog};
use cascade_storage::{DataStoreAdapter, StoreError};
use rand::Rng;
use rand::distributions::Alphanumeric;
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;

/// Size of the random value written by every write op
pub const WRITE_PAYLOAD_LEN: usize = 1000;

/// Execution state of one transaction at one node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecState {
    /// Accepted, nothing done yet
    Init,
    /// Latency (possibly zero) has been injected
    LatencyInjected,
    /// A leaf record was appended
    Logged,
    /// Not a logger node for this transaction
    Skipped,
    /// No calls for this node
    LeafDone,
    /// Walking the call list
    ProcessingCalls,
    /// A data op was performed (sync) or launched (async)
    DataOpDispatched,
    /// A forward was performed (sync) or launched (async)
    ForwardDispatched,
    /// A sync call failed; remaining calls were not made
    Aborted,
    /// Every call was processed
    Completed,
}

impl ExecState {
    /// Upper-case label used in diagnostics
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::LatencyInjected => "LATENCY_INJECTED",
            Self::Logged => "LOGGED",
            Self::Skipped => "SKIPPED",
            Self::LeafDone => "LEAF_DONE",
            Self::ProcessingCalls => "PROCESSING_CALLS",
            Self::DataOpDispatched => "DATA_OP_DISPATCHED",
            Self::ForwardDispatched => "FORWARD_DISPATCHED",
            Self::Aborted => "ABORTED",
            Self::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for ExecState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered state transitions of one execution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Trail(Vec<ExecState>);

impl Trail {
    fn push(&mut self, state: ExecState) {
        self.0.push(state);
    }

    /// States in the order they were entered
    #[must_use]
    pub fn states(&self) -> &[ExecState] {
        &self.0
    }

    /// Last state entered
    #[must_use]
    pub fn last(&self) -> Option<ExecState> {
        self.0.last().copied()
    }
}

impl fmt::Display for Trail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, state) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" -> ")?;
            }
            write!(f, "{}", state)?;
        }
        Ok(())
    }
}

/// Successful execution summary
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    /// Transaction id
    pub tid: TxnId,
    /// State transitions
    pub trail: Trail,
    /// Calls made or launched
    pub calls: usize,
    /// Calls launched as detached tasks
    pub detached: usize,
    /// Sync data-op calls slower than the configured threshold
    pub slow_calls: usize,
}

#[derive(Debug, Default)]
struct CallTally {
    calls: usize,
    detached: usize,
    slow: usize,
}

/// Execution errors
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// Too many forwards led here; the call graph is probably cyclic
    #[error("transaction {tid} arrived after {hops} hops (limit {max})")]
    HopLimit {
        /// Transaction id
        tid: TxnId,
        /// Hops observed
        hops: u32,
        /// Configured limit
        max: u32,
    },
    /// A sync data op failed
    #[error("sync {kind} call to {target} failed: {source}")]
    DataOp {
        /// Store host
        target: NodeId,
        /// Store kind
        kind: StoreKind,
        /// Underlying failure
        #[source]
        source: StoreError,
    },
    /// A sync forward failed on every attempt
    #[error("sync forward to {target} failed after {attempts} attempts: {source}")]
    Forward {
        /// Destination node
        target: NodeId,
        /// Attempts made
        attempts: u32,
        /// Last attempt's failure
        #[source]
        source: TransportError,
    },
    /// The transaction could not be handled as given
    #[error("invalid transaction: {0}")]
    Transaction(#[from] CoreError),
}

impl ExecutionError {
    /// Whether this failure stems from the hop limit, here or further down the graph
    #[must_use]
    pub fn is_loop(&self) -> bool {
        match self {
            Self::HopLimit { .. } => true,
            Self::Forward { source, .. } => source.is_loop_refusal(),
            _ => false,
        }
    }
}

/// Executes transactions on behalf of one node
///
/// Cheap to clone; clones share the log, store adapter, transport and
/// counters.
#[derive(Clone)]
pub struct NodeExecutor {
    inner: Arc<Inner>,
}

struct Inner {
    config: NodeConfig,
    log: Arc<TxnLog>,
    stores: Arc<DataStoreAdapter>,
    transport: Arc<dyn NodeTransport>,
    inflight: InflightCounter,
    detached: DetachedTasks,
}

impl NodeExecutor {
    /// Create an executor
    #[must_use]
    pub fn new(
        config: NodeConfig,
        log: Arc<TxnLog>,
        stores: Arc<DataStoreAdapter>,
        transport: Arc<dyn NodeTransport>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                log,
                stores,
                transport,
                inflight: InflightCounter::new(),
                detached: DetachedTasks::new(),
            }),
        }
    }

    /// This node's identity
    #[must_use]
    pub fn identity(&self) -> &NodeId {
        &self.inner.config.identity
    }

    /// Configuration in effect
    #[must_use]
    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    /// Executions currently running
    #[must_use]
    pub fn inflight(&self) -> &InflightCounter {
        &self.inner.inflight
    }

    /// Detached work launched by async calls
    #[must_use]
    pub fn detached(&self) -> &DetachedTasks {
        &self.inner.detached
    }

    /// Execute `txn` at this node
    ///
    /// `hops` is the number of forwards that led here (0 for the driver).
    ///
    /// # Errors
    ///
    /// Returns error if the hop limit is exceeded or a sync call fails
    pub async fn execute(&self, txn: Arc<Transaction>, hops: u32) -> Result<ExecutionReport, ExecutionError> {
        let _inflight = self.inner.inflight.enter();
        let mut trail = Trail::default();
        trail.push(ExecState::Init);

        let result = self.run(&txn, hops, &mut trail).await;
        match result {
            Ok(tally) => Ok(ExecutionReport {
                tid: txn.id().clone(),
                trail,
                calls: tally.calls,
                detached: tally.detached,
                slow_calls: tally.slow,
            }),
            Err(err) => {
                tracing::error!(
                    tid = %txn.id(),
                    node = %self.identity(),
                    %trail,
                    error = %err,
                    "transaction failed"
                );
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        txn: &Arc<Transaction>,
        hops: u32,
        trail: &mut Trail,
    ) -> Result<CallTally, ExecutionError> {
        let config = &self.inner.config;
        let identity = &config.identity;
        let tid = txn.id();

        if hops > config.max_hops {
            trail.push(ExecState::Aborted);
            return Err(ExecutionError::HopLimit {
                tid: tid.clone(),
                hops,
                max: config.max_hops,
            });
        }

        if !config.is_special() {
            let delay = config.latency.sample();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
        trail.push(ExecState::LatencyInjected);

        if txn.is_logger(identity) {
            self.inner
                .log
                .append_best_effort(&LogRecord::leaf(tid, identity))
                .await;
            trail.push(ExecState::Logged);
        } else {
            trail.push(ExecState::Skipped);
        }

        let calls = txn.calls_for(identity);
        if calls.is_empty() {
            trail.push(ExecState::LeafDone);
            return Ok(CallTally::default());
        }
        trail.push(ExecState::ProcessingCalls);

        let mut forward_payload: Option<Bytes> = None;
        let mut tally = CallTally {
            calls: calls.len(),
            ..CallTally::default()
        };
        for (index, call) in calls.iter().enumerate() {
            let outcome = match call.action {
                CallAction::DataOp(op_id) => {
                    trail.push(ExecState::DataOpDispatched);
                    self.data_op_call(txn, call, op_id).await.map(|slow| {
                        if slow {
                            tally.slow += 1;
                        }
                    })
                }
                CallAction::Forward => {
                    trail.push(ExecState::ForwardDispatched);
                    let payload = match &forward_payload {
                        Some(payload) => payload.clone(),
                        None => {
                            let payload = Bytes::from(txn.to_json_bytes()?);
                            forward_payload = Some(payload.clone());
                            payload
                        }
                    };
                    self.forward_call(tid, call, payload, hops + 1).await
                }
            };
            if let Err(err) = outcome {
                tracing::debug!(%tid, node = %identity, call = index, "aborting call list");
                trail.push(ExecState::Aborted);
                return Err(err);
            }
            if call.mode.is_async() {
                tally.detached += 1;
            }
        }

        trail.push(ExecState::Completed);
        Ok(tally)
    }

    /// Returns whether a sync call exceeded the slow-call threshold
    async fn data_op_call(&self, txn: &Transaction, call: &Call, op_id: DataOpId) -> Result<bool, ExecutionError> {
        let tid = txn.id();
        let identity = self.identity();
        let op = txn
            .data_op(op_id)
            .cloned()
            .ok_or_else(|| CoreError::UnresolvedDataOp {
                tid: tid.to_string(),
                op_id: i64::from(op_id.as_u32()),
            })?;
        let kind = op.store_kind;

        if call.mode.is_async() {
            let stores = Arc::clone(&self.inner.stores);
            let target = call.target.clone();
            self.inner.detached.submit("data_op", async move {
                perform_data_op(&stores, &target, &op).await
            });
            self.inner
                .log
                .append_best_effort(&LogRecord::async_op(tid, identity, kind))
                .await;
            return Ok(false);
        }

        let start = Instant::now();
        perform_data_op(&self.inner.stores, &call.target, &op)
            .await
            .map_err(|source| ExecutionError::DataOp {
                target: call.target.clone(),
                kind,
                source,
            })?;
        let elapsed = start.elapsed();
        let slow = elapsed > self.inner.config.slow_call_threshold;
        if slow {
            tracing::warn!(
                %tid,
                store = %kind,
                target = %call.target,
                elapsed_ms = elapsed.as_millis() as u64,
                "slow data store call"
            );
        }
        self.inner
            .log
            .append_best_effort(&LogRecord::sync_op(tid, identity, kind))
            .await;
        Ok(slow)
    }

    async fn forward_call(&self, tid: &TxnId, call: &Call, payload: Bytes, hops: u32) -> Result<(), ExecutionError> {
        let policy = self.inner.config.retry;

        if call.mode.is_async() {
            let transport = Arc::clone(&self.inner.transport);
            let tid = tid.clone();
            let target = call.target.clone();
            self.inner.detached.submit("forward", async move {
                forward_with_retry(transport.as_ref(), &policy, &tid, &target, payload, hops)
                    .await
                    .result
            });
            return Ok(());
        }

        let outcome = forward_with_retry(
            self.inner.transport.as_ref(),
            &policy,
            tid,
            &call.target,
            payload,
            hops,
        )
        .await;
        let attempts = outcome.attempts;
        outcome.result.map_err(|source| ExecutionError::Forward {
            target: call.target.clone(),
            attempts,
            source,
        })
    }
}

impl fmt::Debug for NodeExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeExecutor")
            .field("identity", self.identity())
            .field("inflight", &self.inner.inflight.current())
            .finish_non_exhaustive()
    }
}

async fn perform_data_op(stores: &DataStoreAdapter, target: &NodeId, op: &DataOp) -> Result<(), StoreError> {
    let address = stores.address_for(op.store_kind, target);
    let handle = stores.connect_or_reuse(op.store_kind, &address).await?;
    match op.op_type {
        OpType::Write => {
            let value = random_payload(WRITE_PAYLOAD_LEN);
            stores.write(&handle, &op.object_id, &value).await
        }
        OpType::Read => stores.read(&handle, &op.object_id).await.map(|_| ()),
    }
}

fn random_payload(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
