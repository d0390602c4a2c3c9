//! Rate-paced workload driver.
//!
//! The catalog is split into shards, each with its own ticker. Every tick a
//! shard takes its next transaction and hands the send to the dispatcher, so
//! a slow node never stretches the pacing interval.

use crate::catalog::TraceCatalog;
use crate::config::DriverConfig;
use crate::dispatch::{DispatchSink, Dispatcher, SendError, ingress_port_for};
use crate::shard::{partition, shard_interval};
use bytes::Bytes;
use cascade_core::{NodeId, Transaction};
use cascade_log::{LogRecord, TxnLog};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};

/// Driver errors
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// Rate must be positive and finite
    #[error("invalid target rate {rate}")]
    InvalidRate {
        /// Rejected rate
        rate: f64,
    },
    /// At least one shard is required
    #[error("shard count must be at least 1")]
    NoShards,
    /// A pacing task panicked or was cancelled
    #[error("shard {shard} did not complete: {reason}")]
    Shard {
        /// Shard index
        shard: usize,
        /// Failure description
        reason: String,
    },
}

/// Outcome of one replay
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// Transactions handed to the dispatcher
    pub dispatched: u64,
    /// Transactions skipped for lacking a usable starting node
    pub skipped: u64,
    /// Dispatched sends that failed or timed out
    pub failed: u64,
    /// Wall-clock time spent pacing
    pub runtime: Duration,
}

impl RunReport {
    /// Achieved sends per second
    #[must_use]
    pub fn throughput(&self) -> f64 {
        let secs = self.runtime.as_secs_f64();
        if secs > 0.0 {
            self.dispatched as f64 / secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total transactions dispatched: {}", self.dispatched)?;
        writeln!(f, "Skipped (no starting node): {}", self.skipped)?;
        writeln!(f, "Failed sends: {}", self.failed)?;
        writeln!(f, "Total runtime: {:.2} seconds", self.runtime.as_secs_f64())?;
        write!(f, "Average requests per second: {:.2}", self.throughput())
    }
}

#[derive(Default)]
struct Counters {
    dispatched: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

/// Replays a catalog against the node fleet
pub struct WorkloadDriver {
    config: DriverConfig,
    sink: Arc<dyn DispatchSink>,
    log: Option<Arc<TxnLog>>,
}

impl WorkloadDriver {
    /// Create a driver sending through `sink`
    #[must_use]
    pub fn new(config: DriverConfig, sink: Arc<dyn DispatchSink>) -> Self {
        Self {
            config,
            sink,
            log: None,
        }
    }

    /// Record every dispatch in `log`
    #[must_use]
    pub fn with_log(mut self, log: Arc<TxnLog>) -> Self {
        self.log = Some(log);
        self
    }

    /// Configuration in effect
    #[must_use]
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Replay every transaction in `catalog` once
    ///
    /// Returns after pacing completes and every dispatched send has finished.
    ///
    /// # Errors
    ///
    /// Returns error for an invalid rate or shard count, or if a shard task dies
    pub async fn run(&self, catalog: &TraceCatalog) -> Result<RunReport, DriverError> {
        let interval = shard_interval(self.config.rate, self.config.shards)?;
        let txns: Vec<Arc<Transaction>> = catalog.transactions().cloned().collect();
        let lanes = partition(&txns, self.config.shards);

        tracing::info!(
            rate = self.config.rate,
            shards = self.config.shards,
            interval_us = interval.as_micros() as u64,
            transactions = txns.len(),
            "starting replay"
        );

        let counters = Arc::new(Counters::default());
        let dispatcher = Dispatcher::new(self.config.dispatch);
        let start = Instant::now();

        let mut shards = JoinSet::new();
        let mut shard_ids = HashMap::new();
        for (index, lane) in lanes.into_iter().enumerate() {
            let lane_ctx = Lane {
                index,
                interval,
                dispatcher: dispatcher.clone(),
                counters: Arc::clone(&counters),
                send: SendContext {
                    sink: Arc::clone(&self.sink),
                    log: self.log.clone(),
                    sender: self.config.sender.clone(),
                    timeout: self.config.request_timeout,
                    counters: Arc::clone(&counters),
                },
            };
            let handle = shards.spawn(lane_ctx.pace(lane));
            shard_ids.insert(handle.id(), index);
        }

        let mut shard_failure = None;
        while let Some(joined) = shards.join_next().await {
            if let Err(err) = joined {
                let shard = shard_ids.get(&err.id()).copied().unwrap_or_default();
                tracing::error!(shard, error = %err, "shard task failed");
                shard_failure.get_or_insert(DriverError::Shard {
                    shard,
                    reason: err.to_string(),
                });
            }
        }
        let runtime = start.elapsed();

        dispatcher.finish().await;
        if let Some(err) = shard_failure {
            return Err(err);
        }

        let report = RunReport {
            dispatched: counters.dispatched.load(Ordering::SeqCst),
            skipped: counters.skipped.load(Ordering::SeqCst),
            failed: counters.failed.load(Ordering::SeqCst),
            runtime,
        };
        tracing::info!(
            dispatched = report.dispatched,
            skipped = report.skipped,
            failed = report.failed,
            runtime_ms = report.runtime.as_millis() as u64,
            throughput = report.throughput(),
            "replay finished"
        );
        Ok(report)
    }
}

impl fmt::Debug for WorkloadDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkloadDriver")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// One pacing lane
struct Lane {
    index: usize,
    interval: Duration,
    dispatcher: Dispatcher,
    counters: Arc<Counters>,
    send: SendContext,
}

impl Lane {
    async fn pace(self, lane: Vec<Arc<Transaction>>) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        for txn in lane {
            ticker.tick().await;
            let Some(start) = txn.starting_point() else {
                tracing::debug!(tid = %txn.id(), shard = self.index, "skipping transaction without starting node");
                self.counters.skipped.fetch_add(1, Ordering::SeqCst);
                continue;
            };
            let address = format!("{}:{}", start.node, ingress_port_for(&start.node_type));
            let send = self.send.clone();
            self.dispatcher.submit(async move { send.dispatch(txn, address).await });
            self.counters.dispatched.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[derive(Clone)]
struct SendContext {
    sink: Arc<dyn DispatchSink>,
    log: Option<Arc<TxnLog>>,
    sender: NodeId,
    timeout: Duration,
    counters: Arc<Counters>,
}

impl SendContext {
    async fn dispatch(&self, txn: Arc<Transaction>, address: String) {
        let tid = txn.id();
        if let Some(log) = &self.log {
            log.append_best_effort(&LogRecord::dispatch(tid, &self.sender))
                .await;
        }

        let payload = match txn.to_json_bytes() {
            Ok(bytes) => Bytes::from(bytes),
            Err(err) => {
                tracing::warn!(%tid, error = %err, "failed to encode transaction");
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
                return;
            }
        };

        let result = match tokio::time::timeout(self.timeout, self.sink.deliver(&address, payload)).await {
            Ok(result) => result,
            Err(_) => Err(SendError::Timeout {
                address: address.clone(),
                after: self.timeout,
            }),
        };
        if let Err(err) = result {
            tracing::warn!(%tid, %address, error = %err, "dispatch failed");
            self.counters.failed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DispatchMode;
    use async_trait::async_trait;
    use cascade_core::TxnId;
    use cascade_log::{EntryKind, RotationPolicy};
    use indexmap::{IndexMap, IndexSet};
    use std::sync::Mutex;

    /// Records every delivery; fails deliveries to `refuse`
    #[derive(Default)]
    struct Recorder {
        refuse: Option<String>,
        delay: Duration,
        seen: Mutex<Vec<(String, String, Instant)>>,
    }

    #[async_trait]
    impl DispatchSink for Recorder {
        async fn deliver(&self, address: &str, payload: Bytes) -> Result<(), SendError> {
            let txn = Transaction::from_slice(&payload).unwrap();
            self.seen
                .lock()
                .unwrap()
                .push((address.to_string(), txn.id().to_string(), Instant::now()));
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.refuse.as_deref() == Some(address) {
                return Err(SendError::Status {
                    address: address.to_string(),
                    status: 500,
                });
            }
            Ok(())
        }
    }

    fn catalog(n: usize) -> TraceCatalog {
        let mut json = String::from("{");
        for i in 0..n {
            if i > 0 {
                json.push(',');
            }
            json.push_str(&format!(
                r#""t{i:03}": {{"initial_node": "n{}", "initial_node_type": "Python"}}"#,
                i % 3
            ));
        }
        json.push('}');
        TraceCatalog::from_json_str(&json).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_shard_spacing() {
        let sink = Arc::new(Recorder::default());
        let driver = WorkloadDriver::new(
            DriverConfig::default()
                .with_rate(10.0)
                .with_shards(1)
                .with_dispatch(DispatchMode::Direct),
            sink.clone(),
        );

        let start = Instant::now();
        let report = driver.run(&catalog(5)).await.unwrap();

        assert_eq!(report.dispatched, 5);
        let seen = sink.seen.lock().unwrap();
        let offsets: Vec<_> = seen.iter().map(|(_, _, at)| *at - start).collect();
        let expected: Vec<_> = (1..=5).map(|i| Duration::from_millis(100 * i)).collect();
        assert_eq!(offsets, expected);
        assert_eq!(report.runtime, Duration::from_millis(500));
        assert!((report.throughput() - 10.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shards_split_the_rate() {
        let sink = Arc::new(Recorder::default());
        let driver = WorkloadDriver::new(
            DriverConfig::default()
                .with_rate(40.0)
                .with_shards(4)
                .with_dispatch(DispatchMode::Pool { workers: 2 }),
            sink.clone(),
        );

        let report = driver.run(&catalog(8)).await.unwrap();

        // Four lanes of two, each ticking every 100ms.
        assert_eq!(report.dispatched, 8);
        assert_eq!(report.runtime, Duration::from_millis(200));
        let mut tids: Vec<_> = sink.seen.lock().unwrap().iter().map(|(_, t, _)| t.clone()).collect();
        tids.sort();
        let expected: Vec<_> = (0..8).map(|i| format!("t{:03}", i)).collect();
        assert_eq!(tids, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_sends_do_not_stretch_pacing() {
        let sink = Arc::new(Recorder {
            delay: Duration::from_secs(5),
            ..Recorder::default()
        });
        let driver = WorkloadDriver::new(
            DriverConfig::default()
                .with_rate(100.0)
                .with_shards(1)
                .with_dispatch(DispatchMode::Direct),
            sink.clone(),
        );

        let report = driver.run(&catalog(10)).await.unwrap();

        assert_eq!(report.runtime, Duration::from_millis(100));
        assert_eq!(report.failed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_timeout_counts_as_failure() {
        let sink = Arc::new(Recorder {
            delay: Duration::from_secs(30),
            ..Recorder::default()
        });
        let driver = WorkloadDriver::new(
            DriverConfig::default()
                .with_rate(100.0)
                .with_shards(1)
                .with_request_timeout(Duration::from_secs(10))
                .with_dispatch(DispatchMode::Direct),
            sink,
        );
        let report = driver.run(&catalog(3)).await.unwrap();
        assert_eq!(report.dispatched, 3);
        assert_eq!(report.failed, 3);
    }

    #[tokio::test]
    async fn test_skips_unusable_starting_points_and_routes_by_type() {
        let catalog = TraceCatalog::from_json_str(
            r#"{
                "a": {"initial_node": "n1", "initial_node_type": "Python"},
                "b": {"initial_node": "n2"},
                "c": {"initial_node": ["n3"], "initial_node_type": "Python"},
                "d": {"initial_node": "redis1", "initial_node_type": "Redis"},
                "e": {"initial_node": "n4", "initial_node_type": 5}
            }"#,
        )
        .unwrap();
        let sink = Arc::new(Recorder {
            refuse: Some("redis1:6379".to_string()),
            ..Recorder::default()
        });
        let dir = tempfile::tempdir().unwrap();
        let log = TxnLog::open(dir.path().join("client_log.csv"), RotationPolicy::default())
            .await
            .unwrap();
        let driver = WorkloadDriver::new(
            DriverConfig::default().with_rate(1000.0).with_shards(2),
            sink.clone(),
        )
        .with_log(Arc::new(log));

        let report = driver.run(&catalog).await.unwrap();

        assert_eq!(report.dispatched, 2);
        assert_eq!(report.skipped, 3);
        assert_eq!(report.failed, 1);
        let mut addresses: Vec<_> = sink.seen.lock().unwrap().iter().map(|(a, _, _)| a.clone()).collect();
        addresses.sort();
        assert_eq!(addresses, vec!["n1:5000", "redis1:6379"]);

        let content = std::fs::read_to_string(dir.path().join("client_log.csv")).unwrap();
        let mut records: Vec<_> = content.lines().filter_map(LogRecord::from_csv_line).collect();
        records.sort_by(|x, y| x.tid.cmp(&y.tid));
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.kind == EntryKind::Dispatch && r.node == "cascade_client"));
        assert_eq!(records[0].tid, "a");
        assert_eq!(records[1].tid, "d");
    }

    #[tokio::test(start_paused = true)]
    async fn test_replays_programmatic_catalog() {
        let build = |tid: &str, node: &str, node_type: &str| {
            Transaction::new(TxnId::from(tid), IndexMap::new(), IndexMap::new(), IndexSet::new())
                .unwrap()
                .with_starting_point(&NodeId::from(node), node_type)
        };
        let catalog = TraceCatalog::from_transactions([
            build("p1", "n1", "Python"),
            build("p2", "mongo1", "MongoDB"),
        ])
        .unwrap();
        let sink = Arc::new(Recorder::default());
        let driver = WorkloadDriver::new(
            DriverConfig::default().with_rate(100.0).with_shards(1),
            sink.clone(),
        );

        let report = driver.run(&catalog).await.unwrap();

        assert_eq!(report.dispatched, 2);
        let seen: Vec<_> = sink
            .seen
            .lock()
            .unwrap()
            .iter()
            .map(|(a, t, _)| (a.clone(), t.clone()))
            .collect();
        assert_eq!(
            seen,
            vec![
                ("n1:5000".to_string(), "p1".to_string()),
                ("mongo1:27017".to_string(), "p2".to_string()),
            ]
        );

        let again = TraceCatalog::from_transactions([build("p1", "n1", "Python"), build("p1", "n2", "Python")]);
        assert!(matches!(again, Err(crate::catalog::CatalogError::DuplicateTid { .. })));
    }

    #[tokio::test]
    async fn test_rejects_bad_rate() {
        let driver = WorkloadDriver::new(
            DriverConfig::default().with_rate(-1.0),
            Arc::new(Recorder::default()),
        );
        assert!(matches!(
            driver.run(&catalog(1)).await,
            Err(DriverError::InvalidRate { .. })
        ));
    }

    #[test]
    fn test_report_display() {
        let report = RunReport {
            dispatched: 120,
            skipped: 3,
            failed: 1,
            runtime: Duration::from_secs(2),
        };
        let text = report.to_string();
        assert!(text.contains("Total transactions dispatched: 120"));
        assert!(text.contains("Average requests per second: 60.00"));
    }
}
