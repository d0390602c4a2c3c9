//! CASCADE CLI
//!
//! Replays a trace catalog against a node fleet at a fixed aggregate rate.

#![warn(missing_docs)]
#![warn(clippy::all)]

use cascade_core::NodeId;
use cascade_log::TxnLog;
use cascade_replay::{
    DispatchMode, DrainOutcome, DriverConfig, HttpSink, HttpStatusProbe, TraceCatalog,
    WorkloadDriver, wait_for_idle,
};
use clap::{Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use console::style;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cascade")]
#[command(about = "CASCADE - synthetic workload replay driver", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay every transaction in a catalog once
    Replay {
        /// Trace catalog (JSON)
        #[arg(short, long)]
        catalog: PathBuf,
        /// Driver configuration (JSON) used as the base
        #[arg(long)]
        config: Option<PathBuf>,
        /// Target aggregate sends per second
        #[arg(short, long)]
        rate: Option<f64>,
        /// Concurrent pacing lanes
        #[arg(short, long)]
        shards: Option<usize>,
        /// Cap on in-flight sends
        #[arg(short, long, conflicts_with = "direct")]
        workers: Option<usize>,
        /// Send every transaction immediately, without a cap
        #[arg(long)]
        direct: bool,
        /// Per-send timeout in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// Dispatch log file
        #[arg(long)]
        log: Option<PathBuf>,
        /// Do not write a dispatch log
        #[arg(long, conflicts_with = "log")]
        no_log: bool,
        /// Nodes to wait on until idle after the replay (comma separated)
        #[arg(long, env = "SL_NODES", value_delimiter = ',')]
        drain_nodes: Vec<String>,
        /// Status port of drained nodes
        #[arg(long, default_value_t = 5000)]
        status_port: u16,
        /// Give up draining after this many seconds
        #[arg(long, default_value_t = 600)]
        drain_timeout_secs: u64,
    },
    /// Summarize a catalog without sending anything
    Inspect {
        /// Trace catalog (JSON)
        #[arg(short, long)]
        catalog: PathBuf,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cascade=info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Replay {
            catalog,
            config,
            rate,
            shards,
            workers,
            direct,
            timeout_secs,
            log,
            no_log,
            drain_nodes,
            status_port,
            drain_timeout_secs,
        } => {
            let mut config = match config {
                Some(path) => {
                    let raw = tokio::fs::read(&path)
                        .await
                        .wrap_err_with(|| format!("failed to read {}", path.display()))?;
                    serde_json::from_slice::<DriverConfig>(&raw)
                        .wrap_err_with(|| format!("invalid driver config {}", path.display()))?
                }
                None => DriverConfig::default(),
            };
            if let Some(rate) = rate {
                config = config.with_rate(rate);
            }
            if let Some(shards) = shards {
                config = config.with_shards(shards);
            }
            if direct {
                config = config.with_dispatch(DispatchMode::Direct);
            } else if let Some(workers) = workers {
                config = config.with_dispatch(DispatchMode::Pool { workers });
            }
            if let Some(secs) = timeout_secs {
                config = config.with_request_timeout(Duration::from_secs(secs));
            }
            if let Some(path) = log {
                config = config.with_log_path(path);
            }

            let catalog = TraceCatalog::load(&catalog).await?;
            let mut driver = WorkloadDriver::new(config.clone(), Arc::new(HttpSink::new()));
            if !no_log {
                let log = TxnLog::open(config.log_path.clone(), config.rotation).await?;
                driver = driver.with_log(Arc::new(log));
            }

            let report = driver.run(&catalog).await?;
            println!("{}", style("Replay complete").bold().green());
            println!("{}", report);

            let nodes: Vec<NodeId> = drain_nodes
                .iter()
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(NodeId::from)
                .collect();
            if !nodes.is_empty() {
                println!("{}", style("Waiting for nodes to go idle").bold());
                let outcomes = wait_for_idle(
                    &HttpStatusProbe::new(status_port),
                    &nodes,
                    Duration::from_secs(1),
                    Duration::from_secs(drain_timeout_secs),
                )
                .await;
                for (node, outcome) in outcomes {
                    match outcome {
                        DrainOutcome::Idle => println!("  {} idle", node),
                        DrainOutcome::Unreachable(reason) => {
                            println!("  {} {}: {}", node, style("unreachable").yellow(), reason)
                        }
                        DrainOutcome::TimedOut { alive } => {
                            println!("  {} {} with {} live", node, style("timed out").red(), alive)
                        }
                    }
                }
            }
            Ok(())
        }
        Commands::Inspect { catalog, json } => {
            let catalog = TraceCatalog::load(&catalog).await?;
            let summary = catalog.summary();
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
                return Ok(());
            }
            println!("{}", style("Catalog").bold());
            println!("  transactions: {}", summary.transactions);
            println!("  dispatchable: {}", summary.dispatchable);
            println!("  calls: {}", summary.calls);
            println!("{}", style("Starting nodes").bold());
            for (node, count) in &summary.by_starting_node {
                println!("  {}: {}", node, count);
            }
            println!("{}", style("Data ops by store").bold());
            for (kind, count) in &summary.data_ops_by_store {
                println!("  {}: {}", kind.wire_name(), count);
            }
            Ok(())
        }
    }
}
