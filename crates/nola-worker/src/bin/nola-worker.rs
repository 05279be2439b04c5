//! Worker process entrypoint: initializes the store schema, installs graceful
//! shutdown signal handlers, and enters the poll loop.

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use nola_engine::SilenceEngine;
use nola_files::FileRegistry;
use nola_queue::TaskQueue;
use nola_store::{SqliteStore, StoreConfig, StoreError};
use nola_sweeper::{Sweeper, SweeperConfig};
use nola_worker::{Worker, WorkerConfig};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Nola transcription worker.
///
/// Each environment variable mirrors its CLI flag (uppercased, `NOLA_` prefixed); CLI
/// flags take precedence over the environment, which takes precedence over the
/// documented default.
#[derive(Debug, Parser)]
#[command(name = "nola-worker", version, about)]
struct Cli {
    /// Path to the SQLite store file.
    #[arg(long, env = "NOLA_STORE_PATH", default_value = "nola.db")]
    store_path: String,

    /// Seconds to sleep between empty dequeues.
    #[arg(long, env = "NOLA_POLL_INTERVAL_SECS", default_value_t = 1)]
    poll_interval_secs: u64,

    /// Seconds between sweeper passes.
    #[arg(long, env = "NOLA_SWEEP_INTERVAL_SECS", default_value_t = 30)]
    sweep_interval_secs: u64,

    /// Seconds a claimed task may run before the sweeper reclaims it.
    #[arg(long, env = "NOLA_TASK_TIMEOUT_SECS", default_value_t = 3600)]
    task_timeout_secs: i64,

    /// Seconds of heartbeat silence before the sweeper reclaims a claim.
    #[arg(long, env = "NOLA_HEARTBEAT_TIMEOUT_SECS", default_value_t = 300)]
    heartbeat_timeout_secs: i64,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let store = match SqliteStore::connect(StoreConfig {
        path: cli.store_path.clone(),
        ..StoreConfig::default()
    })
    .await
    {
        Ok(store) => store,
        Err(StoreError::VersionTooOld) => {
            error!("linked SQLite does not support UPDATE ... RETURNING (requires SQLite >= 3.35)");
            return ExitCode::FAILURE;
        }
        Err(e) => {
            error!(error = %e, "failed to open store");
            return ExitCode::FAILURE;
        }
    };

    let queue = TaskQueue::new(store.clone());
    let files = FileRegistry::new(store.clone());

    let sweeper = Sweeper::new(store);
    sweeper.spawn(SweeperConfig {
        sweep_interval_secs: cli.sweep_interval_secs,
        task_timeout_secs: cli.task_timeout_secs,
        heartbeat_timeout_secs: cli.heartbeat_timeout_secs,
    });

    let worker = Worker::new(
        queue,
        files,
        SilenceEngine,
        WorkerConfig {
            poll_interval: Duration::from_secs(cli.poll_interval_secs),
            ..WorkerConfig::default()
        },
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    install_signal_handlers(Arc::clone(&shutdown));

    info!(worker_id = %worker.worker_id(), "nola-worker ready");
    worker.run(shutdown).await;

    ExitCode::SUCCESS
}

/// Installs SIGINT/SIGTERM handlers that set the shutdown flag the poll loop checks
/// between tasks. Both signals are treated identically: the current task, if any,
/// runs to completion or observes cancellation before the process exits.
fn install_signal_handlers(shutdown: Arc<AtomicBool>) {
    tokio::spawn(async move {
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to install SIGINT handler");
                return;
            }
        };
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };

        tokio::select! {
            _ = sigint.recv() => info!("received SIGINT, shutting down"),
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        }

        shutdown.store(true, Ordering::Relaxed);
    });
}
