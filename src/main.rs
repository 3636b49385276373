//! DriftKV server binary.
//!
//! Parses the command line, installs the log subscriber, binds the listener
//! and serves clients until Ctrl+C.

use anyhow::Context;
use clap::Parser;
use driftkv::commands::CommandHandler;
use driftkv::connection::{handle_connection, ConnectionStats};
use driftkv::storage::{ExpiryConfig, ExpirySweeper, StorageEngine};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Command-line configuration
#[derive(Parser, Debug)]
#[command(name = "driftkv", version, about = "In-memory key-value server with sliding expiry")]
struct Config {
    /// Address to bind
    #[arg(long, default_value = driftkv::DEFAULT_HOST)]
    host: String,

    /// TCP port
    #[arg(short, long, default_value_t = driftkv::DEFAULT_PORT)]
    port: u16,

    /// Log filter used when RUST_LOG is unset (e.g. "debug", "driftkv=trace")
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Reclaim expired keys in the background, starting at this interval.
    /// Without it, expired keys are only replaced by overwrites.
    #[arg(long, value_name = "MS")]
    sweep_interval_ms: Option<u64>,
}

impl Config {
    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn init_logging(fallback: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    init_logging(&config.log_level);

    // Bind the listener
    let addr = config.addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    // Shared store and counters for every connection
    let storage = Arc::new(StorageEngine::new());
    let stats = Arc::new(ConnectionStats::new());

    // Optional background reclamation; stops when the handle drops
    let _sweeper = config.sweep_interval_ms.map(|ms| {
        ExpirySweeper::start(
            Arc::clone(&storage),
            ExpiryConfig::with_interval(Duration::from_millis(ms.max(1))),
        )
    });

    info!(
        version = driftkv::VERSION,
        addr = %addr,
        sweeper = config.sweep_interval_ms.is_some(),
        "DriftKV ready, Ctrl+C to stop"
    );

    // Run until Ctrl+C
    tokio::select! {
        _ = serve(listener, Arc::clone(&storage), Arc::clone(&stats)) => {}
        _ = shutdown_signal() => info!("Shutting down"),
    }

    log_summary(&storage, &stats);
    Ok(())
}

/// Accepts clients forever, one task each. Accept errors are logged and
/// skipped.
async fn serve(listener: TcpListener, storage: Arc<StorageEngine>, stats: Arc<ConnectionStats>) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };

        // One task per client, all sharing the store
        let handler = CommandHandler::new(Arc::clone(&storage));
        tokio::spawn(handle_connection(stream, addr, handler, Arc::clone(&stats)));
    }
}

/// Resolves on Ctrl+C. If the handler cannot be installed, never resolves.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "cannot listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}

fn log_summary(storage: &StorageEngine, stats: &ConnectionStats) {
    let store = storage.stats();
    info!(
        keys = store.keys,
        gets = store.get_ops,
        hits = store.hits,
        misses = store.misses,
        sets = store.set_ops,
        reclaimed = store.expired,
        "store totals"
    );
    let conns = stats.snapshot();
    info!(
        accepted = conns.accepted,
        active = conns.active,
        commands = conns.commands,
        framing_errors = conns.framing_errors,
        bytes_read = conns.bytes_read,
        bytes_written = conns.bytes_written,
        "connection totals"
    );
}
