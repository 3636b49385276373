//! Optional Background Expiry Sweeper
//!
//! Lookups only detect expiry; they never remove anything. A key that
//! expires and is never overwritten keeps its memory until process exit.
//! The sweeper is an opt-in task (`--sweep-interval-ms`) that reclaims
//! such entries. Removing an expired entry never changes what a client
//! observes, since it already reads as absent.
//!
//! The pause between passes adapts: it halves while a large share of the
//! store turns out to be expired and doubles while passes find nothing.

use crate::storage::StorageEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, trace};

/// Pacing for the expiry sweeper.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpiryConfig {
    /// Pause before the first pass
    pub base_interval: Duration,

    /// Shortest pause the sweeper speeds up to
    pub min_interval: Duration,

    /// Longest pause the sweeper backs off to
    pub max_interval: Duration,

    /// Fraction of stored keys found expired above which passes speed up
    pub speedup_threshold: f64,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(250),
            min_interval: Duration::from_millis(10),
            max_interval: Duration::from_secs(2),
            speedup_threshold: 0.25,
        }
    }
}

impl ExpiryConfig {
    /// Defaults, but starting at `interval`.
    ///
    /// The bounds widen if needed so that `interval` lies within them.
    pub fn with_interval(interval: Duration) -> Self {
        let defaults = Self::default();
        Self {
            base_interval: interval,
            min_interval: defaults.min_interval.min(interval),
            max_interval: defaults.max_interval.max(interval),
            ..defaults
        }
    }

    /// Pause to use after a pass that scanned `scanned` entries and
    /// removed `removed` of them.
    pub fn next_interval(&self, current: Duration, scanned: u64, removed: u64) -> Duration {
        if scanned == 0 {
            return current;
        }
        if removed == 0 {
            return current.saturating_mul(2).min(self.max_interval);
        }
        if removed as f64 / scanned as f64 > self.speedup_threshold {
            return (current / 2).max(self.min_interval);
        }
        current
    }
}

/// Handle to a running sweeper task. Dropping it stops the task.
#[derive(Debug)]
pub struct ExpirySweeper {
    stopped: watch::Sender<bool>,
}

impl ExpirySweeper {
    /// Spawns the sweeper on the current Tokio runtime.
    pub fn start(engine: Arc<StorageEngine>, config: ExpiryConfig) -> Self {
        let (stopped, stop_rx) = watch::channel(false);

        info!(
            interval_ms = config.base_interval.as_millis(),
            "Expiry sweeper started"
        );
        tokio::spawn(run_sweeper(engine, config, stop_rx));

        Self { stopped }
    }

    /// Asks the task to stop. Idempotent.
    pub fn stop(&self) {
        if !self.stopped.send_replace(true) {
            info!("Expiry sweeper stopped");
        }
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_sweeper(
    engine: Arc<StorageEngine>,
    config: ExpiryConfig,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut pause = config.base_interval;

    loop {
        let next_pass = Instant::now() + pause;
        tokio::select! {
            _ = tokio::time::sleep_until(next_pass) => {}
            // Resolves on stop, or with an error once the handle is gone
            _ = stop_rx.wait_for(|stopped| *stopped) => {
                debug!("Expiry sweeper exiting");
                return;
            }
        }

        let scanned = engine.len();
        let removed = engine.cleanup_expired();
        let previous = pause;
        pause = config.next_interval(pause, scanned, removed);

        if removed > 0 {
            debug!(
                scanned = scanned,
                removed = removed,
                remaining = engine.len(),
                "Reclaimed expired keys"
            );
        }
        if pause != previous {
            trace!(
                from_ms = previous.as_millis(),
                to_ms = pause.as_millis(),
                "Sweep interval adjusted"
            );
        }
    }
}
