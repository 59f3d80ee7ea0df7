//! Background expiry sweeper
//!
//! Expired records are already invisible to every operation and are
//! reclaimed when their key is touched. The sweeper complements this by
//! removing records whose keys are never touched again, so memory tracks
//! the live key set.

use crate::metrics::Metrics;
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use throttr::QuotaEngine;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Spawn the sweep loop on the current runtime
///
/// The task exits once `shutdown` is cancelled.
pub fn spawn(
    engine: Arc<QuotaEngine>,
    metrics: Arc<Metrics>,
    sweep_interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run(engine, metrics, sweep_interval, shutdown))
}

/// Main sweep loop
pub async fn run(
    engine: Arc<QuotaEngine>,
    metrics: Arc<Metrics>,
    sweep_interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = interval(sweep_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        interval_ms = sweep_interval.as_millis() as u64,
        "Expiry sweeper started"
    );

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Expiry sweeper shutting down");
                break;
            }
            _ = ticker.tick() => {
                sweep_once(&engine, &metrics);
            }
        }
    }
}

/// Run a single sweep and record its outcome
pub fn sweep_once(engine: &QuotaEngine, metrics: &Metrics) -> usize {
    let started = Instant::now();
    let removed = engine.sweep(SystemTime::now());
    let elapsed = started.elapsed();

    metrics.record_sweep(removed, elapsed);
    metrics.update_active_keys(engine.key_count());

    if removed > 0 {
        debug!(
            removed,
            remaining = engine.key_count(),
            elapsed_us = elapsed.as_micros() as u64,
            "Expiry sweep completed"
        );
    }

    removed
}
