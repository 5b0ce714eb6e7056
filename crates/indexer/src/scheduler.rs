//! Fixed-interval ticker for one sub-indexer.
//!
//! Each fire spawns the tick on its own task so a slow tick never delays the
//! timer. A fire that finds the previous tick still running is skipped.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::snapshot::SubIndexer;

/// Clears the in-flight flag when the tick task finishes, even on panic.
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Periodic driver of a [`SubIndexer`].
#[derive(Clone)]
pub struct Scheduler {
    indexer: Arc<dyn SubIndexer>,
    interval: Duration,
    in_flight: Arc<AtomicBool>,
    skipped_fires: Arc<AtomicU64>,
}

impl Scheduler {
    /// Create a scheduler firing `indexer` every `interval`.
    pub fn new(indexer: Arc<dyn SubIndexer>, interval: Duration) -> Self {
        Self {
            indexer,
            interval,
            in_flight: Arc::new(AtomicBool::new(false)),
            skipped_fires: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of fires skipped because a tick was still running.
    pub fn skipped_fires(&self) -> u64 {
        self.skipped_fires.load(Ordering::Relaxed)
    }

    /// Whether a tick is currently running.
    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Start a tick unless one is already running.
    ///
    /// Returns the handle of the spawned tick, or `None` if the fire was
    /// skipped.
    pub fn fire(&self) -> Option<tokio::task::JoinHandle<()>> {
        let kind = self.indexer.kind();

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.skipped_fires.fetch_add(1, Ordering::Relaxed);
            warn!("{} tick still running, skipping this interval", kind);
            return None;
        }

        let guard = InFlightGuard(self.in_flight.clone());
        let indexer = self.indexer.clone();

        Some(tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = indexer.tick().await {
                warn!("{} tick failed: {:#}", kind, e);
            }
        }))
    }

    /// Fire immediately, then on every interval. Runs until the task is
    /// dropped.
    pub async fn run(&self) -> Result<()> {
        info!(
            "{} scheduler starting with interval: {:?}",
            self.indexer.kind(),
            self.interval
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            self.fire();
        }
    }
}
