//! Sub-indexers that mirror remote state into the snapshot store.
//!
//! - [`IterationSnapshotIndexer`]: rounds, lifecycle, tally, project metadata
//! - [`CertSnapshotIndexer`]: certificates, team rosters, eligibility, profiles
//!
//! A tick never fails because of a single remote read. Item-level failures
//! are logged and counted in the returned [`TickReport`]; only store
//! failures abort a network.

pub mod cert;
pub mod iteration;

pub use cert::CertSnapshotIndexer;
pub use iteration::IterationSnapshotIndexer;

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;

use crate::chain::SubIndexerKind;

/// Outcome counters of one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Networks walked to completion.
    pub networks_indexed: usize,
    /// Networks skipped (no code, unreachable, store failure).
    pub networks_skipped: usize,
    /// Records inserted or changed.
    pub written: usize,
    /// Records re-read with no change.
    pub unchanged: usize,
    /// Items skipped because a read failed or backoff applied.
    pub skipped: usize,
    /// Records deleted.
    pub deleted: usize,
}

impl TickReport {
    /// Add the counters of `other`.
    pub fn merge(&mut self, other: TickReport) {
        self.networks_indexed += other.networks_indexed;
        self.networks_skipped += other.networks_skipped;
        self.written += other.written;
        self.unchanged += other.unchanged;
        self.skipped += other.skipped;
        self.deleted += other.deleted;
    }

    /// A report for a network skipped before any work.
    pub fn skipped_network() -> Self {
        Self {
            networks_skipped: 1,
            ..Self::default()
        }
    }

    pub(crate) fn record_write(&mut self, changed: bool) {
        if changed {
            self.written += 1;
        } else {
            self.unchanged += 1;
        }
    }
}

impl fmt::Display for TickReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "networks={} skipped_networks={} written={} unchanged={} skipped={} deleted={}",
            self.networks_indexed,
            self.networks_skipped,
            self.written,
            self.unchanged,
            self.skipped,
            self.deleted
        )
    }
}

/// A periodically ticked sub-indexer.
#[async_trait]
pub trait SubIndexer: Send + Sync {
    /// Which sub-indexer this is.
    fn kind(&self) -> SubIndexerKind;

    /// Run one pass over every active network.
    async fn tick(&self) -> Result<TickReport>;
}
