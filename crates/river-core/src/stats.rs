//! Counters for indexed batches.

use std::sync::atomic::{AtomicU64, Ordering};

/// Outcome of a single batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Upserts submitted
    pub indexed: usize,
    /// Deletes submitted
    pub deleted: usize,
    /// Changes consumed without a mutation (design docs, ignored, failed transforms)
    pub skipped: usize,
    /// Lines that could not be decoded or carried an error marker
    pub dropped: usize,
    /// Items the sink rejected
    pub failed: usize,
    /// Checkpoint written with this batch, if any
    pub checkpoint: Option<String>,
}

impl BatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_index(&mut self) {
        self.indexed += 1;
    }

    pub fn record_delete(&mut self) {
        self.deleted += 1;
    }

    pub fn record_skip(&mut self) {
        self.skipped += 1;
    }

    pub fn record_drop(&mut self) {
        self.dropped += 1;
    }

    /// Total records consumed from the queue.
    pub fn consumed(&self) -> usize {
        self.indexed + self.deleted + self.skipped + self.dropped
    }

    /// Mutations submitted, excluding the checkpoint.
    pub fn mutations(&self) -> usize {
        self.indexed + self.deleted
    }

}

/// Running totals shared between the indexer task and its observers.
#[derive(Debug, Default)]
pub struct IndexerStats {
    batches: AtomicU64,
    indexed: AtomicU64,
    deleted: AtomicU64,
    skipped: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
    failed_batches: AtomicU64,
}

/// Point-in-time copy of [`IndexerStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub batches: u64,
    pub indexed: u64,
    pub deleted: u64,
    pub skipped: u64,
    pub dropped: u64,
    pub failed: u64,
    pub failed_batches: u64,
}

impl IndexerStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one submitted batch.
    pub fn record(&self, batch: &BatchStats) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.indexed.fetch_add(batch.indexed as u64, Ordering::Relaxed);
        self.deleted.fetch_add(batch.deleted as u64, Ordering::Relaxed);
        self.skipped.fetch_add(batch.skipped as u64, Ordering::Relaxed);
        self.dropped.fetch_add(batch.dropped as u64, Ordering::Relaxed);
        self.failed.fetch_add(batch.failed as u64, Ordering::Relaxed);
    }

    /// Count a batch the sink rejected as a whole.
    pub fn record_failed_batch(&self) {
        self.failed_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            batches: self.batches.load(Ordering::Relaxed),
            indexed: self.indexed.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            failed_batches: self.failed_batches.load(Ordering::Relaxed),
        }
    }
}
