//! Per-request execution statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Mutable statistics slot carried by a request context. Plan bodies add to
/// it; the statement-end log and the completion callback read a snapshot.
#[derive(Debug, Default)]
pub struct ExecutionStats {
    fetched: AtomicU64,
    inserted: AtomicU64,
    updated: AtomicU64,
    deleted: AtomicU64,
    merged: AtomicU64,
}

impl ExecutionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_fetched(&self, n: u64) {
        self.fetched.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_inserted(&self, n: u64) {
        self.inserted.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_updated(&self, n: u64) {
        self.updated.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_deleted(&self, n: u64) {
        self.deleted.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_merged(&self, n: u64) {
        self.merged.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            fetched: self.fetched.load(Ordering::Relaxed),
            inserted: self.inserted.load(Ordering::Relaxed),
            updated: self.updated.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
            merged: self.merged.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ExecutionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub fetched: u64,
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
    pub merged: u64,
}
