//! Global commit statistics.
//!
//! Lock-free accumulator over commit phase durations. Each committed (or
//! failed) transaction's profile is folded in at destroy time when profiling
//! is enabled; `dump` serializes the accumulated picture to JSON and logs it
//! at stop.
//!
//! Min/max registers are plain atomics updated with compare-and-set
//! primitives; a reader observes a value that is ≤ any value ever stored as
//! max (dually for min), never a torn intermediate.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::transaction::CommitProfile;

#[derive(Debug)]
pub struct PhaseStats {
    min_nanos: AtomicU64,
    max_nanos: AtomicU64,
    sum_nanos: AtomicU64,
    count: AtomicU64,
}

impl Default for PhaseStats {
    fn default() -> Self {
        Self {
            min_nanos: AtomicU64::new(u64::MAX),
            max_nanos: AtomicU64::new(0),
            sum_nanos: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }
}

impl PhaseStats {
    fn record(&self, nanos: u64) {
        self.min_nanos.fetch_min(nanos, Ordering::SeqCst);
        self.max_nanos.fetch_max(nanos, Ordering::SeqCst);
        self.sum_nanos.fetch_add(nanos, Ordering::SeqCst);
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }

    pub fn min_nanos(&self) -> Option<u64> {
        match self.min_nanos.load(Ordering::SeqCst) {
            u64::MAX => None,
            value => Some(value),
        }
    }

    pub fn max_nanos(&self) -> Option<u64> {
        match self.count() {
            0 => None,
            _ => Some(self.max_nanos.load(Ordering::SeqCst)),
        }
    }

    pub fn avg_nanos(&self) -> Option<u64> {
        match self.count() {
            0 => None,
            n => Some(self.sum_nanos.load(Ordering::SeqCst) / n),
        }
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "count": self.count(),
            "min_ns": self.min_nanos(),
            "max_ns": self.max_nanos(),
            "avg_ns": self.avg_nanos(),
        })
    }
}

/// Accumulator fed by [`CommitProfile`]s.
#[derive(Debug, Default)]
pub struct CommitStats {
    enabled: AtomicBool,
    commit_requested: AtomicU64,
    precommit_cb_invoked: AtomicU64,
    durability_cb_invoked: AtomicU64,
    commit_job_completed: AtomicU64,
    /// commit requested → precommit callback.
    request_to_precommit: PhaseStats,
    /// precommit callback → durability callback.
    precommit_to_durability: PhaseStats,
    /// durability callback → job completed; falls back to precommit → job
    /// completed when durability was skipped.
    durability_to_completion: PhaseStats,
}

impl CommitStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Fold one transaction's profile in. No-op while disabled.
    pub fn fold_profile(&self, profile: &CommitProfile) {
        if !self.enabled() {
            return;
        }
        let requested = profile.commit_requested();
        let precommit = profile.precommit_cb_invoked();
        let durability = profile.durability_cb_invoked();
        let completed = profile.commit_job_completed();

        if requested.is_some() {
            self.commit_requested.fetch_add(1, Ordering::SeqCst);
        }
        if precommit.is_some() {
            self.precommit_cb_invoked.fetch_add(1, Ordering::SeqCst);
        }
        if durability.is_some() {
            self.durability_cb_invoked.fetch_add(1, Ordering::SeqCst);
        }
        if completed.is_some() {
            self.commit_job_completed.fetch_add(1, Ordering::SeqCst);
        }

        if let (Some(requested), Some(precommit)) = (requested, precommit) {
            self.request_to_precommit
                .record(precommit.saturating_sub(requested));
        }
        if let (Some(precommit), Some(durability)) = (precommit, durability) {
            self.precommit_to_durability
                .record(durability.saturating_sub(precommit));
        }
        match (precommit, durability, completed) {
            (_, Some(durability), Some(completed)) => {
                self.durability_to_completion
                    .record(completed.saturating_sub(durability));
            }
            (Some(precommit), None, Some(completed)) => {
                self.durability_to_completion
                    .record(completed.saturating_sub(precommit));
            }
            _ => {}
        }
    }

    pub fn commit_count(&self) -> u64 {
        self.commit_requested.load(Ordering::SeqCst)
    }

    pub fn request_to_precommit(&self) -> &PhaseStats {
        &self.request_to_precommit
    }

    pub fn precommit_to_durability(&self) -> &PhaseStats {
        &self.precommit_to_durability
    }

    pub fn durability_to_completion(&self) -> &PhaseStats {
        &self.durability_to_completion
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "counters": {
                "commit_requested": self.commit_requested.load(Ordering::SeqCst),
                "precommit_cb_invoked": self.precommit_cb_invoked.load(Ordering::SeqCst),
                "durability_cb_invoked": self.durability_cb_invoked.load(Ordering::SeqCst),
                "commit_job_completed": self.commit_job_completed.load(Ordering::SeqCst),
            },
            "request_to_precommit": self.request_to_precommit.to_json(),
            "precommit_to_durability": self.precommit_to_durability.to_json(),
            "durability_to_completion": self.durability_to_completion.to_json(),
        })
    }

    /// Serialize and log the accumulated statistics.
    pub fn dump(&self) {
        if !self.enabled() {
            return;
        }
        tracing::info!(
            target: "kvsql::stats",
            "commit statistics: {}",
            self.to_json()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_skips_when_disabled() {
        let stats = CommitStats::new();
        let ctx = crate::transaction::TransactionContext::new(
            crate::handles::TransactionHandle::new(1, None),
            test_support::dummy_kv_transaction(),
            Default::default(),
        );
        ctx.profile().set_commit_requested();
        ctx.profile().set_precommit_cb_invoked();
        ctx.profile().set_commit_job_completed();
        stats.fold_profile(ctx.profile());
        assert_eq!(stats.commit_count(), 0);
    }

    mod test_support {
        use std::sync::Arc;

        use kvsql_kv::{
            CommitCallback, DurabilityMarker, KvResult, KvTransaction, KvTransactionId,
            PutOperation, ScanRange,
        };

        struct DummyTransaction;

        impl KvTransaction for DummyTransaction {
            fn id(&self) -> KvTransactionId {
                0
            }
            fn is_ready(&self) -> bool {
                true
            }
            fn get(&self, _: &str, _: &[u8]) -> KvResult<Option<Vec<u8>>> {
                Ok(None)
            }
            fn put(&self, _: &str, _: &[u8], _: &[u8], _: PutOperation) -> KvResult<()> {
                Ok(())
            }
            fn remove(&self, _: &str, _: &[u8]) -> KvResult<bool> {
                Ok(false)
            }
            fn scan(&self, _: &str, _: &ScanRange) -> KvResult<Vec<(Vec<u8>, Vec<u8>)>> {
                Ok(Vec::new())
            }
            fn commit(&self, callback: CommitCallback) {
                callback(Ok(()), Some(1));
            }
            fn abort(&self) -> KvResult<()> {
                Ok(())
            }
            fn durability_marker(&self) -> Option<DurabilityMarker> {
                None
            }
        }

        pub fn dummy_kv_transaction() -> Arc<dyn KvTransaction> {
            Arc::new(DummyTransaction)
        }
    }

    #[test]
    fn test_fold_with_and_without_durability() {
        let stats = CommitStats::new();
        stats.set_enabled(true);

        let ctx = crate::transaction::TransactionContext::new(
            crate::handles::TransactionHandle::new(1, None),
            test_support::dummy_kv_transaction(),
            Default::default(),
        );
        ctx.profile().set_commit_requested();
        ctx.profile().set_precommit_cb_invoked();
        ctx.profile().set_durability_cb_invoked();
        ctx.profile().set_commit_job_completed();
        stats.fold_profile(ctx.profile());

        let ctx2 = crate::transaction::TransactionContext::new(
            crate::handles::TransactionHandle::new(2, None),
            test_support::dummy_kv_transaction(),
            Default::default(),
        );
        ctx2.profile().set_commit_requested();
        ctx2.profile().set_precommit_cb_invoked();
        ctx2.profile().set_commit_job_completed();
        stats.fold_profile(ctx2.profile());

        assert_eq!(stats.commit_count(), 2);
        assert_eq!(stats.request_to_precommit().count(), 2);
        assert_eq!(stats.precommit_to_durability().count(), 1);
        // The durability-skipped commit still lands in the completion phase
        // via the precommit fallback.
        assert_eq!(stats.durability_to_completion().count(), 2);
        assert!(stats.to_json()["counters"]["commit_requested"].as_u64() == Some(2));
    }
}
