//! Transaction context: SQL-level options, lifecycle and termination state,
//! and the per-transaction commit profile.
//!
//! The begin/abort/destroy pipeline itself lives in [`crate::database`]'s
//! impl blocks; the commit protocol in [`crate::commit`].

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use kvsql_kv::{DurabilityMarker, KvTransaction};

use crate::handles::{SessionId, TransactionHandle};

/// SQL-level transaction mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionType {
    /// Short optimistic transaction.
    #[default]
    Occ,
    /// Long-running transaction with write preservation.
    Ltx,
    ReadOnly,
}

/// Options supplied at transaction begin.
///
/// Write-preserve and read-area entries are *table* names here; they are
/// normalized to index storage names before the KV begin.
#[derive(Debug, Clone, Default)]
pub struct TransactionOptions {
    pub transaction_type: TransactionType,
    pub write_preserve: Vec<String>,
    pub read_areas_inclusive: Vec<String>,
    pub read_areas_exclusive: Vec<String>,
    /// The transaction will change definitions; the system sequences table
    /// joins the write-preserve set.
    pub modifies_definitions: bool,
    pub scan_parallel: Option<u32>,
    pub session_id: Option<SessionId>,
    pub label: Option<String>,
}

/// When the commit callback fires relative to commit progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum CommitResponseKind {
    /// Defer to the database default.
    #[default]
    Undefined = 0,
    /// Respond when the engine accepted the request.
    Accepted = 1,
    /// Respond when the commit is visible to others.
    Available = 2,
    /// Respond when the commit is durable on local storage.
    Stored = 3,
    /// Respond when the commit is propagated to replicas.
    Propagated = 4,
}

impl CommitResponseKind {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => CommitResponseKind::Accepted,
            2 => CommitResponseKind::Available,
            3 => CommitResponseKind::Stored,
            4 => CommitResponseKind::Propagated,
            _ => CommitResponseKind::Undefined,
        }
    }

    /// Whether the client unblocks at precommit rather than durability.
    pub fn responds_at_precommit(self) -> bool {
        matches!(
            self,
            CommitResponseKind::Accepted | CommitResponseKind::Available
        )
    }
}

/// Options supplied at commit.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommitOptions {
    pub response_kind: CommitResponseKind,
    /// Destroy the transaction handle automatically at precommit.
    pub auto_dispose: bool,
}

/// Transaction lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransactionState {
    Init = 0,
    Active = 1,
    GoingToCommit = 2,
    GoingToAbort = 3,
    CommittedVisible = 4,
    CommittedDurable = 5,
    Aborted = 6,
}

impl TransactionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => TransactionState::Active,
            2 => TransactionState::GoingToCommit,
            3 => TransactionState::GoingToAbort,
            4 => TransactionState::CommittedVisible,
            5 => TransactionState::CommittedDurable,
            6 => TransactionState::Aborted,
            _ => TransactionState::Init,
        }
    }
}

const FLAG_GOING_TO_COMMIT: u64 = 1 << 63;
const FLAG_GOING_TO_ABORT: u64 = 1 << 62;
const TASK_COUNT_MASK: u64 = FLAG_GOING_TO_ABORT - 1;

/// Why the termination state refused a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationError {
    /// In-transaction tasks are still executing.
    TasksInFlight,
    /// `going_to_commit` or `going_to_abort` was already set.
    AlreadyTerminating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminationSnapshot {
    pub task_use_count: u64,
    pub going_to_commit: bool,
    pub going_to_abort: bool,
}

/// Packed `{going_to_commit, going_to_abort, task_use_count}` guarding
/// commit/abort against in-flight tasks. All transitions are CAS-based.
#[derive(Debug, Default)]
pub struct TerminationState {
    bits: AtomicU64,
}

impl TerminationState {
    fn unpack(bits: u64) -> TerminationSnapshot {
        TerminationSnapshot {
            task_use_count: bits & TASK_COUNT_MASK,
            going_to_commit: bits & FLAG_GOING_TO_COMMIT != 0,
            going_to_abort: bits & FLAG_GOING_TO_ABORT != 0,
        }
    }

    pub fn snapshot(&self) -> TerminationSnapshot {
        Self::unpack(self.bits.load(Ordering::SeqCst))
    }

    /// Task entry gate: fails once either termination flag is set.
    pub fn try_increment_task_use(&self) -> bool {
        let mut current = self.bits.load(Ordering::SeqCst);
        loop {
            if current & (FLAG_GOING_TO_COMMIT | FLAG_GOING_TO_ABORT) != 0 {
                return false;
            }
            match self.bits.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Task exit; returns the state after the decrement.
    pub fn decrement_task_use(&self) -> TerminationSnapshot {
        let previous = self.bits.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous & TASK_COUNT_MASK > 0, "task use count underflow");
        Self::unpack(previous - 1)
    }

    /// Commit gate: rejected while tasks run or after either flag is set.
    pub fn try_set_going_to_commit(&self) -> Result<(), TerminationError> {
        let mut current = self.bits.load(Ordering::SeqCst);
        loop {
            if current & (FLAG_GOING_TO_COMMIT | FLAG_GOING_TO_ABORT) != 0 {
                return Err(TerminationError::AlreadyTerminating);
            }
            if current & TASK_COUNT_MASK != 0 {
                return Err(TerminationError::TasksInFlight);
            }
            match self.bits.compare_exchange(
                current,
                current | FLAG_GOING_TO_COMMIT,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Ok(()),
                Err(observed) => current = observed,
            }
        }
    }

    /// Abort flag: may be set while tasks run (they drain). Returns the
    /// snapshot after the flip, or `AlreadyTerminating` when a flag was
    /// already present.
    pub fn try_set_going_to_abort(&self) -> Result<TerminationSnapshot, TerminationError> {
        let mut current = self.bits.load(Ordering::SeqCst);
        loop {
            if current & (FLAG_GOING_TO_COMMIT | FLAG_GOING_TO_ABORT) != 0 {
                return Err(TerminationError::AlreadyTerminating);
            }
            match self.bits.compare_exchange(
                current,
                current | FLAG_GOING_TO_ABORT,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Ok(Self::unpack(current | FLAG_GOING_TO_ABORT)),
                Err(observed) => current = observed,
            }
        }
    }
}

/// The four commit-phase capture points plus derived durations. All fields
/// are nanosecond offsets from the context's creation instant; zero means
/// "not captured".
#[derive(Debug)]
pub struct CommitProfile {
    base: Instant,
    requested: AtomicU64,
    precommit_cb: AtomicU64,
    durability_cb: AtomicU64,
    job_completed: AtomicU64,
}

impl CommitProfile {
    fn new() -> Self {
        Self {
            base: Instant::now(),
            requested: AtomicU64::new(0),
            precommit_cb: AtomicU64::new(0),
            durability_cb: AtomicU64::new(0),
            job_completed: AtomicU64::new(0),
        }
    }

    fn now_nanos(&self) -> u64 {
        (self.base.elapsed().as_nanos() as u64).max(1)
    }

    pub fn set_commit_requested(&self) {
        self.requested.store(self.now_nanos(), Ordering::SeqCst);
    }

    pub fn set_precommit_cb_invoked(&self) {
        self.precommit_cb.store(self.now_nanos(), Ordering::SeqCst);
    }

    pub fn set_durability_cb_invoked(&self) {
        self.durability_cb.store(self.now_nanos(), Ordering::SeqCst);
    }

    pub fn set_commit_job_completed(&self) {
        self.job_completed.store(self.now_nanos(), Ordering::SeqCst);
    }

    fn get(slot: &AtomicU64) -> Option<u64> {
        match slot.load(Ordering::SeqCst) {
            0 => None,
            nanos => Some(nanos),
        }
    }

    pub fn commit_requested(&self) -> Option<u64> {
        Self::get(&self.requested)
    }

    pub fn precommit_cb_invoked(&self) -> Option<u64> {
        Self::get(&self.precommit_cb)
    }

    pub fn durability_cb_invoked(&self) -> Option<u64> {
        Self::get(&self.durability_cb)
    }

    pub fn commit_job_completed(&self) -> Option<u64> {
        Self::get(&self.job_completed)
    }
}

/// Server-side transaction object: the KV transaction plus SQL-level state.
pub struct TransactionContext {
    handle: TransactionHandle,
    kv: Arc<dyn KvTransaction>,
    options: TransactionOptions,
    state: AtomicU8,
    termination: TerminationState,
    commit_response: AtomicU8,
    profile: CommitProfile,
    durability_marker: AtomicU64,
    /// Set when a statement running on this transaction failed; the KV side
    /// has been aborted and a later commit reports a serialization failure.
    failed_by_statement: AtomicBool,
}

impl TransactionContext {
    pub fn new(
        handle: TransactionHandle,
        kv: Arc<dyn KvTransaction>,
        options: TransactionOptions,
    ) -> Self {
        Self {
            handle,
            kv,
            options,
            state: AtomicU8::new(TransactionState::Init as u8),
            termination: TerminationState::default(),
            commit_response: AtomicU8::new(CommitResponseKind::Undefined as u8),
            profile: CommitProfile::new(),
            durability_marker: AtomicU64::new(0),
            failed_by_statement: AtomicBool::new(false),
        }
    }

    pub fn handle(&self) -> TransactionHandle {
        self.handle
    }

    pub fn kv(&self) -> &Arc<dyn KvTransaction> {
        &self.kv
    }

    pub fn options(&self) -> &TransactionOptions {
        &self.options
    }

    pub fn label(&self) -> Option<&str> {
        self.options.label.as_deref()
    }

    pub fn state(&self) -> TransactionState {
        TransactionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn set_state(&self, state: TransactionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub fn termination(&self) -> &TerminationState {
        &self.termination
    }

    pub fn profile(&self) -> &CommitProfile {
        &self.profile
    }

    pub fn commit_response(&self) -> CommitResponseKind {
        CommitResponseKind::from_u8(self.commit_response.load(Ordering::SeqCst))
    }

    pub fn set_commit_response(&self, kind: CommitResponseKind) {
        self.commit_response.store(kind as u8, Ordering::SeqCst);
    }

    pub fn durability_marker(&self) -> Option<DurabilityMarker> {
        match self.durability_marker.load(Ordering::SeqCst) {
            0 => None,
            marker => Some(marker),
        }
    }

    pub fn set_durability_marker(&self, marker: DurabilityMarker) {
        self.durability_marker.store(marker, Ordering::SeqCst);
    }

    pub fn failed_by_statement(&self) -> bool {
        self.failed_by_statement.load(Ordering::SeqCst)
    }

    /// Record a statement failure: abort the KV side once and leave the
    /// context in the aborted lifecycle state.
    pub fn mark_failed_by_statement(&self) {
        if self.failed_by_statement.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(err) = self.kv.abort() {
            tracing::warn!(
                "KV abort after statement failure reported {err} (transaction {})",
                self.handle.surrogate_id()
            );
        }
        self.set_state(TransactionState::Aborted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_rejected_while_tasks_in_flight() {
        let termination = TerminationState::default();
        assert!(termination.try_increment_task_use());
        assert_eq!(
            termination.try_set_going_to_commit(),
            Err(TerminationError::TasksInFlight)
        );
        let after = termination.decrement_task_use();
        assert_eq!(after.task_use_count, 0);
        termination.try_set_going_to_commit().unwrap();
        // No task may enter once commit is in progress.
        assert!(!termination.try_increment_task_use());
    }

    #[test]
    fn test_abort_lets_tasks_drain() {
        let termination = TerminationState::default();
        assert!(termination.try_increment_task_use());
        let snapshot = termination.try_set_going_to_abort().unwrap();
        assert!(snapshot.going_to_abort);
        assert_eq!(snapshot.task_use_count, 1);
        assert!(!termination.try_increment_task_use());
        let after = termination.decrement_task_use();
        assert_eq!(after.task_use_count, 0);
        assert!(after.going_to_abort);
    }

    #[test]
    fn test_terminating_twice_is_rejected() {
        let termination = TerminationState::default();
        termination.try_set_going_to_abort().unwrap();
        assert_eq!(
            termination.try_set_going_to_commit(),
            Err(TerminationError::AlreadyTerminating)
        );
        assert_eq!(
            termination.try_set_going_to_abort(),
            Err(TerminationError::AlreadyTerminating)
        );
    }

    #[test]
    fn test_profile_capture_order() {
        let profile = CommitProfile::new();
        assert!(profile.commit_requested().is_none());
        profile.set_commit_requested();
        profile.set_precommit_cb_invoked();
        profile.set_commit_job_completed();
        let requested = profile.commit_requested().unwrap();
        let precommit = profile.precommit_cb_invoked().unwrap();
        let completed = profile.commit_job_completed().unwrap();
        assert!(requested <= precommit && precommit <= completed);
        assert!(profile.durability_cb_invoked().is_none());
    }
}
