//! Shared state of one batch-load execution.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use kvsql_result::{ErrorCode, ErrorInfo};

/// Error/finish bookkeeping shared by every executor in the tree.
///
/// The first error wins: it flips `error_aborting`, which every worker polls
/// and exits on at its next step. `running_statements` counts in-flight
/// statement executions (block commits included) so the root can detect
/// "all tasks drained, even if we aborted mid-flight".
#[derive(Default)]
pub struct BatchExecutionState {
    error_aborting: AtomicBool,
    finished: AtomicBool,
    running_statements: AtomicUsize,
    error: Mutex<Option<ErrorInfo>>,
}

impl BatchExecutionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error_aborting(&self) -> bool {
        self.error_aborting.load(Ordering::SeqCst)
    }

    pub fn running_statements(&self) -> usize {
        self.running_statements.load(Ordering::SeqCst)
    }

    pub fn statement_started(&self) {
        self.running_statements.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns the count after the decrement.
    pub fn statement_finished(&self) -> usize {
        self.running_statements.fetch_sub(1, Ordering::SeqCst) - 1
    }

    /// Record an error. Only the first is kept; later ones are logged and
    /// discarded — except inactive-transaction errors, which are a common
    /// cascade symptom of the abort already in progress and would only spam
    /// the log.
    pub fn try_set_error(&self, info: ErrorInfo) -> bool {
        let mut slot = self.error.lock().expect("batch error slot poisoned");
        if slot.is_none() {
            tracing::warn!(
                "batch load aborting on first error: {} ({})",
                info.message(),
                info.code()
            );
            *slot = Some(info);
            self.error_aborting.store(true, Ordering::SeqCst);
            return true;
        }
        if info.code() != ErrorCode::InactiveTransactionException {
            tracing::warn!(
                "batch load suppressing subsequent error: {} ({})",
                info.message(),
                info.code()
            );
        }
        false
    }

    pub fn error(&self) -> Option<ErrorInfo> {
        self.error.lock().expect("batch error slot poisoned").clone()
    }

    /// One-shot finish guard; returns true for the caller that wins.
    pub fn finish(&self) -> bool {
        !self.finished.swap(true, Ordering::SeqCst)
    }

    pub fn finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvsql_result::Error;

    #[test]
    fn test_first_error_wins() {
        let state = BatchExecutionState::new();
        assert!(!state.error_aborting());
        assert!(state.try_set_error(ErrorInfo::from(Error::LoadFile("first".into()))));
        assert!(state.error_aborting());
        assert!(!state.try_set_error(ErrorInfo::from(Error::SqlService("second".into()))));
        assert_eq!(
            state.error().unwrap().code(),
            kvsql_result::ErrorCode::LoadFileException
        );
    }

    #[test]
    fn test_finish_is_one_shot() {
        let state = BatchExecutionState::new();
        assert!(state.finish());
        assert!(!state.finish());
        assert!(state.finished());
    }

    #[test]
    fn test_running_statement_accounting() {
        let state = BatchExecutionState::new();
        state.statement_started();
        state.statement_started();
        assert_eq!(state.running_statements(), 2);
        assert_eq!(state.statement_finished(), 1);
        assert_eq!(state.statement_finished(), 0);
    }
}
