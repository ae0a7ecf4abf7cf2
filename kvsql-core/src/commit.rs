//! Three-phase asynchronous commit protocol.
//!
//! Phase 1 (submit, on a scheduler worker): gate on the termination state,
//! stamp the profile, resolve the effective commit-response kind, and hand
//! the KV engine an asynchronous commit.
//!
//! Phase 2 (precommit callback, from the KV engine): record the durability
//! marker, optionally auto-dispose the handle, and either tear the job down
//! (response kinds that unblock at precommit, or markers already durable) or
//! park the request on the durability waitlist.
//!
//! Phase 3 (durability callback): released waiters advance their profiles
//! and tear down.
//!
//! Job teardown then runs the completion callback — but not before the
//! completion-readiness predicate reports that no callback thread still
//! owns the request context. Without that gate, the KV engine's dispatch
//! thread could drop the last reference and re-enter the engine from inside
//! one of its own callbacks.

use std::sync::Arc;

use kvsql_kv::{DurabilityMarker, KvError, KvResult};
use kvsql_result::{Error, ErrorInfo, Result};
use kvsql_sched::Task;

use crate::database::Database;
use crate::handles::TransactionHandle;
use crate::request::{RequestContext, RequestInfo, RequestKind};
use crate::transaction::{
    CommitOptions, CommitResponseKind, TerminationError, TransactionContext, TransactionState,
};
use crate::EXTERNAL_LOG_TARGET;

/// Completion callback of an asynchronous commit.
pub type CommitCompletion = Box<dyn FnOnce(std::result::Result<(), ErrorInfo>) + Send>;

impl Database {
    /// Synchronous commit: schedules [`Database::commit_async`] and blocks
    /// on the job.
    pub fn commit(&self, handle: &TransactionHandle, options: CommitOptions) -> Result<()> {
        let result = Arc::new(std::sync::Mutex::new(None));
        let slot = Arc::clone(&result);
        let job_id = self.commit_async(
            handle,
            options,
            Box::new(move |status| {
                *slot.lock().expect("commit result slot poisoned") = Some(status);
            }),
        )?;
        self.scheduler()?.wait_for_progress(job_id);
        let status = result
            .lock()
            .expect("commit result slot poisoned")
            .take();
        status
            .ok_or_else(|| Error::Internal("commit completion never fired".into()))?
            .map_err(ErrorInfo::into_error)
    }

    /// Asynchronous commit. Returns the job id; the completion callback
    /// fires exactly once.
    pub fn commit_async(
        &self,
        handle: &TransactionHandle,
        options: CommitOptions,
        on_completion: CommitCompletion,
    ) -> Result<kvsql_sched::JobId> {
        self.ensure_active()?;
        let ctx = self.find_transaction(handle)?;
        let rctx = self.create_request_context(Some(Arc::clone(&ctx)), None, RequestInfo::new(RequestKind::Commit))?;
        let job = rctx.job().clone();
        let job_id = job.id();

        // Completion readiness: the job must not finalize while anything
        // other than the completion callback itself still owns the request
        // context (see the module comment).
        {
            let weak = Arc::downgrade(&rctx);
            job.set_completion_readiness(Box::new(move || weak.strong_count() <= 1));
        }

        {
            let completion_rctx = Arc::clone(&rctx);
            let completion_ctx = Arc::clone(&ctx);
            job.set_completion_callback(Box::new(move || {
                completion_ctx.profile().set_commit_job_completed();
                let error = completion_rctx.error();
                tracing::info!(
                    job_id,
                    transaction_id = completion_ctx.kv().id(),
                    result = if error.is_none() { "committed" } else { "fail" },
                    "commit job completed"
                );
                tracing::info!(
                    target: EXTERNAL_LOG_TARGET,
                    job_id,
                    transaction_id = completion_ctx.kv().id(),
                    result = if error.is_none() { "success" } else { "fail" },
                    "transaction_end"
                );
                match error {
                    None => on_completion(Ok(())),
                    Some(info) => on_completion(Err(info)),
                }
            }));
        }

        let db = self.clone();
        self.scheduler()?.submit(Task::run(job, move || {
            db.commit_submit_phase(rctx, ctx, options);
        }));
        Ok(job_id)
    }

    /// Phase 1: gates, profile stamp, KV commit submission.
    fn commit_submit_phase(
        &self,
        rctx: Arc<RequestContext>,
        ctx: Arc<TransactionContext>,
        options: CommitOptions,
    ) {
        tracing::debug!(
            job_id = rctx.job().id(),
            transaction_id = ctx.kv().id(),
            "committing"
        );
        ctx.profile().set_commit_requested();

        let effective = match options.response_kind {
            CommitResponseKind::Undefined => self.config().default_commit_response,
            kind => kind,
        };
        ctx.set_commit_response(effective);

        // A transaction already failed by a statement cannot serialize.
        if ctx.failed_by_statement() {
            rctx.set_error(ErrorInfo::from(Error::CcError(
                "transaction was aborted by a previous statement failure".into(),
            )));
            self.submit_teardown(&rctx);
            return;
        }
        match ctx.state() {
            TransactionState::Aborted | TransactionState::GoingToAbort => {
                rctx.set_error(ErrorInfo::from(Error::InactiveTransaction(
                    "transaction is not active".into(),
                )));
                self.submit_teardown(&rctx);
                return;
            }
            _ => {}
        }
        match ctx.termination().try_set_going_to_commit() {
            Ok(()) => {}
            Err(TerminationError::TasksInFlight) => {
                let snapshot = ctx.termination().snapshot();
                rctx.set_error(ErrorInfo::from(Error::IllegalOperation(format!(
                    "commit attempted while {} in-transaction tasks are executing",
                    snapshot.task_use_count
                ))));
                // The transaction cannot be committed any more; let the
                // running tasks drain into an abort.
                let _ = self.abort_transaction(&ctx.handle());
                self.submit_teardown(&rctx);
                return;
            }
            Err(TerminationError::AlreadyTerminating) => {
                rctx.set_error(ErrorInfo::from(Error::InactiveTransaction(
                    "transaction is already terminating".into(),
                )));
                self.submit_teardown(&rctx);
                return;
            }
        }
        ctx.set_state(TransactionState::GoingToCommit);

        let db = self.clone();
        let cb_rctx = Arc::clone(&rctx);
        let cb_ctx = Arc::clone(&ctx);
        let auto_dispose = options.auto_dispose;
        ctx.kv().commit(Box::new(move |status, marker| {
            db.commit_precommit_phase(cb_rctx, cb_ctx, status, marker, effective, auto_dispose);
        }));
    }

    /// Phase 2: the KV engine's precommit callback.
    fn commit_precommit_phase(
        &self,
        rctx: Arc<RequestContext>,
        ctx: Arc<TransactionContext>,
        status: KvResult<()>,
        marker: Option<DurabilityMarker>,
        effective: CommitResponseKind,
        auto_dispose: bool,
    ) {
        ctx.profile().set_precommit_cb_invoked();

        if let Err(err) = status {
            // Synthesize the error on a scheduler task rather than on the
            // engine's callback thread.
            ctx.set_state(TransactionState::Aborted);
            let db = self.clone();
            let job = rctx.job().clone();
            let Ok(scheduler) = self.scheduler() else {
                rctx.set_error(ErrorInfo::from(Error::InvalidState(
                    "scheduler gone during commit".into(),
                )));
                return;
            };
            scheduler.submit(Task::run(job, move || {
                let error = match err {
                    KvError::InactiveTransaction => Error::InactiveTransaction(
                        "transaction was inactive at precommit".into(),
                    ),
                    other => Error::CcError(format!("commit failed at precommit: {other}")),
                };
                rctx.set_error(
                    ErrorInfo::from(&error).with_supplement("transaction aborted at precommit"),
                );
                db.submit_teardown(&rctx);
            }));
            return;
        }

        if let Some(marker) = marker {
            ctx.set_durability_marker(marker);
        }
        ctx.set_state(TransactionState::CommittedVisible);

        if auto_dispose {
            if let Err(err) = self.destroy_transaction(&ctx.handle()) {
                tracing::warn!(
                    job_id = rctx.job().id(),
                    "auto-dispose of transaction handle failed: {err}"
                );
            }
        }

        if effective.responds_at_precommit() {
            self.submit_teardown(&rctx);
            return;
        }

        // Stored / propagated: wait for the durability watermark unless it
        // already dominates this transaction's marker (then the durability
        // phase is skipped outright and the profile keeps no durability
        // stamp).
        let marker = ctx.durability_marker().unwrap_or(0);
        if self.durability_manager().current() >= marker {
            ctx.set_state(TransactionState::CommittedDurable);
            self.submit_teardown(&rctx);
            return;
        }
        let db = self.clone();
        self.durability_manager().wait_for(
            marker,
            Box::new(move |_watermark| {
                ctx.profile().set_durability_cb_invoked();
                ctx.set_state(TransactionState::CommittedDurable);
                db.submit_teardown(&rctx);
            }),
        );
    }
}
