//! Batch loader: a three-level executor tree (batch / file / block) driving
//! parameterized insertion from columnar files under bounded file and block
//! concurrency, with unified error-abort semantics.

pub mod batch_executor;
pub mod block_executor;
pub mod file_executor;
pub mod reader;
pub mod state;

use std::path::PathBuf;
use std::sync::Arc;

use kvsql_plan::ParameterSet;
use kvsql_result::{ErrorInfo, Result};
use kvsql_sched::Task;

use crate::database::Database;
use crate::handles::{StatementHandle, TransactionHandle};
use crate::request::{RequestInfo, RequestKind};
use crate::transaction::{TransactionContext, TransactionOptions, TransactionState};

pub use batch_executor::BatchExecutor;
pub use reader::{ArrowIpcReaderFactory, ColumnarReaderFactory};
pub use state::BatchExecutionState;

/// Concurrency caps of one batch load.
#[derive(Debug, Clone, Copy)]
pub struct LoadOptions {
    pub max_concurrent_files: usize,
    pub max_concurrent_blocks_per_file: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            max_concurrent_files: 2,
            max_concurrent_blocks_per_file: 2,
        }
    }
}

/// Completion callback of a batch load; fires exactly once with the first
/// error (supplemented with file/block/statement position) or success.
pub type LoadCompletion = Box<dyn FnOnce(std::result::Result<(), ErrorInfo>) + Send>;

impl Database {
    /// Drive a parameterized prepared statement once per row of the given
    /// columnar files. The loader manages transactions internally, one per
    /// block; the request context carries no transaction of its own.
    pub fn execute_load(
        &self,
        statement: &StatementHandle,
        parameters: Arc<ParameterSet>,
        files: Vec<PathBuf>,
        options: LoadOptions,
        on_completion: LoadCompletion,
    ) -> Result<kvsql_sched::JobId> {
        self.execute_load_with_factory(
            statement,
            parameters,
            files,
            options,
            Arc::new(ArrowIpcReaderFactory),
            on_completion,
        )
        .map(|(job_id, _)| job_id)
    }

    /// [`Database::execute_load`] with an explicit reader factory. Also
    /// returns the batch executor so callers can observe its state.
    pub fn execute_load_with_factory(
        &self,
        statement: &StatementHandle,
        parameters: Arc<ParameterSet>,
        files: Vec<PathBuf>,
        options: LoadOptions,
        factory: Arc<dyn ColumnarReaderFactory>,
        on_completion: LoadCompletion,
    ) -> Result<(kvsql_sched::JobId, BatchExecutor)> {
        self.ensure_active()?;
        // The prepared statement must resolve before any file is touched.
        self.find_statement(statement)?;

        let rctx = self.create_request_context(None, None, RequestInfo::new(RequestKind::Load))?;
        let job = rctx.job().clone();
        let job_id = job.id();

        let executor = BatchExecutor::new(
            self.clone(),
            *statement,
            parameters,
            files,
            options,
            factory,
            Arc::clone(&rctx),
        );

        // The callback owns the executor, keeping the loader alive until the
        // job completes; it reports the loader's final status.
        let keep_alive = executor.clone();
        job.set_completion_callback(Box::new(move || {
            let status = keep_alive.state().error();
            tracing::info!(
                job_id,
                result = if status.is_none() { "success" } else { "fail" },
                "load completed"
            );
            match status {
                None => on_completion(Ok(())),
                Some(info) => on_completion(Err(info)),
            }
        }));

        let bootstrap = executor.clone();
        // The bootstrap task stays on its submission queue; the per-statement
        // executions it spawns are what fan out across workers.
        self.scheduler()?
            .submit(Task::run(job, move || bootstrap.bootstrap()).sticky());
        Ok((job_id, executor))
    }

    /// Begin one of the loader's internal per-block OCC transactions.
    pub(crate) fn begin_load_transaction(
        &self,
    ) -> Result<(TransactionHandle, Arc<TransactionContext>)> {
        let ctx = self.create_transaction_internal(&TransactionOptions::default())?;
        ctx.set_state(TransactionState::Active);
        Ok((ctx.handle(), ctx))
    }
}
