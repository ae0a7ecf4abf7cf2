//! Root of the batch-loader tree.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use kvsql_plan::ParameterSet;
use kvsql_result::{Error, ErrorInfo};
use rustc_hash::FxHashMap;

use crate::database::Database;
use crate::handles::StatementHandle;
use crate::request::RequestContext;

use super::file_executor::BatchFileExecutor;
use super::reader::ColumnarReaderFactory;
use super::state::BatchExecutionState;
use super::LoadOptions;

pub(crate) struct BatchExecutorInner {
    pub(crate) db: Database,
    pub(crate) statement: StatementHandle,
    pub(crate) parameters: Arc<ParameterSet>,
    pub(crate) options: LoadOptions,
    pub(crate) factory: Arc<dyn ColumnarReaderFactory>,
    pub(crate) state: Arc<BatchExecutionState>,
    files: Vec<PathBuf>,
    next_file: AtomicUsize,
    /// Live file executors keyed by their address; membership is for
    /// release only — the counters are the done-ness authority.
    children: Mutex<FxHashMap<usize, Arc<BatchFileExecutor>>>,
    rctx: Arc<RequestContext>,
}

/// Owns the file list and the bounded set of live file executors.
#[derive(Clone)]
pub struct BatchExecutor {
    pub(crate) inner: Arc<BatchExecutorInner>,
}

impl BatchExecutor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        db: Database,
        statement: StatementHandle,
        parameters: Arc<ParameterSet>,
        files: Vec<PathBuf>,
        options: LoadOptions,
        factory: Arc<dyn ColumnarReaderFactory>,
        rctx: Arc<RequestContext>,
    ) -> Self {
        Self {
            inner: Arc::new(BatchExecutorInner {
                db,
                statement,
                parameters,
                options,
                factory,
                state: Arc::new(BatchExecutionState::new()),
                files,
                next_file: AtomicUsize::new(0),
                children: Mutex::new(FxHashMap::default()),
                rctx,
            }),
        }
    }

    pub fn state(&self) -> &Arc<BatchExecutionState> {
        &self.inner.state
    }

    /// Start up to `max_concurrent_files` file executors. If nothing ended
    /// up running (empty input, or an early error drained everything), the
    /// batch finishes right here.
    pub fn bootstrap(&self) {
        for _ in 0..self.inner.options.max_concurrent_files.max(1) {
            match self.next_file() {
                Some(file) => self.process_file(&file),
                None => break,
            }
        }
        self.maybe_finish();
    }

    /// Claim the next input file and construct its executor. `None` means
    /// end of input or a recorded failure.
    fn next_file(&self) -> Option<Arc<BatchFileExecutor>> {
        if self.inner.state.error_aborting() {
            return None;
        }
        let index = self.inner.next_file.fetch_add(1, Ordering::SeqCst);
        let path = self.inner.files.get(index)?.clone();

        match BatchFileExecutor::new(Arc::downgrade(&self.inner), path.clone()) {
            Ok(file) => {
                self.inner
                    .children
                    .lock()
                    .expect("batch children lock poisoned")
                    .insert(Arc::as_ptr(&file) as usize, Arc::clone(&file));
                Some(file)
            }
            Err(err) => {
                // A file that cannot open fails the whole batch.
                let info = ErrorInfo::from(&Error::LoadFile(format!(
                    "opening load file {} failed: {err}",
                    path.display()
                )))
                .with_supplement(format!("file:{}", path.display()));
                self.inner.state.try_set_error(info);
                None
            }
        }
    }

    fn process_file(&self, file: &Arc<BatchFileExecutor>) {
        file.bootstrap();
    }

    /// A file executor drained all of its blocks: release it and try to
    /// start the next file.
    pub(crate) fn end_of_file(&self, file: &Arc<BatchFileExecutor>) {
        self.release_file(file);
        if let Some(next) = self.next_file() {
            self.process_file(&next);
            return;
        }
        self.maybe_finish();
    }

    fn release_file(&self, file: &Arc<BatchFileExecutor>) {
        self.inner
            .children
            .lock()
            .expect("batch children lock poisoned")
            .remove(&(Arc::as_ptr(file) as usize));
    }

    /// Finish when nothing is running and either every file was released or
    /// the batch is error-aborting with its in-flight work drained.
    pub(crate) fn maybe_finish(&self) {
        if self.inner.state.running_statements() != 0 {
            return;
        }
        let drained = self
            .inner
            .children
            .lock()
            .expect("batch children lock poisoned")
            .is_empty();
        if drained || self.inner.state.error_aborting() {
            self.finish();
        }
    }

    /// One-shot completion: arms the load job, whose completion callback
    /// reports the final status to the caller.
    pub(crate) fn finish(&self) {
        if !self.inner.state.finish() {
            return;
        }
        tracing::debug!(
            job_id = self.inner.rctx.job().id(),
            running = self.inner.state.running_statements(),
            aborting = self.inner.state.error_aborting(),
            "batch executor finishing"
        );
        self.inner.db.submit_teardown(&self.inner.rctx);
    }
}
