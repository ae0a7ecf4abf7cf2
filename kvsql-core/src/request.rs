//! Per-request context and its factory.
//!
//! A request context bundles everything one SQL request touches: the job
//! registered with the scheduler, the (nullable) transaction context, the
//! (nullable) output channel, the mutable error and statistics slots, and
//! non-owning references back to the catalog and configuration. The job id
//! is the correlation id used in all external logging.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, RwLock};

use kvsql_kv::KvTransaction;
use kvsql_plan::{ExecContext, ExecutionStats, RecordChannel, SchemaOps, SchemaView};
use kvsql_result::ErrorInfo;
use kvsql_sched::{Job, TaskScheduler};

use crate::database::Database;
use crate::handles::SessionId;
use crate::transaction::TransactionContext;

/// Classification of the request, used by external logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Prepare,
    Begin,
    Commit,
    Rollback,
    ExecuteStatement,
    Load,
    Dispose,
}

/// Request detail: classification plus caller-supplied correlation fields
/// and the optional cancellation source.
#[derive(Clone, Default)]
pub struct RequestInfo {
    pub kind: Option<RequestKind>,
    pub sql_text: Option<Arc<str>>,
    /// Caller-local request id, copied into external-log events.
    pub local_id: Option<u64>,
    pub session_id: Option<SessionId>,
    /// Cancellation flag rooted in the caller (e.g. an RPC response
    /// channel). Checked only by conditional tasks.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl RequestInfo {
    pub fn new(kind: RequestKind) -> Self {
        Self {
            kind: Some(kind),
            ..Default::default()
        }
    }

    pub fn with_sql(mut self, sql: impl Into<Arc<str>>) -> Self {
        self.sql_text = Some(sql.into());
        self
    }

    pub fn with_source(
        mut self,
        local_id: Option<u64>,
        session_id: Option<SessionId>,
        cancel: Option<Arc<AtomicBool>>,
    ) -> Self {
        self.local_id = local_id;
        self.session_id = session_id;
        self.cancel = cancel;
        self
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|flag| flag.load(std::sync::atomic::Ordering::SeqCst))
            .unwrap_or(false)
    }
}

/// Everything one SQL request owns or references.
pub struct RequestContext {
    job: Job,
    scheduler: TaskScheduler,
    transaction: RwLock<Option<Arc<TransactionContext>>>,
    channel: Option<Arc<dyn RecordChannel>>,
    stats: ExecutionStats,
    error: Mutex<Option<ErrorInfo>>,
    schema_view: Arc<dyn SchemaView>,
    schema_ops: Arc<dyn SchemaOps>,
    scan_block_size: usize,
    info: RequestInfo,
    /// Holder of the database's request-in-process counter; released when
    /// the context drops.
    _in_process: Arc<()>,
}

impl RequestContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        job: Job,
        scheduler: TaskScheduler,
        transaction: Option<Arc<TransactionContext>>,
        channel: Option<Arc<dyn RecordChannel>>,
        schema_view: Arc<dyn SchemaView>,
        schema_ops: Arc<dyn SchemaOps>,
        scan_block_size: usize,
        info: RequestInfo,
        in_process: Arc<()>,
    ) -> Self {
        Self {
            job,
            scheduler,
            transaction: RwLock::new(transaction),
            channel,
            stats: ExecutionStats::new(),
            error: Mutex::new(None),
            schema_view,
            schema_ops,
            scan_block_size,
            info,
            _in_process: in_process,
        }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    pub fn transaction(&self) -> Option<Arc<TransactionContext>> {
        self.transaction
            .read()
            .expect("request transaction lock poisoned")
            .clone()
    }

    /// Install the transaction context; the begin pipeline sets it once the
    /// KV transaction exists.
    pub fn set_transaction(&self, transaction: Arc<TransactionContext>) {
        *self
            .transaction
            .write()
            .expect("request transaction lock poisoned") = Some(transaction);
    }

    pub fn request_channel(&self) -> Option<Arc<dyn RecordChannel>> {
        self.channel.clone()
    }

    pub fn info(&self) -> &RequestInfo {
        &self.info
    }

    pub fn execution_stats(&self) -> &ExecutionStats {
        &self.stats
    }

    /// Record an error; the first one wins, later ones are logged and
    /// discarded.
    pub fn set_error(&self, info: ErrorInfo) -> bool {
        let mut slot = self.error.lock().expect("request error lock poisoned");
        if slot.is_some() {
            tracing::debug!(
                job_id = self.job.id(),
                "suppressing subsequent request error: {} ({})",
                info.message(),
                info.code()
            );
            return false;
        }
        *slot = Some(info);
        true
    }

    pub fn error(&self) -> Option<ErrorInfo> {
        self.error
            .lock()
            .expect("request error lock poisoned")
            .clone()
    }
}

impl ExecContext for RequestContext {
    fn kv_transaction(&self) -> Option<Arc<dyn KvTransaction>> {
        self.transaction().map(|tx| Arc::clone(tx.kv()))
    }

    fn channel(&self) -> Option<Arc<dyn RecordChannel>> {
        self.channel.clone()
    }

    fn stats(&self) -> &ExecutionStats {
        &self.stats
    }

    fn schema_view(&self) -> Arc<dyn SchemaView> {
        Arc::clone(&self.schema_view)
    }

    fn schema_ops(&self) -> Arc<dyn SchemaOps> {
        Arc::clone(&self.schema_ops)
    }

    fn scan_block_size(&self) -> usize {
        self.scan_block_size
    }
}

impl Database {
    /// Request-context factory: registers a fresh job with the scheduler and
    /// bundles the per-request state. `transaction` and `channel` are
    /// nullable (DDL-style requests have neither).
    pub(crate) fn create_request_context(
        &self,
        transaction: Option<Arc<TransactionContext>>,
        channel: Option<Arc<dyn RecordChannel>>,
        info: RequestInfo,
    ) -> kvsql_result::Result<Arc<RequestContext>> {
        let scheduler = self.scheduler()?;
        let job = scheduler.register_job();
        if let (Some(local_id), Some(kind)) = (info.local_id, info.kind) {
            tracing::trace!(
                target: crate::EXTERNAL_LOG_TARGET,
                job_id = job.id(),
                local_id,
                session_id = info.session_id,
                "request accepted: {kind:?}"
            );
        }
        Ok(Arc::new(RequestContext::new(
            job,
            scheduler,
            transaction,
            channel,
            self.schema_view(),
            self.schema_ops()?,
            self.config().scan_block_size,
            info,
            self.request_guard(),
        )))
    }
}
