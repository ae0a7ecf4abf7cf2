//! The database object: lifecycle, recovery, handle registries, and the
//! transaction pipeline.
//!
//! `Database` is a cheaply cloneable handle over shared state. `start`
//! validates configuration, opens (or adopts) the KV engine, rebuilds the
//! catalog from persisted metadata, bootstraps sequences, starts the task
//! scheduler and registers the durability callback. `stop` quiesces the
//! request-in-process counter, then tears everything down in reverse order.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use kvsql_kv::{KvEngine, KvError, KvTransactionOptions, TransactionMode};
use kvsql_plan::{SchemaOps, SchemaView, SqlCompiler};
use kvsql_result::{Error, ErrorInfo, Result};
use kvsql_sched::{Task, TaskScheduler};

use crate::catalog::sequence::SequenceManager;
use crate::catalog::{Catalog, CatalogOps, SYSTEM_SEQUENCES_NAME};
use crate::commit_stats::CommitStats;
use crate::config::DatabaseConfig;
use crate::durability::DurabilityManager;
use crate::handles::{SessionStores, SurrogateId, TransactionHandle};
use crate::request::{RequestContext, RequestInfo, RequestKind};
use crate::statement::PreparedStatement;
use crate::transaction::{
    TerminationError, TransactionContext, TransactionOptions, TransactionState, TransactionType,
};
use crate::EXTERNAL_LOG_TARGET;

/// Iterations of the stop-loop quiesce wait (1 ms apart).
const STOP_WAIT_ITERATIONS: u32 = 1000;

/// Completion callback of an asynchronous transaction begin.
pub type BeginCompletion =
    Box<dyn FnOnce(Option<TransactionHandle>, std::result::Result<(), ErrorInfo>) + Send>;

pub(crate) struct DatabaseInner {
    config: DatabaseConfig,
    compiler: Arc<dyn SqlCompiler>,
    /// Engine injected at construction; reused across start/stop cycles.
    injected_kv: Option<Arc<dyn KvEngine>>,
    kv: RwLock<Option<Arc<dyn KvEngine>>>,
    catalog: Arc<Catalog>,
    sequences: Arc<SequenceManager>,
    scheduler: RwLock<Option<TaskScheduler>>,
    pub(crate) statements: SessionStores<PreparedStatement>,
    pub(crate) transactions: SessionStores<TransactionContext>,
    next_surrogate_id: AtomicU64,
    commit_stats: Arc<CommitStats>,
    durability: Arc<DurabilityManager>,
    started: AtomicBool,
    stop_requested: AtomicBool,
    /// Request-in-process counter: every request clones this; the stop loop
    /// waits for the strong count to drop back to one (self-inclusive).
    requests: Arc<()>,
}

/// The database. Clones share all state.
#[derive(Clone)]
pub struct Database {
    pub(crate) inner: Arc<DatabaseInner>,
}

impl Database {
    pub fn new(config: DatabaseConfig, compiler: Arc<dyn SqlCompiler>) -> Self {
        Self::build(config, compiler, None)
    }

    /// Construct with an externally owned KV engine instead of opening one
    /// at the configured location.
    pub fn with_kv_engine(
        config: DatabaseConfig,
        compiler: Arc<dyn SqlCompiler>,
        kv: Arc<dyn KvEngine>,
    ) -> Self {
        Self::build(config, compiler, Some(kv))
    }

    fn build(
        config: DatabaseConfig,
        compiler: Arc<dyn SqlCompiler>,
        kv: Option<Arc<dyn KvEngine>>,
    ) -> Self {
        Self {
            inner: Arc::new(DatabaseInner {
                config,
                compiler,
                injected_kv: kv,
                kv: RwLock::new(None),
                catalog: Arc::new(Catalog::new()),
                sequences: Arc::new(SequenceManager::new()),
                scheduler: RwLock::new(None),
                statements: SessionStores::default(),
                transactions: SessionStores::default(),
                next_surrogate_id: AtomicU64::new(1),
                commit_stats: Arc::new(CommitStats::new()),
                durability: Arc::new(DurabilityManager::new()),
                started: AtomicBool::new(false),
                stop_requested: AtomicBool::new(false),
                requests: Arc::new(()),
            }),
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn config(&self) -> &DatabaseConfig {
        &self.inner.config
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.inner.catalog
    }

    pub fn schema_view(&self) -> Arc<dyn SchemaView> {
        Arc::clone(&self.inner.catalog) as Arc<dyn SchemaView>
    }

    pub fn schema_ops(&self) -> Result<Arc<dyn SchemaOps>> {
        Ok(Arc::new(CatalogOps::new(
            Arc::clone(&self.inner.catalog),
            self.kv_engine()?,
        )))
    }

    pub fn sequences(&self) -> &Arc<SequenceManager> {
        &self.inner.sequences
    }

    pub fn commit_stats(&self) -> &Arc<CommitStats> {
        &self.inner.commit_stats
    }

    pub fn durability_manager(&self) -> &Arc<DurabilityManager> {
        &self.inner.durability
    }

    pub(crate) fn compiler(&self) -> &Arc<dyn SqlCompiler> {
        &self.inner.compiler
    }

    pub fn kv_engine(&self) -> Result<Arc<dyn KvEngine>> {
        self.inner
            .kv
            .read()
            .expect("kv engine lock poisoned")
            .clone()
            .ok_or_else(|| Error::InvalidState("database is not started".into()))
    }

    pub fn scheduler(&self) -> Result<TaskScheduler> {
        self.inner
            .scheduler
            .read()
            .expect("scheduler lock poisoned")
            .clone()
            .ok_or_else(|| Error::InvalidState("database is not started".into()))
    }

    pub(crate) fn next_surrogate_id(&self) -> SurrogateId {
        self.inner.next_surrogate_id.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn request_guard(&self) -> Arc<()> {
        Arc::clone(&self.inner.requests)
    }

    /// Requests currently in process, the counter's own reference included.
    pub fn requests_in_process(&self) -> usize {
        Arc::strong_count(&self.inner.requests)
    }

    pub(crate) fn ensure_active(&self) -> Result<()> {
        if !self.inner.started.load(Ordering::SeqCst) {
            return Err(Error::InvalidState("database is not started".into()));
        }
        if self.inner.stop_requested.load(Ordering::SeqCst) {
            return Err(Error::InvalidState("database stop is in progress".into()));
        }
        Ok(())
    }

    /// Arm the request's job for teardown: inline when `inplace_teardown` is
    /// on, otherwise through a dedicated teardown task.
    pub(crate) fn submit_teardown(&self, rctx: &Arc<RequestContext>) {
        let job = rctx.job().clone();
        if self.inner.config.inplace_teardown {
            rctx.scheduler().arm_job(&job);
        } else {
            let armed = job.clone();
            rctx.scheduler()
                .submit(Task::run(job, move || armed.arm_completion()));
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub fn start(&self) -> Result<()> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(Error::InvalidState("database is already started".into()));
        }
        self.inner.stop_requested.store(false, Ordering::SeqCst);

        if let Err(err) = self.inner.config.validate_core_assignment() {
            self.inner.started.store(false, Ordering::SeqCst);
            return Err(err);
        }

        self.inner.catalog.reset();
        self.inner.catalog.functions().register_builtins();

        let kv = match &self.inner.injected_kv {
            Some(kv) => Arc::clone(kv),
            None => match kvsql_kv::open(&self.inner.config.location) {
                Ok(kv) => kv,
                Err(err) => {
                    self.inner.started.store(false, Ordering::SeqCst);
                    return Err(Error::io_message(format!("opening KV engine failed: {err}")));
                }
            },
        };

        if let Err(err) = self.start_with_engine(&kv) {
            // Roll back everything after the KV open.
            let _ = kv.close();
            self.inner.catalog.reset();
            self.inner.sequences.reset();
            self.inner.started.store(false, Ordering::SeqCst);
            return Err(err);
        }
        tracing::info!("database started");
        Ok(())
    }

    fn start_with_engine(&self, kv: &Arc<dyn KvEngine>) -> Result<()> {
        self.inner.catalog.setup_system_storage(kv)?;
        self.inner.catalog.recover_metadata(kv)?;
        self.initialize_from_providers(kv)?;

        *self.inner.kv.write().expect("kv engine lock poisoned") = Some(Arc::clone(kv));

        let scheduler = TaskScheduler::new(self.inner.config.scheduler_config());
        scheduler.start();
        *self
            .inner
            .scheduler
            .write()
            .expect("scheduler lock poisoned") = Some(scheduler);

        self.inner
            .commit_stats
            .set_enabled(self.inner.config.profile_commits);

        let weak: Weak<DatabaseInner> = Arc::downgrade(&self.inner);
        let omit_when_idle = self.inner.config.omit_task_when_idle;
        kv.register_durability_callback(Box::new(move |status, marker| {
            let Some(inner) = weak.upgrade() else { return };
            if let Err(err) = status {
                tracing::warn!("durability callback reported {err}");
                return;
            }
            inner.durability.on_durable(marker, omit_when_idle);
        }));
        Ok(())
    }

    /// Materialize every catalog index as a KV storage if not already
    /// present, then bootstrap the sequence manager from the persisted id
    /// map using a throwaway transaction.
    fn initialize_from_providers(&self, kv: &Arc<dyn KvEngine>) -> Result<()> {
        for index in self.inner.catalog.indexes().all() {
            let table = if index.primary {
                self.inner.catalog.tables().find(&index.table)
            } else {
                None
            };
            let payload =
                crate::catalog::metadata::encode_index_payload(table.as_deref(), &index);
            kv.get_or_create_storage(
                &index.name,
                kvsql_kv::StorageOptions::with_payload(payload),
            )
            .map_err(|err| {
                Error::Internal(format!(
                    "materializing storage for index '{}' failed: {err}",
                    index.name
                ))
            })?;
        }

        self.inner.sequences.bootstrap(Arc::clone(kv))?;
        for sequence in self.inner.catalog.sequences().all() {
            self.inner.sequences.register(&sequence)?;
        }
        Ok(())
    }

    /// Stop the database.
    ///
    /// Sets the stop-requested flag and spins with a 1 ms backoff until the
    /// request-in-process counter quiesces; after [`STOP_WAIT_ITERATIONS`]
    /// iterations the stop gives up with `TimedOut` and the database stays
    /// up.
    pub fn stop(&self) -> Result<()> {
        if !self.inner.started.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.stop_requested.store(true, Ordering::SeqCst);

        let mut quiesced = false;
        for _ in 0..STOP_WAIT_ITERATIONS {
            if Arc::strong_count(&self.inner.requests) <= 1 {
                quiesced = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        if !quiesced {
            self.inner.stop_requested.store(false, Ordering::SeqCst);
            return Err(Error::TimedOut(format!(
                "{} requests still in process after stop wait",
                Arc::strong_count(&self.inner.requests) - 1
            )));
        }

        if let Some(scheduler) = self
            .inner
            .scheduler
            .write()
            .expect("scheduler lock poisoned")
            .take()
        {
            scheduler.stop();
        }

        self.inner.sequences.reset();
        self.inner.statements.clear();
        self.inner.transactions.clear();
        self.inner.durability.clear();

        if let Some(kv) = self.inner.kv.write().expect("kv engine lock poisoned").take() {
            // An injected engine is caller-owned and stays open across
            // start/stop cycles; only a self-opened engine is closed here.
            if self.inner.injected_kv.is_none() {
                if let Err(err) = kv.close() {
                    tracing::warn!("closing KV engine reported {err}");
                }
            }
        }

        self.inner.commit_stats.dump();
        self.inner.catalog.reset();
        self.inner.started.store(false, Ordering::SeqCst);
        self.inner.stop_requested.store(false, Ordering::SeqCst);
        tracing::info!("database stopped");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Transaction pipeline
    // ------------------------------------------------------------------

    pub(crate) fn find_transaction(
        &self,
        handle: &TransactionHandle,
    ) -> Result<Arc<TransactionContext>> {
        self.inner
            .transactions
            .lookup(handle.surrogate_id(), handle.session_id())
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "transaction handle {} not found",
                    handle.surrogate_id()
                ))
            })
    }

    /// Synchronous begin: schedules the asynchronous pipeline and blocks on
    /// the job.
    pub fn create_transaction(&self, options: TransactionOptions) -> Result<TransactionHandle> {
        let result = Arc::new(std::sync::Mutex::new(None));
        let slot = Arc::clone(&result);
        let job_id = self.create_transaction_async(
            options,
            Box::new(move |handle, status| {
                *slot.lock().expect("begin result slot poisoned") = Some((handle, status));
            }),
        )?;
        self.scheduler()?.wait_for_progress(job_id);
        let (handle, status) = result
            .lock()
            .expect("begin result slot poisoned")
            .take()
            .ok_or_else(|| Error::Internal("begin completion never fired".into()))?;
        status.map_err(ErrorInfo::into_error)?;
        handle.ok_or_else(|| Error::Internal("begin reported success without a handle".into()))
    }

    /// Asynchronous begin. Returns the job id; the completion callback fires
    /// exactly once with the handle (on success) and the status.
    ///
    /// For an LTX the job stays open until the KV engine reports the
    /// transaction ready, or until the cancellation source in `options`'
    /// session request (if any, see [`RequestInfo::with_source`]) trips.
    pub fn create_transaction_async(
        &self,
        options: TransactionOptions,
        on_completion: BeginCompletion,
    ) -> Result<kvsql_sched::JobId> {
        self.create_transaction_async_with_source(options, None, on_completion)
    }

    /// Asynchronous begin with an explicit cancellation source. Begin-wait
    /// is the only cancelable wait exposed at the API.
    pub fn create_transaction_async_with_source(
        &self,
        options: TransactionOptions,
        cancel: Option<Arc<AtomicBool>>,
        on_completion: BeginCompletion,
    ) -> Result<kvsql_sched::JobId> {
        self.ensure_active()?;
        let info = RequestInfo::new(RequestKind::Begin).with_source(
            None,
            options.session_id,
            cancel,
        );
        let rctx = self.create_request_context(None, None, info)?;
        let job = rctx.job().clone();
        let job_id = job.id();

        {
            let rctx = Arc::clone(&rctx);
            job.set_completion_callback(Box::new(move || {
                let error = rctx.error();
                let transaction = rctx.transaction();
                match error {
                    None => {
                        if let Some(ctx) = &transaction {
                            ctx.set_state(TransactionState::Active);
                            tracing::info!(
                                job_id,
                                "transaction:started transaction_id={}",
                                ctx.kv().id()
                            );
                            tracing::info!(
                                target: EXTERNAL_LOG_TARGET,
                                job_id,
                                transaction_id = ctx.kv().id(),
                                label = ctx.label(),
                                "transaction_start"
                            );
                        }
                        on_completion(transaction.map(|ctx| ctx.handle()), Ok(()));
                    }
                    Some(info) => on_completion(None, Err(info)),
                }
            }));
        }

        let db = self.clone();
        let begin_rctx = Arc::clone(&rctx);
        self.scheduler()?.submit(Task::run(job, move || {
            db.begin_task(begin_rctx, options);
        }));
        Ok(job_id)
    }

    fn begin_task(&self, rctx: Arc<RequestContext>, options: TransactionOptions) {
        let job_id = rctx.job().id();
        tracing::info!(job_id, "transaction:starting options={options:?}");

        let ctx = match self.create_transaction_internal(&options) {
            Ok(ctx) => ctx,
            Err(err) => {
                rctx.set_error(ErrorInfo::from(&err));
                self.submit_teardown(&rctx);
                return;
            }
        };
        rctx.set_transaction(Arc::clone(&ctx));

        match options.transaction_type {
            TransactionType::Occ | TransactionType::ReadOnly => {
                self.submit_teardown(&rctx);
            }
            TransactionType::Ltx => {
                // Wait until the engine reports the transaction ready, or the
                // caller cancels.
                let kv = Arc::clone(ctx.kv());
                let cancel_probe = rctx.info().cancel.clone().map(|flag| {
                    Box::new(move || flag.load(Ordering::SeqCst))
                        as Box<dyn Fn() -> bool + Send>
                });
                let db = self.clone();
                let job = rctx.job().clone();
                let scheduler = rctx.scheduler().clone();
                scheduler.submit(Task::conditional(
                    job,
                    move || kv.is_ready(),
                    cancel_probe,
                    move |canceled| {
                        if canceled {
                            db.cancel_begin(&rctx, &ctx);
                        }
                        db.submit_teardown(&rctx);
                    },
                ));
            }
        }
    }

    fn cancel_begin(&self, rctx: &Arc<RequestContext>, ctx: &Arc<TransactionContext>) {
        tracing::info!(
            job_id = rctx.job().id(),
            "transaction begin canceled by request source"
        );
        if let Err(err) = ctx.kv().abort() {
            tracing::warn!("KV abort of canceled begin reported {err}");
        }
        ctx.set_state(TransactionState::Aborted);
        let handle = ctx.handle();
        self.inner
            .transactions
            .remove(handle.surrogate_id(), handle.session_id());
        rctx.set_error(ErrorInfo::from(Error::Canceled(
            "transaction begin canceled".into(),
        )));
    }

    /// The synchronous heart of begin: validate, normalize, begin on the KV
    /// engine, register the context.
    pub(crate) fn create_transaction_internal(
        &self,
        options: &TransactionOptions,
    ) -> Result<Arc<TransactionContext>> {
        self.ensure_active()?;
        let kv = self.kv_engine()?;
        let kv_options = self.normalize_transaction_options(options)?;

        let kv_transaction = kv.begin_transaction(&kv_options).map_err(|err| match err {
            KvError::InvalidArgument(msg) => Error::TargetNotFound(format!(
                "{msg}; transaction options: {options:?}"
            )),
            KvError::ResourceLimitReached => Error::TransactionExceededLimit(
                "the engine's concurrent transaction limit is reached".into(),
            ),
            other => Error::SqlExecution(format!("beginning transaction failed: {other}")),
        })?;

        let id = self.next_surrogate_id();
        let handle = TransactionHandle::new(id, options.session_id);
        let ctx = Arc::new(TransactionContext::new(
            handle,
            kv_transaction,
            options.clone(),
        ));
        self.inner
            .transactions
            .insert(id, options.session_id, Arc::clone(&ctx))?;
        Ok(ctx)
    }

    /// Replace table names in write-preserve and read-area lists with the
    /// storage names of their indexes. `modifies_definitions` appends the
    /// system sequences table to write-preserve; a non-empty inclusive read
    /// area is augmented with every write-preserved storage (writes imply
    /// reads).
    fn normalize_transaction_options(
        &self,
        options: &TransactionOptions,
    ) -> Result<KvTransactionOptions> {
        let catalog = &self.inner.catalog;
        let expand = |tables: &[String]| -> Result<Vec<String>> {
            let mut out = Vec::new();
            for table in tables {
                out.extend(catalog.storage_names_for_table(table).map_err(|err| {
                    Error::TargetNotFound(format!("{err} (in transaction option)"))
                })?);
            }
            Ok(out)
        };

        let mut write_preserve = expand(&options.write_preserve)?;
        if options.modifies_definitions
            && options.transaction_type == TransactionType::Ltx
        {
            write_preserve.push(SYSTEM_SEQUENCES_NAME.to_string());
        }
        let mut read_inclusive = expand(&options.read_areas_inclusive)?;
        if !read_inclusive.is_empty() {
            read_inclusive.extend(write_preserve.iter().cloned());
        }
        let read_exclusive = expand(&options.read_areas_exclusive)?;

        Ok(KvTransactionOptions {
            mode: Some(match options.transaction_type {
                TransactionType::Occ => TransactionMode::Occ,
                TransactionType::Ltx => TransactionMode::Ltx,
                TransactionType::ReadOnly => TransactionMode::ReadOnly,
            }),
            write_preserve,
            read_areas_inclusive: read_inclusive,
            read_areas_exclusive: read_exclusive,
        })
    }

    /// Abort a transaction. Idempotent; never a user-visible error once the
    /// handle resolves: aborting a committed or already-aborted transaction
    /// is ok and has no effect.
    pub fn abort_transaction(&self, handle: &TransactionHandle) -> Result<()> {
        let ctx = self.find_transaction(handle)?;
        match ctx.termination().try_set_going_to_abort() {
            Ok(snapshot) if snapshot.task_use_count == 0 => {
                self.complete_abort(&ctx);
            }
            Ok(_) => {
                // Tasks still running: they drain, the last one out completes
                // the abort.
                ctx.set_state(TransactionState::GoingToAbort);
            }
            Err(TerminationError::AlreadyTerminating | TerminationError::TasksInFlight) => {}
        }
        Ok(())
    }

    /// Finish an abort once no task is in flight.
    pub(crate) fn complete_abort(&self, ctx: &Arc<TransactionContext>) {
        let kv_status = ctx.kv().abort();
        ctx.set_state(TransactionState::Aborted);
        match kv_status {
            Ok(()) => {
                tracing::info!(
                    target: EXTERNAL_LOG_TARGET,
                    transaction_id = ctx.kv().id(),
                    result = "fail",
                    "transaction_end"
                );
            }
            Err(err) => {
                tracing::debug!(
                    "KV abort of transaction {} reported {err}",
                    ctx.handle().surrogate_id()
                );
            }
        }
    }

    /// Drop one session's statement and transaction stores with everything
    /// registered in them.
    pub fn dispose_session(&self, session_id: crate::handles::SessionId) {
        self.inner.statements.drop_session(session_id);
        self.inner.transactions.drop_session(session_id);
    }

    /// Remove the transaction handle. When commit profiling is enabled the
    /// transaction's profile is folded into the global commit stats first.
    pub fn destroy_transaction(&self, handle: &TransactionHandle) -> Result<()> {
        let removed = self
            .inner
            .transactions
            .remove(handle.surrogate_id(), handle.session_id())
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "transaction handle {} not found",
                    handle.surrogate_id()
                ))
            })?;
        self.inner.commit_stats.fold_profile(removed.profile());
        Ok(())
    }
}
