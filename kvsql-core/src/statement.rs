//! Statement pipeline: prepare → resolve → execute-async, plus explain and
//! destroy.

use std::sync::Arc;

use kvsql_plan::{
    ChannelKind, CompileOptions, CompilerContext, ParameterSet, Plan, PlanKind, RecordChannel,
    SqlType, StatsSnapshot,
};
use kvsql_result::{Error, ErrorInfo, Result};
use kvsql_sched::Task;
use rustc_hash::FxHashMap;

use crate::database::Database;
use crate::handles::{SessionId, StatementHandle, TransactionHandle};
use crate::request::{RequestContext, RequestInfo, RequestKind};
use crate::transaction::{TransactionContext, TransactionState};
use crate::EXTERNAL_LOG_TARGET;

/// Completion callback of an asynchronous statement execution: status plus
/// the request's statistics snapshot.
pub type StatementCompletion =
    Box<dyn FnOnce(std::result::Result<(), ErrorInfo>, StatsSnapshot) + Send>;

/// A compiled statement registered in a statement store. Immutable after
/// creation; shared by the store and any in-flight execution.
pub struct PreparedStatement {
    sql: Arc<str>,
    plan: Plan,
    session_id: Option<SessionId>,
    host_variables: FxHashMap<String, SqlType>,
}

impl PreparedStatement {
    pub fn sql(&self) -> &Arc<str> {
        &self.sql
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id
    }

    pub fn host_variables(&self) -> &FxHashMap<String, SqlType> {
        &self.host_variables
    }

    /// Whether executions produce result records (queries do, writes and DDL
    /// do not).
    pub fn has_result_records(&self) -> bool {
        self.plan.result_shape().is_some()
    }
}

/// A prepared statement bound to a parameter set. Keeps the parameter set
/// alive until execution completes.
pub struct ExecutableStatement {
    plan: Plan,
    parameters: Arc<ParameterSet>,
    prepared: Arc<PreparedStatement>,
}

impl std::fmt::Debug for ExecutableStatement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutableStatement")
            .field("sql", &self.prepared.sql())
            .finish_non_exhaustive()
    }
}

impl ExecutableStatement {
    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn parameters(&self) -> &Arc<ParameterSet> {
        &self.parameters
    }

    pub fn sql(&self) -> &Arc<str> {
        self.prepared.sql()
    }

    pub fn result_shape(&self) -> Option<arrow::datatypes::SchemaRef> {
        self.plan.result_shape()
    }
}

impl Database {
    /// Compile SQL text and register the result.
    ///
    /// Registration target is the session store named by the compile
    /// options, or the process-global store when no session id is given. On
    /// compile failure nothing is published.
    pub fn prepare(&self, sql: &str, options: CompileOptions) -> Result<StatementHandle> {
        self.ensure_active()?;
        let _guard = self.request_guard();
        let context = CompilerContext::new(self.schema_view(), options.clone());
        let plan = self.compiler().compile(&context, sql)?;

        let id = self.next_surrogate_id();
        let handle = StatementHandle::new(id, options.session_id);
        let prepared = Arc::new(PreparedStatement {
            sql: Arc::from(sql),
            plan,
            session_id: options.session_id,
            host_variables: options.host_variables,
        });
        self.inner
            .statements
            .insert(id, handle.session_id(), prepared)?;
        tracing::debug!(statement_id = id, "prepared statement registered");
        Ok(handle)
    }

    pub(crate) fn find_statement(&self, handle: &StatementHandle) -> Result<Arc<PreparedStatement>> {
        self.inner
            .statements
            .lookup(handle.surrogate_id(), handle.session_id())
            .ok_or_else(|| {
                Error::StatementNotFound(format!(
                    "prepared statement {} not found",
                    handle.surrogate_id()
                ))
            })
    }

    /// Bind parameters to a prepared statement, producing an executable one.
    pub fn resolve(
        &self,
        handle: &StatementHandle,
        parameters: Arc<ParameterSet>,
    ) -> Result<Arc<ExecutableStatement>> {
        let prepared = self.find_statement(handle)?;
        self.resolve_prepared(&prepared, parameters)
    }

    pub(crate) fn resolve_prepared(
        &self,
        prepared: &Arc<PreparedStatement>,
        parameters: Arc<ParameterSet>,
    ) -> Result<Arc<ExecutableStatement>> {
        let context = CompilerContext::new(
            self.schema_view(),
            CompileOptions {
                session_id: prepared.session_id(),
                host_variables: prepared.host_variables().clone(),
            },
        );
        let plan = self
            .compiler()
            .bind(&context, prepared.plan(), &parameters)?;
        Ok(Arc::new(ExecutableStatement {
            plan,
            parameters,
            prepared: Arc::clone(prepared),
        }))
    }

    /// `prepare` and `resolve` fused; the intermediate prepared statement is
    /// not registered anywhere.
    pub fn create_executable(
        &self,
        sql: &str,
        parameters: Arc<ParameterSet>,
    ) -> Result<Arc<ExecutableStatement>> {
        self.ensure_active()?;
        let _guard = self.request_guard();
        let options = CompileOptions::default();
        let context = CompilerContext::new(self.schema_view(), options);
        let plan = self.compiler().compile(&context, sql)?;
        let prepared = Arc::new(PreparedStatement {
            sql: Arc::from(sql),
            plan,
            session_id: None,
            host_variables: FxHashMap::default(),
        });
        self.resolve_prepared(&prepared, parameters)
    }

    /// Remove a prepared statement from the store its handle names.
    pub fn destroy_statement(&self, handle: &StatementHandle) -> Result<()> {
        match self
            .inner
            .statements
            .remove(handle.surrogate_id(), handle.session_id())
        {
            Some(_) => Ok(()),
            None => {
                tracing::warn!(
                    statement_id = handle.surrogate_id(),
                    session_id = handle.session_id(),
                    "destroy requested for an unregistered statement"
                );
                Err(Error::InvalidArgument(format!(
                    "prepared statement {} not found",
                    handle.surrogate_id()
                )))
            }
        }
    }

    /// Render the plan's JSON explain output. No side effects.
    pub fn explain(&self, statement: &ExecutableStatement) -> Result<String> {
        Ok(statement.plan().explain_json())
    }

    /// Execute an executable statement.
    ///
    /// `transaction` is nullable for DDL-style statements. With `sync` the
    /// call blocks on the job; the completion callback fires either way.
    pub fn execute_async(
        &self,
        transaction: Option<&TransactionHandle>,
        statement: &Arc<ExecutableStatement>,
        channel: Option<Arc<dyn RecordChannel>>,
        on_completion: StatementCompletion,
        sync: bool,
    ) -> Result<()> {
        self.ensure_active()?;
        let tx_ctx = transaction
            .map(|handle| self.find_transaction(handle))
            .transpose()?;
        Self::validate_result_shape(statement, channel.as_deref())?;

        let info = RequestInfo::new(RequestKind::ExecuteStatement)
            .with_sql(Arc::clone(statement.sql()));
        let rctx = self.create_request_context(tx_ctx, channel, info)?;
        let job_id = rctx.job().id();

        self.install_statement_completion(&rctx, on_completion);
        self.log_statement_start(&rctx, statement);
        self.dispatch_statement(&rctx, statement)?;

        if sync {
            self.scheduler()?.wait_for_progress(job_id);
        }
        Ok(())
    }

    /// Execute-on-context: a two-step job whose first task resolves the
    /// prepared statement on a scheduler thread (so compilation cost is
    /// accounted to the scheduler), then continues with execution.
    pub fn execute_on_context_async(
        &self,
        transaction: &TransactionHandle,
        statement: &StatementHandle,
        parameters: Arc<ParameterSet>,
        channel: Option<Arc<dyn RecordChannel>>,
        on_completion: StatementCompletion,
        sync: bool,
    ) -> Result<()> {
        self.ensure_active()?;
        let tx_ctx = self.find_transaction(transaction)?;
        let prepared = self.find_statement(statement)?;

        let info = RequestInfo::new(RequestKind::ExecuteStatement)
            .with_sql(Arc::clone(prepared.sql()));
        let rctx = self.create_request_context(Some(tx_ctx), channel, info)?;
        let job = rctx.job().clone();
        let job_id = job.id();

        self.install_statement_completion(&rctx, on_completion);

        let db = self.clone();
        let resolve_rctx = Arc::clone(&rctx);
        self.scheduler()?.submit(Task::run(job, move || {
            let executable = match db.resolve_prepared(&prepared, parameters) {
                Ok(executable) => executable,
                Err(err) => {
                    resolve_rctx.set_error(ErrorInfo::from(&err));
                    db.submit_teardown(&resolve_rctx);
                    return;
                }
            };
            if let Err(err) = Self::validate_result_shape(
                &executable,
                resolve_rctx.request_channel().as_deref(),
            ) {
                resolve_rctx.set_error(ErrorInfo::from(&err));
                db.submit_teardown(&resolve_rctx);
                return;
            }
            db.log_statement_start(&resolve_rctx, &executable);
            // Already on a scheduler thread: run the body here rather than
            // bouncing through another task.
            db.run_statement_body(&resolve_rctx, &executable);
            db.submit_teardown(&resolve_rctx);
        }));

        if sync {
            self.scheduler()?.wait_for_progress(job_id);
        }
        Ok(())
    }

    /// A statement with no result columns must not be given a real record
    /// channel. The null sink and the in-memory result store are exempt.
    fn validate_result_shape(
        statement: &ExecutableStatement,
        channel: Option<&dyn RecordChannel>,
    ) -> Result<()> {
        if statement.result_shape().is_some() {
            return Ok(());
        }
        if let Some(channel) = channel {
            if channel.kind() == ChannelKind::Record {
                return Err(Error::InconsistentStatement(
                    "statement produces no result records but a record channel was supplied"
                        .into(),
                ));
            }
        }
        Ok(())
    }

    fn install_statement_completion(
        &self,
        rctx: &Arc<RequestContext>,
        on_completion: StatementCompletion,
    ) {
        let completion_rctx = Arc::clone(rctx);
        rctx.job().set_completion_callback(Box::new(move || {
            let stats = completion_rctx.execution_stats().snapshot();
            let error = completion_rctx.error();
            tracing::info!(
                target: EXTERNAL_LOG_TARGET,
                job_id = completion_rctx.job().id(),
                fetched = stats.fetched,
                inserted = stats.inserted,
                updated = stats.updated,
                deleted = stats.deleted,
                merged = stats.merged,
                result = if error.is_none() { "success" } else { "fail" },
                "statement_end"
            );
            match error {
                None => on_completion(Ok(()), stats),
                Some(info) => on_completion(Err(info), stats),
            }
        }));
    }

    fn log_statement_start(&self, rctx: &Arc<RequestContext>, statement: &ExecutableStatement) {
        tracing::info!(
            target: EXTERNAL_LOG_TARGET,
            job_id = rctx.job().id(),
            sql = %statement.sql(),
            "statement_start"
        );
        if self.config().plan_recording {
            tracing::info!(
                target: EXTERNAL_LOG_TARGET,
                job_id = rctx.job().id(),
                plan = %statement.plan().explain_json(),
                "stmt_explain"
            );
        }
    }

    /// Dispatch by plan kind: queries and writes go to the scheduler, DDL
    /// runs inline on the calling thread, empty plans tear down immediately.
    fn dispatch_statement(
        &self,
        rctx: &Arc<RequestContext>,
        statement: &Arc<ExecutableStatement>,
    ) -> Result<()> {
        let lightweight = statement.plan().work_level() <= self.config().lightweight_job_level;
        match statement.plan().kind() {
            PlanKind::Ddl => {
                let db = self.clone();
                let ddl_rctx = Arc::clone(rctx);
                let ddl_statement = Arc::clone(statement);
                let job = rctx.job().clone();
                self.scheduler()?.execute_inline(&job, move || {
                    db.run_statement_body(&ddl_rctx, &ddl_statement);
                    ddl_rctx.job().arm_completion();
                });
                Ok(())
            }
            PlanKind::Query | PlanKind::Write => {
                let db = self.clone();
                let task_rctx = Arc::clone(rctx);
                let task_statement = Arc::clone(statement);
                let job = rctx.job().clone();
                let task = Task::run(job, move || {
                    db.run_statement_body(&task_rctx, &task_statement);
                    db.submit_teardown(&task_rctx);
                })
                .in_transaction()
                .lightweight(lightweight);
                self.scheduler()?.submit(task);
                Ok(())
            }
            PlanKind::Empty => {
                self.submit_teardown(rctx);
                Ok(())
            }
        }
    }

    /// Run a plan body under the transaction's task-use accounting. Any
    /// execution error is recorded as the request's error and, when a
    /// transaction is present, fails the transaction.
    pub(crate) fn run_statement_body(
        &self,
        rctx: &Arc<RequestContext>,
        statement: &Arc<ExecutableStatement>,
    ) {
        match rctx.transaction() {
            Some(ctx) => {
                if !ctx.termination().try_increment_task_use() {
                    rctx.set_error(ErrorInfo::from(Error::InactiveTransaction(
                        "transaction is terminating".into(),
                    )));
                    return;
                }
                if let Err(err) = statement.plan().run(rctx.as_ref()) {
                    rctx.set_error(ErrorInfo::from(&err));
                    ctx.mark_failed_by_statement();
                }
                self.exit_transaction_task(&ctx);
            }
            None => {
                if let Err(err) = statement.plan().run(rctx.as_ref()) {
                    rctx.set_error(ErrorInfo::from(&err));
                }
            }
        }
    }

    /// Task exit: decrement the use count and, when an abort was waiting for
    /// the drain, complete it.
    pub(crate) fn exit_transaction_task(&self, ctx: &Arc<TransactionContext>) {
        let after = ctx.termination().decrement_task_use();
        if after.task_use_count == 0
            && after.going_to_abort
            && ctx.state() == TransactionState::GoingToAbort
        {
            self.complete_abort(ctx);
        }
    }
}
