//! kvsql: a SQL execution engine over a pluggable MVCC key-value store.
//!
//! This umbrella crate re-exports the public surface of the workspace:
//!
//! ```no_run
//! use std::sync::Arc;
//! use kvsql::{Database, DatabaseConfig, DefaultSqlCompiler, TransactionOptions};
//!
//! # fn main() -> kvsql::Result<()> {
//! let db = Database::new(DatabaseConfig::default(), Arc::new(DefaultSqlCompiler::new()));
//! db.start()?;
//!
//! let ddl = db.create_executable(
//!     "CREATE TABLE t (c0 INT PRIMARY KEY)",
//!     Arc::new(kvsql::ParameterSet::new()),
//! )?;
//! db.execute_async(None, &ddl, None, Box::new(|_, _| {}), true)?;
//!
//! let tx = db.create_transaction(TransactionOptions::default())?;
//! let insert = db.create_executable(
//!     "INSERT INTO t VALUES (1)",
//!     Arc::new(kvsql::ParameterSet::new()),
//! )?;
//! db.execute_async(Some(&tx), &insert, None, Box::new(|_, _| {}), true)?;
//! db.commit(&tx, Default::default())?;
//!
//! db.stop()
//! # }
//! ```

pub use kvsql_core::{
    CommitOptions, CommitResponseKind, Database, DatabaseConfig, ExecutableStatement,
    PreparedStatement, SessionId, StatementHandle, SurrogateId, TransactionContext,
    TransactionHandle, TransactionOptions, TransactionState, TransactionType,
};
pub use kvsql_plan::{
    ChannelKind, CompileOptions, ExecutionStats, NullChannel, ParameterSet, ParameterValue, Plan,
    PlanKind, RecordChannel, ResultStore, SqlType, StatsSnapshot, Value,
};
pub use kvsql_result::{Error, ErrorCode, ErrorInfo, Result};
pub use kvsql_sql::DefaultSqlCompiler;

/// Storage capability bundle, for callers that inject or inspect the engine.
pub mod kv {
    pub use kvsql_kv::*;
}

/// Scheduler types, for callers that tune or observe jobs.
pub mod sched {
    pub use kvsql_sched::{Job, JobId, SchedulerConfig, SchedulerKind, TaskScheduler};
}

/// Batch-load entry points.
pub mod load {
    pub use kvsql_core::load::{BatchExecutor, LoadCompletion, LoadOptions};
}
