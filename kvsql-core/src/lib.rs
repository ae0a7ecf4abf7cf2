//! SQL execution core.
//!
//! This crate owns the four tightly coupled subsystems at the heart of
//! kvsql:
//!
//! 1. **The database object** ([`Database`]): lifecycle, metadata recovery,
//!    and the handle registries for prepared statements and transactions.
//! 2. **The statement and transaction pipelines**: prepare → resolve →
//!    execute-async over a per-request context, and transaction begin (with
//!    the LTX readiness wait), termination, and abort.
//! 3. **The commit protocol** ([`commit`]): a three-phase asynchronous commit
//!    decoupling pre-commit acknowledgement, durability acknowledgement, and
//!    client notification, with per-transaction profiling.
//! 4. **The batch loader** ([`load`]): a batch / file / block executor tree
//!    driving parameterized insertion from columnar files under bounded
//!    concurrency.
//!
//! External collaborators — the KV engine, the SQL compiler, the task
//! scheduler, and the columnar file reader — are consumed strictly through
//! the interfaces in `kvsql-kv`, `kvsql-plan` and `kvsql-sched`.
//!
//! External-log events (statement start/end, explain, transaction start/end)
//! are emitted as structured `tracing` events under the `kvsql::external`
//! target; the job id is the correlation id throughout.

pub mod catalog;
pub mod commit;
pub mod commit_stats;
pub mod config;
pub mod database;
pub mod durability;
pub mod handles;
pub mod load;
pub mod request;
pub mod statement;
pub mod transaction;

pub use config::DatabaseConfig;
pub use database::Database;
pub use handles::{SessionId, StatementHandle, SurrogateId, TransactionHandle};
pub use statement::{ExecutableStatement, PreparedStatement};
pub use transaction::{
    CommitOptions, CommitResponseKind, TransactionContext, TransactionOptions, TransactionState,
    TransactionType,
};

/// Target used for external-log events.
pub(crate) const EXTERNAL_LOG_TARGET: &str = "kvsql::external";
