//! What a running plan body may touch.

use std::sync::Arc;

use kvsql_kv::KvTransaction;

use crate::channel::RecordChannel;
use crate::schema::{SchemaOps, SchemaView};
use crate::stats::ExecutionStats;

/// Execution-time view of the request context, implemented by the core.
///
/// Non-owning by contract: every reference returned here lives at least as
/// long as the request.
pub trait ExecContext: Send + Sync {
    /// The KV transaction this request runs under. Absent for DDL-style
    /// requests, which operate through [`ExecContext::schema_ops`].
    fn kv_transaction(&self) -> Option<Arc<dyn KvTransaction>>;

    /// Output channel; absent when results are discarded.
    fn channel(&self) -> Option<Arc<dyn RecordChannel>>;

    fn stats(&self) -> &ExecutionStats;

    fn schema_view(&self) -> Arc<dyn SchemaView>;

    fn schema_ops(&self) -> Arc<dyn SchemaOps>;

    /// Maximum records a scan emits before yielding.
    fn scan_block_size(&self) -> usize;
}
