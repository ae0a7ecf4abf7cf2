//! Compiled plan objects.

use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use kvsql_result::Result;

use crate::context::ExecContext;

/// Top-level classification the core dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanKind {
    /// Produces a result set; scheduled as a bootstrap task.
    Query,
    /// Mutates data; scheduled as a write task.
    Write,
    /// Schema change; runs inline on the calling thread.
    Ddl,
    /// Nothing to execute (e.g. a bare comment).
    Empty,
}

/// The plan's mirror container: the metadata the core needs without looking
/// inside the plan body.
#[derive(Debug, Clone)]
pub struct PlanMirror {
    /// Record shape of the result set; absent for non-queries.
    pub result_shape: Option<SchemaRef>,
    /// Estimated work level; plans at or below the configured
    /// `lightweight_job_level` run inline under the hybrid scheduler.
    pub work_level: u32,
}

impl PlanMirror {
    pub fn non_query(work_level: u32) -> Self {
        Self {
            result_shape: None,
            work_level,
        }
    }

    pub fn query(result_shape: SchemaRef, work_level: u32) -> Self {
        Self {
            result_shape: Some(result_shape),
            work_level,
        }
    }
}

/// Executable payload of a plan. Implemented by the compiler; opaque to the
/// core.
pub trait PlanBody: Send + Sync {
    /// Execute against the request context. Query bodies write record
    /// batches to the context's channel; write/DDL bodies update the
    /// statistics slot.
    fn run(&self, ctx: &dyn ExecContext) -> Result<()>;

    /// JSON rendering for explain output.
    fn explain_json(&self) -> String;

    /// Downcast hook; a compiler's `bind` uses it to recover its own body
    /// type from a plan it produced earlier.
    fn as_any(&self) -> &dyn std::any::Any;
}

/// A compiled (or parameter-bound) plan.
#[derive(Clone)]
pub struct Plan {
    kind: PlanKind,
    mirror: PlanMirror,
    body: Arc<dyn PlanBody>,
}

impl Plan {
    pub fn new(kind: PlanKind, mirror: PlanMirror, body: Arc<dyn PlanBody>) -> Self {
        Self { kind, mirror, body }
    }

    pub fn kind(&self) -> PlanKind {
        self.kind
    }

    pub fn mirror(&self) -> &PlanMirror {
        &self.mirror
    }

    pub fn result_shape(&self) -> Option<SchemaRef> {
        self.mirror.result_shape.clone()
    }

    pub fn work_level(&self) -> u32 {
        self.mirror.work_level
    }

    pub fn body(&self) -> &Arc<dyn PlanBody> {
        &self.body
    }

    pub fn run(&self, ctx: &dyn ExecContext) -> Result<()> {
        self.body.run(ctx)
    }

    pub fn explain_json(&self) -> String {
        self.body.explain_json()
    }
}

impl std::fmt::Debug for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plan")
            .field("kind", &self.kind)
            .field("work_level", &self.mirror.work_level)
            .field(
                "result_columns",
                &self
                    .mirror
                    .result_shape
                    .as_ref()
                    .map(|s| s.fields().len())
                    .unwrap_or(0),
            )
            .finish()
    }
}
