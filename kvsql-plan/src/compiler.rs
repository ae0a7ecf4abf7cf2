//! The compiler interface the core invokes for prepare and resolve.

use std::sync::Arc;

use kvsql_result::Result;
use rustc_hash::FxHashMap;

use crate::params::ParameterSet;
use crate::plans::Plan;
use crate::schema::SchemaView;
use crate::value::SqlType;

/// Options accompanying a compile request.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// When set, the resulting prepared statement is registered in this
    /// session's store rather than the process-global one.
    pub session_id: Option<u64>,
    /// Declared host-variable types, by parameter name.
    pub host_variables: FxHashMap<String, SqlType>,
}

/// Everything the compiler needs from the database.
pub struct CompilerContext {
    pub schema: Arc<dyn SchemaView>,
    pub options: CompileOptions,
}

impl CompilerContext {
    pub fn new(schema: Arc<dyn SchemaView>, options: CompileOptions) -> Self {
        Self { schema, options }
    }
}

/// External SQL compiler.
///
/// `compile` turns SQL text into a reusable plan; `bind` re-enters the
/// compiler with a parameter set and produces the executable plan. Both are
/// pure with respect to the database: compilation never publishes partial
/// state.
pub trait SqlCompiler: Send + Sync {
    fn compile(&self, ctx: &CompilerContext, sql: &str) -> Result<Plan>;

    fn bind(&self, ctx: &CompilerContext, plan: &Plan, parameters: &ParameterSet) -> Result<Plan>;
}
