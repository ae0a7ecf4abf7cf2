//! Built-in function registry.
//!
//! The compiler resolves function names against this repository; the core
//! only owns registration and reset as part of the provider lifecycle.

use std::sync::RwLock;

use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Scalar,
    Aggregate,
    IncrementalAggregate,
}

#[derive(Default)]
pub struct FunctionRepository {
    entries: RwLock<FxHashMap<String, FunctionKind>>,
}

impl FunctionRepository {
    /// Register the built-in scalar, aggregate and incremental-aggregate
    /// functions. Called once from database start.
    pub fn register_builtins(&self) {
        let mut entries = self.entries.write().expect("function repository poisoned");
        for name in ["length", "upper", "lower", "abs", "mod", "substring"] {
            entries.insert(name.to_string(), FunctionKind::Scalar);
        }
        for name in ["count", "sum", "min", "max", "avg"] {
            entries.insert(name.to_string(), FunctionKind::Aggregate);
        }
        for name in ["count_incremental", "sum_incremental", "avg_incremental"] {
            entries.insert(name.to_string(), FunctionKind::IncrementalAggregate);
        }
    }

    pub fn find(&self, name: &str) -> Option<FunctionKind> {
        self.entries
            .read()
            .expect("function repository poisoned")
            .get(name)
            .copied()
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .expect("function repository poisoned")
            .clear();
    }
}
