//! Schema definitions shared by the catalog, the compiler and plan bodies.
//!
//! The catalog (in the core crate) is the runtime owner of these
//! definitions; the compiler reads them through [`SchemaView`] and DDL plan
//! bodies mutate them through [`SchemaOps`].

use std::sync::Arc;

use bitcode::{Decode, Encode};
use kvsql_result::Result;

use crate::value::SqlType;

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct ColumnDef {
    pub name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct TableDef {
    pub name: String,
    /// Caller-assigned definition id; stable across restarts.
    pub definition_id: Option<u64>,
    pub columns: Vec<ColumnDef>,
}

impl TableDef {
    /// Position and definition of a column, by name.
    pub fn column(&self, name: &str) -> Option<(usize, &ColumnDef)> {
        self.columns
            .iter()
            .enumerate()
            .find(|(_, c)| c.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct IndexKey {
    pub column: String,
    pub ascending: bool,
}

impl IndexKey {
    pub fn ascending(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct IndexDef {
    /// Simple name; also the name of the KV storage holding the index.
    pub name: String,
    /// Owning table.
    pub table: String,
    /// Stable definition id.
    pub definition_id: u64,
    pub keys: Vec<IndexKey>,
    /// Non-key columns materialized in the index entry.
    pub values: Vec<String>,
    pub primary: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct SequenceDef {
    pub name: String,
    /// Required: sequences cannot be registered without a definition id.
    pub definition_id: Option<u64>,
    pub initial_value: i64,
    pub increment: i64,
    pub min_value: i64,
    pub max_value: i64,
    pub cycle: bool,
}

impl Default for SequenceDef {
    fn default() -> Self {
        Self {
            name: String::new(),
            definition_id: None,
            initial_value: 0,
            increment: 1,
            min_value: 0,
            max_value: i64::MAX,
            cycle: false,
        }
    }
}

/// Read-only schema access for the compiler and plan bodies.
pub trait SchemaView: Send + Sync {
    fn find_table(&self, name: &str) -> Option<Arc<TableDef>>;
    fn find_index(&self, name: &str) -> Option<Arc<IndexDef>>;
    /// The primary index of a table, if the table has been materialized.
    fn primary_index(&self, table: &str) -> Option<Arc<IndexDef>>;
    fn secondary_indexes(&self, table: &str) -> Vec<Arc<IndexDef>>;
    /// User-visible table names (system tables filtered out).
    fn table_names(&self) -> Vec<String>;
}

/// Schema mutation seam used by DDL plan bodies.
pub trait SchemaOps: Send + Sync {
    fn create_table(&self, table: TableDef) -> Result<()>;
    fn drop_table(&self, name: &str) -> Result<()>;
    fn create_index(&self, index: IndexDef) -> Result<()>;
    fn drop_index(&self, name: &str) -> Result<()>;
    fn create_sequence(&self, sequence: SequenceDef) -> Result<()>;
}
