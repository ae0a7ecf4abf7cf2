//! Storage and metadata catalog.
//!
//! The catalog gives the SQL layer a typed view of the schema and serializes
//! every schema change into the KV storage options so a cold restart can
//! reconstruct it. At runtime the catalog is the single source of truth; the
//! KV payloads are the single source of truth across restarts.

pub mod functions;
pub mod metadata;
pub mod provider;
pub mod sequence;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use kvsql_kv::{KvEngine, KvError, StorageOptions};
use kvsql_plan::codec::is_key_encodable;
use kvsql_plan::{ColumnDef, IndexDef, IndexKey, SchemaOps, SchemaView, SequenceDef, SqlType, TableDef};
use kvsql_result::{Error, Result};

use functions::FunctionRepository;
use provider::{IndexesProvider, SequencesProvider, TablesProvider};

/// Prefix marking system identifiers; filtered from user-visible listings.
pub const SYSTEM_IDENTIFIER_PREFIX: &str = "__";

/// Name of the system sequences table (and its KV storage).
pub const SYSTEM_SEQUENCES_NAME: &str = "__system_sequences";

/// Sequences-table name used by pre-1.0 metadata layouts. Its presence means
/// the persisted metadata predates the current format and the database
/// refuses to start.
pub const LEGACY_SYSTEM_SEQUENCES_NAME: &str = "system_sequences";

/// Definition id of the built-in system sequences table.
const SYSTEM_SEQUENCES_DEFINITION_ID: u64 = 1;

/// First definition id handed out for user definitions.
const FIRST_USER_DEFINITION_ID: u64 = 1000;

pub struct Catalog {
    tables: TablesProvider,
    indexes: IndexesProvider,
    sequences: SequencesProvider,
    functions: FunctionRepository,
    next_definition_id: AtomicU64,
}

impl Default for Catalog {
    fn default() -> Self {
        Self {
            tables: TablesProvider::default(),
            indexes: IndexesProvider::default(),
            sequences: SequencesProvider::default(),
            functions: FunctionRepository::default(),
            next_definition_id: AtomicU64::new(FIRST_USER_DEFINITION_ID),
        }
    }
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tables(&self) -> &TablesProvider {
        &self.tables
    }

    pub fn indexes(&self) -> &IndexesProvider {
        &self.indexes
    }

    pub fn sequences(&self) -> &SequencesProvider {
        &self.sequences
    }

    pub fn functions(&self) -> &FunctionRepository {
        &self.functions
    }

    pub fn next_definition_id(&self) -> u64 {
        self.next_definition_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Drop every in-memory definition; used by start-failure rollback and
    /// stop.
    pub fn reset(&self) {
        self.tables.clear();
        self.indexes.clear();
        self.sequences.clear();
        self.functions.clear();
    }

    /// Register a table in the catalog. No KV side effects: a table is only
    /// materialized once an index is added for it.
    pub fn create_table(&self, mut table: TableDef) -> Result<()> {
        if table.definition_id.is_none() {
            table.definition_id = Some(self.next_definition_id());
        }
        self.tables.add(table)
    }

    /// Remove a table from the catalog. Dropping the indexes that reference
    /// it is the caller's responsibility; a table that exists only in the
    /// catalog drops cleanly.
    pub fn drop_table(&self, name: &str) -> Result<()> {
        self.tables
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::TargetNotFound(format!("table '{name}' not found")))
    }

    /// Validate, persist and register an index.
    ///
    /// The definition is serialized into the options payload of a new KV
    /// storage named by the index's simple name, then the deserialized
    /// definition is merged back into the catalog so the in-memory view is
    /// exactly what a restart would recover.
    pub fn create_index(&self, mut index: IndexDef, kv: &Arc<dyn KvEngine>) -> Result<()> {
        let table = self.tables.find(&index.table).ok_or_else(|| {
            Error::TargetNotFound(format!(
                "table '{}' referenced by index '{}' not found",
                index.table, index.name
            ))
        })?;

        for key in &index.keys {
            let (_, column) = table.column(&key.column).ok_or_else(|| {
                Error::TargetNotFound(format!(
                    "column '{}' referenced by index '{}' not found",
                    key.column, index.name
                ))
            })?;
            if index.primary && column.nullable {
                return Err(Error::InvalidArgument(format!(
                    "primary key column '{}' must be non-nullable",
                    column.name
                )));
            }
            if !is_key_encodable(&column.sql_type) {
                return Err(Error::InvalidArgument(format!(
                    "type {} of key column '{}' is not supported by the key coder",
                    column.sql_type, column.name
                )));
            }
        }

        if self.indexes.contains(&index.name) {
            return Err(Error::TargetAlreadyExists(format!(
                "index '{}' already exists",
                index.name
            )));
        }
        if index.definition_id == 0 {
            index.definition_id = self.next_definition_id();
        }

        let table_for_payload = index.primary.then(|| table.as_ref().clone());
        let payload = metadata::encode_index_payload(table_for_payload.as_ref(), &index);
        let storage = match kv.create_storage(&index.name, StorageOptions::with_payload(payload)) {
            Ok(storage) => storage,
            Err(KvError::AlreadyExists) => {
                return Err(Error::TargetAlreadyExists(format!(
                    "storage '{}' already exists",
                    index.name
                )))
            }
            Err(err) => {
                return Err(Error::Internal(format!(
                    "creating storage for index '{}' failed: {err}",
                    index.name
                )))
            }
        };

        let (_, merged) = metadata::decode_index_payload(&storage.options().payload)?;
        self.indexes.merge(merged);
        tracing::debug!("created index '{}' on table '{}'", index.name, index.table);
        Ok(())
    }

    /// Drop an index. A storage already missing on the KV side is tolerated;
    /// the catalog removal proceeds.
    pub fn drop_index(&self, name: &str, kv: &Arc<dyn KvEngine>) -> Result<()> {
        if let Some(storage) = kv.get_storage(name) {
            match storage.delete_storage() {
                Ok(()) | Err(KvError::NotFound) => {}
                Err(err) => {
                    return Err(Error::Internal(format!(
                        "deleting storage for index '{name}' failed: {err}"
                    )))
                }
            }
        }
        self.indexes
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::TargetNotFound(format!("index '{name}' not found")))
    }

    /// Register a sequence. The definition id must be supplied by the
    /// caller.
    pub fn create_sequence(&self, sequence: SequenceDef) -> Result<()> {
        if sequence.definition_id.is_none() {
            return Err(Error::InvalidArgument(format!(
                "sequence '{}' lacks a definition id",
                sequence.name
            )));
        }
        self.sequences.add(sequence)
    }

    /// User-visible tables only.
    pub fn list_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tables
            .names()
            .into_iter()
            .filter(|name| !name.starts_with(SYSTEM_IDENTIFIER_PREFIX))
            .collect();
        names.sort();
        names
    }

    /// The built-in definition of the system sequences table.
    pub fn system_sequences_definition() -> (TableDef, IndexDef) {
        let table = TableDef {
            name: SYSTEM_SEQUENCES_NAME.to_string(),
            definition_id: Some(SYSTEM_SEQUENCES_DEFINITION_ID),
            columns: vec![
                ColumnDef {
                    name: "definition_id".to_string(),
                    sql_type: SqlType::Int8,
                    nullable: false,
                },
                ColumnDef {
                    name: "sequence_value".to_string(),
                    sql_type: SqlType::Int8,
                    nullable: true,
                },
            ],
        };
        let index = IndexDef {
            name: SYSTEM_SEQUENCES_NAME.to_string(),
            table: SYSTEM_SEQUENCES_NAME.to_string(),
            definition_id: SYSTEM_SEQUENCES_DEFINITION_ID,
            keys: vec![IndexKey::ascending("definition_id")],
            values: vec!["sequence_value".to_string()],
            primary: true,
        };
        (table, index)
    }

    /// Ensure the system sequences storage exists, creating it with the
    /// built-in definition payload when absent.
    pub fn setup_system_storage(&self, kv: &Arc<dyn KvEngine>) -> Result<()> {
        if kv.get_storage(SYSTEM_SEQUENCES_NAME).is_some() {
            return Ok(());
        }
        let (table, index) = Self::system_sequences_definition();
        let payload = metadata::encode_index_payload(Some(&table), &index);
        match kv.create_storage(SYSTEM_SEQUENCES_NAME, StorageOptions::with_payload(payload)) {
            Ok(_) | Err(KvError::AlreadyExists) => Ok(()),
            Err(err) => Err(Error::Internal(format!(
                "creating system sequences storage failed: {err}"
            ))),
        }
    }

    /// Rebuild the catalog from the KV payloads.
    ///
    /// Pass one merges every "table definition" payload (primary indexes,
    /// which carry their owning table); pass two merges the deferred
    /// secondaries, whose owners are then guaranteed present. Any
    /// deserialization error fails the start.
    pub fn recover_metadata(&self, kv: &Arc<dyn KvEngine>) -> Result<()> {
        let names = kv.list_storages();
        if names.iter().any(|n| n == LEGACY_SYSTEM_SEQUENCES_NAME) {
            return Err(Error::InvalidState(
                "metadata version too old: legacy system sequences storage present".to_string(),
            ));
        }

        let mut secondaries: Vec<IndexDef> = Vec::new();
        for name in &names {
            let storage = kv.get_storage(name).ok_or_else(|| {
                Error::Internal(format!("storage '{name}' disappeared during recovery"))
            })?;
            let (table, index) = metadata::decode_index_payload(&storage.options().payload)?;
            match table {
                Some(table) => {
                    self.bump_definition_id_watermark(table.definition_id);
                    self.bump_definition_id_watermark(Some(index.definition_id));
                    self.tables.merge(table);
                    self.indexes.merge(index);
                }
                None => secondaries.push(index),
            }
        }

        for index in secondaries {
            if self.tables.find(&index.table).is_none() {
                return Err(Error::InvalidState(format!(
                    "secondary index '{}' references unknown table '{}'",
                    index.name, index.table
                )));
            }
            self.bump_definition_id_watermark(Some(index.definition_id));
            self.indexes.merge(index);
        }

        tracing::info!(
            "metadata recovery complete: {} storages, {} tables",
            names.len(),
            self.tables.names().len()
        );
        Ok(())
    }

    fn bump_definition_id_watermark(&self, id: Option<u64>) {
        let Some(id) = id else { return };
        let mut current = self.next_definition_id.load(Ordering::SeqCst);
        while id >= current {
            match self.next_definition_id.compare_exchange(
                current,
                id + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    /// Replace a table name with the storage names of its primary and
    /// secondary indexes. Used to normalize write-preserve and read-area
    /// lists before a transaction begin.
    pub fn storage_names_for_table(&self, table: &str) -> Result<Vec<String>> {
        if self.tables.find(table).is_none() {
            return Err(Error::TargetNotFound(format!("table '{table}' not found")));
        }
        let mut names = Vec::new();
        if let Some(primary) = self.indexes.primary_of(table) {
            names.push(primary.name.clone());
        }
        for secondary in self.indexes.secondaries_of(table) {
            names.push(secondary.name.clone());
        }
        Ok(names)
    }
}

impl SchemaView for Catalog {
    fn find_table(&self, name: &str) -> Option<Arc<TableDef>> {
        self.tables.find(name)
    }

    fn find_index(&self, name: &str) -> Option<Arc<IndexDef>> {
        self.indexes.find(name)
    }

    fn primary_index(&self, table: &str) -> Option<Arc<IndexDef>> {
        self.indexes.primary_of(table)
    }

    fn secondary_indexes(&self, table: &str) -> Vec<Arc<IndexDef>> {
        self.indexes.secondaries_of(table)
    }

    fn table_names(&self) -> Vec<String> {
        self.list_tables()
    }
}

/// Catalog plus engine handle: the [`SchemaOps`] implementation handed to
/// DDL plan bodies.
pub struct CatalogOps {
    catalog: Arc<Catalog>,
    kv: Arc<dyn KvEngine>,
}

impl CatalogOps {
    pub fn new(catalog: Arc<Catalog>, kv: Arc<dyn KvEngine>) -> Self {
        Self { catalog, kv }
    }
}

impl SchemaOps for CatalogOps {
    fn create_table(&self, table: TableDef) -> Result<()> {
        self.catalog.create_table(table)
    }

    fn drop_table(&self, name: &str) -> Result<()> {
        // Cascade over the indexes first so the storages go away with the
        // table.
        let mut index_names: Vec<String> = self
            .catalog
            .indexes
            .secondaries_of(name)
            .iter()
            .map(|i| i.name.clone())
            .collect();
        if let Some(primary) = self.catalog.indexes.primary_of(name) {
            index_names.push(primary.name.clone());
        }
        for index_name in index_names {
            self.catalog.drop_index(&index_name, &self.kv)?;
        }
        self.catalog.drop_table(name)
    }

    fn create_index(&self, index: IndexDef) -> Result<()> {
        self.catalog.create_index(index, &self.kv)
    }

    fn drop_index(&self, name: &str) -> Result<()> {
        self.catalog.drop_index(name, &self.kv)
    }

    fn create_sequence(&self, sequence: SequenceDef) -> Result<()> {
        self.catalog.create_sequence(sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kv() -> Arc<dyn KvEngine> {
        kvsql_kv::mem::MemKv::open("test")
    }

    fn table_t() -> TableDef {
        TableDef {
            name: "t".into(),
            definition_id: None,
            columns: vec![
                ColumnDef {
                    name: "c0".into(),
                    sql_type: SqlType::Int8,
                    nullable: false,
                },
                ColumnDef {
                    name: "c1".into(),
                    sql_type: SqlType::Float8,
                    nullable: true,
                },
            ],
        }
    }

    fn primary_t() -> IndexDef {
        IndexDef {
            name: "t".into(),
            table: "t".into(),
            definition_id: 0,
            keys: vec![IndexKey::ascending("c0")],
            values: vec!["c1".into()],
            primary: true,
        }
    }

    #[test]
    fn test_create_table_twice_fails() {
        let catalog = Catalog::new();
        catalog.create_table(table_t()).unwrap();
        let err = catalog.create_table(table_t()).unwrap_err();
        assert!(matches!(err, Error::TargetAlreadyExists(_)));
    }

    #[test]
    fn test_create_index_persists_payload() {
        let kv = kv();
        let catalog = Catalog::new();
        catalog.create_table(table_t()).unwrap();
        catalog.create_index(primary_t(), &kv).unwrap();

        let storage = kv.get_storage("t").expect("index storage missing");
        let (table, index) = metadata::decode_index_payload(&storage.options().payload).unwrap();
        assert_eq!(table.unwrap().name, "t");
        assert!(index.primary);
        assert!(catalog.indexes().contains("t"));
    }

    #[test]
    fn test_primary_key_must_be_non_nullable() {
        let kv = kv();
        let catalog = Catalog::new();
        catalog.create_table(table_t()).unwrap();
        let index = IndexDef {
            keys: vec![IndexKey::ascending("c1")],
            ..primary_t()
        };
        let err = catalog.create_index(index, &kv).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_decimal_key_rejected() {
        let kv = kv();
        let catalog = Catalog::new();
        let mut table = table_t();
        table.columns[0].sql_type = SqlType::Decimal {
            precision: 10,
            scale: 2,
        };
        catalog.create_table(table).unwrap();
        let err = catalog.create_index(primary_t(), &kv).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_drop_index_tolerates_missing_storage() {
        let kv = kv();
        let catalog = Catalog::new();
        catalog.create_table(table_t()).unwrap();
        catalog.create_index(primary_t(), &kv).unwrap();

        kv.get_storage("t").unwrap().delete_storage().unwrap();
        catalog.drop_index("t", &kv).unwrap();
        assert!(!catalog.indexes().contains("t"));
    }

    #[test]
    fn test_sequence_requires_definition_id() {
        let catalog = Catalog::new();
        let err = catalog
            .create_sequence(SequenceDef {
                name: "s".into(),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_recovery_round_trip() {
        let kv = kv();
        {
            let catalog = Catalog::new();
            catalog.setup_system_storage(&kv).unwrap();
            catalog.create_table(table_t()).unwrap();
            catalog.create_index(primary_t(), &kv).unwrap();
            let secondary = IndexDef {
                name: "t_c1".into(),
                table: "t".into(),
                definition_id: 0,
                keys: vec![IndexKey::ascending("c1")],
                values: vec![],
                primary: false,
            };
            catalog.create_index(secondary, &kv).unwrap();
        }

        let recovered = Catalog::new();
        recovered.recover_metadata(&kv).unwrap();
        let table = recovered.find_table("t").expect("table not recovered");
        assert_eq!(table.columns.len(), 2);
        assert!(recovered.primary_index("t").is_some());
        assert_eq!(recovered.secondary_indexes("t").len(), 1);
        // System table is filtered from the user listing.
        assert_eq!(recovered.list_tables(), vec!["t".to_string()]);
    }

    #[test]
    fn test_legacy_metadata_refuses_start() {
        let kv = kv();
        kv.create_storage(LEGACY_SYSTEM_SEQUENCES_NAME, StorageOptions::default())
            .unwrap();
        // Give the legacy storage a decodable payload so the failure is the
        // version check, not a decode error.
        let catalog = Catalog::new();
        let err = catalog.recover_metadata(&kv).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        assert!(err.to_string().contains("too old"));
    }

    #[test]
    fn test_storage_names_for_table() {
        let kv = kv();
        let catalog = Catalog::new();
        catalog.create_table(table_t()).unwrap();
        catalog.create_index(primary_t(), &kv).unwrap();
        catalog
            .create_index(
                IndexDef {
                    name: "t_c1".into(),
                    table: "t".into(),
                    definition_id: 0,
                    keys: vec![IndexKey::ascending("c1")],
                    values: vec![],
                    primary: false,
                },
                &kv,
            )
            .unwrap();

        let mut names = catalog.storage_names_for_table("t").unwrap();
        names.sort();
        assert_eq!(names, vec!["t".to_string(), "t_c1".to_string()]);
        assert!(catalog.storage_names_for_table("missing").is_err());
    }
}
