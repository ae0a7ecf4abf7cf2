//! In-memory providers for table, index and sequence definitions.

use std::sync::{Arc, RwLock};

use kvsql_plan::{IndexDef, SequenceDef, TableDef};
use kvsql_result::{Error, Result};
use rustc_hash::FxHashMap;

#[derive(Default)]
pub struct TablesProvider {
    map: RwLock<FxHashMap<String, Arc<TableDef>>>,
}

impl TablesProvider {
    pub fn add(&self, table: TableDef) -> Result<()> {
        let mut map = self.map.write().expect("tables provider lock poisoned");
        if map.contains_key(&table.name) {
            return Err(Error::TargetAlreadyExists(format!(
                "table '{}' already exists",
                table.name
            )));
        }
        map.insert(table.name.clone(), Arc::new(table));
        Ok(())
    }

    /// Insert or replace; used by metadata recovery, which is idempotent.
    pub fn merge(&self, table: TableDef) {
        self.map
            .write()
            .expect("tables provider lock poisoned")
            .insert(table.name.clone(), Arc::new(table));
    }

    pub fn find(&self, name: &str) -> Option<Arc<TableDef>> {
        self.map
            .read()
            .expect("tables provider lock poisoned")
            .get(name)
            .cloned()
    }

    pub fn remove(&self, name: &str) -> Option<Arc<TableDef>> {
        self.map
            .write()
            .expect("tables provider lock poisoned")
            .remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.map
            .read()
            .expect("tables provider lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.map
            .write()
            .expect("tables provider lock poisoned")
            .clear();
    }
}

#[derive(Default)]
pub struct IndexesProvider {
    map: RwLock<FxHashMap<String, Arc<IndexDef>>>,
}

impl IndexesProvider {
    pub fn add(&self, index: IndexDef) -> Result<()> {
        let mut map = self.map.write().expect("indexes provider lock poisoned");
        if map.contains_key(&index.name) {
            return Err(Error::TargetAlreadyExists(format!(
                "index '{}' already exists",
                index.name
            )));
        }
        map.insert(index.name.clone(), Arc::new(index));
        Ok(())
    }

    pub fn merge(&self, index: IndexDef) {
        self.map
            .write()
            .expect("indexes provider lock poisoned")
            .insert(index.name.clone(), Arc::new(index));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map
            .read()
            .expect("indexes provider lock poisoned")
            .contains_key(name)
    }

    pub fn find(&self, name: &str) -> Option<Arc<IndexDef>> {
        self.map
            .read()
            .expect("indexes provider lock poisoned")
            .get(name)
            .cloned()
    }

    pub fn remove(&self, name: &str) -> Option<Arc<IndexDef>> {
        self.map
            .write()
            .expect("indexes provider lock poisoned")
            .remove(name)
    }

    pub fn primary_of(&self, table: &str) -> Option<Arc<IndexDef>> {
        self.map
            .read()
            .expect("indexes provider lock poisoned")
            .values()
            .find(|index| index.primary && index.table == table)
            .cloned()
    }

    pub fn secondaries_of(&self, table: &str) -> Vec<Arc<IndexDef>> {
        self.map
            .read()
            .expect("indexes provider lock poisoned")
            .values()
            .filter(|index| !index.primary && index.table == table)
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<Arc<IndexDef>> {
        self.map
            .read()
            .expect("indexes provider lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.map
            .write()
            .expect("indexes provider lock poisoned")
            .clear();
    }
}

#[derive(Default)]
pub struct SequencesProvider {
    map: RwLock<FxHashMap<String, Arc<SequenceDef>>>,
}

impl SequencesProvider {
    pub fn add(&self, sequence: SequenceDef) -> Result<()> {
        let mut map = self.map.write().expect("sequences provider lock poisoned");
        if map.contains_key(&sequence.name) {
            return Err(Error::TargetAlreadyExists(format!(
                "sequence '{}' already exists",
                sequence.name
            )));
        }
        map.insert(sequence.name.clone(), Arc::new(sequence));
        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<Arc<SequenceDef>> {
        self.map
            .read()
            .expect("sequences provider lock poisoned")
            .get(name)
            .cloned()
    }

    pub fn remove(&self, name: &str) -> Option<Arc<SequenceDef>> {
        self.map
            .write()
            .expect("sequences provider lock poisoned")
            .remove(name)
    }

    pub fn all(&self) -> Vec<Arc<SequenceDef>> {
        self.map
            .read()
            .expect("sequences provider lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.map
            .write()
            .expect("sequences provider lock poisoned")
            .clear();
    }
}
