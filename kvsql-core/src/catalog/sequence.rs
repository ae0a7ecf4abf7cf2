//! Sequence manager.
//!
//! Sequence state lives in the system sequences table: one entry per
//! definition id, keyed with the order-preserving key codec and carrying the
//! last handed-out value. Bootstrap reads the id map with a throwaway
//! transaction; `next_value` advances the in-memory counter and writes the
//! new watermark back through a short transaction of its own.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

use kvsql_kv::{KvEngine, KvTransactionOptions, PutOperation, ScanRange};
use kvsql_plan::codec::{decode_key, decode_row, encode_key, encode_row};
use kvsql_plan::{SequenceDef, SqlType, Value};
use kvsql_result::{Error, Result};
use rustc_hash::FxHashMap;

use super::SYSTEM_SEQUENCES_NAME;

struct SequenceEntry {
    definition_id: u64,
    value: AtomicI64,
    increment: i64,
}

#[derive(Default)]
pub struct SequenceManager {
    kv: RwLock<Option<Arc<dyn KvEngine>>>,
    entries: RwLock<FxHashMap<u64, Arc<SequenceEntry>>>,
}

impl SequenceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the persisted id map with a throwaway transaction and populate
    /// the in-memory entries. Returns the number of sequences loaded.
    pub fn bootstrap(&self, kv: Arc<dyn KvEngine>) -> Result<usize> {
        let tx = kv
            .begin_transaction(&KvTransactionOptions::default())
            .map_err(|err| Error::SqlService(format!("sequence bootstrap begin failed: {err}")))?;
        let rows = tx
            .scan(SYSTEM_SEQUENCES_NAME, &ScanRange::full())
            .map_err(|err| Error::SqlService(format!("sequence bootstrap scan failed: {err}")))?;
        // Read-only probe; nothing to commit.
        tx.abort()
            .map_err(|err| Error::SqlService(format!("sequence bootstrap abort failed: {err}")))?;

        let mut entries = self.entries.write().expect("sequence entries lock poisoned");
        entries.clear();
        for (key, value) in rows {
            let decoded_key = decode_key(&[SqlType::Int8], &key)?;
            let Some(Value::Int8(definition_id)) = decoded_key.first().cloned().flatten() else {
                return Err(Error::Internal(
                    "system sequences entry has a malformed key".into(),
                ));
            };
            let decoded_row = decode_row(&value)?;
            let current = match decoded_row.first().cloned().flatten() {
                Some(Value::Int8(v)) => v,
                _ => 0,
            };
            entries.insert(
                definition_id as u64,
                Arc::new(SequenceEntry {
                    definition_id: definition_id as u64,
                    value: AtomicI64::new(current),
                    increment: 1,
                }),
            );
        }
        let loaded = entries.len();
        drop(entries);

        *self.kv.write().expect("sequence kv lock poisoned") = Some(kv);
        tracing::debug!("sequence manager bootstrapped with {} entries", loaded);
        Ok(loaded)
    }

    /// Register a sequence definition, persisting its initial watermark when
    /// the id map has no entry yet.
    pub fn register(&self, def: &SequenceDef) -> Result<()> {
        let definition_id = def.definition_id.ok_or_else(|| {
            Error::InvalidArgument(format!("sequence '{}' lacks a definition id", def.name))
        })?;
        {
            let entries = self.entries.read().expect("sequence entries lock poisoned");
            if entries.contains_key(&definition_id) {
                return Ok(());
            }
        }
        self.persist(definition_id, def.initial_value)?;
        self.entries
            .write()
            .expect("sequence entries lock poisoned")
            .insert(
                definition_id,
                Arc::new(SequenceEntry {
                    definition_id,
                    value: AtomicI64::new(def.initial_value),
                    increment: def.increment,
                }),
            );
        Ok(())
    }

    /// Next value of a registered sequence.
    pub fn next_value(&self, definition_id: u64) -> Result<i64> {
        let entry = self
            .entries
            .read()
            .expect("sequence entries lock poisoned")
            .get(&definition_id)
            .cloned()
            .ok_or_else(|| {
                Error::TargetNotFound(format!("sequence definition {definition_id} not found"))
            })?;
        let next = entry.value.fetch_add(entry.increment, Ordering::SeqCst) + entry.increment;
        self.persist(entry.definition_id, next)?;
        Ok(next)
    }

    fn persist(&self, definition_id: u64, value: i64) -> Result<()> {
        let kv = self
            .kv
            .read()
            .expect("sequence kv lock poisoned")
            .clone()
            .ok_or_else(|| Error::InvalidState("sequence manager not bootstrapped".into()))?;
        let tx = kv
            .begin_transaction(&KvTransactionOptions::default())
            .map_err(|err| Error::SqlService(format!("sequence persist begin failed: {err}")))?;
        let key = encode_key(&[Some(Value::Int8(definition_id as i64))])?;
        let row = encode_row(&[Some(Value::Int8(value))]);
        tx.put(
            SYSTEM_SEQUENCES_NAME,
            &key,
            &row,
            PutOperation::CreateOrUpdate,
        )
        .map_err(|err| Error::SqlService(format!("sequence persist put failed: {err}")))?;

        let (sender, receiver) = std::sync::mpsc::channel();
        tx.commit(Box::new(move |status, _| {
            let _ = sender.send(status);
        }));
        receiver
            .recv()
            .map_err(|_| Error::Internal("sequence persist commit callback lost".into()))?
            .map_err(|err| Error::SqlService(format!("sequence persist commit failed: {err}")))?;
        Ok(())
    }

    /// Forget everything; part of database stop.
    pub fn reset(&self) {
        self.entries
            .write()
            .expect("sequence entries lock poisoned")
            .clear();
        self.kv.write().expect("sequence kv lock poisoned").take();
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .expect("sequence entries lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvsql_kv::StorageOptions;

    fn engine_with_storage() -> Arc<dyn KvEngine> {
        let kv: Arc<dyn KvEngine> = kvsql_kv::mem::MemKv::open("test");
        kv.create_storage(SYSTEM_SEQUENCES_NAME, StorageOptions::default())
            .unwrap();
        kv
    }

    fn def(id: u64) -> SequenceDef {
        SequenceDef {
            name: format!("seq{id}"),
            definition_id: Some(id),
            ..Default::default()
        }
    }

    #[test]
    fn test_register_and_next_value() {
        let kv = engine_with_storage();
        let manager = SequenceManager::new();
        manager.bootstrap(Arc::clone(&kv)).unwrap();
        manager.register(&def(7)).unwrap();

        assert_eq!(manager.next_value(7).unwrap(), 1);
        assert_eq!(manager.next_value(7).unwrap(), 2);
        assert!(manager.next_value(99).is_err());
    }

    #[test]
    fn test_watermark_survives_rebootstrap() {
        let kv = engine_with_storage();
        let manager = SequenceManager::new();
        manager.bootstrap(Arc::clone(&kv)).unwrap();
        manager.register(&def(3)).unwrap();
        manager.next_value(3).unwrap();
        manager.next_value(3).unwrap();
        manager.reset();

        let reloaded = SequenceManager::new();
        assert_eq!(reloaded.bootstrap(Arc::clone(&kv)).unwrap(), 1);
        assert_eq!(reloaded.next_value(3).unwrap(), 3);
    }
}
