//! In-memory implementation of the storage capability bundle.
//!
//! `MemKv` keeps every storage as an ordered map of versioned entries. OCC
//! transactions buffer writes and record the versions they observed; commit
//! validates the read set under a global commit lock (first committer wins).
//! LTX transactions register their write-preserve set at begin and become
//! ready once no older live LTX holds an overlapping set.
//!
//! Durability is modelled with a dedicated thread: precommit stamps the
//! marker under the commit lock, then hands it to the durability thread,
//! which advances the durable watermark and fans the notification out to the
//! registered callbacks in marker order.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex, RwLock, Weak};
use std::thread::JoinHandle;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    CommitCallback, DurabilityCallback, DurabilityMarker, KvEngine, KvError, KvResult, KvStorage,
    KvTransaction, KvTransactionId, KvTransactionOptions, PutOperation, ScanRange, StorageOptions,
    TransactionMode,
};

/// Default cap on concurrently live transactions.
const DEFAULT_MAX_TRANSACTIONS: usize = 4096;

#[derive(Clone)]
struct Versioned {
    value: Vec<u8>,
    version: u64,
}

struct StorageInner {
    name: String,
    options: RwLock<StorageOptions>,
    data: RwLock<BTreeMap<Vec<u8>, Versioned>>,
    engine: Weak<EngineInner>,
}

struct LtxEntry {
    seq: u64,
    write_preserve: FxHashSet<String>,
    done: Arc<AtomicBool>,
}

struct EngineInner {
    location: String,
    storages: RwLock<FxHashMap<String, Arc<StorageInner>>>,
    /// Serializes commit validation + apply.
    commit_lock: Mutex<()>,
    /// Version stamped on committed entries.
    version_counter: AtomicU64,
    /// Last durability marker assigned at precommit.
    commit_marker: AtomicU64,
    /// Highest marker known durable.
    durable_marker: AtomicU64,
    durability_callbacks: RwLock<Vec<DurabilityCallback>>,
    durability_sender: Mutex<Option<mpsc::Sender<DurabilityMarker>>>,
    durability_thread: Mutex<Option<JoinHandle<()>>>,
    ltx_registry: Mutex<Vec<LtxEntry>>,
    ltx_seq: AtomicU64,
    next_txn_id: AtomicU64,
    live_transactions: AtomicUsize,
    max_transactions: usize,
    closed: AtomicBool,
}

impl EngineInner {
    fn storage(&self, name: &str) -> KvResult<Arc<StorageInner>> {
        self.storages
            .read()
            .expect("storage registry lock poisoned")
            .get(name)
            .cloned()
            .ok_or(KvError::NotFound)
    }

    fn notify_durable(&self, marker: DurabilityMarker) {
        if let Some(sender) = self
            .durability_sender
            .lock()
            .expect("durability sender lock poisoned")
            .as_ref()
        {
            // The receiver only goes away on close; a send failure then is
            // harmless because no callback may fire after close anyway.
            let _ = sender.send(marker);
        }
    }
}

/// In-memory storage engine.
pub struct MemKv {
    inner: Arc<EngineInner>,
}

impl MemKv {
    pub fn open(location: &str) -> Arc<Self> {
        Self::open_with_limit(location, DEFAULT_MAX_TRANSACTIONS)
    }

    /// Open with an explicit concurrent-transaction cap.
    pub fn open_with_limit(location: &str, max_transactions: usize) -> Arc<Self> {
        let (tx, rx) = mpsc::channel::<DurabilityMarker>();
        let inner = Arc::new(EngineInner {
            location: location.to_string(),
            storages: RwLock::new(FxHashMap::default()),
            commit_lock: Mutex::new(()),
            version_counter: AtomicU64::new(0),
            commit_marker: AtomicU64::new(0),
            durable_marker: AtomicU64::new(0),
            durability_callbacks: RwLock::new(Vec::new()),
            durability_sender: Mutex::new(Some(tx)),
            durability_thread: Mutex::new(None),
            ltx_registry: Mutex::new(Vec::new()),
            ltx_seq: AtomicU64::new(0),
            next_txn_id: AtomicU64::new(1),
            live_transactions: AtomicUsize::new(0),
            max_transactions,
            closed: AtomicBool::new(false),
        });

        let thread_inner = Arc::clone(&inner);
        let handle = std::thread::Builder::new()
            .name("kvsql-kv-durability".to_string())
            .spawn(move || {
                while let Ok(marker) = rx.recv() {
                    // CAS-max: markers can arrive out of order if commits
                    // race the channel, but the watermark only moves forward.
                    let mut current = thread_inner.durable_marker.load(Ordering::SeqCst);
                    loop {
                        if marker <= current {
                            break;
                        }
                        match thread_inner.durable_marker.compare_exchange(
                            current,
                            marker,
                            Ordering::SeqCst,
                            Ordering::SeqCst,
                        ) {
                            Ok(_) => break,
                            Err(observed) => current = observed,
                        }
                    }
                    let watermark = thread_inner.durable_marker.load(Ordering::SeqCst);
                    let callbacks = thread_inner
                        .durability_callbacks
                        .read()
                        .expect("durability callback lock poisoned");
                    for cb in callbacks.iter() {
                        cb(Ok(()), watermark);
                    }
                }
                tracing::debug!("[MEMKV] durability thread exiting");
            })
            .expect("failed to spawn durability thread");
        *inner
            .durability_thread
            .lock()
            .expect("durability thread lock poisoned") = Some(handle);

        Arc::new(Self { inner })
    }

    pub fn location(&self) -> &str {
        &self.inner.location
    }
}

impl KvEngine for MemKv {
    fn create_storage(
        &self,
        name: &str,
        options: StorageOptions,
    ) -> KvResult<Arc<dyn KvStorage>> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(KvError::Io("engine is closed".into()));
        }
        let mut storages = self
            .inner
            .storages
            .write()
            .expect("storage registry lock poisoned");
        if storages.contains_key(name) {
            return Err(KvError::AlreadyExists);
        }
        let storage = Arc::new(StorageInner {
            name: name.to_string(),
            options: RwLock::new(options),
            data: RwLock::new(BTreeMap::new()),
            engine: Arc::downgrade(&self.inner),
        });
        storages.insert(name.to_string(), Arc::clone(&storage));
        tracing::debug!("[MEMKV] created storage '{}'", name);
        Ok(Arc::new(MemStorage { inner: storage }))
    }

    fn get_storage(&self, name: &str) -> Option<Arc<dyn KvStorage>> {
        self.inner
            .storages
            .read()
            .expect("storage registry lock poisoned")
            .get(name)
            .map(|inner| Arc::new(MemStorage {
                inner: Arc::clone(inner),
            }) as Arc<dyn KvStorage>)
    }

    fn get_or_create_storage(
        &self,
        name: &str,
        options: StorageOptions,
    ) -> KvResult<Arc<dyn KvStorage>> {
        if let Some(existing) = self.get_storage(name) {
            return Ok(existing);
        }
        match self.create_storage(name, options) {
            Err(KvError::AlreadyExists) => self.get_storage(name).ok_or(KvError::NotFound),
            other => other,
        }
    }

    fn list_storages(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .storages
            .read()
            .expect("storage registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn begin_transaction(
        &self,
        options: &KvTransactionOptions,
    ) -> KvResult<Arc<dyn KvTransaction>> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(KvError::Io("engine is closed".into()));
        }
        let live = self.inner.live_transactions.fetch_add(1, Ordering::SeqCst);
        if live >= self.inner.max_transactions {
            self.inner.live_transactions.fetch_sub(1, Ordering::SeqCst);
            return Err(KvError::ResourceLimitReached);
        }

        let id = self.inner.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let mode = options.mode();
        let done = Arc::new(AtomicBool::new(false));
        let ltx_seq = if mode == TransactionMode::Ltx {
            let seq = self.inner.ltx_seq.fetch_add(1, Ordering::SeqCst);
            let mut registry = self
                .inner
                .ltx_registry
                .lock()
                .expect("ltx registry lock poisoned");
            registry.retain(|entry| !entry.done.load(Ordering::SeqCst));
            registry.push(LtxEntry {
                seq,
                write_preserve: options.write_preserve.iter().cloned().collect(),
                done: Arc::clone(&done),
            });
            Some(seq)
        } else {
            None
        };

        tracing::debug!("[MEMKV] begin transaction id={} mode={:?}", id, mode);
        Ok(Arc::new(MemTransaction {
            id,
            mode,
            options: options.clone(),
            engine: Arc::clone(&self.inner),
            state: Mutex::new(TxState::default()),
            active: AtomicBool::new(true),
            finished: done,
            ltx_seq,
            marker: AtomicU64::new(0),
        }))
    }

    fn register_durability_callback(&self, callback: DurabilityCallback) {
        self.inner
            .durability_callbacks
            .write()
            .expect("durability callback lock poisoned")
            .push(callback);
    }

    fn durable_marker(&self) -> DurabilityMarker {
        self.inner.durable_marker.load(Ordering::SeqCst)
    }

    fn close(&self) -> KvResult<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // Dropping the sender terminates the durability thread's recv loop.
        self.inner
            .durability_sender
            .lock()
            .expect("durability sender lock poisoned")
            .take();
        if let Some(handle) = self
            .inner
            .durability_thread
            .lock()
            .expect("durability thread lock poisoned")
            .take()
        {
            let _ = handle.join();
        }
        self.inner
            .durability_callbacks
            .write()
            .expect("durability callback lock poisoned")
            .clear();
        tracing::debug!("[MEMKV] engine closed");
        Ok(())
    }
}

struct MemStorage {
    inner: Arc<StorageInner>,
}

impl KvStorage for MemStorage {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn options(&self) -> StorageOptions {
        self.inner
            .options
            .read()
            .expect("storage options lock poisoned")
            .clone()
    }

    fn set_options(&self, options: StorageOptions) -> KvResult<()> {
        *self
            .inner
            .options
            .write()
            .expect("storage options lock poisoned") = options;
        Ok(())
    }

    fn delete_storage(&self) -> KvResult<()> {
        let engine = self
            .inner
            .engine
            .upgrade()
            .ok_or_else(|| KvError::Io("engine is gone".into()))?;
        let mut storages = engine
            .storages
            .write()
            .expect("storage registry lock poisoned");
        if storages.remove(&self.inner.name).is_none() {
            return Err(KvError::NotFound);
        }
        tracing::debug!("[MEMKV] deleted storage '{}'", self.inner.name);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteOp {
    Put,
    Remove,
}

#[derive(Default)]
struct TxState {
    /// Buffered writes, keyed by (storage, key). Ordered so the commit apply
    /// and read-your-writes scans are deterministic.
    writes: BTreeMap<(String, Vec<u8>), (WriteOp, Vec<u8>)>,
    /// Observed versions, 0 meaning "observed absent".
    reads: Vec<(String, Vec<u8>, u64)>,
}

struct MemTransaction {
    id: KvTransactionId,
    mode: TransactionMode,
    options: KvTransactionOptions,
    engine: Arc<EngineInner>,
    state: Mutex<TxState>,
    active: AtomicBool,
    /// Shared with the LTX registry entry so readiness checks see completion.
    finished: Arc<AtomicBool>,
    ltx_seq: Option<u64>,
    marker: AtomicU64,
}

impl MemTransaction {
    fn ensure_active(&self) -> KvResult<()> {
        if self.active.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(KvError::InactiveTransaction)
        }
    }

    fn finish(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            self.finished.store(true, Ordering::SeqCst);
            self.engine.live_transactions.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Whether read validation applies to this storage at commit.
    fn validates_reads_on(&self, storage: &str) -> bool {
        match self.mode {
            TransactionMode::ReadOnly => false,
            TransactionMode::Occ => true,
            // Write-preserved storages are protected by the LTX protocol
            // itself, not by read validation.
            TransactionMode::Ltx => !self
                .options
                .write_preserve
                .iter()
                .any(|name| name == storage),
        }
    }
}

impl KvTransaction for MemTransaction {
    fn id(&self) -> KvTransactionId {
        self.id
    }

    fn is_ready(&self) -> bool {
        let Some(my_seq) = self.ltx_seq else {
            return true;
        };
        let my_preserve: FxHashSet<&String> = self.options.write_preserve.iter().collect();
        let registry = self
            .engine
            .ltx_registry
            .lock()
            .expect("ltx registry lock poisoned");
        !registry.iter().any(|entry| {
            entry.seq < my_seq
                && !entry.done.load(Ordering::SeqCst)
                && entry
                    .write_preserve
                    .iter()
                    .any(|name| my_preserve.contains(name))
        })
    }

    fn get(&self, storage: &str, key: &[u8]) -> KvResult<Option<Vec<u8>>> {
        self.ensure_active()?;
        let state_key = (storage.to_string(), key.to_vec());
        let mut state = self.state.lock().expect("transaction state lock poisoned");
        if let Some((op, value)) = state.writes.get(&state_key) {
            return Ok(match op {
                WriteOp::Put => Some(value.clone()),
                WriteOp::Remove => None,
            });
        }
        let storage_inner = self.engine.storage(storage)?;
        let data = storage_inner.data.read().expect("storage data lock poisoned");
        let found = data.get(key);
        let version = found.map(|v| v.version).unwrap_or(0);
        if self.validates_reads_on(storage) {
            state.reads.push((storage.to_string(), key.to_vec(), version));
        }
        Ok(found.map(|v| v.value.clone()))
    }

    fn put(&self, storage: &str, key: &[u8], value: &[u8], op: PutOperation) -> KvResult<()> {
        self.ensure_active()?;
        let exists = self.get(storage, key)?.is_some();
        match op {
            PutOperation::Create if exists => return Err(KvError::AlreadyExists),
            PutOperation::Update if !exists => return Err(KvError::NotFound),
            _ => {}
        }
        let mut state = self.state.lock().expect("transaction state lock poisoned");
        state.writes.insert(
            (storage.to_string(), key.to_vec()),
            (WriteOp::Put, value.to_vec()),
        );
        Ok(())
    }

    fn remove(&self, storage: &str, key: &[u8]) -> KvResult<bool> {
        self.ensure_active()?;
        let existed = self.get(storage, key)?.is_some();
        let mut state = self.state.lock().expect("transaction state lock poisoned");
        state.writes.insert(
            (storage.to_string(), key.to_vec()),
            (WriteOp::Remove, Vec::new()),
        );
        Ok(existed)
    }

    fn scan(&self, storage: &str, range: &ScanRange) -> KvResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.ensure_active()?;
        let storage_inner = self.engine.storage(storage)?;
        let lower = match &range.lower {
            Some(bytes) if range.lower_inclusive => Bound::Included(bytes.clone()),
            Some(bytes) => Bound::Excluded(bytes.clone()),
            None => Bound::Unbounded,
        };
        let upper = match &range.upper {
            Some(bytes) if range.upper_inclusive => Bound::Included(bytes.clone()),
            Some(bytes) => Bound::Excluded(bytes.clone()),
            None => Bound::Unbounded,
        };

        let mut merged: BTreeMap<Vec<u8>, Option<Vec<u8>>> = BTreeMap::new();
        let mut observed: Vec<(Vec<u8>, u64)> = Vec::new();
        {
            let data = storage_inner.data.read().expect("storage data lock poisoned");
            for (key, versioned) in data.range((lower, upper)) {
                merged.insert(key.clone(), Some(versioned.value.clone()));
                observed.push((key.clone(), versioned.version));
            }
        }

        let in_range = |key: &[u8]| {
            let lower_ok = match &range.lower {
                Some(bytes) if range.lower_inclusive => key >= bytes.as_slice(),
                Some(bytes) => key > bytes.as_slice(),
                None => true,
            };
            let upper_ok = match &range.upper {
                Some(bytes) if range.upper_inclusive => key <= bytes.as_slice(),
                Some(bytes) => key < bytes.as_slice(),
                None => true,
            };
            lower_ok && upper_ok
        };

        let mut state = self.state.lock().expect("transaction state lock poisoned");
        for ((write_storage, key), (op, value)) in state.writes.iter() {
            if write_storage != storage || !in_range(key) {
                continue;
            }
            match op {
                WriteOp::Put => merged.insert(key.clone(), Some(value.clone())),
                WriteOp::Remove => merged.insert(key.clone(), None),
            };
        }
        if self.validates_reads_on(storage) {
            for (key, version) in observed {
                state.reads.push((storage.to_string(), key, version));
            }
        }

        Ok(merged
            .into_iter()
            .filter_map(|(key, value)| value.map(|v| (key, v)))
            .collect())
    }

    fn commit(&self, callback: CommitCallback) {
        if !self.active.load(Ordering::SeqCst) {
            callback(Err(KvError::InactiveTransaction), None);
            return;
        }

        let marker = {
            let _guard = self
                .engine
                .commit_lock
                .lock()
                .expect("commit lock poisoned");
            let state = self.state.lock().expect("transaction state lock poisoned");

            // First committer wins: every observed version must still be
            // current.
            let mut conflict = false;
            for (storage, key, observed_version) in &state.reads {
                let Ok(storage_inner) = self.engine.storage(storage) else {
                    // Storage dropped since we read from it.
                    conflict = true;
                    break;
                };
                let data = storage_inner.data.read().expect("storage data lock poisoned");
                let current = data.get(key).map(|v| v.version).unwrap_or(0);
                if current != *observed_version {
                    tracing::debug!(
                        "[MEMKV] transaction {} failed validation on '{}'",
                        self.id,
                        storage
                    );
                    conflict = true;
                    break;
                }
            }
            if conflict {
                drop(state);
                self.finish();
                callback(Err(KvError::SerializationFailure), None);
                return;
            }

            let commit_version = self.engine.version_counter.fetch_add(1, Ordering::SeqCst) + 1;
            for ((storage, key), (op, value)) in state.writes.iter() {
                let Ok(storage_inner) = self.engine.storage(storage) else {
                    continue;
                };
                let mut data = storage_inner
                    .data
                    .write()
                    .expect("storage data lock poisoned");
                match op {
                    WriteOp::Put => {
                        data.insert(
                            key.clone(),
                            Versioned {
                                value: value.clone(),
                                version: commit_version,
                            },
                        );
                    }
                    WriteOp::Remove => {
                        data.remove(key);
                    }
                }
            }

            let marker = self.engine.commit_marker.fetch_add(1, Ordering::SeqCst) + 1;
            self.marker.store(marker, Ordering::SeqCst);
            self.finish();
            marker
        };

        tracing::debug!("[MEMKV] transaction {} precommitted marker={}", self.id, marker);
        callback(Ok(()), Some(marker));
        self.engine.notify_durable(marker);
    }

    fn abort(&self) -> KvResult<()> {
        if self.active.load(Ordering::SeqCst) {
            let mut state = self.state.lock().expect("transaction state lock poisoned");
            state.writes.clear();
            state.reads.clear();
            drop(state);
            self.finish();
            tracing::debug!("[MEMKV] transaction {} aborted", self.id);
        }
        Ok(())
    }

    fn durability_marker(&self) -> Option<DurabilityMarker> {
        match self.marker.load(Ordering::SeqCst) {
            0 => None,
            marker => Some(marker),
        }
    }
}

impl Drop for MemTransaction {
    fn drop(&mut self) {
        // A transaction dropped without commit/abort rolls back implicitly.
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;
    use std::time::Duration;

    fn engine() -> Arc<MemKv> {
        MemKv::open("test")
    }

    fn occ(engine: &MemKv) -> Arc<dyn KvTransaction> {
        engine
            .begin_transaction(&KvTransactionOptions {
                mode: Some(TransactionMode::Occ),
                ..Default::default()
            })
            .unwrap()
    }

    fn commit_sync(tx: &Arc<dyn KvTransaction>) -> KvResult<DurabilityMarker> {
        let (sender, receiver) = channel();
        tx.commit(Box::new(move |status, marker| {
            sender.send((status, marker)).unwrap();
        }));
        let (status, marker) = receiver.recv().unwrap();
        status.map(|_| marker.unwrap())
    }

    #[test]
    fn test_put_get_commit_visibility() {
        let engine = engine();
        engine
            .create_storage("s", StorageOptions::default())
            .unwrap();

        let tx = occ(&engine);
        tx.put("s", b"k", b"v", PutOperation::Create).unwrap();
        assert_eq!(tx.get("s", b"k").unwrap(), Some(b"v".to_vec()));
        commit_sync(&tx).unwrap();

        let reader = occ(&engine);
        assert_eq!(reader.get("s", b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn test_first_committer_wins() {
        let engine = engine();
        engine
            .create_storage("s", StorageOptions::default())
            .unwrap();

        let tx1 = occ(&engine);
        let tx2 = occ(&engine);
        // Both observe the key absent, both try to create it.
        tx1.put("s", b"k", b"1", PutOperation::Create).unwrap();
        tx2.put("s", b"k", b"2", PutOperation::Create).unwrap();

        commit_sync(&tx1).unwrap();
        assert_eq!(commit_sync(&tx2), Err(KvError::SerializationFailure));
    }

    #[test]
    fn test_commit_markers_are_monotone() {
        let engine = engine();
        engine
            .create_storage("s", StorageOptions::default())
            .unwrap();
        let mut previous = 0;
        for i in 0..5u8 {
            let tx = occ(&engine);
            tx.put("s", &[i], b"v", PutOperation::Create).unwrap();
            let marker = commit_sync(&tx).unwrap();
            assert!(marker > previous);
            previous = marker;
        }
    }

    #[test]
    fn test_ltx_readiness_waits_for_overlap() {
        let engine = engine();
        engine
            .create_storage("t", StorageOptions::default())
            .unwrap();
        let ltx_options = KvTransactionOptions {
            mode: Some(TransactionMode::Ltx),
            write_preserve: vec!["t".to_string()],
            ..Default::default()
        };
        let tx1 = engine.begin_transaction(&ltx_options).unwrap();
        let tx2 = engine.begin_transaction(&ltx_options).unwrap();

        assert!(tx1.is_ready());
        assert!(!tx2.is_ready());

        tx1.put("t", b"a", b"1", PutOperation::Create).unwrap();
        commit_sync(&tx1).unwrap();
        assert!(tx2.is_ready());

        tx2.put("t", b"b", b"2", PutOperation::Create).unwrap();
        commit_sync(&tx2).unwrap();
    }

    #[test]
    fn test_abort_is_idempotent() {
        let engine = engine();
        engine
            .create_storage("s", StorageOptions::default())
            .unwrap();
        let tx = occ(&engine);
        tx.put("s", b"k", b"v", PutOperation::Create).unwrap();
        tx.abort().unwrap();
        tx.abort().unwrap();
        assert_eq!(tx.get("s", b"k"), Err(KvError::InactiveTransaction));

        let reader = occ(&engine);
        assert_eq!(reader.get("s", b"k").unwrap(), None);
    }

    #[test]
    fn test_durability_callback_observes_watermark() {
        let engine = engine();
        engine
            .create_storage("s", StorageOptions::default())
            .unwrap();
        let (sender, receiver) = channel();
        engine.register_durability_callback(Box::new(move |status, marker| {
            assert!(status.is_ok());
            let _ = sender.send(marker);
        }));

        let tx = occ(&engine);
        tx.put("s", b"k", b"v", PutOperation::Create).unwrap();
        let marker = commit_sync(&tx).unwrap();

        let durable = receiver
            .recv_timeout(Duration::from_secs(5))
            .expect("durability callback never fired");
        assert!(durable >= marker);
    }

    #[test]
    fn test_transaction_limit() {
        let engine = MemKv::open_with_limit("test", 1);
        let options = KvTransactionOptions::default();
        let _tx = engine.begin_transaction(&options).unwrap();
        assert!(matches!(
            engine.begin_transaction(&options),
            Err(KvError::ResourceLimitReached)
        ));
    }

    #[test]
    fn test_storage_payload_round_trip() {
        let engine = engine();
        let storage = engine
            .create_storage("idx", StorageOptions::with_payload(vec![1, 2, 3]))
            .unwrap();
        assert_eq!(storage.options().payload, vec![1, 2, 3]);

        let reopened = engine.get_storage("idx").unwrap();
        assert_eq!(reopened.options().payload, vec![1, 2, 3]);

        reopened.delete_storage().unwrap();
        assert!(engine.get_storage("idx").is_none());
        assert_eq!(
            engine.get_storage("idx").map(|_| ()).ok_or(KvError::NotFound),
            Err(KvError::NotFound)
        );
    }
}
