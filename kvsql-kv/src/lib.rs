//! Key-value storage capability bundle for the kvsql SQL execution engine.
//!
//! The SQL layer never talks to a concrete storage engine; it consumes the
//! trait bundle defined here:
//!
//! - **[`KvEngine`]**: open/close, named storage management, transaction
//!   begin, durability-callback registration
//! - **[`KvStorage`]**: per-storage handle exposing the opaque options
//!   payload (used by the catalog to persist index definitions) and deletion
//! - **[`KvTransaction`]**: versioned reads/writes, asynchronous commit with
//!   a precommit callback, abort, LTX readiness, durability marker
//!
//! # Transaction Modes
//!
//! - **OCC**: short optimistic transaction. Reads without locks; the commit
//!   validates the read set (first committer wins).
//! - **LTX**: long-running transaction with a declared write-preserve set and
//!   optional read areas. An LTX is not *ready* until every older live LTX
//!   with an overlapping write-preserve set has finished.
//! - **Read-only**: snapshot reads, trivial commit.
//!
//! # Durability
//!
//! A monotone [`DurabilityMarker`] is stamped under the engine's commit lock
//! at precommit. Durability is signalled asynchronously: the engine invokes
//! every registered [`DurabilityCallback`] as the durable watermark advances,
//! in marker order.
//!
//! The in-memory implementation lives in [`mem`]; it backs tests and any
//! deployment that does not need persistence across process restarts.

pub mod mem;

use std::sync::Arc;

/// Opaque monotone ordering token assigned at precommit.
pub type DurabilityMarker = u64;

/// Engine-assigned transaction identifier.
pub type KvTransactionId = u64;

/// Errors surfaced by the storage engine.
///
/// Deliberately small: the SQL layer maps these onto its own error taxonomy
/// at the call sites where the context is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvError {
    /// The storage or key does not exist.
    NotFound,
    /// The storage or key already exists.
    AlreadyExists,
    /// The commit could not be serialized against concurrent transactions.
    SerializationFailure,
    /// The transaction already committed, aborted, or failed.
    InactiveTransaction,
    /// A resource limit (e.g. concurrent transaction cap) was reached.
    ResourceLimitReached,
    /// Malformed request.
    InvalidArgument(String),
    /// Underlying I/O failure.
    Io(String),
}

impl std::fmt::Display for KvError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KvError::NotFound => f.write_str("not found"),
            KvError::AlreadyExists => f.write_str("already exists"),
            KvError::SerializationFailure => f.write_str("serialization failure"),
            KvError::InactiveTransaction => f.write_str("inactive transaction"),
            KvError::ResourceLimitReached => f.write_str("resource limit reached"),
            KvError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            KvError::Io(msg) => write!(f, "I/O error: {msg}"),
        }
    }
}

impl std::error::Error for KvError {}

pub type KvResult<T> = std::result::Result<T, KvError>;

/// Options attached to a storage at creation time.
///
/// The payload is opaque to the engine; the SQL catalog uses it to persist a
/// serialized index definition so that a cold restart can rebuild metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageOptions {
    pub payload: Vec<u8>,
}

impl StorageOptions {
    pub fn with_payload(payload: Vec<u8>) -> Self {
        Self { payload }
    }
}

/// Transaction mode requested at begin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    Occ,
    Ltx,
    ReadOnly,
}

/// Options supplied when beginning a transaction.
///
/// Write-preserve and read-area entries are storage-level names; the SQL
/// layer normalizes table names down to index storages before begin.
#[derive(Debug, Clone, Default)]
pub struct KvTransactionOptions {
    pub mode: Option<TransactionMode>,
    pub write_preserve: Vec<String>,
    pub read_areas_inclusive: Vec<String>,
    pub read_areas_exclusive: Vec<String>,
}

impl KvTransactionOptions {
    pub fn mode(&self) -> TransactionMode {
        self.mode.unwrap_or(TransactionMode::Occ)
    }
}

/// Write disposition for [`KvTransaction::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOperation {
    /// Fail with [`KvError::AlreadyExists`] if the key is present.
    Create,
    /// Fail with [`KvError::NotFound`] if the key is absent.
    Update,
    /// Unconditional upsert.
    CreateOrUpdate,
}

/// Half-open or closed key range for [`KvTransaction::scan`].
#[derive(Debug, Clone, Default)]
pub struct ScanRange {
    pub lower: Option<Vec<u8>>,
    pub lower_inclusive: bool,
    pub upper: Option<Vec<u8>>,
    pub upper_inclusive: bool,
}

impl ScanRange {
    /// Full-storage scan.
    pub fn full() -> Self {
        Self::default()
    }

    /// All keys starting with `prefix`.
    pub fn prefix(prefix: &[u8]) -> Self {
        Self {
            lower: Some(prefix.to_vec()),
            lower_inclusive: true,
            upper: key_successor(prefix),
            upper_inclusive: false,
        }
    }
}

/// Smallest byte string strictly greater than every key with the given
/// prefix, or `None` when the prefix is all `0xff`.
pub fn key_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut out = prefix.to_vec();
    while let Some(last) = out.last_mut() {
        if *last < u8::MAX {
            *last += 1;
            return Some(out);
        }
        out.pop();
    }
    None
}

/// Callback invoked as the durable watermark advances.
///
/// Receives the engine status and the highest durable marker.
pub type DurabilityCallback = Box<dyn Fn(KvResult<()>, DurabilityMarker) + Send + Sync>;

/// Callback invoked at precommit with the commit status and, on success, the
/// durability marker assigned to the transaction.
pub type CommitCallback = Box<dyn FnOnce(KvResult<()>, Option<DurabilityMarker>) + Send>;

/// Engine-level capability bundle.
pub trait KvEngine: Send + Sync {
    /// Create a named storage; fails with [`KvError::AlreadyExists`] if taken.
    fn create_storage(&self, name: &str, options: StorageOptions)
        -> KvResult<Arc<dyn KvStorage>>;

    /// Look up an existing storage.
    fn get_storage(&self, name: &str) -> Option<Arc<dyn KvStorage>>;

    /// Look up or create.
    fn get_or_create_storage(
        &self,
        name: &str,
        options: StorageOptions,
    ) -> KvResult<Arc<dyn KvStorage>>;

    /// Names of every storage, in unspecified order.
    fn list_storages(&self) -> Vec<String>;

    /// Begin a transaction.
    fn begin_transaction(&self, options: &KvTransactionOptions)
        -> KvResult<Arc<dyn KvTransaction>>;

    /// Register a durability callback. Multiple callbacks may be registered;
    /// each is invoked for every watermark advance.
    fn register_durability_callback(&self, callback: DurabilityCallback);

    /// Highest durable marker observed so far.
    fn durable_marker(&self) -> DurabilityMarker;

    /// Shut the engine down. Idempotent.
    fn close(&self) -> KvResult<()>;
}

/// Handle to one named storage.
pub trait KvStorage: Send + Sync {
    fn name(&self) -> &str;

    /// The options payload supplied at creation (or the latest update).
    fn options(&self) -> StorageOptions;

    /// Replace the options payload.
    fn set_options(&self, options: StorageOptions) -> KvResult<()>;

    /// Delete this storage and all of its content.
    fn delete_storage(&self) -> KvResult<()>;
}

/// One transaction against the engine.
pub trait KvTransaction: Send + Sync {
    fn id(&self) -> KvTransactionId;

    /// Whether the transaction may start issuing operations. Always true for
    /// OCC and read-only transactions; an LTX becomes ready once older
    /// overlapping write-preserve holders have finished.
    fn is_ready(&self) -> bool;

    fn get(&self, storage: &str, key: &[u8]) -> KvResult<Option<Vec<u8>>>;

    fn put(&self, storage: &str, key: &[u8], value: &[u8], op: PutOperation) -> KvResult<()>;

    /// Remove a key; returns whether it existed.
    fn remove(&self, storage: &str, key: &[u8]) -> KvResult<bool>;

    /// Ordered scan of the given range, own uncommitted writes included.
    fn scan(&self, storage: &str, range: &ScanRange) -> KvResult<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Asynchronous commit. The callback fires exactly once, at precommit,
    /// with the validation status and (on success) the durability marker.
    fn commit(&self, callback: CommitCallback);

    /// Abort. Idempotent: aborting an already-finished transaction is ok.
    fn abort(&self) -> KvResult<()>;

    /// The durability marker assigned at precommit, if the transaction has
    /// reached that point.
    fn durability_marker(&self) -> Option<DurabilityMarker>;
}

/// Open an engine at the given location.
///
/// The in-memory engine ignores the location beyond bookkeeping; it exists so
/// call sites read the same as they would against a persistent engine.
pub fn open(location: &str) -> KvResult<Arc<dyn KvEngine>> {
    Ok(mem::MemKv::open(location))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_successor() {
        assert_eq!(key_successor(b"ab"), Some(b"ac".to_vec()));
        assert_eq!(key_successor(&[0x01, 0xff]), Some(vec![0x02]));
        assert_eq!(key_successor(&[0xff, 0xff]), None);
    }
}
