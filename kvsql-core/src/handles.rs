//! Opaque handles and the thread-safe stores resolving them.
//!
//! A handle is a surrogate id plus an optional session id. A handle with a
//! session id resolves only through that session's store; one without
//! resolves only through the process-global store. Stores are sharded hash
//! maps: insert and remove serialize per shard, lookups contend only on the
//! shard's read lock.

use std::sync::RwLock;

use kvsql_result::{Error, Result};
use rustc_hash::FxHashMap;

/// Server-issued opaque identifier backing a handle. Unique per database
/// lifetime across both statements and transactions.
pub type SurrogateId = u64;

/// Client session identifier.
pub type SessionId = u64;

macro_rules! define_handle {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name {
            surrogate_id: SurrogateId,
            session_id: Option<SessionId>,
        }

        impl $name {
            pub fn new(surrogate_id: SurrogateId, session_id: Option<SessionId>) -> Self {
                Self {
                    surrogate_id,
                    session_id,
                }
            }

            pub fn surrogate_id(&self) -> SurrogateId {
                self.surrogate_id
            }

            pub fn session_id(&self) -> Option<SessionId> {
                self.session_id
            }
        }
    };
}

define_handle!(
    /// Handle to a registered prepared statement.
    StatementHandle
);
define_handle!(
    /// Handle to a registered transaction.
    TransactionHandle
);

const SHARD_COUNT: usize = 16;

/// Sharded map from surrogate id to a shared value.
pub struct HandleStore<V> {
    shards: Vec<RwLock<FxHashMap<SurrogateId, std::sync::Arc<V>>>>,
}

impl<V> Default for HandleStore<V> {
    fn default() -> Self {
        Self {
            shards: (0..SHARD_COUNT)
                .map(|_| RwLock::new(FxHashMap::default()))
                .collect(),
        }
    }
}

impl<V> HandleStore<V> {
    fn shard(&self, id: SurrogateId) -> &RwLock<FxHashMap<SurrogateId, std::sync::Arc<V>>> {
        &self.shards[(id as usize) % SHARD_COUNT]
    }

    /// Insert a new entry. The surrogate id generator is unique, so a
    /// duplicate insert is a logic error reported as `Internal`.
    pub fn insert(&self, id: SurrogateId, value: std::sync::Arc<V>) -> Result<()> {
        let mut shard = self.shard(id).write().expect("handle store lock poisoned");
        if shard.insert(id, value).is_some() {
            return Err(Error::Internal(format!(
                "duplicate surrogate id {id} inserted into handle store"
            )));
        }
        Ok(())
    }

    pub fn lookup(&self, id: SurrogateId) -> Option<std::sync::Arc<V>> {
        self.shard(id)
            .read()
            .expect("handle store lock poisoned")
            .get(&id)
            .cloned()
    }

    pub fn remove(&self, id: SurrogateId) -> Option<std::sync::Arc<V>> {
        self.shard(id)
            .write()
            .expect("handle store lock poisoned")
            .remove(&id)
    }

    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.read().expect("handle store lock poisoned").len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        for shard in &self.shards {
            shard.write().expect("handle store lock poisoned").clear();
        }
    }

    /// Snapshot of all values; used by shutdown sweeps.
    pub fn values(&self) -> Vec<std::sync::Arc<V>> {
        self.shards
            .iter()
            .flat_map(|s| {
                s.read()
                    .expect("handle store lock poisoned")
                    .values()
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

/// Process-global store plus per-session stores.
pub struct SessionStores<V> {
    global: HandleStore<V>,
    sessions: RwLock<FxHashMap<SessionId, std::sync::Arc<HandleStore<V>>>>,
}

impl<V> Default for SessionStores<V> {
    fn default() -> Self {
        Self {
            global: HandleStore::default(),
            sessions: RwLock::new(FxHashMap::default()),
        }
    }
}

impl<V> SessionStores<V> {
    pub fn insert(
        &self,
        id: SurrogateId,
        session: Option<SessionId>,
        value: std::sync::Arc<V>,
    ) -> Result<()> {
        match session {
            None => self.global.insert(id, value),
            Some(session_id) => {
                let store = {
                    let mut sessions = self
                        .sessions
                        .write()
                        .expect("session store registry lock poisoned");
                    std::sync::Arc::clone(
                        sessions
                            .entry(session_id)
                            .or_insert_with(|| std::sync::Arc::new(HandleStore::default())),
                    )
                };
                store.insert(id, value)
            }
        }
    }

    /// Resolve strictly in the store the handle names.
    pub fn lookup(&self, id: SurrogateId, session: Option<SessionId>) -> Option<std::sync::Arc<V>> {
        match session {
            None => self.global.lookup(id),
            Some(session_id) => self
                .sessions
                .read()
                .expect("session store registry lock poisoned")
                .get(&session_id)
                .and_then(|store| store.lookup(id)),
        }
    }

    pub fn remove(&self, id: SurrogateId, session: Option<SessionId>) -> Option<std::sync::Arc<V>> {
        match session {
            None => self.global.remove(id),
            Some(session_id) => self
                .sessions
                .read()
                .expect("session store registry lock poisoned")
                .get(&session_id)
                .and_then(|store| store.remove(id)),
        }
    }

    /// Drop one session's store with everything in it.
    pub fn drop_session(&self, session_id: SessionId) {
        self.sessions
            .write()
            .expect("session store registry lock poisoned")
            .remove(&session_id);
    }

    pub fn clear(&self) {
        self.global.clear();
        self.sessions
            .write()
            .expect("session store registry lock poisoned")
            .clear();
    }

    pub fn global_len(&self) -> usize {
        self.global.len()
    }

    /// Every value across the global and all session stores.
    pub fn all_values(&self) -> Vec<std::sync::Arc<V>> {
        let mut out = self.global.values();
        let sessions = self
            .sessions
            .read()
            .expect("session store registry lock poisoned");
        for store in sessions.values() {
            out.extend(store.values());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_session_scoping() {
        let stores: SessionStores<String> = SessionStores::default();
        stores.insert(1, None, Arc::new("global".into())).unwrap();
        stores.insert(2, Some(7), Arc::new("scoped".into())).unwrap();

        // A handle with a session id resolves only via that session's store.
        assert!(stores.lookup(2, None).is_none());
        assert!(stores.lookup(2, Some(8)).is_none());
        assert_eq!(*stores.lookup(2, Some(7)).unwrap(), "scoped");

        // A handle without a session id resolves only globally.
        assert_eq!(*stores.lookup(1, None).unwrap(), "global");
        assert!(stores.lookup(1, Some(7)).is_none());
    }

    #[test]
    fn test_drop_session_leaves_other_sessions_intact() {
        let stores: SessionStores<u32> = SessionStores::default();
        stores.insert(1, Some(1), Arc::new(10)).unwrap();
        stores.insert(2, Some(2), Arc::new(20)).unwrap();

        stores.drop_session(1);
        assert!(stores.lookup(1, Some(1)).is_none());
        assert_eq!(*stores.lookup(2, Some(2)).unwrap(), 20);
    }

    #[test]
    fn test_duplicate_insert_is_logic_error() {
        let store: HandleStore<u32> = HandleStore::default();
        store.insert(5, Arc::new(1)).unwrap();
        assert!(store.insert(5, Arc::new(2)).is_err());
    }
}
