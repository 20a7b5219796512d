//! Keyed record store with change subscriptions.
//!
//! The marketplace treats storage as an external collaborator behind [`RecordStore`].
//! Records are untyped JSON values; typing happens in [`crate::record`]. A write is only
//! visible once the store has accepted it, and every accepted write publishes the full
//! current contents of its collection to subscribers.

use crate::persistence::{FilePersistence, PersistedState};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;

/// Change notifications buffered per subscriber before it starts lagging.
const SUBSCRIBER_CAPACITY: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Lanes,
    Vendors,
    Bids,
}

impl Collection {
    pub const ALL: [Collection; 3] = [Collection::Lanes, Collection::Vendors, Collection::Bids];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Lanes => "lanes",
            Collection::Vendors => "vendors",
            Collection::Bids => "bids",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("record {collection}/{id} not found")]
    NotFound { collection: &'static str, id: String },
    #[error("record store unavailable: {0}")]
    Unavailable(String),
    #[error("record store write failed: {0}")]
    Io(String),
}

pub trait RecordStore: Send + Sync {
    fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>, StoreError>;

    /// All records of a collection, in key order.
    fn list(&self, collection: Collection) -> Result<Vec<Value>, StoreError>;

    /// Inserts or replaces a whole record.
    fn put(&self, collection: Collection, id: &str, value: Value) -> Result<(), StoreError>;

    /// Merges top-level fields into an existing object record.
    fn update(&self, collection: Collection, id: &str, fields: Map<String, Value>) -> Result<(), StoreError>;

    /// Receives the collection's current values after every accepted write.
    fn subscribe(&self, collection: Collection) -> broadcast::Receiver<Vec<Value>>;
}

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-process store, optionally mirrored to a JSON file. With a file attached, a write is
/// committed in memory only after the file save succeeds.
pub struct MemoryStore {
    state: RwLock<PersistedState>,
    channels: HashMap<Collection, broadcast::Sender<Vec<Value>>>,
    persistence: Option<FilePersistence>,
    fail_writes: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::from_state(PersistedState::default(), None)
    }

    /// Opens a file-backed store, loading existing records if the file exists.
    pub fn with_persistence(persistence: FilePersistence) -> Result<Self, StoreError> {
        let state = persistence.load().map_err(StoreError::Io)?.unwrap_or_default();
        Ok(Self::from_state(state, Some(persistence)))
    }

    fn from_state(state: PersistedState, persistence: Option<FilePersistence>) -> Self {
        let channels = Collection::ALL
            .iter()
            .map(|c| (*c, broadcast::channel(SUBSCRIBER_CAPACITY).0))
            .collect();
        Self {
            state: RwLock::new(state),
            channels,
            persistence,
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Makes every subsequent write fail with [`StoreError::Unavailable`].
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> PersistedState {
        self.read().clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, PersistedState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, PersistedState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn write<F>(&self, collection: Collection, apply: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut BTreeMap<String, Value>) -> Result<(), StoreError>,
    {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes are disabled".into()));
        }
        let name = collection.as_str();
        let mut guard = self.write_guard();
        match &self.persistence {
            None => apply(guard.collections.entry(name.to_string()).or_default())?,
            Some(persistence) => {
                let mut next = guard.clone();
                apply(next.collections.entry(name.to_string()).or_default())?;
                persistence.save(&next).map_err(StoreError::Io)?;
                *guard = next;
            }
        }
        if let Some(tx) = self.channels.get(&collection) {
            if tx.receiver_count() > 0 {
                let values = guard
                    .collections
                    .get(name)
                    .map(|c| c.values().cloned().collect())
                    .unwrap_or_default();
                // Subscribers may have gone away between the check and the send.
                let _ = tx.send(values);
            }
        }
        Ok(())
    }
}

impl RecordStore for MemoryStore {
    fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>, StoreError> {
        Ok(self
            .read()
            .collections
            .get(collection.as_str())
            .and_then(|c| c.get(id))
            .cloned())
    }

    fn list(&self, collection: Collection) -> Result<Vec<Value>, StoreError> {
        Ok(self
            .read()
            .collections
            .get(collection.as_str())
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default())
    }

    fn put(&self, collection: Collection, id: &str, value: Value) -> Result<(), StoreError> {
        self.write(collection, |records| {
            records.insert(id.to_string(), value);
            Ok(())
        })
    }

    fn update(&self, collection: Collection, id: &str, fields: Map<String, Value>) -> Result<(), StoreError> {
        self.write(collection, |records| {
            let not_found = || StoreError::NotFound {
                collection: collection.as_str(),
                id: id.to_string(),
            };
            let record = records.get_mut(id).ok_or_else(not_found)?;
            let obj = record.as_object_mut().ok_or_else(not_found)?;
            obj.extend(fields);
            Ok(())
        })
    }

    fn subscribe(&self, collection: Collection) -> broadcast::Receiver<Vec<Value>> {
        match self.channels.get(&collection) {
            Some(tx) => tx.subscribe(),
            None => broadcast::channel(1).1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn put_get_list() {
        let store = MemoryStore::new();
        store.put(Collection::Lanes, "1", json!({"id": 1})).unwrap();
        store.put(Collection::Lanes, "2", json!({"id": 2})).unwrap();
        assert_eq!(store.get(Collection::Lanes, "1").unwrap(), Some(json!({"id": 1})));
        assert_eq!(store.get(Collection::Vendors, "1").unwrap(), None);
        assert_eq!(store.list(Collection::Lanes).unwrap().len(), 2);
    }

    #[test]
    fn update_merges_fields() {
        let store = MemoryStore::new();
        store.put(Collection::Lanes, "1", json!({"id": 1, "isActive": true, "origin": "A"})).unwrap();
        let mut fields = Map::new();
        fields.insert("isActive".into(), json!(false));
        store.update(Collection::Lanes, "1", fields.clone()).unwrap();
        assert_eq!(
            store.get(Collection::Lanes, "1").unwrap(),
            Some(json!({"id": 1, "isActive": false, "origin": "A"}))
        );
        assert!(matches!(
            store.update(Collection::Lanes, "9", fields),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn failed_write_leaves_state_unchanged() {
        let store = MemoryStore::new();
        store.put(Collection::Bids, "1", json!({"v": 1})).unwrap();
        store.set_fail_writes(true);
        assert!(matches!(
            store.put(Collection::Bids, "1", json!({"v": 2})),
            Err(StoreError::Unavailable(_))
        ));
        assert_eq!(store.get(Collection::Bids, "1").unwrap(), Some(json!({"v": 1})));
    }

    #[test]
    fn subscribers_receive_current_values() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe(Collection::Bids);
        store.put(Collection::Bids, "1", json!({"id": 1})).unwrap();
        store.put(Collection::Bids, "2", json!({"id": 2})).unwrap();
        assert_eq!(rx.try_recv().unwrap().len(), 1);
        assert_eq!(rx.try_recv().unwrap().len(), 2);
    }

    #[test]
    fn file_backed_store_survives_reopen() {
        let path = std::env::temp_dir().join(format!("lane_auction_store_{}.json", std::process::id()));
        let _ = std::fs::remove_file(&path);
        {
            let store = MemoryStore::with_persistence(FilePersistence::new(&path)).unwrap();
            store.put(Collection::Vendors, "3", json!({"id": 3, "name": "Acme"})).unwrap();
        }
        let reopened = MemoryStore::with_persistence(FilePersistence::new(&path)).unwrap();
        assert_eq!(
            reopened.get(Collection::Vendors, "3").unwrap(),
            Some(json!({"id": 3, "name": "Acme"}))
        );
        let _ = std::fs::remove_file(&path);
    }
}
