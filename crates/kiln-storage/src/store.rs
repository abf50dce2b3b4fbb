//! Content-addressed loose object store.
//!
//! Objects live at `.git/objects/<first 2 hex>/<remaining 38 hex>` as
//! zlib-compressed `type size\0data`. Writes are idempotent, so concurrent
//! writers of the same object never need to coordinate.

use crate::{GitObject, ObjectId, Result, StorageAdapter, StorageError};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const OBJECTS_DIR: &str = ".git/objects";

/// Default number of decoded objects kept in memory.
pub const DEFAULT_CACHE_OBJECTS: usize = 4096;

/// Cache counters for monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads served from the cache.
    pub hits: u64,
    /// Reads that went to the adapter.
    pub misses: u64,
}

/// Loose object store over a [`StorageAdapter`].
pub struct ObjectStore {
    adapter: Arc<dyn StorageAdapter>,
    cache: Mutex<LruCache<ObjectId, GitObject>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl std::fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStore")
            .field("cached", &self.cache.lock().len())
            .finish()
    }
}

impl ObjectStore {
    /// Creates an object store with the default cache size.
    pub fn new(adapter: Arc<dyn StorageAdapter>) -> Self {
        Self::with_cache_size(adapter, DEFAULT_CACHE_OBJECTS)
    }

    /// Creates an object store caching at most `max_objects` decoded objects.
    pub fn with_cache_size(adapter: Arc<dyn StorageAdapter>, max_objects: usize) -> Self {
        let capacity = NonZeroUsize::new(max_objects).unwrap_or(NonZeroUsize::MIN);
        Self {
            adapter,
            cache: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Path of a loose object relative to the repository root.
    pub fn object_path(id: &ObjectId) -> String {
        let hex = id.to_hex();
        format!("{}/{}/{}", OBJECTS_DIR, &hex[..2], &hex[2..])
    }

    /// Stores an object and returns its ID. Existing objects are not rewritten.
    pub fn put(&self, object: GitObject) -> Result<ObjectId> {
        let id = object.id;
        let path = Self::object_path(&id);
        if self.cache.lock().contains(&id) || self.adapter.exists(&path)? {
            return Ok(id);
        }
        self.adapter.write(&path, &object.to_loose()?)?;
        tracing::trace!(id = %id, kind = %object.object_type, size = object.size(), "Stored object");
        self.cache.lock().put(id, object);
        Ok(id)
    }

    /// Retrieves an object by ID.
    pub fn get(&self, id: &ObjectId) -> Result<GitObject> {
        self.try_get(id)?
            .ok_or_else(|| StorageError::ObjectNotFound(id.to_hex()))
    }

    /// Retrieves an object by ID, returning `None` when it is absent.
    pub fn try_get(&self, id: &ObjectId) -> Result<Option<GitObject>> {
        if let Some(object) = self.cache.lock().get(id) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(object.clone()));
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let Some(compressed) = self.adapter.read(&Self::object_path(id))? else {
            return Ok(None);
        };
        let object = GitObject::from_loose(&compressed)?;
        if object.id != *id {
            return Err(StorageError::Corruption(format!(
                "object stored at {} hashes to {}",
                id, object.id
            )));
        }
        self.cache.lock().put(*id, object.clone());
        Ok(Some(object))
    }

    /// Checks if an object exists.
    pub fn contains(&self, id: &ObjectId) -> Result<bool> {
        if self.cache.lock().contains(id) {
            return Ok(true);
        }
        self.adapter.exists(&Self::object_path(id))
    }

    /// Lists all object IDs by scanning the fan-out directories.
    pub fn list_objects(&self) -> Result<Vec<ObjectId>> {
        let mut ids = Vec::new();
        for fanout in self.adapter.list(OBJECTS_DIR)? {
            if fanout.len() != 2 {
                continue;
            }
            for rest in self.adapter.list(&format!("{}/{}", OBJECTS_DIR, fanout))? {
                if let Ok(id) = ObjectId::from_hex(&format!("{}{}", fanout, rest)) {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }

    /// Returns the number of stored objects.
    pub fn len(&self) -> Result<usize> {
        Ok(self.list_objects()?.len())
    }

    /// Returns true if no objects are stored.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.adapter.list(OBJECTS_DIR)?.is_empty())
    }

    /// Returns cache hit/miss counters.
    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryAdapter, ObjectType};

    fn store() -> (Arc<MemoryAdapter>, ObjectStore) {
        let adapter = Arc::new(MemoryAdapter::new());
        let store = ObjectStore::new(adapter.clone());
        (adapter, store)
    }

    #[test]
    fn test_object_store_roundtrip() {
        let (_, store) = store();
        let id = store.put(GitObject::blob(b"Hello, World!".to_vec())).unwrap();

        let retrieved = store.get(&id).unwrap();
        assert_eq!(retrieved.data.as_ref(), b"Hello, World!");
        assert_eq!(retrieved.object_type, ObjectType::Blob);
    }

    #[test]
    fn test_put_twice_stores_one_object() {
        let (adapter, store) = store();
        let first = store.put(GitObject::blob(b"same".to_vec())).unwrap();
        let second = store.put(GitObject::blob(b"same".to_vec())).unwrap();

        assert_eq!(first, second);
        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(adapter.file_count(), 1);
    }

    #[test]
    fn test_object_path_layout() {
        let id = GitObject::blob(b"hello\n".to_vec()).id;
        assert_eq!(
            ObjectStore::object_path(&id),
            ".git/objects/ce/013625030ba8dba906f756967f9e9ca394464a"
        );
    }

    #[test]
    fn test_missing_object() {
        let (_, store) = store();
        let id = ObjectId::from_bytes([9u8; 20]);
        assert!(store.try_get(&id).unwrap().is_none());
        assert!(matches!(
            store.get(&id),
            Err(StorageError::ObjectNotFound(_))
        ));
        assert!(!store.contains(&id).unwrap());
    }

    #[test]
    fn test_reads_survive_cold_cache() {
        let adapter = Arc::new(MemoryAdapter::new());
        let id = ObjectStore::new(adapter.clone())
            .put(GitObject::blob(b"persisted".to_vec()))
            .unwrap();

        let cold = ObjectStore::new(adapter);
        assert_eq!(cold.get(&id).unwrap().data.as_ref(), b"persisted");
        assert_eq!(cold.cache_stats().misses, 1);
        cold.get(&id).unwrap();
        assert_eq!(cold.cache_stats().hits, 1);
    }

    #[test]
    fn test_detects_corruption() {
        let adapter = Arc::new(MemoryAdapter::new());
        let store = ObjectStore::new(adapter.clone());
        let real = GitObject::blob(b"real".to_vec());
        let other = GitObject::blob(b"other".to_vec());
        adapter
            .write(&ObjectStore::object_path(&real.id), &other.to_loose().unwrap())
            .unwrap();

        assert!(matches!(
            store.get(&real.id),
            Err(StorageError::Corruption(_))
        ));
    }

    #[test]
    fn test_list_objects() {
        let (_, store) = store();
        assert!(store.is_empty().unwrap());
        let a = store.put(GitObject::blob(b"a".to_vec())).unwrap();
        let b = store.put(GitObject::blob(b"b".to_vec())).unwrap();

        let mut listed = store.list_objects().unwrap();
        listed.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(listed, expected);
    }
}
