//! Object Cache - dual-key TTL cache for reference objects
//!
//! Objects are indexed by surrogate key and, when they have a non-blank
//! unique name, by that name as well. Both indices live behind one lock so a
//! reader never sees one updated and the other stale.
//!
//! # Eviction
//! There is no background sweeper. An entry older than `max_age` is evicted
//! from both indices by the read that notices it.
//!
//! # Example
//! ```ignore
//! let cache = ObjectCache::new(Duration::from_secs(3600));
//! cache.put(algorithm);
//! let algo = cache.get_by_name("AddToPrevious");
//! ```

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// An object that can live in an [`ObjectCache`]
pub trait CacheObject: Send + Sync {
    type Key: Copy + Eq + Hash + fmt::Display + Send + Sync;

    /// Surrogate key
    fn key(&self) -> Self::Key;

    /// Optional unique name. Blank names are never indexed.
    fn unique_name(&self) -> Option<&str>;
}

/// External staleness check applied after an age-based hit
pub trait CacheValidator<T: ?Sized> {
    fn is_still_valid(&self, object: &T) -> bool;
}

impl<T: ?Sized, F> CacheValidator<T> for F
where
    F: Fn(&T) -> bool,
{
    fn is_still_valid(&self, object: &T) -> bool {
        self(object)
    }
}

struct CacheEntry<T> {
    object: Arc<T>,
    /// Folded name this entry is indexed under, if any
    name: Option<String>,
    loaded_at: Instant,
}

struct Indices<T: CacheObject> {
    by_key: HashMap<T::Key, CacheEntry<T>>,
    by_name: HashMap<String, T::Key>,
}

impl<T: CacheObject> Indices<T> {
    fn new() -> Self {
        Self {
            by_key: HashMap::new(),
            by_name: HashMap::new(),
        }
    }

    /// Remove an entry from both indices
    fn evict(&mut self, key: T::Key) -> Option<CacheEntry<T>> {
        let entry = self.by_key.remove(&key)?;
        if let Some(name) = &entry.name {
            // Another object may have taken the name since
            if self.by_name.get(name) == Some(&key) {
                self.by_name.remove(name);
            }
        }
        Some(entry)
    }
}

/// Thread-safe cache keyed by surrogate key and unique name
pub struct ObjectCache<T: CacheObject> {
    max_age: Duration,
    case_sensitive: bool,
    indices: Mutex<Indices<T>>,
}

impl<T: CacheObject> ObjectCache<T> {
    /// Create a cache whose name index is case-insensitive
    pub fn new(max_age: Duration) -> Self {
        Self {
            max_age,
            case_sensitive: false,
            indices: Mutex::new(Indices::new()),
        }
    }

    /// Create a cache whose name index is case-sensitive
    pub fn case_sensitive(max_age: Duration) -> Self {
        Self {
            case_sensitive: true,
            ..Self::new(max_age)
        }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    fn fold_name(&self, name: Option<&str>) -> Option<String> {
        let name = name?;
        if name.trim().is_empty() {
            return None;
        }
        if self.case_sensitive {
            Some(name.to_string())
        } else {
            Some(name.to_lowercase())
        }
    }

    fn is_stale(&self, entry: &CacheEntry<T>) -> bool {
        entry.loaded_at.elapsed() > self.max_age
    }

    /// Insert or replace an object, returning the shared handle
    pub fn put(&self, object: T) -> Arc<T> {
        self.put_shared(Arc::new(object))
    }

    /// Insert or replace an already-shared object
    pub fn put_shared(&self, object: Arc<T>) -> Arc<T> {
        let key = object.key();
        let name = self.fold_name(object.unique_name());

        let mut indices = self.indices.lock();
        indices.evict(key);
        if let Some(name) = &name {
            indices.by_name.insert(name.clone(), key);
        }
        indices.by_key.insert(
            key,
            CacheEntry {
                object: Arc::clone(&object),
                name,
                loaded_at: Instant::now(),
            },
        );
        object
    }

    /// Look up a fresh entry under an already-held lock, evicting it if stale
    fn fresh(&self, indices: &mut Indices<T>, key: T::Key) -> Option<Arc<T>> {
        let stale = self.is_stale(indices.by_key.get(&key)?);
        if stale {
            indices.evict(key);
            tracing::trace!("Evicted stale cache entry {}", key);
            return None;
        }
        indices.by_key.get(&key).map(|e| Arc::clone(&e.object))
    }

    /// Get an object by surrogate key
    pub fn get_by_key(&self, key: T::Key) -> Option<Arc<T>> {
        let mut indices = self.indices.lock();
        self.fresh(&mut indices, key)
    }

    /// Get an object by key, then confirm it with `validator`
    ///
    /// The validator runs outside the lock, so it may hit storage.
    pub fn get_by_key_validated<V>(&self, key: T::Key, validator: &V) -> Option<Arc<T>>
    where
        V: CacheValidator<T> + ?Sized,
    {
        let object = self.get_by_key(key)?;
        if validator.is_still_valid(&object) {
            return Some(object);
        }

        let mut indices = self.indices.lock();
        let same = indices
            .by_key
            .get(&key)
            .map(|e| Arc::ptr_eq(&e.object, &object))
            .unwrap_or(false);
        if same {
            indices.evict(key);
            tracing::trace!("Evicted invalidated cache entry {}", key);
        }
        None
    }

    /// Get an object by unique name
    pub fn get_by_name(&self, name: &str) -> Option<Arc<T>> {
        let folded = self.fold_name(Some(name))?;
        let mut indices = self.indices.lock();
        let key = *indices.by_name.get(&folded)?;
        self.fresh(&mut indices, key)
    }

    /// Linear scan for the first fresh object matching `predicate`
    ///
    /// Unindexed; only for lookups where neither key nor name is known.
    pub fn search<P>(&self, predicate: P) -> Option<Arc<T>>
    where
        P: Fn(&T) -> bool,
    {
        let indices = self.indices.lock();
        indices
            .by_key
            .values()
            .filter(|e| !self.is_stale(e))
            .find(|e| predicate(&e.object))
            .map(|e| Arc::clone(&e.object))
    }

    /// Remove an object. Removing an absent key is a no-op.
    pub fn remove(&self, key: T::Key) -> Option<Arc<T>> {
        self.indices.lock().evict(key).map(|e| e.object)
    }

    pub fn clear(&self) {
        let mut indices = self.indices.lock();
        indices.by_key.clear();
        indices.by_name.clear();
    }

    /// Number of entries, stale ones included until a read evicts them
    pub fn len(&self) -> usize {
        self.indices.lock().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every cached object
    pub fn iter(&self) -> std::vec::IntoIter<Arc<T>> {
        let indices = self.indices.lock();
        indices
            .by_key
            .values()
            .map(|e| Arc::clone(&e.object))
            .collect::<Vec<_>>()
            .into_iter()
    }

    /// Release every entry; the cache stays usable afterwards
    pub fn close(&self) {
        let dropped = self.len();
        self.clear();
        tracing::debug!("Object cache closed, {} entries dropped", dropped);
    }

    #[cfg(test)]
    fn name_index_len(&self) -> usize {
        self.indices.lock().by_name.len()
    }
}

impl<T: CacheObject> fmt::Debug for ObjectCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectCache")
            .field("max_age", &self.max_age)
            .field("case_sensitive", &self.case_sensitive)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[derive(Debug, PartialEq)]
    struct Site {
        id: i64,
        name: String,
    }

    impl Site {
        fn new(id: i64, name: &str) -> Self {
            Self {
                id,
                name: name.to_string(),
            }
        }
    }

    impl CacheObject for Site {
        type Key = i64;

        fn key(&self) -> i64 {
            self.id
        }

        fn unique_name(&self) -> Option<&str> {
            Some(&self.name)
        }
    }

    fn hour() -> Duration {
        Duration::from_secs(3600)
    }

    #[test]
    fn test_put_and_get() {
        let cache = ObjectCache::new(hour());
        cache.put(Site::new(1, "Hanford"));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get_by_key(1).unwrap().name, "Hanford");
        assert_eq!(cache.get_by_name("hanford").unwrap().id, 1);
        assert_eq!(cache.get_by_name("HANFORD").unwrap().id, 1);
        assert!(cache.get_by_key(2).is_none());
    }

    #[test]
    fn test_case_sensitive_names() {
        let cache = ObjectCache::case_sensitive(hour());
        cache.put(Site::new(1, "Hanford"));

        assert!(cache.get_by_name("Hanford").is_some());
        assert!(cache.get_by_name("hanford").is_none());
    }

    #[test]
    fn test_blank_name_is_key_only() {
        let cache = ObjectCache::new(hour());
        cache.put(Site::new(1, ""));
        cache.put(Site::new(2, "   "));

        assert_eq!(cache.get_by_key(1).unwrap().id, 1);
        assert_eq!(cache.get_by_key(2).unwrap().id, 2);
        assert!(cache.get_by_name("").is_none());
        assert!(cache.get_by_name("   ").is_none());
        assert_eq!(cache.name_index_len(), 0);
    }

    #[test]
    fn test_stale_entry_evicted_from_both_indices() {
        let cache = ObjectCache::new(Duration::from_millis(30));
        cache.put(Site::new(1, "Hanford"));
        cache.put(Site::new(2, "Priest Rapids"));

        thread::sleep(Duration::from_millis(60));

        assert!(cache.get_by_key(1).is_none());
        assert!(cache.get_by_name("hanford").is_none());
        // Only entry 1 was read, so only entry 1 is gone
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.name_index_len(), 1);

        assert!(cache.get_by_name("priest rapids").is_none());
        assert!(cache.is_empty());
        assert_eq!(cache.name_index_len(), 0);
    }

    #[test]
    fn test_put_refreshes_load_time() {
        let cache = ObjectCache::new(Duration::from_millis(80));
        cache.put(Site::new(1, "Hanford"));
        thread::sleep(Duration::from_millis(50));
        cache.put(Site::new(1, "Hanford"));
        thread::sleep(Duration::from_millis(50));

        assert!(cache.get_by_key(1).is_some());
    }

    #[test]
    fn test_validator_evicts() {
        let cache = ObjectCache::new(hour());
        cache.put(Site::new(1, "Hanford"));

        let keep = |_: &Site| true;
        assert!(cache.get_by_key_validated(1, &keep).is_some());

        let reject = |_: &Site| false;
        assert!(cache.get_by_key_validated(1, &reject).is_none());
        assert!(cache.get_by_key(1).is_none());
        assert!(cache.get_by_name("hanford").is_none());
    }

    #[test]
    fn test_validator_not_called_on_miss() {
        let cache: ObjectCache<Site> = ObjectCache::new(hour());
        let called = std::cell::Cell::new(false);
        let validator = |_: &Site| {
            called.set(true);
            true
        };

        assert!(cache.get_by_key_validated(7, &validator).is_none());
        assert!(!called.get());
    }

    #[test]
    fn test_rename_updates_name_index() {
        let cache = ObjectCache::new(hour());
        cache.put(Site::new(1, "Old Name"));
        cache.put(Site::new(1, "New Name"));

        assert!(cache.get_by_name("old name").is_none());
        assert_eq!(cache.get_by_name("new name").unwrap().id, 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.name_index_len(), 1);
    }

    #[test]
    fn test_name_taken_over_by_other_key() {
        let cache = ObjectCache::new(hour());
        cache.put(Site::new(1, "Shared"));
        cache.put(Site::new(2, "Shared"));

        assert_eq!(cache.get_by_name("shared").unwrap().id, 2);

        // Removing the first holder must not drop the second's name
        cache.remove(1);
        assert_eq!(cache.get_by_name("shared").unwrap().id, 2);
    }

    #[test]
    fn test_search() {
        let cache = ObjectCache::new(hour());
        cache.put(Site::new(1, "Hanford"));
        cache.put(Site::new(2, "Priest Rapids"));

        let found = cache.search(|s| s.name.contains("Rapids")).unwrap();
        assert_eq!(found.id, 2);
        assert!(cache.search(|s| s.id > 10).is_none());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let cache = ObjectCache::new(hour());
        cache.put(Site::new(1, "Hanford"));

        assert!(cache.remove(1).is_some());
        assert!(cache.remove(1).is_none());
        assert!(cache.remove(99).is_none());
        assert!(cache.get_by_name("hanford").is_none());
    }

    #[test]
    fn test_clear_and_iter() {
        let cache = ObjectCache::new(hour());
        cache.put(Site::new(1, "a"));
        cache.put(Site::new(2, "b"));
        cache.put(Site::new(3, "c"));

        let mut ids: Vec<i64> = cache.iter().map(|s| s.id).collect();
        ids.sort();
        assert_eq!(ids, vec![1, 2, 3]);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.name_index_len(), 0);
    }

    #[test]
    fn test_returned_handle_survives_eviction() {
        let cache = ObjectCache::new(hour());
        let held = cache.put(Site::new(1, "Hanford"));
        cache.remove(1);
        assert_eq!(held.name, "Hanford");
    }

    #[test]
    fn test_concurrent_access() {
        let cache = Arc::new(ObjectCache::new(hour()));

        thread::scope(|s| {
            for t in 0..4i64 {
                let cache = Arc::clone(&cache);
                s.spawn(move || {
                    for i in 0..250i64 {
                        let id = t * 1000 + i;
                        cache.put(Site::new(id, &format!("site-{}", id)));
                        assert!(cache.get_by_key(id).is_some());
                        assert!(cache.get_by_name(&format!("SITE-{}", id)).is_some());
                        if i % 2 == 0 {
                            cache.remove(id);
                        }
                    }
                });
            }
        });

        assert_eq!(cache.len(), 500);
        assert_eq!(cache.name_index_len(), 500);
    }
}
