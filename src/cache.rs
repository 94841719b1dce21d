use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

/// Bounded LRU cache in front of the read path.
///
/// Populated on writes and on read hits below the memtable, invalidated on
/// delete. A miss always falls through to the memtable and SSTables, so the
/// cache can only make reads faster, never different.
pub struct ReadCache {
    cache: Option<Mutex<LruCache<String, String>>>,
}

impl ReadCache {
    /// A capacity of 0 disables caching entirely.
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.cache.as_ref()?.lock().get(key).cloned()
    }

    pub fn put(&self, key: &str, value: &str) {
        if let Some(cache) = &self.cache {
            cache.lock().put(key.to_string(), value.to_string());
        }
    }

    pub fn remove(&self, key: &str) {
        if let Some(cache) = &self.cache {
            cache.lock().pop(key);
        }
    }

    pub fn len(&self) -> usize {
        self.cache.as_ref().map_or(0, |c| c.lock().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached entry.
    pub fn clear(&self) {
        if let Some(cache) = &self.cache {
            cache.lock().clear();
        }
    }
}
