//! Keys with a time-to-live.
//!
//! TTL entries live in their own in-memory namespace, read via `get_ttl`.
//! Expiry is enforced two ways, like Redis:
//!   - lazily: a read of an expired entry removes it and reports absent
//!   - actively: a sampler thread samples random entries and sweeps the
//!     whole store once too many of the samples are expired

mod sampler;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::seq::index;

use crate::error::Result;
use crate::options::TtlOptions;
use crate::types::now_millis;

use sampler::Sampler;

/// A value and its absolute expiry time (ms since the Unix epoch).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEntry {
    pub value: String,
    pub expires_at: u64,
}

impl StoreEntry {
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

#[derive(Default)]
struct Inner {
    /// key -> (entry, position in `keys`)
    entries: HashMap<String, (StoreEntry, usize)>,
    /// Dense key list for O(1) random sampling.
    keys: Vec<String>,
}

impl Inner {
    fn remove(&mut self, key: &str) -> Option<StoreEntry> {
        let (entry, idx) = self.entries.remove(key)?;
        self.keys.swap_remove(idx);
        if let Some(moved) = self.keys.get(idx) {
            if let Some(slot) = self.entries.get_mut(moved) {
                slot.1 = idx;
            }
        }
        Some(entry)
    }
}

/// Map of TTL entries plus a dense key vector.
#[derive(Default)]
pub struct TtlStore {
    inner: Mutex<Inner>,
}

impl TtlStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace `key`, expiring `ttl` from now.
    pub fn insert(&self, key: &str, value: &str, ttl: Duration) {
        let expires_at = now_millis().saturating_add(ttl.as_millis() as u64);
        let entry = StoreEntry {
            value: value.to_string(),
            expires_at,
        };

        let mut inner = self.inner.lock();
        if let Some(slot) = inner.entries.get_mut(key) {
            slot.0 = entry;
            return;
        }
        let idx = inner.keys.len();
        inner.keys.push(key.to_string());
        inner.entries.insert(key.to_string(), (entry, idx));
    }

    /// The value if it has not expired. An expired entry is removed on the way.
    pub fn get(&self, key: &str) -> Option<String> {
        let mut inner = self.inner.lock();
        let (entry, _) = inner.entries.get(key)?;
        if !entry.is_expired(now_millis()) {
            return Some(entry.value.clone());
        }
        inner.remove(key);
        None
    }

    pub fn remove(&self, key: &str) -> bool {
        self.inner.lock().remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sample up to `n` distinct random entries. Returns (sampled, expired).
    pub fn sample(&self, n: usize) -> (usize, usize) {
        let inner = self.inner.lock();
        let amount = n.min(inner.keys.len());
        if amount == 0 {
            return (0, 0);
        }
        let now = now_millis();
        let mut rng = rand::thread_rng();
        let expired = index::sample(&mut rng, inner.keys.len(), amount)
            .iter()
            .filter(|&i| {
                inner
                    .entries
                    .get(&inner.keys[i])
                    .is_some_and(|(entry, _)| entry.is_expired(now))
            })
            .count();
        (amount, expired)
    }

    /// Remove every expired entry. Returns how many went.
    pub fn sweep(&self) -> usize {
        let mut inner = self.inner.lock();
        let now = now_millis();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, (entry, _))| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        expired.len()
    }
}

/// How many expired samples out of `sampled` justify a full sweep.
pub(crate) fn sweep_threshold(sampled: usize, expired_fraction: f64, min_expired: usize) -> usize {
    let by_fraction = (sampled as f64 * expired_fraction).ceil() as usize;
    by_fraction.max(min_expired.min(sampled))
}

/// Owns the TTL store and its background sampler.
pub struct TtlManager {
    store: Arc<TtlStore>,
    options: TtlOptions,
    sampler: Mutex<Option<Sampler>>,
}

impl TtlManager {
    pub fn new(options: TtlOptions) -> Self {
        Self {
            store: Arc::new(TtlStore::new()),
            options,
            sampler: Mutex::new(None),
        }
    }

    /// Start the sampler thread. Does nothing if it is already running.
    pub fn start(&self) -> Result<()> {
        let mut sampler = self.sampler.lock();
        if sampler.is_none() {
            *sampler = Some(Sampler::spawn(Arc::clone(&self.store), self.options.clone())?);
        }
        Ok(())
    }

    /// Stop and join the sampler. Idempotent.
    pub fn stop(&self) {
        if let Some(sampler) = self.sampler.lock().take() {
            sampler.stop();
        }
    }

    pub fn insert(&self, key: &str, value: &str, ttl: Duration) {
        self.store.insert(key, value, ttl);
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.store.get(key)
    }

    pub fn remove(&self, key: &str) -> bool {
        self.store.remove(key)
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn store(&self) -> &TtlStore {
        &self.store
    }
}

impl Drop for TtlManager {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lazy_expiry() {
        let store = TtlStore::new();
        store.insert("a", "1", Duration::ZERO);
        store.insert("b", "2", Duration::from_secs(60));
        assert_eq!(store.get("a"), None);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("b").as_deref(), Some("2"));
    }

    #[test]
    fn test_replace_keeps_single_slot() {
        let store = TtlStore::new();
        store.insert("a", "1", Duration::from_secs(60));
        store.insert("a", "2", Duration::from_secs(60));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("a").as_deref(), Some("2"));
    }

    #[test]
    fn test_remove_fixes_moved_index() {
        let store = TtlStore::new();
        for k in ["a", "b", "c"] {
            store.insert(k, k, Duration::from_secs(60));
        }
        assert!(store.remove("a"));
        assert!(!store.remove("a"));
        // "c" was swapped into slot 0; removing it must not corrupt "b"
        assert!(store.remove("c"));
        assert_eq!(store.get("b").as_deref(), Some("b"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_sample_and_sweep() {
        let store = TtlStore::new();
        for i in 0..10 {
            store.insert(&format!("dead{i}"), "x", Duration::ZERO);
        }
        store.insert("live", "y", Duration::from_secs(60));

        let (sampled, expired) = store.sample(100);
        assert_eq!(sampled, 11);
        assert_eq!(expired, 10);

        assert_eq!(store.sweep(), 10);
        assert_eq!(store.len(), 1);
        assert_eq!(store.sample(5), (1, 0));
    }

    #[test]
    fn test_sample_empty() {
        assert_eq!(TtlStore::new().sample(20), (0, 0));
    }

    #[test]
    fn test_sweep_threshold() {
        assert_eq!(sweep_threshold(20, 0.25, 5), 5);
        assert_eq!(sweep_threshold(40, 0.25, 5), 10);
        assert_eq!(sweep_threshold(3, 0.25, 5), 3);
        assert_eq!(sweep_threshold(1, 0.25, 5), 1);
    }
}
