// TTL manager and read cache tests

use std::thread;
use std::time::{Duration, Instant};

use bytekv::cache::ReadCache;
use bytekv::options::TtlOptions;
use bytekv::ttl::TtlManager;

// =============================================================================
// Test 1: An expired entry reads as absent before any sweep runs
// =============================================================================
#[test]
fn ttl_lazy_expiry() {
    // Sampler never fires during this test
    let ttl = TtlManager::new(TtlOptions {
        sample_interval: Duration::from_secs(3600),
        ..TtlOptions::default()
    });
    ttl.start().unwrap();

    ttl.insert("x", "1", Duration::from_millis(100));
    assert_eq!(ttl.get("x").as_deref(), Some("1"));

    thread::sleep(Duration::from_millis(200));
    assert_eq!(ttl.get("x"), None);
    assert!(ttl.is_empty());
    ttl.stop();
}

// =============================================================================
// Test 2: The sampler sweeps once enough sampled entries are expired
// =============================================================================
#[test]
fn ttl_sampler_sweeps() {
    let ttl = TtlManager::new(TtlOptions {
        sample_interval: Duration::from_millis(20),
        ..TtlOptions::default()
    });
    for i in 0..100 {
        ttl.insert(&format!("k{i}"), "v", Duration::ZERO);
    }
    ttl.insert("keeper", "v", Duration::from_secs(3600));
    ttl.start().unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while ttl.len() > 1 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    ttl.stop();
    ttl.stop();

    assert_eq!(ttl.len(), 1);
    assert_eq!(ttl.get("keeper").as_deref(), Some("v"));
}

// =============================================================================
// Test 3: Remove drops the entry
// =============================================================================
#[test]
fn ttl_remove() {
    let ttl = TtlManager::new(TtlOptions::default());
    ttl.insert("a", "1", Duration::from_secs(60));
    assert!(ttl.remove("a"));
    assert_eq!(ttl.get("a"), None);
}

// =============================================================================
// Test 4: LRU evicts the least recently used entry
// =============================================================================
#[test]
fn cache_evicts_lru() {
    let cache = ReadCache::new(2);
    cache.put("a", "1");
    cache.put("b", "2");
    // Touch "a" so "b" becomes the eviction victim
    assert_eq!(cache.get("a").as_deref(), Some("1"));
    cache.put("c", "3");

    assert_eq!(cache.len(), 2);
    assert_eq!(cache.get("b"), None);
    assert_eq!(cache.get("a").as_deref(), Some("1"));
    assert_eq!(cache.get("c").as_deref(), Some("3"));
}

// =============================================================================
// Test 5: Remove invalidates, clear empties
// =============================================================================
#[test]
fn cache_remove_and_clear() {
    let cache = ReadCache::new(10);
    cache.put("a", "1");
    cache.put("b", "2");
    cache.remove("a");
    assert_eq!(cache.get("a"), None);
    cache.clear();
    assert!(cache.is_empty());
}

// =============================================================================
// Test 6: Capacity 0 disables the cache
// =============================================================================
#[test]
fn cache_disabled_at_zero() {
    let cache = ReadCache::new(0);
    cache.put("a", "1");
    assert_eq!(cache.get("a"), None);
    assert_eq!(cache.len(), 0);
}
