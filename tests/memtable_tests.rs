// MemTable tests
// Tombstones, freezing at the threshold, lossless flush to SSTables.

use std::sync::Arc;

use bytekv::compaction::SstManager;
use bytekv::memtable::MemTable;
use bytekv::Options;
use tempfile::tempdir;

fn setup(dir: &std::path::Path, threshold: usize) -> (Arc<SstManager>, MemTable) {
    // Compactor not started: level layout stays predictable
    let sst = Arc::new(SstManager::open(&Options::new(dir)).unwrap());
    let mem = MemTable::new(Arc::clone(&sst), threshold).unwrap();
    (sst, mem)
}

// =============================================================================
// Test 1: Basic put and get, overwrite wins
// =============================================================================
#[test]
fn put_then_get_returns_latest() {
    let dir = tempdir().unwrap();
    let (_sst, mut mem) = setup(dir.path(), 1024);

    mem.put("a".into(), "1".into()).unwrap();
    mem.put("a".into(), "2".into()).unwrap();
    assert_eq!(mem.get("a").unwrap().as_deref(), Some("2"));
    assert_eq!(mem.get("missing").unwrap(), None);
    assert_eq!(mem.len(), 1);
}

// =============================================================================
// Test 2: Every write across many flushes is readable afterwards
// =============================================================================
#[test]
fn flush_is_lossless() {
    let dir = tempdir().unwrap();
    let (sst, mut mem) = setup(dir.path(), 50);

    for i in 0..475 {
        mem.put(format!("key{i:04}"), format!("v{i}")).unwrap();
    }
    mem.wait_for_flush().unwrap();

    assert_eq!(sst.all_sstables().len(), 9);
    assert_eq!(mem.len(), 25);
    for i in 0..475 {
        assert_eq!(mem.get(&format!("key{i:04}")).unwrap(), Some(format!("v{i}")));
    }
}

// =============================================================================
// Test 3: Tombstone in the buffer shadows a flushed value
// =============================================================================
#[test]
fn tombstone_shadows_sstable() {
    let dir = tempdir().unwrap();
    let (_sst, mut mem) = setup(dir.path(), 1024);

    mem.put("k".into(), "old".into()).unwrap();
    mem.freeze().unwrap();
    mem.wait_for_flush().unwrap();
    assert_eq!(mem.get("k").unwrap().as_deref(), Some("old"));

    // Not in the buffer, so "not found", but the tombstone is still written
    assert!(!mem.delete("k".into()).unwrap());
    assert_eq!(mem.get("k").unwrap(), None);

    // And survives its own flush
    mem.freeze().unwrap();
    mem.wait_for_flush().unwrap();
    assert_eq!(mem.get("k").unwrap(), None);
}

// =============================================================================
// Test 4: Newer flushes shadow older ones
// =============================================================================
#[test]
fn newer_table_wins() {
    let dir = tempdir().unwrap();
    let (sst, mut mem) = setup(dir.path(), 1024);

    mem.put("k".into(), "v1".into()).unwrap();
    mem.freeze().unwrap();
    mem.put("k".into(), "v2".into()).unwrap();
    mem.freeze().unwrap();
    mem.wait_for_flush().unwrap();

    assert_eq!(sst.all_sstables().len(), 2);
    assert_eq!(mem.get("k").unwrap().as_deref(), Some("v2"));
}

// =============================================================================
// Test 5: Freezing an empty buffer does nothing
// =============================================================================
#[test]
fn freeze_empty_is_noop() {
    let dir = tempdir().unwrap();
    let (sst, mut mem) = setup(dir.path(), 10);
    mem.freeze().unwrap();
    mem.wait_for_flush().unwrap();
    assert!(sst.all_sstables().is_empty());
    assert_eq!(mem.frozen_count(), 0);
}
