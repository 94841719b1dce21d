// SSTable tests
// Building, reopening, point lookups through bloom + sparse index, scans.

use std::fs;
use std::path::Path;

use bytekv::iterator::StorageIterator;
use bytekv::sstable::{table_dir, SSTable, SSTableBuilder, TableOptions, TMP_SUFFIX};
use bytekv::types::Slot;
use bytekv::Error;
use tempfile::tempdir;

fn small_index() -> TableOptions {
    TableOptions {
        sparse_index_interval: 256,
        ..TableOptions::default()
    }
}

fn build(root: &Path, id: u64, count: u32) -> SSTable {
    let mut builder = SSTableBuilder::new(root, id, 0, count as usize, small_index()).unwrap();
    for i in 0..count {
        let key = format!("key_{i:05}");
        let slot = Slot::Value(format!("value_{i}"));
        builder.add(&key, &slot, 42).unwrap();
    }
    builder.finish().unwrap()
}

// =============================================================================
// Test 1: Write 1000 entries, get all back
// =============================================================================
#[test]
fn read_1000_entries_back() {
    let dir = tempdir().unwrap();
    let table = build(dir.path(), 1, 1000);

    assert_eq!(table.entry_count(), 1000);
    assert!(table.index_len() > 1, "small interval should index many records");
    for i in 0..1000u32 {
        let got = table.get(&format!("key_{i:05}")).unwrap();
        assert_eq!(got, Some(Slot::Value(format!("value_{i}"))));
    }
}

// =============================================================================
// Test 2: Missing keys: before first, between, after last
// =============================================================================
#[test]
fn missing_keys_return_none() {
    let dir = tempdir().unwrap();
    let table = build(dir.path(), 1, 100);

    assert_eq!(table.get("aaa").unwrap(), None);
    assert_eq!(table.get("key_00050x").unwrap(), None);
    assert_eq!(table.get("zzz").unwrap(), None);
}

// =============================================================================
// Test 3: Tombstones come back as Slot::Tombstone
// =============================================================================
#[test]
fn tombstone_is_reported() {
    let dir = tempdir().unwrap();
    let mut builder = SSTableBuilder::new(dir.path(), 1, 0, 2, small_index()).unwrap();
    builder.add("alive", &Slot::Value("v".into()), 1).unwrap();
    builder.add("dead", &Slot::Tombstone, 2).unwrap();
    let table = builder.finish().unwrap();

    assert_eq!(table.get("dead").unwrap(), Some(Slot::Tombstone));
    assert_eq!(table.get("alive").unwrap(), Some(Slot::Value("v".into())));
}

// =============================================================================
// Test 4: Out-of-order keys are rejected
// =============================================================================
#[test]
fn out_of_order_add_rejected() {
    let dir = tempdir().unwrap();
    let mut builder = SSTableBuilder::new(dir.path(), 1, 0, 2, small_index()).unwrap();
    builder.add("b", &Slot::Value("1".into()), 1).unwrap();

    let err = builder.add("a", &Slot::Value("2".into()), 1).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    let err = builder.add("b", &Slot::Value("3".into()), 1).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    builder.abandon().unwrap();
}

// =============================================================================
// Test 5: Reopen rebuilds the bloom filter and keeps level/meta
// =============================================================================
#[test]
fn reopen_rebuilds_bloom() {
    let dir = tempdir().unwrap();
    let mut builder = SSTableBuilder::new(dir.path(), 7, 2, 500, small_index()).unwrap();
    for i in 0..500u32 {
        builder.add(&format!("k{i:04}"), &Slot::Value(i.to_string()), 9).unwrap();
    }
    let built = builder.finish().unwrap();
    let path = built.dir().to_path_buf();
    drop(built);

    let table = SSTable::open(&path, small_index()).unwrap();
    assert_eq!(table.id(), 7);
    assert_eq!(table.level(), 2);
    assert_eq!(table.entry_count(), 500);
    for i in 0..500u32 {
        let key = format!("k{i:04}");
        assert!(table.may_contain(&key), "bloom lost {key}");
        assert_eq!(table.get(&key).unwrap(), Some(Slot::Value(i.to_string())));
    }
}

// =============================================================================
// Test 6: Finished table lives in its final directory, no tmp left
// =============================================================================
#[test]
fn finish_publishes_directory() {
    let dir = tempdir().unwrap();
    let table = build(dir.path(), 3, 10);

    assert_eq!(table.dir(), table_dir(dir.path(), 3));
    assert!(table.dir().join("sstable-000003.data").exists());
    assert!(table.dir().join("sstable-000003.index").exists());
    assert!(table.dir().join("sstable-000003.meta").exists());

    let leftovers = fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(TMP_SUFFIX))
        .count();
    assert_eq!(leftovers, 0);
}

// =============================================================================
// Test 7: Keys with tabs and newlines survive index and lookup
// =============================================================================
#[test]
fn awkward_keys_are_found() {
    let dir = tempdir().unwrap();
    let mut builder = SSTableBuilder::new(dir.path(), 1, 0, 3, small_index()).unwrap();
    builder.add("a\nb", &Slot::Value("newline".into()), 1).unwrap();
    builder.add("c\td", &Slot::Value("tab".into()), 1).unwrap();
    builder.add("e", &Slot::Value("plain".into()), 1).unwrap();
    let path = builder.finish().unwrap().dir().to_path_buf();

    let table = SSTable::open(&path, small_index()).unwrap();
    assert_eq!(table.get("a\nb").unwrap(), Some(Slot::Value("newline".into())));
    assert_eq!(table.get("c\td").unwrap(), Some(Slot::Value("tab".into())));
    assert_eq!(table.get("e").unwrap(), Some(Slot::Value("plain".into())));
}

// =============================================================================
// Test 8: Full scan yields every record in key order
// =============================================================================
#[test]
fn iter_scans_in_order() {
    let dir = tempdir().unwrap();
    let table = build(dir.path(), 1, 300);

    let mut iter = table.iter().unwrap();
    let mut seen = Vec::new();
    while let Some(record) = iter.current() {
        seen.push(record.key.clone());
        iter.next().unwrap();
    }
    assert_eq!(seen.len(), 300);
    assert!(seen.windows(2).all(|w| w[0] < w[1]));
}

// =============================================================================
// Test 9: Concurrent lookups on one table all see the right values
// =============================================================================
#[test]
fn concurrent_gets_share_one_table() {
    let dir = tempdir().unwrap();
    let table = std::sync::Arc::new(build(dir.path(), 1, 2000));

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let table = std::sync::Arc::clone(&table);
            std::thread::spawn(move || {
                for i in (t..2000u32).step_by(8) {
                    let got = table.get(&format!("key_{i:05}")).unwrap();
                    assert_eq!(got, Some(Slot::Value(format!("value_{i}"))));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}
