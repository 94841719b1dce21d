// WAL reader tests
// Replay stops at the first torn or corrupt record.

use std::fs::{self, OpenOptions};
use std::io::Write;

use bytekv::wal::{replay, LogEntry, WalReader};

/// Helper: encode `count` puts the way the writer chains them.
fn encoded_log(count: usize) -> (Vec<u8>, Vec<usize>) {
    let mut buf = Vec::new();
    let mut ends = Vec::new();
    let mut prev = 0;
    for i in 0..count {
        let entry = LogEntry::put(format!("key{i}"), format!("val{i}"));
        buf.extend_from_slice(&entry.encode(prev, true));
        prev = entry.timestamp;
        ends.push(buf.len());
    }
    (buf, ends)
}

// =============================================================================
// Test 1: Missing file replays as empty
// =============================================================================
#[test]
fn missing_file_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let replay = replay(&dir.path().join("nope.log")).unwrap();
    assert!(replay.entries.is_empty());
    assert_eq!(replay.valid_len, 0);
    assert!(!replay.truncated);
}

// =============================================================================
// Test 2: Clean file yields every record
// =============================================================================
#[test]
fn clean_file_reads_all() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wal-000001.log");
    let (buf, _) = encoded_log(20);
    fs::write(&path, &buf).unwrap();

    let reader = WalReader::new(&path).unwrap();
    let keys: Vec<String> = reader.iter().map(|e| e.key).collect();
    assert_eq!(keys.len(), 20);
    assert_eq!(keys[19], "key19");
}

// =============================================================================
// Test 3: Torn tail (crash mid-write) is dropped
// =============================================================================
#[test]
fn torn_tail_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wal-000001.log");
    let (buf, ends) = encoded_log(5);
    // Cut the last record in half
    fs::write(&path, &buf[..buf.len() - 3]).unwrap();

    let replay = replay(&path).unwrap();
    assert_eq!(replay.entries.len(), 4);
    assert!(replay.truncated);
    assert_eq!(replay.valid_len, ends[3] as u64);
}

// =============================================================================
// Test 4: CRC mismatch stops replay at the damaged record
// =============================================================================
#[test]
fn crc_mismatch_stops_replay() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wal-000001.log");
    let (mut buf, ends) = encoded_log(3);
    // Flip a byte inside the second record's value
    let target = ends[1] - 6;
    buf[target] ^= 0xFF;
    fs::write(&path, &buf).unwrap();

    let replay = replay(&path).unwrap();
    assert_eq!(replay.entries.len(), 1);
    assert_eq!(replay.entries[0].key, "key0");
    assert!(replay.truncated);
    assert_eq!(replay.valid_len, ends[0] as u64);
}

// =============================================================================
// Test 5: Garbage appended after valid records is ignored
// =============================================================================
#[test]
fn trailing_garbage_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wal-000001.log");
    let (buf, ends) = encoded_log(3);
    fs::write(&path, &buf).unwrap();
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&[0xFF; 7]).unwrap();

    let replay = replay(&path).unwrap();
    assert_eq!(replay.entries.len(), 3);
    assert_eq!(replay.valid_len, ends[2] as u64);
}

// =============================================================================
// Test 6: Absolute timestamps are rebuilt from deltas
// =============================================================================
#[test]
fn timestamps_rebuilt_from_deltas() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wal-000001.log");

    let mut first = LogEntry::put("a", "1");
    first.timestamp = 1_000;
    let mut second = LogEntry::delete("a");
    second.timestamp = 1_250;
    let mut buf = first.encode(0, true);
    buf.extend_from_slice(&second.encode(first.timestamp, true));
    fs::write(&path, &buf).unwrap();

    let replay = replay(&path).unwrap();
    assert_eq!(replay.entries[0].timestamp, 1_000);
    assert_eq!(replay.entries[1].timestamp, 1_250);
    assert_eq!(replay.last_timestamp, 1_250);
}
