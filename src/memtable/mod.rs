mod flusher;

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::compaction::SstManager;
use crate::error::Result;
use crate::types::{check_key, Key, Operation, Slot, Snapshot, Value};
use crate::wal::{LogEntry, WalManager};

use flusher::{FlushJob, Flusher};

/// Frozen snapshots waiting for (or in the middle of) a flush, oldest first.
pub(crate) type FrozenQueue = Arc<RwLock<VecDeque<Arc<Snapshot>>>>;

/// In-memory sorted buffer for writes.
///
/// Every write goes here first. When the buffer reaches the flush threshold
/// it is frozen into an immutable snapshot and handed to the flush worker,
/// which turns it into a level-0 SSTable.
///
/// Deletes are handled via tombstones. You can't just remove the key
/// because older versions may exist in SSTables on disk.
///
/// A frozen snapshot stays readable until its SSTable is published, so a
/// key never disappears between "buffer cleared" and "table visible".
///
/// With a WAL attached, every freeze rotates the log so the frozen buffer
/// carries exactly the segments holding its writes; the flush worker deletes
/// them after publishing.
pub struct MemTable {
    active: Snapshot,
    frozen: FrozenQueue,
    threshold: usize,
    sst: Arc<SstManager>,
    wal: Option<Arc<WalManager>>,
    flusher: Flusher,
}

impl MemTable {
    /// Create an empty memtable that flushes through `sst` every
    /// `threshold` entries.
    pub fn new(sst: Arc<SstManager>, threshold: usize) -> Result<Self> {
        let frozen: FrozenQueue = Arc::default();
        let flusher = Flusher::spawn(Arc::clone(&sst), Arc::clone(&frozen))?;
        Ok(MemTable {
            active: Snapshot::new(),
            frozen,
            threshold,
            sst,
            wal: None,
            flusher,
        })
    }

    /// Like `new`, but freezes rotate `wal` and flushes trim it.
    pub fn with_wal(sst: Arc<SstManager>, threshold: usize, wal: Arc<WalManager>) -> Result<Self> {
        let mut memtable = Self::new(sst, threshold)?;
        memtable.wal = Some(wal);
        Ok(memtable)
    }

    /// Apply replayed log entries. Never freezes: the entries' segments stay
    /// with the active buffer until the next freeze.
    pub fn restore(&mut self, entries: impl IntoIterator<Item = LogEntry>) {
        for entry in entries {
            let slot = match entry.operation {
                Operation::Put => Slot::Value(entry.value),
                Operation::Delete => Slot::Tombstone,
            };
            self.active.insert(entry.key, slot);
        }
    }

    /// Insert or update a key-value pair.
    pub fn put(&mut self, key: Key, value: Value) -> Result<()> {
        check_key(&key)?;
        self.active.insert(key, Slot::Value(value));
        self.maybe_freeze()
    }

    /// Mark a key as deleted. Returns true if the buffer held a live value
    /// for it; the tombstone is written either way.
    pub fn delete(&mut self, key: Key) -> Result<bool> {
        check_key(&key)?;
        let found = matches!(self.active.insert(key, Slot::Tombstone), Some(Slot::Value(_)));
        self.maybe_freeze()?;
        Ok(found)
    }

    /// Look up a key: active buffer, then frozen snapshots newest first,
    /// then SSTables. The first hit wins; a tombstone hit means absent.
    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.lookup(key)?.and_then(Slot::into_value))
    }

    fn lookup(&self, key: &str) -> Result<Option<Slot>> {
        if let Some(slot) = self.active.get(key) {
            return Ok(Some(slot.clone()));
        }
        {
            let frozen = self.frozen.read();
            for snapshot in frozen.iter().rev() {
                if let Some(slot) = snapshot.get(key) {
                    return Ok(Some(slot.clone()));
                }
            }
        }
        self.sst.get(key)
    }

    /// Move the active buffer to the flush queue. A no-op when empty.
    pub fn freeze(&mut self) -> Result<()> {
        if self.active.is_empty() {
            return Ok(());
        }
        let wal_segments = match &self.wal {
            Some(wal) => wal.rotate()?,
            None => Vec::new(),
        };
        let snapshot = Arc::new(std::mem::take(&mut self.active));
        tracing::debug!(entries = snapshot.len(), segments = wal_segments.len(), "Memtable frozen");
        self.frozen.write().push_back(Arc::clone(&snapshot));
        self.flusher.submit(FlushJob {
            snapshot,
            wal_segments,
        })
    }

    /// Block until every frozen snapshot has been published as an SSTable.
    pub fn wait_for_flush(&self) -> Result<()> {
        self.flusher.wait()
    }

    /// Entries in the active buffer.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Snapshots not yet published.
    pub fn frozen_count(&self) -> usize {
        self.frozen.read().len()
    }

    /// Stop the flush worker after it drains its queue.
    pub fn stop(&mut self) {
        self.flusher.stop();
    }

    fn maybe_freeze(&mut self) -> Result<()> {
        if self.active.len() >= self.threshold {
            self.freeze()?;
        }
        Ok(())
    }
}

impl Drop for MemTable {
    fn drop(&mut self) {
        self.flusher.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;
    use tempfile::tempdir;

    fn memtable(dir: &std::path::Path, threshold: usize) -> MemTable {
        let sst = Arc::new(SstManager::open(&Options::new(dir)).unwrap());
        MemTable::new(sst, threshold).unwrap()
    }

    #[test]
    fn test_read_your_writes() {
        let dir = tempdir().unwrap();
        let mut mem = memtable(dir.path(), 100);
        mem.put("a".into(), "1".into()).unwrap();
        assert_eq!(mem.get("a").unwrap().as_deref(), Some("1"));
        mem.put("a".into(), "2".into()).unwrap();
        assert_eq!(mem.get("a").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn test_delete_reports_found() {
        let dir = tempdir().unwrap();
        let mut mem = memtable(dir.path(), 100);
        mem.put("a".into(), "1".into()).unwrap();
        assert!(mem.delete("a".into()).unwrap());
        assert!(!mem.delete("a".into()).unwrap());
        assert!(!mem.delete("never".into()).unwrap());
        assert_eq!(mem.get("a").unwrap(), None);
    }

    #[test]
    fn test_freeze_at_threshold() {
        let dir = tempdir().unwrap();
        let mut mem = memtable(dir.path(), 3);
        for i in 0..3 {
            mem.put(format!("k{i}"), "v".into()).unwrap();
        }
        assert!(mem.is_empty());
        mem.wait_for_flush().unwrap();
        assert_eq!(mem.frozen_count(), 0);
        assert_eq!(mem.sst.all_sstables().len(), 1);
        assert_eq!(mem.get("k1").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn test_restore_does_not_freeze() {
        let dir = tempdir().unwrap();
        let mut mem = memtable(dir.path(), 2);
        mem.restore(vec![
            LogEntry::put("a", "1"),
            LogEntry::put("b", "2"),
            LogEntry::put("c", "3"),
            LogEntry::delete("a"),
        ]);
        assert_eq!(mem.len(), 3);
        assert_eq!(mem.frozen_count(), 0);
        assert_eq!(mem.get("a").unwrap(), None);
        assert_eq!(mem.get("c").unwrap().as_deref(), Some("3"));
    }

    #[test]
    fn test_flush_deletes_wal_segments() {
        let dir = tempdir().unwrap();
        let sst = Arc::new(SstManager::open(&Options::new(dir.path())).unwrap());
        let wal_dir = dir.path().join("wal");
        let (wal, _) = WalManager::open(&wal_dir, &Default::default()).unwrap();
        let wal = Arc::new(wal);
        let mut mem = MemTable::with_wal(sst, 2, Arc::clone(&wal)).unwrap();

        wal.append(LogEntry::put("a", "1")).unwrap();
        mem.put("a".into(), "1".into()).unwrap();
        wal.append(LogEntry::put("b", "2")).unwrap();
        mem.put("b".into(), "2".into()).unwrap();
        mem.wait_for_flush().unwrap();

        // Only the fresh active segment is left
        let segments = crate::wal::list_segments(&wal_dir).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].1, wal.writer().path());
        assert_eq!(mem.get("b").unwrap().as_deref(), Some("2"));
        wal.close().unwrap();
    }

    #[test]
    fn test_rejects_empty_key() {
        let dir = tempdir().unwrap();
        let mut mem = memtable(dir.path(), 10);
        assert!(mem.put(String::new(), "v".into()).is_err());
    }
}
