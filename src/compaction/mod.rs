//! SSTable ownership and tiered compaction.
//!
//! New flushes always land in level 0 with a fresh id. When a level reaches
//! `max_tables_per_level` tables, all of them are k-way merged into exactly
//! one table one level down:
//!
//! ```text
//! L0: [t5 t6 t7 t8]  ──merge──►  L1: [t2 t9]
//! ```
//!
//! Inputs are oldest-first within a level and every table in level L is
//! newer than every table in level L+1, so reads that walk level 0 first
//! (newest table first) always see the most recent version of a key.

mod worker;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};

use crate::error::Result;
use crate::iterator::{MergeIterator, StorageIterator};
use crate::manifest::{self, Levels};
use crate::options::Options;
use crate::sstable::{SSTable, SSTableBuilder, TableOptions, DEL_SUFFIX};
use crate::types::{now_millis, Slot, Snapshot};

use worker::CompactionWorker;

/// Owns every SSTable, organized into levels.
pub struct SstManager {
    shared: Arc<SstShared>,
    worker: Mutex<Option<CompactionWorker>>,
    compaction_interval: Duration,
}

/// State reachable from the compaction thread.
pub(crate) struct SstShared {
    root: PathBuf,
    table_options: TableOptions,
    max_tables_per_level: usize,
    /// Next table id; never reused, restored as max(id)+1 on startup.
    next_id: AtomicU64,
    levels: RwLock<Levels>,
    /// One compaction at a time, whether from the worker or a caller.
    compaction: Mutex<()>,
    nudge_tx: Sender<()>,
    nudge_rx: Receiver<()>,
}

impl SstManager {
    /// Recover the level catalog from `options.sst_dir()`.
    pub fn open(options: &Options) -> Result<Self> {
        let root = options.sst_dir();
        let table_options = TableOptions {
            sparse_index_interval: options.sparse_index_interval,
            false_positive_rate: options.bloom_false_positive_rate,
        };
        let recovered = manifest::recover(&root, table_options)?;

        let (nudge_tx, nudge_rx) = bounded(1);
        let shared = Arc::new(SstShared {
            root,
            table_options,
            max_tables_per_level: options.max_tables_per_level,
            next_id: AtomicU64::new(recovered.max_id + 1),
            levels: RwLock::new(recovered.levels),
            compaction: Mutex::new(()),
            nudge_tx,
            nudge_rx,
        });

        Ok(SstManager {
            shared,
            worker: Mutex::new(None),
            compaction_interval: options.compaction_interval,
        })
    }

    /// Start the background compactor. Does nothing if it is already running.
    pub fn start_compactor(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_none() {
            *worker = Some(CompactionWorker::spawn(
                Arc::clone(&self.shared),
                self.compaction_interval,
            )?);
            self.shared.nudge();
        }
        Ok(())
    }

    /// Stop the compactor, waiting for an in-flight compaction to finish.
    /// Idempotent.
    pub fn stop_compactor(&self) {
        if let Some(worker) = self.worker.lock().take() {
            worker.stop();
        }
    }

    /// Persist a sorted snapshot as a new level-0 table.
    ///
    /// Returns None for an empty snapshot. The table is durable and visible
    /// to readers before this returns.
    pub fn flush_to_sstable(&self, snapshot: &Snapshot) -> Result<Option<Arc<SSTable>>> {
        self.shared.flush_to_sstable(snapshot)
    }

    /// Every table, newest first.
    pub fn all_sstables(&self) -> Vec<Arc<SSTable>> {
        self.shared.levels.read().newest_first()
    }

    /// Look a key up across all tables; the first table that knows the key wins.
    pub fn get(&self, key: &str) -> Result<Option<Slot>> {
        for table in self.all_sstables() {
            if let Some(slot) = table.get(key)? {
                return Ok(Some(slot));
            }
        }
        Ok(None)
    }

    /// Run tiered compaction now. Returns the number of levels merged.
    pub fn compact(&self) -> Result<usize> {
        self.shared.compact()
    }

    /// Table counts per level, top to bottom.
    pub fn level_counts(&self) -> Vec<usize> {
        self.shared.levels.read().counts()
    }

    /// The id the next table will get.
    pub fn next_id(&self) -> u64 {
        self.shared.next_id.load(Ordering::SeqCst)
    }
}

impl Drop for SstManager {
    fn drop(&mut self) {
        self.stop_compactor();
    }
}

impl SstShared {
    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn nudge(&self) {
        // A full channel already means "compaction pending"
        let _ = self.nudge_tx.try_send(());
    }

    fn flush_to_sstable(&self, snapshot: &Snapshot) -> Result<Option<Arc<SSTable>>> {
        if snapshot.is_empty() {
            return Ok(None);
        }

        let id = self.allocate_id();
        let mut builder = SSTableBuilder::new(&self.root, id, 0, snapshot.len(), self.table_options)?;
        let timestamp = now_millis();
        for (key, slot) in snapshot {
            if let Err(e) = builder.add(key, slot, timestamp) {
                let _ = builder.abandon();
                return Err(e);
            }
        }
        let table = Arc::new(builder.finish()?);

        self.levels.write().push(0, Arc::clone(&table));
        tracing::debug!(table_id = id, entries = snapshot.len(), "Flushed memtable to level 0");

        self.nudge();
        Ok(Some(table))
    }

    pub(crate) fn compact(&self) -> Result<usize> {
        let _guard = self.compaction.lock();
        let mut merged = 0;
        let mut level = 0;

        loop {
            let (inputs, bottom) = {
                let levels = self.levels.read();
                if level >= levels.depth() {
                    break;
                }
                let tables = levels.level(level);
                if tables.len() < self.max_tables_per_level {
                    level += 1;
                    continue;
                }
                (tables.to_vec(), levels.is_bottom(level))
            };

            // Re-check the same level afterwards; flushes may have refilled it
            self.merge_level(level, &inputs, bottom)?;
            merged += 1;
        }

        Ok(merged)
    }

    /// Merge `inputs` (all of `level`, oldest first) into one table at level+1.
    ///
    /// Tombstones are dropped only when nothing below `level` could still
    /// hold an older version of their key.
    fn merge_level(&self, level: usize, inputs: &[Arc<SSTable>], drop_tombstones: bool) -> Result<()> {
        let id = self.allocate_id();
        let expected: u64 = inputs.iter().map(|t| t.entry_count()).sum();

        // Newest input first: index 0 wins ties in the merge
        let sources = inputs
            .iter()
            .rev()
            .map(|t| Ok(Box::new(t.iter()?) as Box<dyn StorageIterator>))
            .collect::<Result<Vec<_>>>()?;
        let mut merged = MergeIterator::new(sources)?;

        let mut builder = SSTableBuilder::new(
            &self.root,
            id,
            (level + 1) as u32,
            expected as usize,
            self.table_options,
        )?;
        let dropped = match fill(&mut builder, &mut merged, drop_tombstones) {
            Ok(dropped) => dropped,
            Err(e) => {
                let _ = builder.abandon();
                return Err(e);
            }
        };

        // Output is durable before any input is retired
        let output = if builder.entry_count() == 0 {
            builder.abandon()?;
            None
        } else {
            Some(Arc::new(builder.finish()?))
        };

        let input_ids: Vec<u64> = inputs.iter().map(|t| t.id()).collect();
        {
            let mut levels = self.levels.write();
            if let Some(table) = &output {
                levels.push(level + 1, Arc::clone(table));
            }
            levels.retire(level, &input_ids);
        }

        for table in inputs {
            if let Err(e) = remove_table_dir(table.dir()) {
                tracing::warn!(table_id = table.id(), error = %e, "Failed to delete compacted SSTable");
            }
        }

        tracing::info!(
            level,
            inputs = ?input_ids,
            output = ?output.as_ref().map(|t| t.id()),
            entries = output.as_ref().map_or(0, |t| t.entry_count()),
            dropped_tombstones = dropped,
            "Compacted level"
        );
        Ok(())
    }
}

/// Drain the merge into the builder. Returns how many tombstones were dropped.
fn fill(builder: &mut SSTableBuilder, merged: &mut MergeIterator, drop_tombstones: bool) -> Result<u64> {
    let mut dropped = 0;
    while let Some(record) = merged.current() {
        if drop_tombstones && record.slot.is_tombstone() {
            dropped += 1;
        } else {
            builder.add(&record.key, &record.slot, record.timestamp)?;
        }
        merged.next()?;
    }
    Ok(dropped)
}

/// Rename to `*.del` first so a crash mid-delete never leaves a table that
/// looks live but is missing files.
fn remove_table_dir(dir: &Path) -> std::io::Result<()> {
    let mut doomed = dir.as_os_str().to_owned();
    doomed.push(DEL_SUFFIX);
    let doomed = PathBuf::from(doomed);
    fs::rename(dir, &doomed)?;
    fs::remove_dir_all(&doomed)
}
