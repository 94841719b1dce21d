//! The synchronous engine core.
//!
//! Write path: WAL append → memtable → cache, all under one write lock so
//! WAL order equals memtable order and a write is never visible before it
//! is logged. Read path: cache → memtable (active, frozen) → SSTables.

use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;

use crate::cache::ReadCache;
use crate::compaction::SstManager;
use crate::error::{Error, Result};
use crate::memtable::MemTable;
use crate::options::Options;
use crate::ttl::TtlManager;
use crate::types::{check_key, Value};
use crate::wal::{LogEntry, WalManager};

/// Point-in-time counters for monitoring and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    /// Entries in the active memtable buffer.
    pub memtable_entries: usize,
    /// Frozen snapshots not yet published as SSTables.
    pub frozen_memtables: usize,
    pub sstables: usize,
    /// Table counts per level, top to bottom.
    pub level_counts: Vec<usize>,
    pub cache_entries: usize,
    pub ttl_entries: usize,
    pub wal_failed: bool,
}

/// The (memtable, cache) pair, guarded together.
struct State {
    memtable: MemTable,
    cache: ReadCache,
}

/// An open database.
pub struct DB {
    options: Options,
    state: RwLock<State>,
    wal: Arc<WalManager>,
    sst: Arc<SstManager>,
    ttl: TtlManager,
    closed: AtomicBool,
}

impl DB {
    /// Open (or create) a database in `options.dir`, replaying the WAL.
    pub fn open(options: Options) -> Result<Self> {
        options.validate()?;
        fs::create_dir_all(&options.dir)?;

        let sst = Arc::new(SstManager::open(&options)?);

        let (wal, recovered) = WalManager::open(&options.wal_dir(), &options.wal)?;
        let wal = Arc::new(wal);

        // Replayed writes stay in the active buffer, together with their
        // segments, until the next freeze
        let mut memtable =
            MemTable::with_wal(Arc::clone(&sst), options.memtable_flush_threshold, Arc::clone(&wal))?;
        let replayed = recovered.len();
        memtable.restore(recovered);

        let ttl = TtlManager::new(options.ttl.clone());
        ttl.start()?;
        sst.start_compactor()?;

        tracing::info!(
            dir = %options.dir.display(),
            replayed,
            sstables = sst.all_sstables().len(),
            "Opened database"
        );

        Ok(DB {
            state: RwLock::new(State {
                memtable,
                cache: ReadCache::new(options.cache_capacity),
            }),
            options,
            wal,
            sst,
            ttl,
            closed: AtomicBool::new(false),
        })
    }

    pub fn put(&self, key: &str, value: &str) -> Result<()> {
        check_key(key)?;
        let mut state = self.state.write();
        self.ensure_open()?;

        self.wal.append(LogEntry::put(key, value))?;
        state.memtable.put(key.to_string(), value.to_string())?;
        state.cache.put(key, value);
        Ok(())
    }

    /// Store `key` in the in-memory TTL namespace, readable via `get_ttl`
    /// until `ttl` elapses. Not logged and not persisted.
    pub fn put_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        check_key(key)?;
        self.ensure_open()?;
        self.ttl.insert(key, value, ttl);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        check_key(key)?;
        let state = self.state.read();
        self.ensure_open()?;

        if let Some(value) = state.cache.get(key) {
            return Ok(Some(value));
        }
        let value = state.memtable.get(key)?;
        if let Some(v) = &value {
            state.cache.put(key, v);
        }
        Ok(value)
    }

    /// Read from the TTL namespace. Expired entries read as absent.
    pub fn get_ttl(&self, key: &str) -> Result<Option<Value>> {
        check_key(key)?;
        self.ensure_open()?;
        Ok(self.ttl.get(key))
    }

    /// Delete `key`. A tombstone is always written, since an older version
    /// may live in an SSTable. Any TTL entry for the key goes too.
    pub fn delete(&self, key: &str) -> Result<()> {
        check_key(key)?;
        let mut state = self.state.write();
        self.ensure_open()?;

        self.wal.append(LogEntry::delete(key))?;
        state.memtable.delete(key.to_string())?;
        state.cache.remove(key);
        self.ttl.remove(key);
        Ok(())
    }

    /// Flush the memtable to an SSTable now. Its WAL segments are deleted
    /// once the table is published.
    pub fn force_flush(&self) -> Result<()> {
        let mut state = self.state.write();
        self.ensure_open()?;
        self.checkpoint(&mut state)
    }

    /// Wait until every acknowledged write is fsync'd to the WAL.
    pub fn sync(&self) -> Result<()> {
        self.ensure_open()?;
        self.wal.sync()
    }

    /// Run tiered compaction now. Returns the number of levels merged.
    pub fn compact(&self) -> Result<usize> {
        self.ensure_open()?;
        self.sst.compact()
    }

    pub fn stats(&self) -> Stats {
        let state = self.state.read();
        let level_counts = self.sst.level_counts();
        Stats {
            memtable_entries: state.memtable.len(),
            frozen_memtables: state.memtable.frozen_count(),
            sstables: level_counts.iter().sum(),
            level_counts,
            cache_entries: state.cache.len(),
            ttl_entries: self.ttl.len(),
            wal_failed: self.wal.is_failed(),
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop background work, flush the memtable (trimming the WAL) and close
    /// the WAL. Later calls fail with `Error::Closed`. Idempotent.
    pub fn shutdown(&self) -> Result<()> {
        let mut state = self.state.write();
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.ttl.stop();
        self.sst.stop_compactor();

        // The WAL keeps everything if the final flush fails
        let flushed = self.checkpoint(&mut state);
        if let Err(e) = &flushed {
            tracing::error!(error = %e, "Final memtable flush failed; data remains in the WAL");
        }
        state.memtable.stop();
        state.cache.clear();
        let closed = self.wal.close();

        tracing::info!(dir = %self.options.dir.display(), "Database shut down");
        flushed.and(closed)
    }

    /// Freeze (rotating the WAL) and wait until every frozen buffer is
    /// published and its segments deleted.
    fn checkpoint(&self, state: &mut State) -> Result<()> {
        state.memtable.freeze()?;
        state.memtable.wait_for_flush()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        Ok(())
    }
}

impl Drop for DB {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!(error = %e, "Shutdown on drop failed");
        }
    }
}
