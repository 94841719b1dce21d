use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// What `WalWriter::append` does when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Block the caller until the writer thread frees a slot (backpressure).
    Block,
    /// Wait at most `timeout`, then fail with `Error::QueueFull`.
    Reject { timeout: Duration },
}

/// WAL writer tuning.
///
/// Two layers of buffering:
///   flush  → Rust buffer → OS page cache   (every `flush_interval`)
///   sync   → OS page cache → physical disk (every `sync_interval`)
///
/// A crash loses at most the records written since the last sync.
#[derive(Debug, Clone)]
pub struct WalOptions {
    /// Bounded queue between callers and the writer thread (default: 10_000).
    pub queue_capacity: usize,
    /// Records drained per writer-thread batch (default: 200).
    pub max_batch: usize,
    /// BufWriter capacity (default: 128KB).
    pub buffer_size: usize,
    /// How often the buffer is pushed to the OS (default: 200ms).
    pub flush_interval: Duration,
    /// How often the file is fsync'd (default: 500ms).
    pub sync_interval: Duration,
    /// Append a CRC32 to every record (default: true).
    pub checksums: bool,
    /// Queue-full behaviour (default: Block).
    pub overflow: OverflowPolicy,
}

impl Default for WalOptions {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            max_batch: 200,
            buffer_size: 128 * 1024,
            flush_interval: Duration::from_millis(200),
            sync_interval: Duration::from_millis(500),
            checksums: true,
            overflow: OverflowPolicy::Block,
        }
    }
}

/// TTL sampler tuning.
#[derive(Debug, Clone)]
pub struct TtlOptions {
    /// Time between sampling rounds (default: 10s).
    pub sample_interval: Duration,
    /// Entries drawn per round (default: 20).
    pub sample_size: usize,
    /// Expired share of the sample that triggers a full sweep (default: 0.25).
    pub expired_fraction: f64,
    /// Absolute floor on expired samples before sweeping (default: 5).
    pub min_expired: usize,
}

impl Default for TtlOptions {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(10),
            sample_size: 20,
            expired_fraction: 0.25,
            min_expired: 5,
        }
    }
}

/// Configuration for the engine.
#[derive(Debug, Clone)]
pub struct Options {
    /// Directory holding the WAL and the `sst/` tree.
    pub dir: PathBuf,
    /// Memtable entry count that triggers a flush (default: 1024).
    pub memtable_flush_threshold: usize,
    /// Tables a level may hold before it is compacted down (default: 4).
    pub max_tables_per_level: usize,
    /// Bytes of data between sparse index entries (default: 4KB).
    pub sparse_index_interval: usize,
    /// Bloom filter target false positive rate (default: 1%).
    pub bloom_false_positive_rate: f64,
    /// Read cache capacity in entries; 0 disables the cache (default: 2000).
    pub cache_capacity: usize,
    /// Worker pool size for facade operations (default: 30).
    pub worker_threads: usize,
    /// Pending facade tasks before submitters block (default: 100).
    pub task_queue_capacity: usize,
    /// How often the compactor checks levels without a flush nudge (default: 10s).
    pub compaction_interval: Duration,
    pub wal: WalOptions,
    pub ttl: TtlOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./bytekv"),
            memtable_flush_threshold: 1024,
            max_tables_per_level: 4,
            sparse_index_interval: 4096,
            bloom_false_positive_rate: 0.01,
            cache_capacity: 2000,
            worker_threads: 30,
            task_queue_capacity: 100,
            compaction_interval: Duration::from_secs(10),
            wal: WalOptions::default(),
            ttl: TtlOptions::default(),
        }
    }
}

impl Options {
    /// Create options rooted at the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    pub fn memtable_flush_threshold(mut self, entries: usize) -> Self {
        self.memtable_flush_threshold = entries;
        self
    }

    pub fn max_tables_per_level(mut self, tables: usize) -> Self {
        self.max_tables_per_level = tables;
        self
    }

    pub fn sparse_index_interval(mut self, bytes: usize) -> Self {
        self.sparse_index_interval = bytes;
        self
    }

    pub fn bloom_false_positive_rate(mut self, rate: f64) -> Self {
        self.bloom_false_positive_rate = rate;
        self
    }

    pub fn cache_capacity(mut self, entries: usize) -> Self {
        self.cache_capacity = entries;
        self
    }

    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    pub fn task_queue_capacity(mut self, tasks: usize) -> Self {
        self.task_queue_capacity = tasks;
        self
    }

    pub fn compaction_interval(mut self, interval: Duration) -> Self {
        self.compaction_interval = interval;
        self
    }

    pub fn wal(mut self, wal: WalOptions) -> Self {
        self.wal = wal;
        self
    }

    pub fn ttl(mut self, ttl: TtlOptions) -> Self {
        self.ttl = ttl;
        self
    }

    /// Directory holding the write-ahead log segments.
    pub fn wal_dir(&self) -> PathBuf {
        self.dir.join("wal")
    }

    /// Root of the per-table directories.
    pub fn sst_dir(&self) -> PathBuf {
        self.dir.join("sst")
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(Error::InvalidArgument(msg.to_string()));
        if self.memtable_flush_threshold == 0 {
            return invalid("memtable_flush_threshold must be > 0");
        }
        if self.max_tables_per_level < 2 {
            return invalid("max_tables_per_level must be >= 2");
        }
        if self.sparse_index_interval == 0 {
            return invalid("sparse_index_interval must be > 0");
        }
        if !(self.bloom_false_positive_rate > 0.0 && self.bloom_false_positive_rate < 1.0) {
            return invalid("bloom_false_positive_rate must be in (0, 1)");
        }
        if self.worker_threads == 0 || self.task_queue_capacity == 0 {
            return invalid("worker pool needs at least one thread and one queue slot");
        }
        if self.wal.queue_capacity == 0 || self.wal.max_batch == 0 {
            return invalid("WAL queue capacity and batch size must be > 0");
        }
        if self.wal.flush_interval.is_zero() || self.wal.sync_interval.is_zero() {
            return invalid("WAL flush and sync intervals must be non-zero");
        }
        if self.ttl.sample_interval.is_zero() || self.compaction_interval.is_zero() {
            return invalid("background intervals must be non-zero");
        }
        if !(0.0..=1.0).contains(&self.ttl.expired_fraction) {
            return invalid("ttl expired_fraction must be in [0, 1]");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Options::new("/tmp/x").validate().unwrap();
    }

    #[test]
    fn rejects_zero_threshold() {
        let opts = Options::new("/tmp/x").memtable_flush_threshold(0);
        assert!(matches!(opts.validate(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn rejects_bad_fpr() {
        let opts = Options::new("/tmp/x").bloom_false_positive_rate(1.5);
        assert!(opts.validate().is_err());
    }
}
