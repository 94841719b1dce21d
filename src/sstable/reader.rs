use std::cmp::Ordering;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use crate::bloom::BloomFilter;
use crate::bloom::builder::BloomFilterBuilder;
use crate::error::{Error, Result};
use crate::iterator::StorageIterator;
use crate::sstable::index::SparseIndex;
use crate::sstable::meta::TableMeta;
use crate::sstable::record::DataRecord;
use crate::sstable::{data_path, index_path, meta_path, parse_table_name, TableOptions};
use crate::types::Slot;

/// An immutable, sorted on-disk segment. Supports point lookups and full scans.
///
/// On open:
/// 1. Load the sparse index file → Vec<(key, offset)>
/// 2. Read the meta file → level, entry count
/// 3. Rebuild the bloom filter by scanning the data file (filters are never
///    persisted, and a table without one could not trust negative lookups)
/// 4. Ready for queries (data records read on demand)
pub struct SSTable {
    id: u64,
    dir: PathBuf,
    meta: TableMeta,
    /// Shared handle for point lookups. Reads are positional, so concurrent
    /// lookups never contend on a cursor.
    file: File,
    index: SparseIndex,
    bloom: BloomFilter,
    data_len: u64,
}

impl SSTable {
    /// Reopen a finished table directory (after restart).
    pub fn open(dir: &Path, options: TableOptions) -> Result<Self> {
        let name = dir
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::Corruption(format!("bad table dir: {}", dir.display())))?;
        let id = parse_table_name(name)
            .ok_or_else(|| Error::Corruption(format!("bad table dir name: {name}")))?;

        let index = Self::load_index(dir, id)?;
        let meta = TableMeta::load(&meta_path(dir, id))?.unwrap_or_default();

        let data = data_path(dir, id);
        let data_len = std::fs::metadata(&data)?.len();

        // Rebuild the bloom filter from the data file
        let mut keys = Vec::with_capacity(meta.entries as usize);
        let mut iter = SSTableIterator::open(&data)?;
        while let Some(record) = iter.current() {
            keys.push(record.key.clone());
            iter.next()?;
        }
        let mut bloom = BloomFilterBuilder::new(keys.len(), options.false_positive_rate);
        for key in &keys {
            bloom.add_key(key.as_bytes());
        }

        let meta = TableMeta {
            entries: bloom.added(),
            ..meta
        };
        Self::from_parts(dir.to_path_buf(), id, meta, index, bloom.build(), data_len)
    }

    /// Assemble a table whose index and bloom filter are already in memory.
    pub(crate) fn from_parts(
        dir: PathBuf,
        id: u64,
        meta: TableMeta,
        index: SparseIndex,
        bloom: BloomFilter,
        data_len: u64,
    ) -> Result<Self> {
        let file = File::open(data_path(&dir, id))?;
        Ok(SSTable {
            id,
            dir,
            meta,
            file,
            index,
            bloom,
            data_len,
        })
    }

    /// Load the sparse index file of table `id` in `dir`.
    pub fn load_index(dir: &Path, id: u64) -> Result<SparseIndex> {
        SparseIndex::load(&index_path(dir, id))
    }

    /// Point lookup.
    ///
    /// Returns `Some(Slot::Tombstone)` when this table records a delete, so
    /// callers stop searching older tables; `None` means the table says
    /// nothing about the key.
    ///
    /// Algorithm:
    /// 1. Bloom filter says no → return None (no IO)
    /// 2. Find the nearest index entry at or before the key, seek there
    /// 3. Scan forward; stop as soon as a key exceeds the target
    pub fn get(&self, key: &str) -> Result<Option<Slot>> {
        if !self.bloom.may_contain(key.as_bytes()) {
            return Ok(None);
        }

        let start = self.index.seek_offset(key);
        let mut reader = BufReader::new(PositionalReader {
            file: &self.file,
            pos: start,
        });

        let mut pos = start;
        while pos < self.data_len {
            let (record, used) = DataRecord::read_from(&mut reader)?;
            pos += used as u64;
            match record.key.as_str().cmp(key) {
                Ordering::Less => continue,
                Ordering::Equal => return Ok(Some(record.slot)),
                Ordering::Greater => break,
            }
        }
        Ok(None)
    }

    /// Whether the bloom filter admits the key (false → definitely absent).
    pub fn may_contain(&self, key: &str) -> bool {
        self.bloom.may_contain(key.as_bytes())
    }

    /// Create an iterator over all records, in key order.
    pub fn iter(&self) -> Result<SSTableIterator> {
        SSTableIterator::open(&data_path(&self.dir, self.id))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn level(&self) -> u32 {
        self.meta.level
    }

    /// Number of records (including tombstones).
    pub fn entry_count(&self) -> u64 {
        self.meta.entries
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of sparse index entries held in memory.
    pub fn index_len(&self) -> usize {
        self.index.len()
    }

    /// Size of the data file in bytes.
    pub fn data_len(&self) -> u64 {
        self.data_len
    }
}

impl std::fmt::Debug for SSTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SSTable")
            .field("id", &self.id)
            .field("level", &self.meta.level)
            .field("entries", &self.meta.entries)
            .finish()
    }
}

/// `Read` over a shared file at a private offset.
struct PositionalReader<'a> {
    file: &'a File,
    pos: u64,
}

impl Read for PositionalReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.file.read_at(buf, self.pos)?;
        self.pos += n as u64;
        Ok(n)
    }
}

/// Sequential scan over a data file with its own file handle.
pub struct SSTableIterator {
    reader: BufReader<File>,
    remaining: u64,
    current: Option<DataRecord>,
}

impl SSTableIterator {
    pub fn open(data: &Path) -> Result<Self> {
        let file = File::open(data)?;
        let remaining = file.metadata()?.len();
        let mut iter = SSTableIterator {
            reader: BufReader::new(file),
            remaining,
            current: None,
        };
        iter.next()?;
        Ok(iter)
    }
}

impl StorageIterator for SSTableIterator {
    fn current(&self) -> Option<&DataRecord> {
        self.current.as_ref()
    }

    fn next(&mut self) -> Result<()> {
        if self.remaining == 0 {
            self.current = None;
            return Ok(());
        }
        let (record, used) = DataRecord::read_from(&mut self.reader)?;
        self.remaining = self.remaining.saturating_sub(used as u64);
        self.current = Some(record);
        Ok(())
    }
}
