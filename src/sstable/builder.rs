use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::bloom::builder::BloomFilterBuilder;
use crate::error::{Error, Result};
use crate::sstable::index::IndexWriter;
use crate::sstable::meta::TableMeta;
use crate::sstable::reader::SSTable;
use crate::sstable::record::DataRecord;
use crate::sstable::{
    data_path, index_path, meta_path, sync_dir, table_dir, table_name, TableOptions, TMP_SUFFIX,
};
use crate::types::Slot;

/// Builds an SSTable directory from a sorted stream of entries.
///
/// Used during:
/// - Memtable flush (sorted snapshot → level-0 SSTable)
/// - Compaction (merged iterators → one SSTable at the next level)
///
/// Build process:
/// 1. Everything is written into `sstable-NNNNNN.tmp/`
/// 2. Add entries one by one (must be in strictly increasing key order);
///    each lands in the data file, feeds the bloom filter, and every few KB
///    also lands in the sparse index
/// 3. finish() fsyncs data, index and meta, then renames the directory into
///    place, so a crash never leaves a half-written table under a real name
pub struct SSTableBuilder {
    id: u64,
    level: u32,
    root: PathBuf,
    tmp_dir: PathBuf,
    data: BufWriter<File>,
    index: IndexWriter,
    bloom: BloomFilterBuilder,
    /// Tracks current write position in the data file.
    offset: u64,
    last_key: Option<String>,
}

impl SSTableBuilder {
    /// Start building table `id` at `level` under `root`.
    ///
    /// `expected_keys` sizes the bloom filter; an overestimate only costs bits.
    pub fn new(
        root: &Path,
        id: u64,
        level: u32,
        expected_keys: usize,
        options: TableOptions,
    ) -> Result<Self> {
        let tmp_dir = root.join(format!("{}{TMP_SUFFIX}", table_name(id)));
        if tmp_dir.exists() {
            fs::remove_dir_all(&tmp_dir)?;
        }
        fs::create_dir_all(&tmp_dir)?;

        let data = BufWriter::new(File::create(data_path(&tmp_dir, id))?);
        let index = IndexWriter::create(&index_path(&tmp_dir, id), options.sparse_index_interval)?;

        Ok(SSTableBuilder {
            id,
            level,
            root: root.to_path_buf(),
            tmp_dir,
            data,
            index,
            bloom: BloomFilterBuilder::new(expected_keys, options.false_positive_rate),
            offset: 0,
            last_key: None,
        })
    }

    /// Append one entry. Keys MUST arrive in strictly increasing order.
    pub fn add(&mut self, key: &str, slot: &Slot, timestamp: u64) -> Result<()> {
        if let Some(last) = &self.last_key {
            if key <= last.as_str() {
                return Err(Error::InvalidArgument(format!(
                    "keys out of order: {key:?} after {last:?}"
                )));
            }
        }

        let encoded = DataRecord::new(key, slot.clone(), timestamp).encode();
        self.data.write_all(&encoded)?;
        self.index.observe(key, self.offset, encoded.len())?;
        self.bloom.add_key(key.as_bytes());

        self.offset += encoded.len() as u64;
        self.last_key = Some(key.to_string());
        Ok(())
    }

    /// Records added so far.
    pub fn entry_count(&self) -> u64 {
        self.bloom.added()
    }

    /// Finalize: fsync everything, publish the directory, return the open table.
    pub fn finish(mut self) -> Result<SSTable> {
        self.data.flush()?;
        self.data.get_ref().sync_all()?;
        let index = self.index.finish()?;

        let meta = TableMeta {
            level: self.level,
            entries: self.bloom.added(),
        };
        meta.write(&meta_path(&self.tmp_dir, self.id))?;
        sync_dir(&self.tmp_dir)?;

        let final_dir = table_dir(&self.root, self.id);
        fs::rename(&self.tmp_dir, &final_dir)?;
        sync_dir(&self.root)?;

        SSTable::from_parts(final_dir, self.id, meta, index, self.bloom.build(), self.offset)
    }

    /// Throw the partial table away (e.g. a compaction that produced nothing).
    pub fn abandon(self) -> Result<()> {
        let tmp_dir = self.tmp_dir.clone();
        drop(self);
        fs::remove_dir_all(tmp_dir)?;
        Ok(())
    }
}
