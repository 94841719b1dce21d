use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{Error, Result};

/// Sparse key → byte offset index for one SSTable.
///
/// Only every few KB of data gets an entry, which bounds index memory while
/// keeping the forward scan after a seek short. Entries are sorted because
/// records are written in key order.
///
/// `.index` file: one `key\toffset` line per entry. The offset is parsed
/// from after the *last* tab, so tabs inside keys are fine; keys containing
/// a newline are never indexed.
#[derive(Debug, Default)]
pub struct SparseIndex {
    entries: Vec<(String, u64)>,
}

impl SparseIndex {
    /// Load the index from its file (used when reopening a table).
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let mut entries = Vec::new();
        for line in text.split('\n').filter(|l| !l.is_empty()) {
            let (key, offset) = line
                .rsplit_once('\t')
                .ok_or_else(|| Error::Corruption(format!("bad index line: {line:?}")))?;
            let offset = offset
                .parse()
                .map_err(|_| Error::Corruption(format!("bad index offset: {offset:?}")))?;
            entries.push((key.to_string(), offset));
        }
        Ok(SparseIndex { entries })
    }

    /// Offset of the nearest indexed record at or before `key`.
    pub fn seek_offset(&self, key: &str) -> u64 {
        let pos = self.entries.partition_point(|(k, _)| k.as_str() <= key);
        if pos == 0 { 0 } else { self.entries[pos - 1].1 }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Writes the `.index` file while the data file is being built.
pub struct IndexWriter {
    out: BufWriter<File>,
    entries: Vec<(String, u64)>,
    interval: usize,
    bytes_since_entry: usize,
    due: bool,
}

impl IndexWriter {
    pub fn create(path: &Path, interval: usize) -> Result<Self> {
        Ok(IndexWriter {
            out: BufWriter::new(File::create(path)?),
            entries: Vec::new(),
            interval,
            bytes_since_entry: 0,
            due: true,
        })
    }

    /// Called for every record appended to the data file.
    pub fn observe(&mut self, key: &str, offset: u64, record_len: usize) -> Result<()> {
        if self.due && !key.contains('\n') {
            writeln!(self.out, "{key}\t{offset}")?;
            self.entries.push((key.to_string(), offset));
            self.due = false;
            self.bytes_since_entry = 0;
        }
        self.bytes_since_entry += record_len;
        if self.bytes_since_entry >= self.interval {
            self.due = true;
        }
        Ok(())
    }

    /// Flush + fsync the file and hand back the in-memory index.
    pub fn finish(mut self) -> Result<SparseIndex> {
        self.out.flush()?;
        self.out.get_ref().sync_all()?;
        Ok(SparseIndex { entries: self.entries })
    }
}
