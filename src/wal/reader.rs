use std::fs;
use std::io;
use std::path::Path;

use crate::error::Result;
use crate::wal::record::LogEntry;

/// Reads WAL records from a file for crash recovery.
///
/// Loads the entire file into memory, then iterates record by record.
/// On startup:
/// 1. Replay each record into a fresh memtable
/// 2. If a record is truncated or its CRC fails, stop: it was a partial
///    write from a crash. All preceding records are valid.
/// 3. Cut the file back to the valid prefix so new appends follow it.
pub struct WalReader {
    data: Vec<u8>,
}

impl WalReader {
    /// Open a WAL file for reading. A missing file reads as empty.
    pub fn new(path: &Path) -> Result<Self> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(WalReader { data })
    }

    /// Create an iterator over all valid records in the WAL.
    pub fn iter(&self) -> WalIterator<'_> {
        WalIterator {
            data: &self.data,
            offset: 0,
            last_timestamp: 0,
            stopped_early: false,
        }
    }
}

/// Iterator over WAL records. Yields records until EOF or corruption.
///
/// On a bad record: stops iteration. WAL writes are sequential and
/// append-only, so a corrupted record means the crash happened here, and
/// nothing valid can follow.
pub struct WalIterator<'a> {
    data: &'a [u8],
    offset: usize,
    last_timestamp: u64,
    stopped_early: bool,
}

impl WalIterator<'_> {
    /// Bytes of valid records consumed so far.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Absolute timestamp of the last record yielded.
    pub fn last_timestamp(&self) -> u64 {
        self.last_timestamp
    }

    /// Whether iteration ended on a bad record rather than clean EOF.
    pub fn stopped_early(&self) -> bool {
        self.stopped_early
    }
}

impl Iterator for WalIterator<'_> {
    type Item = LogEntry;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.data.len() || self.stopped_early {
            return None;
        }

        match LogEntry::decode(&self.data[self.offset..], self.last_timestamp) {
            Ok((entry, consumed)) => {
                self.offset += consumed;
                self.last_timestamp = entry.timestamp;
                Some(entry)
            }
            Err(e) => {
                tracing::warn!(
                    offset = self.offset,
                    error = %e,
                    "Stopping WAL replay at unreadable record"
                );
                self.stopped_early = true;
                None
            }
        }
    }
}

/// Everything recovery needs from one pass over the log.
#[derive(Debug, Default)]
pub struct Replay {
    pub entries: Vec<LogEntry>,
    /// Length of the trusted prefix; anything after it is discarded.
    pub valid_len: u64,
    /// Timestamp of the last trusted record (delta base for new appends).
    pub last_timestamp: u64,
    /// True if a torn or corrupt record was found.
    pub truncated: bool,
}

/// Read the whole log and collect its trusted prefix.
pub fn replay(path: &Path) -> Result<Replay> {
    let reader = WalReader::new(path)?;
    let mut iter = reader.iter();
    let entries: Vec<LogEntry> = iter.by_ref().collect();
    Ok(Replay {
        entries,
        valid_len: iter.offset() as u64,
        last_timestamp: iter.last_timestamp(),
        truncated: iter.stopped_early(),
    })
}
