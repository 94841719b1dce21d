use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::Result;
use crate::options::WalOptions;
use crate::wal::reader::replay;
use crate::wal::record::LogEntry;
use crate::wal::writer::WalWriter;

const SEGMENT_PREFIX: &str = "wal-";
const SEGMENT_SUFFIX: &str = ".log";

/// `wal-000007.log`
pub fn segment_name(id: u64) -> String {
    format!("{SEGMENT_PREFIX}{id:06}{SEGMENT_SUFFIX}")
}

pub fn parse_segment_name(name: &str) -> Option<u64> {
    name.strip_prefix(SEGMENT_PREFIX)?
        .strip_suffix(SEGMENT_SUFFIX)?
        .parse()
        .ok()
}

/// Existing segments in `dir`, oldest first.
pub fn list_segments(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let mut segments = Vec::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(segments),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        let id = entry.file_name().to_str().and_then(parse_segment_name);
        if let Some(id) = id {
            segments.push((id, entry.path()));
        }
    }
    segments.sort_unstable_by_key(|(id, _)| *id);
    Ok(segments)
}

/// What recovery found in the log directory.
#[derive(Debug, Default)]
struct Recovered {
    /// Every trusted entry, oldest first, across all segments.
    entries: Vec<LogEntry>,
    /// Segments those entries came from.
    segments: Vec<PathBuf>,
}

/// Manages the WAL as a chain of numbered segment files.
///
/// Each memtable buffer owns the segments its writes went to:
/// 1. When the buffer freezes, rotate: seal the active segment and start
///    a new one for the next buffer
/// 2. Keep the sealed segments until the frozen buffer's SSTable is
///    published (fsync'd and renamed into place)
/// 3. Delete them
///
/// Segments are only ever deleted after their data is durable in an
/// SSTable, so the log stays bounded by the unflushed data.
pub struct WalManager {
    dir: PathBuf,
    writer: WalWriter,
    next_id: AtomicU64,
    /// Sealed segments whose writes still live only in the active buffer
    /// (recovered segments after a restart).
    carried: Mutex<Vec<PathBuf>>,
}

impl WalManager {
    /// Recover every segment in `dir`, then start a fresh active segment.
    ///
    /// Replay stops at the first torn or corrupt record: that segment is cut
    /// back to its valid prefix and any later segments are removed, since
    /// nothing after a bad record can be trusted. Empty segments are removed.
    pub fn open(dir: &Path, options: &WalOptions) -> Result<(Self, Vec<LogEntry>)> {
        fs::create_dir_all(dir)?;
        let segments = list_segments(dir)?;
        let next_id = segments.last().map_or(1, |(id, _)| id + 1);

        let mut recovered = Recovered::default();
        let mut iter = segments.into_iter();
        for (_, path) in iter.by_ref() {
            let replay = replay(&path)?;
            if replay.truncated {
                tracing::warn!(
                    path = %path.display(),
                    valid_len = replay.valid_len,
                    "WAL segment has a torn or corrupt tail; truncating to the last valid record"
                );
                let file = fs::OpenOptions::new().write(true).open(&path)?;
                file.set_len(replay.valid_len)?;
                file.sync_all()?;
            }

            let stop = replay.truncated;
            if replay.entries.is_empty() {
                Self::delete_wal(&path)?;
            } else {
                recovered.entries.extend(replay.entries);
                recovered.segments.push(path);
            }
            if stop {
                break;
            }
        }
        for (_, path) in iter {
            tracing::warn!(path = %path.display(), "Dropping WAL segment after a corrupt record");
            Self::delete_wal(&path)?;
        }

        let writer = WalWriter::open(&dir.join(segment_name(next_id)), options, 0)?;
        tracing::info!(
            dir = %dir.display(),
            segments = recovered.segments.len(),
            entries = recovered.entries.len(),
            "Recovered WAL"
        );

        let manager = WalManager {
            dir: dir.to_path_buf(),
            writer,
            next_id: AtomicU64::new(next_id + 1),
            carried: Mutex::new(recovered.segments),
        };
        Ok((manager, recovered.entries))
    }

    pub fn append(&self, entry: LogEntry) -> Result<()> {
        self.writer.append(entry)
    }

    pub fn sync(&self) -> Result<()> {
        self.writer.sync()
    }

    /// Seal the active segment and start a new one.
    ///
    /// Returns every segment holding writes of the buffer being frozen, oldest
    /// first: carried segments from recovery plus the one just sealed. The
    /// caller deletes them once that buffer is published.
    pub fn rotate(&self) -> Result<Vec<PathBuf>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let sealed = self.writer.rotate(&self.dir.join(segment_name(id)))?;
        let mut segments = std::mem::take(&mut *self.carried.lock());
        segments.push(sealed);
        Ok(segments)
    }

    /// Delete a segment. Safe only once its writes are in a published SSTable.
    pub fn delete_wal(path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn close(&self) -> Result<()> {
        self.writer.close()
    }

    pub fn is_failed(&self) -> bool {
        self.writer.is_failed()
    }

    /// The underlying writer of the active segment.
    pub fn writer(&self) -> &WalWriter {
        &self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_names_round_trip() {
        assert_eq!(segment_name(42), "wal-000042.log");
        assert_eq!(parse_segment_name("wal-000042.log"), Some(42));
        assert_eq!(parse_segment_name("wal-000042.tmp"), None);
        assert_eq!(parse_segment_name("master.log"), None);
    }

    #[test]
    fn rotate_hands_over_carried_segments() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (wal, _) = WalManager::open(dir.path(), &WalOptions::default()).unwrap();
            wal.append(LogEntry::put("a", "1")).unwrap();
            wal.close().unwrap();
        }

        let (wal, entries) = WalManager::open(dir.path(), &WalOptions::default()).unwrap();
        assert_eq!(entries.len(), 1);
        wal.append(LogEntry::put("b", "2")).unwrap();

        let sealed = wal.rotate().unwrap();
        let names: Vec<_> = sealed
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["wal-000001.log", "wal-000002.log"]);
        assert_eq!(wal.writer().path(), dir.path().join("wal-000003.log"));

        // Carried segments are handed over exactly once
        assert_eq!(wal.rotate().unwrap().len(), 1);
        wal.close().unwrap();
    }
}
