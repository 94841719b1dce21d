use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use crate::error::{Error, Result};

/// Per-table facts kept next to the data and index files.
///
/// `.meta` file:
/// ```text
/// level=1
/// entries=4096
/// ```
///
/// The level is what lets a restart put merged tables back below level 0;
/// without it an old merged table with a high id would shadow newer flushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TableMeta {
    /// Level this table belongs to (0 = freshly flushed).
    pub level: u32,
    /// Number of records (including tombstones).
    pub entries: u64,
}

impl TableMeta {
    pub fn write(&self, path: &Path) -> Result<()> {
        let mut file = File::create(path)?;
        write!(file, "level={}\nentries={}\n", self.level, self.entries)?;
        file.sync_all()?;
        Ok(())
    }

    /// Load the meta file. A missing file means a level-0 table of unknown size.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut meta = TableMeta::default();
        for line in text.lines().filter(|l| !l.is_empty()) {
            let (name, value) = line
                .split_once('=')
                .ok_or_else(|| Error::Corruption(format!("bad meta line: {line:?}")))?;
            let bad = || Error::Corruption(format!("bad meta value: {line:?}"));
            match name {
                "level" => meta.level = value.parse().map_err(|_| bad())?,
                "entries" => meta.entries = value.parse().map_err(|_| bad())?,
                _ => {}
            }
        }
        Ok(Some(meta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.meta");
        let meta = TableMeta { level: 3, entries: 17 };
        meta.write(&path).unwrap();
        assert_eq!(TableMeta::load(&path).unwrap(), Some(meta));
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(TableMeta::load(&dir.path().join("nope.meta")).unwrap(), None);
    }
}
