pub mod builder;
pub mod index;
pub mod meta;
pub mod reader;
pub mod record;

use std::path::{Path, PathBuf};

pub use builder::SSTableBuilder;
pub use reader::{SSTable, SSTableIterator};
pub use record::DataRecord;

/// Knobs an SSTable needs at build and open time.
#[derive(Debug, Clone, Copy)]
pub struct TableOptions {
    /// Bytes of data records between sparse index entries.
    pub sparse_index_interval: usize,
    /// Bloom filter target false positive rate.
    pub false_positive_rate: f64,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            sparse_index_interval: 4096,
            false_positive_rate: 0.01,
        }
    }
}

const DIR_PREFIX: &str = "sstable-";

/// Suffix of a table directory still being written.
pub const TMP_SUFFIX: &str = ".tmp";
/// Suffix of a table directory being removed.
pub const DEL_SUFFIX: &str = ".del";

/// `sstable-000042`
pub fn table_name(id: u64) -> String {
    format!("{DIR_PREFIX}{id:06}")
}

/// Directory of table `id` under `root`.
pub fn table_dir(root: &Path, id: u64) -> PathBuf {
    root.join(table_name(id))
}

/// Parse the id out of a finished table directory name.
pub fn parse_table_name(name: &str) -> Option<u64> {
    name.strip_prefix(DIR_PREFIX)?.parse().ok()
}

pub(crate) fn data_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{}.data", table_name(id)))
}

pub(crate) fn index_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{}.index", table_name(id)))
}

pub(crate) fn meta_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{}.meta", table_name(id)))
}

/// fsync a directory so renames and creates inside it are durable.
pub(crate) fn sync_dir(dir: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        std::fs::File::open(dir)?.sync_all()?;
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_are_zero_padded_and_parse_back() {
        assert_eq!(table_name(7), "sstable-000007");
        assert_eq!(parse_table_name("sstable-000007"), Some(7));
        assert_eq!(parse_table_name("sstable-1234567"), Some(1_234_567));
        assert_eq!(parse_table_name("sstable-000007.tmp"), None);
        assert_eq!(parse_table_name("other"), None);
    }
}
