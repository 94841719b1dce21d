//! The level catalog: which SSTables are live, and at which level.
//!
//! Level membership is persisted per table (its `.meta` file), so the
//! catalog is rebuilt on startup by scanning the table directories rather
//! than replaying a separate manifest log.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::error::Result;
use crate::sstable::{parse_table_name, SSTable, TableOptions, DEL_SUFFIX, TMP_SUFFIX};

/// Tables grouped by level. Within a level tables are kept oldest-first
/// (ascending id); level 0 holds fresh flushes.
#[derive(Debug, Default, Clone)]
pub struct Levels {
    levels: Vec<Vec<Arc<SSTable>>>,
}

impl Levels {
    /// Every table, newest first: level 0 before level 1, and the highest
    /// id first within a level. Lookups take the first hit in this order.
    pub fn newest_first(&self) -> Vec<Arc<SSTable>> {
        self.levels
            .iter()
            .flat_map(|level| level.iter().rev().cloned())
            .collect()
    }

    /// Tables at `level`, oldest first.
    pub fn level(&self, level: usize) -> &[Arc<SSTable>] {
        self.levels.get(level).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Table counts per level, top to bottom.
    pub fn counts(&self) -> Vec<usize> {
        self.levels.iter().map(Vec::len).collect()
    }

    pub fn total(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    /// True if no level deeper than `level` holds any table.
    pub fn is_bottom(&self, level: usize) -> bool {
        self.levels.iter().skip(level + 1).all(Vec::is_empty)
    }

    /// Add a table at `level`, keeping the level sorted by id.
    pub fn push(&mut self, level: usize, table: Arc<SSTable>) {
        if self.levels.len() <= level {
            self.levels.resize_with(level + 1, Vec::new);
        }
        let tables = &mut self.levels[level];
        let pos = tables.partition_point(|t| t.id() < table.id());
        tables.insert(pos, table);
    }

    /// Remove the given tables from `level`.
    pub fn retire(&mut self, level: usize, ids: &[u64]) {
        if let Some(tables) = self.levels.get_mut(level) {
            tables.retain(|t| !ids.contains(&t.id()));
        }
        while self.levels.last().is_some_and(Vec::is_empty) {
            self.levels.pop();
        }
    }
}

/// What startup recovery found on disk.
pub struct Recovered {
    pub levels: Levels,
    /// Highest table id seen, 0 if none.
    pub max_id: u64,
}

/// Scan `root`, drop leftovers from interrupted builds or deletes, and load
/// every finished table at the level recorded in its meta file.
pub fn recover(root: &Path, options: TableOptions) -> Result<Recovered> {
    fs::create_dir_all(root)?;

    let mut levels = Levels::default();
    let mut max_id = 0;

    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        if name.ends_with(TMP_SUFFIX) || name.ends_with(DEL_SUFFIX) {
            tracing::warn!(dir = %path.display(), "Removing leftover table directory");
            fs::remove_dir_all(&path)?;
            continue;
        }
        let Some(id) = parse_table_name(name) else {
            continue;
        };

        let table = SSTable::open(&path, options)?;
        max_id = max_id.max(id);
        levels.push(table.level() as usize, Arc::new(table));
    }

    tracing::info!(
        tables = levels.total(),
        levels = ?levels.counts(),
        max_id,
        "Recovered SSTables"
    );
    Ok(Recovered { levels, max_id })
}
