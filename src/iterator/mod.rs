pub mod merge;

use crate::error::Result;
use crate::sstable::DataRecord;

pub use merge::MergeIterator;

/// The central iteration abstraction for sorted record streams.
///
/// SSTable scans and the merged view over several tables both implement
/// this trait, so MergeIterator can take `Vec<Box<dyn StorageIterator>>`
/// and compaction never cares where records come from.
pub trait StorageIterator: Send {
    /// The record the iterator is positioned at, or None once exhausted.
    fn current(&self) -> Option<&DataRecord>;

    /// Advances to the next entry. Returns error on IO failure.
    fn next(&mut self) -> Result<()>;
}
