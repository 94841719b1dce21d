use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::error::{Error, Result};
use crate::iterator::StorageIterator;
use crate::sstable::DataRecord;

/// Heap slot: the current key of one source.
///
/// `Ord` is reversed so the std max-heap pops the smallest key first, and
/// among equal keys the lowest source index (the newest source).
#[derive(PartialEq, Eq)]
struct HeapItem {
    key: String,
    source: usize,
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .key
            .cmp(&self.key)
            .then_with(|| other.source.cmp(&self.source))
    }
}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Merges multiple sorted iterators into a single sorted stream.
///
/// K-way merge over a BinaryHeap, same algorithm as external merge sort.
/// Sources are ordered by priority: index 0 = newest, higher indices =
/// older. When several sources hold the same key only the newest record is
/// yielded; the rest are skipped. Tombstones are yielded like any other
/// record; whether they may be dropped is the caller's decision.
pub struct MergeIterator {
    sources: Vec<Box<dyn StorageIterator>>,
    heap: BinaryHeap<HeapItem>,
    current: Option<DataRecord>,
}

impl MergeIterator {
    /// Create a new MergeIterator from multiple sorted sources, newest first.
    pub fn new(sources: Vec<Box<dyn StorageIterator>>) -> Result<Self> {
        let heap = sources
            .iter()
            .enumerate()
            .filter_map(|(source, iter)| {
                iter.current().map(|r| HeapItem {
                    key: r.key.clone(),
                    source,
                })
            })
            .collect();

        let mut merged = MergeIterator {
            sources,
            heap,
            current: None,
        };
        merged.advance()?;
        Ok(merged)
    }

    fn advance(&mut self) -> Result<()> {
        let Some(top) = self.heap.pop() else {
            self.current = None;
            return Ok(());
        };

        let winner = self.sources[top.source]
            .current()
            .cloned()
            .ok_or_else(|| Error::Corruption("merge source exhausted while queued".into()))?;
        self.step(top.source)?;

        // Older duplicates of the same key lose
        while self.heap.peek().is_some_and(|item| item.key == winner.key) {
            if let Some(dup) = self.heap.pop() {
                self.step(dup.source)?;
            }
        }

        self.current = Some(winner);
        Ok(())
    }

    /// Move one source forward and requeue it if it still has records.
    fn step(&mut self, source: usize) -> Result<()> {
        let iter = &mut self.sources[source];
        iter.next()?;
        if let Some(record) = iter.current() {
            self.heap.push(HeapItem {
                key: record.key.clone(),
                source,
            });
        }
        Ok(())
    }
}

impl StorageIterator for MergeIterator {
    fn current(&self) -> Option<&DataRecord> {
        self.current.as_ref()
    }

    fn next(&mut self) -> Result<()> {
        self.advance()
    }
}
