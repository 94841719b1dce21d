use crate::bloom::BloomFilter;

/// Convenience builder for constructing a bloom filter alongside an SSTable.
///
/// Used both when writing a table (keys arrive in sorted order from the
/// snapshot or the merge) and when reopening one (keys are re-read from the
/// data file). The builder tracks how many keys were added so the SSTable
/// can sanity-check its meta entry count.
pub struct BloomFilterBuilder {
    filter: BloomFilter,
    added: u64,
}

impl BloomFilterBuilder {
    /// Create a builder expecting approximately `estimated_keys` keys.
    pub fn new(estimated_keys: usize, false_positive_rate: f64) -> Self {
        BloomFilterBuilder {
            filter: BloomFilter::new(estimated_keys, false_positive_rate),
            added: 0,
        }
    }

    /// Add a key to the bloom filter being built.
    pub fn add_key(&mut self, key: &[u8]) {
        self.filter.insert(key);
        self.added += 1;
    }

    /// Keys added so far.
    pub fn added(&self) -> u64 {
        self.added
    }

    /// Finalize and return the bloom filter.
    pub fn build(self) -> BloomFilter {
        self.filter
    }
}
