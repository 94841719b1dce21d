//! # bytekv
//!
//! A key-value storage engine using the Log-Structured Merge-Tree design.
//!
//! ## Core idea
//! Instead of updating data in place (B-Tree), buffer writes in memory,
//! flush them as sorted files, and merge those files in the background.
//! This turns random writes into sequential writes.
//!
//! ## Layers
//! - `wal`: every mutation is logged before it becomes visible
//! - `memtable`: sorted in-memory buffer, frozen and flushed at a threshold
//! - `sstable`: immutable sorted files with a sparse index and Bloom filter
//! - `compaction`: tiered merging of full levels into the next level down
//! - `ttl`, `cache`: in-memory expiring keys and an LRU read cache
//! - `db`, `coordinator`: the synchronous engine and its pooled facade

pub mod bloom;
pub mod cache;
pub mod compaction;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod iterator;
pub mod manifest;
pub mod memtable;
pub mod options;
pub mod pool;
pub mod sstable;
pub mod ttl;
pub mod types;
pub mod wal;

// Public re-exports for the top-level API
pub use coordinator::{Coordinator, KvStore};
pub use db::{Stats, DB};
pub use error::{Error, Result};
pub use options::{Options, OverflowPolicy, TtlOptions, WalOptions};
pub use pool::OpHandle;
