use std::io;

use thiserror::Error;

/// Unified error type for the storage engine.
///
/// A missing key is never an error: lookups return `Ok(None)`.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error from disk operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// Data corruption detected (CRC mismatch, bad format, etc).
    #[error("Corruption: {0}")]
    Corruption(String),
    /// Caller passed something the engine cannot store (empty key, bad option).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// The WAL queue stayed full past the configured timeout.
    #[error("WAL queue overflow")]
    QueueFull,
    /// The WAL hit an unrecoverable IO error; writes are rejected until restart.
    #[error("WAL is in a failed state")]
    WalFailed,
    /// The engine has been shut down.
    #[error("engine is shut down")]
    Closed,
    /// A background worker went away before answering.
    #[error("background worker disconnected")]
    Disconnected,
    /// The caller's wait deadline passed before the operation finished.
    #[error("operation timed out")]
    Timeout,
}

/// Result type alias used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;
