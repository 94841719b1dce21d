use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};

/// Keys are non-empty text.
pub type Key = String;

/// Values are opaque text payloads.
pub type Value = String;

/// What a key maps to inside the engine.
///
/// A Delete writes a tombstone: the key isn't removed, it's marked as deleted,
/// because older versions may still live in immutable SSTables. Keeping the
/// tombstone as its own variant means every string is a legal user value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot {
    Value(Value),
    Tombstone,
}

impl Slot {
    pub fn is_tombstone(&self) -> bool {
        matches!(self, Slot::Tombstone)
    }

    /// The live value, or `None` for a tombstone.
    pub fn into_value(self) -> Option<Value> {
        match self {
            Slot::Value(v) => Some(v),
            Slot::Tombstone => None,
        }
    }

    pub fn as_value(&self) -> Option<&str> {
        match self {
            Slot::Value(v) => Some(v),
            Slot::Tombstone => None,
        }
    }
}

/// A sorted, frozen view of a memtable, ready to become an SSTable.
pub type Snapshot = BTreeMap<Key, Slot>;

/// Distinguishes puts from deletes in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// A normal put operation.
    Put = 0x01,
    /// A delete (tombstone marker).
    Delete = 0x02,
}

impl Operation {
    pub(crate) fn from_u8(byte: u8) -> Result<Self> {
        match byte {
            0x01 => Ok(Operation::Put),
            0x02 => Ok(Operation::Delete),
            _ => Err(Error::Corruption(format!("invalid operation: {byte:#x}"))),
        }
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Rejects keys the engine cannot store.
pub(crate) fn check_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidArgument("key must not be empty".into()));
    }
    Ok(())
}

/// Little-endian readers shared by the on-disk codecs.
pub(crate) fn read_u32(data: &[u8], offset: usize) -> Result<u32> {
    data.get(offset..offset + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| Error::Corruption("unexpected end of data reading u32".into()))
}

pub(crate) fn read_u64(data: &[u8], offset: usize) -> Result<u64> {
    data.get(offset..offset + 8)
        .and_then(|b| b.try_into().ok())
        .map(u64::from_le_bytes)
        .ok_or_else(|| Error::Corruption("unexpected end of data reading u64".into()))
}

pub(crate) fn read_str(data: &[u8], start: usize, end: usize) -> Result<String> {
    let bytes = data
        .get(start..end)
        .ok_or_else(|| Error::Corruption("string runs past end of record".into()))?;
    String::from_utf8(bytes.to_vec())
        .map_err(|_| Error::Corruption("string is not valid UTF-8".into()))
}
