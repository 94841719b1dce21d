use std::io::Read;

use crate::error::{Error, Result};
use crate::types::{read_str, read_u32, read_u64, Slot};

/// One entry in an SSTable's `.data` file.
///
/// On-disk layout:
/// ```text
/// ┌─────────┬───────────────┬───────────┬────────────┬─────┬───────┐
/// │ Len(4B) │ Timestamp(8B) │ Flags(1B) │ KeyLen(4B) │ Key │ Value │
/// └─────────┴───────────────┴───────────┴────────────┴─────┴───────┘
/// ```
///
/// `Len` counts every byte after itself. Flags bit 0 marks a tombstone,
/// whose value is empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRecord {
    pub timestamp: u64,
    pub key: String,
    pub slot: Slot,
}

const LEN_SIZE: usize = 4;
const FIXED_SIZE: usize = 8 + 1 + 4;
const TOMBSTONE_FLAG: u8 = 0x01;

impl DataRecord {
    pub fn new(key: impl Into<String>, slot: Slot, timestamp: u64) -> Self {
        DataRecord {
            timestamp,
            key: key.into(),
            slot,
        }
    }

    /// Serialize this record including its length prefix.
    pub fn encode(&self) -> Vec<u8> {
        let value = self.slot.as_value().unwrap_or("");
        let body_len = FIXED_SIZE + self.key.len() + value.len();

        let mut buf = Vec::with_capacity(LEN_SIZE + body_len);
        buf.extend_from_slice(&(body_len as u32).to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.push(if self.slot.is_tombstone() { TOMBSTONE_FLAG } else { 0 });
        buf.extend_from_slice(&(self.key.len() as u32).to_le_bytes());
        buf.extend_from_slice(self.key.as_bytes());
        buf.extend_from_slice(value.as_bytes());
        buf
    }

    /// Read the next record from `reader`, returning it and the bytes consumed.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<(Self, usize)> {
        let mut len_buf = [0u8; LEN_SIZE];
        reader.read_exact(&mut len_buf)?;
        let body_len = u32::from_le_bytes(len_buf) as usize;
        if body_len < FIXED_SIZE {
            return Err(Error::Corruption(format!("data record too short: {body_len} bytes")));
        }

        let mut body = vec![0u8; body_len];
        reader.read_exact(&mut body)?;
        Ok((Self::decode_body(&body)?, LEN_SIZE + body_len))
    }

    fn decode_body(body: &[u8]) -> Result<Self> {
        let timestamp = read_u64(body, 0)?;
        let flags = body[8];
        let key_len = read_u32(body, 9)? as usize;
        let key_end = FIXED_SIZE + key_len;
        let key = read_str(body, FIXED_SIZE, key_end)?;

        let slot = if flags & TOMBSTONE_FLAG != 0 {
            Slot::Tombstone
        } else {
            Slot::Value(read_str(body, key_end, body.len())?)
        };

        Ok(DataRecord { timestamp, key, slot })
    }
}
