use crate::error::{Error, Result};
use crate::types::{now_millis, read_str, read_u32, Operation};

/// A single mutation in the WAL.
///
/// On-disk format (little-endian):
/// ```text
/// ┌─────────┬─────────────┬─────────┬───────────┬─────┬───────────┬───────┬───────────┐
/// │ Len(4B) │ Δts(varint) │ Op (1B) │ KeyLen(4B)│ Key │ ValLen(4B)│ Value │ CRC (4B)? │
/// └─────────┴─────────────┴─────────┴───────────┴─────┴───────────┴───────┴───────────┘
/// ```
///
/// `Len` counts every byte after itself. The op byte's high bit says whether
/// a CRC trails the record; the CRC covers every byte between `Len` and the
/// CRC itself. The timestamp is stored as milliseconds since the previous
/// record, so replay rebuilds absolute timestamps by summing deltas.
///
/// If a record is short or its CRC doesn't match on read, it was a partial
/// write (crash mid-write) and recovery stops there; all preceding records
/// are valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub operation: Operation,
    pub key: String,
    /// Empty for deletes.
    pub value: String,
    /// Absolute milliseconds since the Unix epoch.
    pub timestamp: u64,
}

const LEN_SIZE: usize = 4;
const CRC_SIZE: usize = 4;
const CHECKSUM_FLAG: u8 = 0x80;
const OP_MASK: u8 = 0x7F;

impl LogEntry {
    /// Create a Put entry stamped with the current time.
    pub fn put(key: impl Into<String>, value: impl Into<String>) -> Self {
        LogEntry {
            operation: Operation::Put,
            key: key.into(),
            value: value.into(),
            timestamp: now_millis(),
        }
    }

    /// Create a Delete entry stamped with the current time.
    pub fn delete(key: impl Into<String>) -> Self {
        LogEntry {
            operation: Operation::Delete,
            key: key.into(),
            value: String::new(),
            timestamp: now_millis(),
        }
    }

    /// Serialize this record, delta-encoding the timestamp against
    /// `prev_timestamp`. A clock that went backwards encodes as delta 0.
    pub fn encode(&self, prev_timestamp: u64, checksum: bool) -> Vec<u8> {
        let delta = self.timestamp.saturating_sub(prev_timestamp);

        let mut buf = Vec::with_capacity(LEN_SIZE + 1 + 10 + 8 + self.key.len() + self.value.len() + CRC_SIZE);

        // Reserve space for the length (filled in at the end)
        buf.extend_from_slice(&[0u8; LEN_SIZE]);

        let mut op = self.operation as u8;
        if checksum {
            op |= CHECKSUM_FLAG;
        }
        put_varint(&mut buf, delta);
        buf.push(op);
        buf.extend_from_slice(&(self.key.len() as u32).to_le_bytes());
        buf.extend_from_slice(self.key.as_bytes());
        buf.extend_from_slice(&(self.value.len() as u32).to_le_bytes());
        buf.extend_from_slice(self.value.as_bytes());

        if checksum {
            let crc = crc32fast::hash(&buf[LEN_SIZE..]);
            buf.extend_from_slice(&crc.to_le_bytes());
        }

        let len = (buf.len() - LEN_SIZE) as u32;
        buf[0..LEN_SIZE].copy_from_slice(&len.to_le_bytes());
        buf
    }

    /// Deserialize one record from the front of `data`.
    ///
    /// Returns the entry (with its absolute timestamp rebuilt from
    /// `prev_timestamp`) and the number of bytes consumed.
    pub fn decode(data: &[u8], prev_timestamp: u64) -> Result<(Self, usize)> {
        let len = read_u32(data, 0)? as usize;
        let total = LEN_SIZE + len;
        if data.len() < total {
            return Err(Error::Corruption("record truncated".into()));
        }
        let record = &data[LEN_SIZE..total];

        // The delta comes first; the CRC flag lives in the op byte after it
        let (delta, used) = get_varint(record)?;
        let op_byte = *record
            .get(used)
            .ok_or_else(|| Error::Corruption("record missing op byte".into()))?;
        let has_crc = op_byte & CHECKSUM_FLAG != 0;

        let body_end = if has_crc {
            let body_end = record
                .len()
                .checked_sub(CRC_SIZE)
                .filter(|&end| end > used)
                .ok_or_else(|| Error::Corruption("record too short for CRC".into()))?;
            let stored = read_u32(record, body_end)?;
            let computed = crc32fast::hash(&record[..body_end]);
            if stored != computed {
                return Err(Error::Corruption(format!(
                    "CRC mismatch: stored {stored:#010x}, computed {computed:#010x}"
                )));
            }
            body_end
        } else {
            record.len()
        };
        let body = &record[..body_end];

        let operation = Operation::from_u8(op_byte & OP_MASK)?;
        let mut offset = used + 1;

        let key_len = read_u32(body, offset)? as usize;
        offset += 4;
        let key = read_str(body, offset, offset + key_len)?;
        offset += key_len;

        let value_len = read_u32(body, offset)? as usize;
        offset += 4;
        let value = read_str(body, offset, offset + value_len)?;
        offset += value_len;

        if offset != body.len() {
            return Err(Error::Corruption("trailing bytes in record".into()));
        }

        let entry = LogEntry {
            operation,
            key,
            value,
            timestamp: prev_timestamp.saturating_add(delta),
        };
        Ok((entry, total))
    }
}

/// LEB128 unsigned varint.
fn put_varint(buf: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        buf.push((v as u8) | 0x80);
        v >>= 7;
    }
    buf.push(v as u8);
}

fn get_varint(data: &[u8]) -> Result<(u64, usize)> {
    let mut result = 0u64;
    for (i, byte) in data.iter().enumerate().take(10) {
        result |= ((byte & 0x7F) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((result, i + 1));
        }
    }
    Err(Error::Corruption("malformed varint".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_is_delta_encoded() {
        let mut entry = LogEntry::put("k", "v");
        entry.timestamp = 1_000_100;

        let small = entry.encode(1_000_000, false);
        let large = entry.encode(0, false);
        assert!(small.len() < large.len());

        let (decoded, _) = LogEntry::decode(&small, 1_000_000).unwrap();
        assert_eq!(decoded.timestamp, 1_000_100);
    }

    #[test]
    fn backwards_clock_encodes_zero_delta() {
        let mut entry = LogEntry::delete("k");
        entry.timestamp = 50;
        let (decoded, _) = LogEntry::decode(&entry.encode(100, true), 100).unwrap();
        assert_eq!(decoded.timestamp, 100);
        assert_eq!(decoded.operation, Operation::Delete);
        assert!(decoded.value.is_empty());
    }

    #[test]
    fn flipped_bit_fails_crc() {
        let entry = LogEntry::put("key", "value");
        let mut buf = entry.encode(0, true);
        let last_value_byte = buf.len() - CRC_SIZE - 1;
        buf[last_value_byte] ^= 0x01;
        assert!(matches!(LogEntry::decode(&buf, 0), Err(Error::Corruption(_))));
    }

    #[test]
    fn unchecked_record_has_no_crc() {
        let entry = LogEntry::put("key", "value");
        let with = entry.encode(0, true);
        let without = entry.encode(0, false);
        assert_eq!(with.len(), without.len() + CRC_SIZE);
        let (decoded, consumed) = LogEntry::decode(&without, 0).unwrap();
        assert_eq!(consumed, without.len());
        assert_eq!(decoded.key, "key");
    }

    #[test]
    fn delta_precedes_op_byte() {
        let mut entry = LogEntry::delete("k");
        entry.timestamp = 300;
        let buf = entry.encode(0, false);
        // 300 needs two varint bytes: 0xAC 0x02
        assert_eq!(&buf[LEN_SIZE..LEN_SIZE + 3], &[0xAC, 0x02, Operation::Delete as u8]);
    }

    #[test]
    fn varint_boundaries() {
        for v in [0u64, 127, 128, 16_383, 16_384, u64::MAX] {
            let mut buf = Vec::new();
            put_varint(&mut buf, v);
            assert_eq!(get_varint(&buf).unwrap(), (v, buf.len()));
        }
    }
}
