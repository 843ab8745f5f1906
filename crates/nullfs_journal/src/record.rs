//! Journal record types and framing.
//!
//! Every record is framed as:
//!
//! ```text
//! | magic "NFSJ" (4) | version (2) | type (1) | length (4) | payload | crc32 (4) |
//! ```
//!
//! All integers are little-endian. The CRC covers every byte before it.

use crate::error::{JournalError, JournalResult};
use nullfs_protocol::{from_cbor, to_cbor, EntryId, JournalEntry};

/// Magic bytes opening every record.
pub const JOURNAL_MAGIC: [u8; 4] = *b"NFSJ";

/// Current record format version.
pub const JOURNAL_VERSION: u16 = 1;

/// magic (4) + version (2) + type (1) + length (4)
pub const HEADER_SIZE: usize = 11;

/// Trailing CRC32.
pub const CRC_SIZE: usize = 4;

/// Type tag of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// A journal entry.
    Entry = 1,
    /// Apply-state transition of one or more entries.
    Commit = 2,
    /// Counters carried across compaction.
    Horizon = 3,
}

impl RecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Entry),
            2 => Some(Self::Commit),
            3 => Some(Self::Horizon),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A decoded journal record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalRecord {
    /// An entry at its local position.
    Entry {
        /// Local position.
        id: EntryId,
        /// The entry, including its apply state when written.
        entry: JournalEntry,
    },

    /// The listed pending entries were applied.
    Commit {
        /// Committed positions.
        ids: Vec<EntryId>,
    },

    /// First record of a compacted journal.
    Horizon {
        /// Compaction horizon the journal was rewritten at.
        horizon: EntryId,
        /// Next position to assign.
        next_id: EntryId,
        /// Highest counter ever observed.
        clock: u64,
    },
}

impl JournalRecord {
    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> RecordType {
        match self {
            Self::Entry { .. } => RecordType::Entry,
            Self::Commit { .. } => RecordType::Commit,
            Self::Horizon { .. } => RecordType::Horizon,
        }
    }

    /// Serializes the payload (without the frame).
    pub fn encode_payload(&self) -> JournalResult<Vec<u8>> {
        let mut buf = Vec::new();
        match self {
            Self::Entry { id, entry } => {
                buf.extend_from_slice(&id.as_u64().to_le_bytes());
                buf.extend_from_slice(&to_cbor(entry)?);
            }
            Self::Commit { ids } => {
                let count = u32::try_from(ids.len())
                    .map_err(|_| JournalError::corrupted("too many ids in one commit"))?;
                buf.extend_from_slice(&count.to_le_bytes());
                for id in ids {
                    buf.extend_from_slice(&id.as_u64().to_le_bytes());
                }
            }
            Self::Horizon {
                horizon,
                next_id,
                clock,
            } => {
                buf.extend_from_slice(&horizon.as_u64().to_le_bytes());
                buf.extend_from_slice(&next_id.as_u64().to_le_bytes());
                buf.extend_from_slice(&clock.to_le_bytes());
            }
        }
        Ok(buf)
    }

    /// Deserializes a record from its type and payload.
    pub fn decode_payload(record_type: RecordType, payload: &[u8]) -> JournalResult<Self> {
        let mut reader = PayloadReader::new(payload);
        let record = match record_type {
            RecordType::Entry => {
                let id = EntryId::new(reader.u64()?);
                let entry = from_cbor(reader.rest())?;
                Self::Entry { id, entry }
            }
            RecordType::Commit => {
                let count = reader.u32()? as usize;
                let mut ids = Vec::with_capacity(count.min(4096));
                for _ in 0..count {
                    ids.push(EntryId::new(reader.u64()?));
                }
                Self::Commit { ids }
            }
            RecordType::Horizon => Self::Horizon {
                horizon: EntryId::new(reader.u64()?),
                next_id: EntryId::new(reader.u64()?),
                clock: reader.u64()?,
            },
        };
        reader.finish(record_type)?;
        Ok(record)
    }

    /// Encodes the full frame: header, payload and CRC.
    pub fn encode_frame(&self) -> JournalResult<Vec<u8>> {
        let payload = self.encode_payload()?;
        let len = u32::try_from(payload.len())
            .map_err(|_| JournalError::corrupted("record payload exceeds 4 GiB"))?;

        let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        frame.extend_from_slice(&JOURNAL_MAGIC);
        frame.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
        frame.push(self.record_type().as_byte());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&payload);
        let crc = compute_crc32(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        Ok(frame)
    }
}

struct PayloadReader<'a> {
    payload: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    fn new(payload: &'a [u8]) -> Self {
        Self { payload, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> JournalResult<[u8; N]> {
        let end = self.pos + N;
        let bytes: [u8; N] = self
            .payload
            .get(self.pos..end)
            .and_then(|slice| slice.try_into().ok())
            .ok_or_else(|| JournalError::corrupted("unexpected end of payload"))?;
        self.pos = end;
        Ok(bytes)
    }

    fn u32(&mut self) -> JournalResult<u32> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    fn u64(&mut self) -> JournalResult<u64> {
        Ok(u64::from_le_bytes(self.take()?))
    }

    fn rest(&mut self) -> &'a [u8] {
        let rest = &self.payload[self.pos..];
        self.pos = self.payload.len();
        rest
    }

    fn finish(&self, record_type: RecordType) -> JournalResult<()> {
        if self.pos != self.payload.len() {
            return Err(JournalError::corrupted(format!(
                "trailing bytes in {record_type:?} record: expected {}, got {}",
                self.pos,
                self.payload.len()
            )));
        }
        Ok(())
    }
}

/// CRC32 (IEEE polynomial) over `data`.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    !data.iter().fold(0xFFFF_FFFF_u32, |crc, &byte| {
        (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize]
    })
}
