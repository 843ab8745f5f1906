//! Sequential record reader with torn-tail detection.
//!
//! A crash can leave the last record half written. The reader tells such a
//! torn tail apart from real corruption:
//!
//! - an incomplete header or payload at the end of the log is torn
//! - a CRC mismatch on the final record is torn
//! - a run of zero bytes at the end of the log is torn (pre-allocated tail)
//! - any damage followed by further data is corruption, including a length
//!   field that runs past the end while an intact frame still follows it

use crate::error::{JournalError, JournalResult};
use crate::record::{
    compute_crc32, JournalRecord, RecordType, CRC_SIZE, HEADER_SIZE, JOURNAL_MAGIC,
    JOURNAL_VERSION,
};
use nullfs_storage::LogBackend;

/// Reads larger than this are split so a tail scan stays bounded.
const ZERO_SCAN_CHUNK: usize = 64 * 1024;

/// Outcome of reading one frame.
#[derive(Debug)]
pub enum Frame {
    /// A valid record that starts at `offset`.
    Record {
        /// Start offset of the frame.
        offset: u64,
        /// The decoded record.
        record: JournalRecord,
    },
    /// The log ends with a torn record starting at `offset`.
    Torn {
        /// First byte of the torn record.
        offset: u64,
    },
}

/// Reads records front to back.
pub struct RecordReader<'a> {
    backend: &'a dyn LogBackend,
    offset: u64,
    size: u64,
    done: bool,
}

impl<'a> RecordReader<'a> {
    /// Creates a reader over the whole log.
    pub fn new(backend: &'a dyn LogBackend) -> JournalResult<Self> {
        Ok(Self {
            backend,
            offset: 0,
            size: backend.size()?,
            done: false,
        })
    }

    /// Offset just past the last record returned so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Returns the next frame, or `None` at a clean end of log.
    pub fn next_frame(&mut self) -> JournalResult<Option<Frame>> {
        if self.done || self.offset == self.size {
            return Ok(None);
        }

        let start = self.offset;
        let remaining = self.size - start;
        let torn = |reader: &mut Self| {
            reader.done = true;
            Ok(Some(Frame::Torn { offset: start }))
        };

        if remaining < HEADER_SIZE as u64 {
            return torn(self);
        }

        let header = self.backend.read_at(start, HEADER_SIZE)?;
        if header[0..4] != JOURNAL_MAGIC {
            if self.zero_tail(start)? {
                return torn(self);
            }
            return self.corrupt(format!("invalid magic at offset {start}"));
        }

        let version = u16::from_le_bytes([header[4], header[5]]);
        let type_byte = header[6];
        let len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as u64;
        let frame_len = HEADER_SIZE as u64 + len + CRC_SIZE as u64;

        if frame_len > remaining {
            if self.frame_follows(start)? {
                return self.corrupt(format!(
                    "record length {len} at offset {start} overruns later records"
                ));
            }
            return torn(self);
        }
        let is_last = frame_len == remaining;

        let body = self
            .backend
            .read_at(start + HEADER_SIZE as u64, len as usize + CRC_SIZE)?;
        let (payload, crc_bytes) = body.split_at(len as usize);
        let stored_crc =
            u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);

        let mut covered = header;
        covered.extend_from_slice(payload);
        if compute_crc32(&covered) != stored_crc {
            if is_last {
                return torn(self);
            }
            return self.corrupt(format!("CRC mismatch at offset {start}"));
        }

        if version > JOURNAL_VERSION {
            return self.corrupt(format!(
                "unsupported record version {version} at offset {start}"
            ));
        }
        let Some(record_type) = RecordType::from_byte(type_byte) else {
            return self.corrupt(format!(
                "unknown record type {type_byte} at offset {start}"
            ));
        };

        let record = match JournalRecord::decode_payload(record_type, payload) {
            Ok(record) => record,
            Err(err) => {
                self.done = true;
                return Err(JournalError::corrupted(format!(
                    "undecodable record at offset {start}: {err}"
                )));
            }
        };

        self.offset = start + frame_len;
        Ok(Some(Frame::Record {
            offset: start,
            record,
        }))
    }

    fn corrupt(&mut self, message: String) -> JournalResult<Option<Frame>> {
        self.done = true;
        Err(JournalError::corrupted(message))
    }

    /// Returns true if an intact frame starts anywhere after `from`.
    fn frame_follows(&self, from: u64) -> JournalResult<bool> {
        let rest = self.backend.read_at(from, (self.size - from) as usize)?;
        let last_start = rest.len().saturating_sub(HEADER_SIZE + CRC_SIZE);
        Ok((1..=last_start).any(|at| {
            rest[at..at + JOURNAL_MAGIC.len()] == JOURNAL_MAGIC && frame_is_intact(&rest[at..])
        }))
    }

    fn zero_tail(&self, from: u64) -> JournalResult<bool> {
        let mut offset = from;
        while offset < self.size {
            let len = ((self.size - offset) as usize).min(ZERO_SCAN_CHUNK);
            if self.backend.read_at(offset, len)?.iter().any(|&b| b != 0) {
                return Ok(false);
            }
            offset += len as u64;
        }
        Ok(true)
    }
}

fn frame_is_intact(bytes: &[u8]) -> bool {
    let len = u32::from_le_bytes([bytes[7], bytes[8], bytes[9], bytes[10]]) as usize;
    let Some(end) = HEADER_SIZE
        .checked_add(len)
        .and_then(|n| n.checked_add(CRC_SIZE))
    else {
        return false;
    };
    if end > bytes.len() {
        return false;
    }
    let body_end = HEADER_SIZE + len;
    let stored = u32::from_le_bytes([
        bytes[body_end],
        bytes[body_end + 1],
        bytes[body_end + 2],
        bytes[body_end + 3],
    ]);
    compute_crc32(&bytes[..body_end]) == stored
}
