//! WAL record types and the on-disk frame.
//!
//! Frame layout:
//!
//! ```text
//! +-------+---------+------+-------------+---------+-------+
//! | magic | version | type | payload len | payload | crc32 |
//! |  4 B  |   1 B   | 1 B  |   4 B LE    |  var    | 4 B LE|
//! +-------+---------+------+-------------+---------+-------+
//! ```
//!
//! The checksum covers version, type, length, and payload.

use crate::error::{EngineError, EngineResult};
use crate::types::{SequenceNumber, TransactionId};
use crate::wal::crc::crc32;

/// Magic bytes opening every frame.
pub(crate) const WAL_MAGIC: [u8; 4] = *b"FWAL";

/// Current frame format version.
pub(crate) const WAL_FORMAT_VERSION: u8 = 1;

/// Frame header size: magic + version + type + payload length.
pub(crate) const HEADER_SIZE: usize = 10;

/// Trailing checksum size.
pub(crate) const CRC_SIZE: usize = 4;

/// Upper bound on a single payload; anything larger is corruption.
pub(crate) const MAX_PAYLOAD: usize = 256 * 1024 * 1024;

const TYPE_BEGIN: u8 = 1;
const TYPE_PUT: u8 = 2;
const TYPE_DELETE: u8 = 3;
const TYPE_COMMIT: u8 = 4;
const TYPE_ABORT: u8 = 5;
const TYPE_CHECKPOINT: u8 = 6;

/// A single log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WalRecord {
    /// A transaction started writing its commit batch.
    Begin { txn: TransactionId },
    /// One upsert in the batch. `key` is a full canonical-keyspace key.
    Put {
        txn: TransactionId,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    /// One deletion in the batch.
    Delete { txn: TransactionId, key: Vec<u8> },
    /// The batch is complete and durable once this record is.
    Commit {
        txn: TransactionId,
        seq: SequenceNumber,
    },
    /// The batch was abandoned; replay must ignore it.
    Abort { txn: TransactionId },
    /// Everything up to `seq` is durable in the record log; earlier
    /// frames may be dropped.
    Checkpoint { seq: SequenceNumber },
}

impl WalRecord {
    fn type_byte(&self) -> u8 {
        match self {
            WalRecord::Begin { .. } => TYPE_BEGIN,
            WalRecord::Put { .. } => TYPE_PUT,
            WalRecord::Delete { .. } => TYPE_DELETE,
            WalRecord::Commit { .. } => TYPE_COMMIT,
            WalRecord::Abort { .. } => TYPE_ABORT,
            WalRecord::Checkpoint { .. } => TYPE_CHECKPOINT,
        }
    }

    fn payload(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            WalRecord::Begin { txn } | WalRecord::Abort { txn } => {
                out.extend_from_slice(&txn.as_u64().to_le_bytes());
            }
            WalRecord::Put { txn, key, value } => {
                out.extend_from_slice(&txn.as_u64().to_le_bytes());
                out.extend_from_slice(&(key.len() as u32).to_le_bytes());
                out.extend_from_slice(key);
                out.extend_from_slice(&(value.len() as u32).to_le_bytes());
                out.extend_from_slice(value);
            }
            WalRecord::Delete { txn, key } => {
                out.extend_from_slice(&txn.as_u64().to_le_bytes());
                out.extend_from_slice(&(key.len() as u32).to_le_bytes());
                out.extend_from_slice(key);
            }
            WalRecord::Commit { txn, seq } => {
                out.extend_from_slice(&txn.as_u64().to_le_bytes());
                out.extend_from_slice(&seq.as_u64().to_le_bytes());
            }
            WalRecord::Checkpoint { seq } => {
                out.extend_from_slice(&seq.as_u64().to_le_bytes());
            }
        }
        out
    }

    /// Serializes the record into a complete frame.
    pub(crate) fn to_frame(&self) -> Vec<u8> {
        let payload = self.payload();
        let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        frame.extend_from_slice(&WAL_MAGIC);
        frame.push(WAL_FORMAT_VERSION);
        frame.push(self.type_byte());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&payload);
        let checksum = crc32(&frame[WAL_MAGIC.len()..]);
        frame.extend_from_slice(&checksum.to_le_bytes());
        frame
    }

    /// Decodes a payload given its frame's type byte. The caller has
    /// already verified magic, version, and checksum.
    pub(crate) fn from_payload(
        type_byte: u8,
        payload: &[u8],
        offset: u64,
    ) -> EngineResult<WalRecord> {
        let mut reader = PayloadReader::new(payload, offset);
        let record = match type_byte {
            TYPE_BEGIN => WalRecord::Begin {
                txn: TransactionId::new(reader.u64()?),
            },
            TYPE_PUT => WalRecord::Put {
                txn: TransactionId::new(reader.u64()?),
                key: reader.bytes()?,
                value: reader.bytes()?,
            },
            TYPE_DELETE => WalRecord::Delete {
                txn: TransactionId::new(reader.u64()?),
                key: reader.bytes()?,
            },
            TYPE_COMMIT => WalRecord::Commit {
                txn: TransactionId::new(reader.u64()?),
                seq: SequenceNumber::new(reader.u64()?),
            },
            TYPE_ABORT => WalRecord::Abort {
                txn: TransactionId::new(reader.u64()?),
            },
            TYPE_CHECKPOINT => WalRecord::Checkpoint {
                seq: SequenceNumber::new(reader.u64()?),
            },
            other => {
                return Err(EngineError::wal_corruption(
                    offset,
                    format!("unknown record type {other}"),
                ))
            }
        };
        reader.finish()?;
        Ok(record)
    }
}

struct PayloadReader<'a> {
    buf: &'a [u8],
    pos: usize,
    frame_offset: u64,
}

impl<'a> PayloadReader<'a> {
    fn new(buf: &'a [u8], frame_offset: u64) -> Self {
        Self {
            buf,
            pos: 0,
            frame_offset,
        }
    }

    fn short(&self) -> EngineError {
        EngineError::wal_corruption(self.frame_offset, "payload shorter than declared")
    }

    fn take(&mut self, n: usize) -> EngineResult<&'a [u8]> {
        if self.buf.len() - self.pos < n {
            return Err(self.short());
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u64(&mut self) -> EngineResult<u64> {
        let bytes = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(arr))
    }

    fn bytes(&mut self) -> EngineResult<Vec<u8>> {
        let len_bytes = self.take(4)?;
        let mut arr = [0u8; 4];
        arr.copy_from_slice(len_bytes);
        let len = u32::from_le_bytes(arr) as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn finish(self) -> EngineResult<()> {
        if self.pos != self.buf.len() {
            return Err(EngineError::wal_corruption(
                self.frame_offset,
                "payload longer than declared",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(record: WalRecord) {
        let frame = record.to_frame();
        assert_eq!(&frame[..4], &WAL_MAGIC);
        let type_byte = frame[5];
        let payload = &frame[HEADER_SIZE..frame.len() - CRC_SIZE];
        let decoded = WalRecord::from_payload(type_byte, payload, 0).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn all_record_types_round_trip() {
        round_trip(WalRecord::Begin {
            txn: TransactionId::new(1),
        });
        round_trip(WalRecord::Put {
            txn: TransactionId::new(2),
            key: b"ent:users:u1".to_vec(),
            value: vec![1, 2, 3],
        });
        round_trip(WalRecord::Delete {
            txn: TransactionId::new(3),
            key: b"idx:age".to_vec(),
        });
        round_trip(WalRecord::Commit {
            txn: TransactionId::new(4),
            seq: SequenceNumber::new(99),
        });
        round_trip(WalRecord::Abort {
            txn: TransactionId::new(5),
        });
        round_trip(WalRecord::Checkpoint {
            seq: SequenceNumber::new(120),
        });
    }

    #[test]
    fn empty_key_and_value_are_legal() {
        round_trip(WalRecord::Put {
            txn: TransactionId::new(1),
            key: Vec::new(),
            value: Vec::new(),
        });
    }

    #[test]
    fn unknown_type_is_corruption() {
        let err = WalRecord::from_payload(0xEE, &[], 40).unwrap_err();
        assert!(matches!(
            err,
            EngineError::WalCorruption { offset: 40, .. }
        ));
    }

    #[test]
    fn trailing_payload_bytes_are_corruption() {
        let mut payload = 7u64.to_le_bytes().to_vec();
        payload.push(0);
        assert!(WalRecord::from_payload(TYPE_BEGIN, &payload, 0).is_err());
    }
}
