//! The durable record log backing the canonical store.
//!
//! Only committed data lands here; the WAL has already made the
//! transaction durable by the time a record is appended. Frame layout:
//!
//! ```text
//! +-----------+-----+------+---------+-----+-----------+-------+
//! | frame len | seq | flag | key len | key | value len | crc32 |
//! |  4 B LE   | 8 B | 1 B  | 4 B LE  | var |  4B + var | 4 B LE|
//! +-----------+-----+------+---------+-----+-----------+-------+
//! ```
//!
//! The value section is present only for puts. The checksum covers
//! everything between the frame length and itself. A torn tail is
//! truncated on open; the WAL replay then re-applies whatever the tail
//! lost.

use crate::error::{EngineError, EngineResult};
use crate::types::SequenceNumber;
use crate::wal::crc::crc32;
use facetdb_storage::StorageBackend;

const FLAG_PUT: u8 = 1;
const FLAG_TOMBSTONE: u8 = 2;

/// Upper bound on one frame body; larger lengths mean a damaged log.
const MAX_FRAME: usize = 512 * 1024 * 1024;

/// One committed mutation: a full canonical-keyspace key and either a new
/// value or a tombstone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Mutation {
    /// Full key, prefix included.
    pub key: Vec<u8>,
    /// `Some` upserts, `None` deletes.
    pub value: Option<Vec<u8>>,
}

impl Mutation {
    pub(crate) fn put(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            key,
            value: Some(value),
        }
    }

    pub(crate) fn delete(key: Vec<u8>) -> Self {
        Self { key, value: None }
    }
}

/// Append-only log of committed mutations.
pub(crate) struct RecordLog {
    backend: Box<dyn StorageBackend>,
}

impl RecordLog {
    pub(crate) fn new(backend: Box<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Appends one committed mutation.
    pub(crate) fn append(&mut self, seq: SequenceNumber, mutation: &Mutation) -> EngineResult<()> {
        let mut body = Vec::with_capacity(17 + mutation.key.len());
        body.extend_from_slice(&seq.as_u64().to_le_bytes());
        match &mutation.value {
            Some(value) => {
                body.push(FLAG_PUT);
                body.extend_from_slice(&(mutation.key.len() as u32).to_le_bytes());
                body.extend_from_slice(&mutation.key);
                body.extend_from_slice(&(value.len() as u32).to_le_bytes());
                body.extend_from_slice(value);
            }
            None => {
                body.push(FLAG_TOMBSTONE);
                body.extend_from_slice(&(mutation.key.len() as u32).to_le_bytes());
                body.extend_from_slice(&mutation.key);
            }
        }
        let checksum = crc32(&body);

        let mut frame = Vec::with_capacity(8 + body.len());
        frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
        frame.extend_from_slice(&body);
        frame.extend_from_slice(&checksum.to_le_bytes());
        self.backend.append(&frame)?;
        Ok(())
    }

    /// Raw log contents, for recovery tests.
    #[cfg(test)]
    pub(crate) fn raw_bytes(&self) -> Vec<u8> {
        let len = self.backend.len().unwrap() as usize;
        self.backend.read_at(0, len).unwrap()
    }

    /// Makes all appended frames durable.
    pub(crate) fn sync(&mut self) -> EngineResult<()> {
        self.backend.flush()?;
        self.backend.sync()?;
        Ok(())
    }

    /// Replays every intact frame into `apply`, truncates any torn tail,
    /// and returns the highest sequence number seen.
    pub(crate) fn replay(
        &mut self,
        mut apply: impl FnMut(SequenceNumber, Mutation),
    ) -> EngineResult<SequenceNumber> {
        let len = self.backend.len()?;
        let mut pos = 0u64;
        let mut valid = 0u64;
        let mut max_seq = SequenceNumber::ZERO;

        while pos < len {
            if len - pos < 4 {
                break;
            }
            let len_bytes = self.backend.read_at(pos, 4)?;
            let body_len =
                u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]])
                    as usize;
            if body_len > MAX_FRAME {
                return Err(EngineError::wal_corruption(
                    pos,
                    format!("record log frame length {body_len} exceeds limit"),
                ));
            }
            if len - pos < (4 + body_len + 4) as u64 {
                break;
            }
            let rest = self.backend.read_at(pos + 4, body_len + 4)?;
            let (body, crc_bytes) = rest.split_at(body_len);
            let expected =
                u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
            if crc32(body) != expected {
                return Err(EngineError::wal_corruption(
                    pos,
                    "record log checksum mismatch",
                ));
            }

            let (seq, mutation) = Self::decode_body(body, pos)?;
            if seq > max_seq {
                max_seq = seq;
            }
            apply(seq, mutation);
            pos += (4 + body_len + 4) as u64;
            valid = pos;
        }

        if valid < len {
            tracing::warn!(valid, len, "truncating torn record log tail");
            self.backend.truncate(valid)?;
            self.backend.sync()?;
        }
        Ok(max_seq)
    }

    fn decode_body(body: &[u8], offset: u64) -> EngineResult<(SequenceNumber, Mutation)> {
        let corrupt = || EngineError::wal_corruption(offset, "record log frame too short");
        if body.len() < 13 {
            return Err(corrupt());
        }
        let mut seq_bytes = [0u8; 8];
        seq_bytes.copy_from_slice(&body[..8]);
        let seq = SequenceNumber::new(u64::from_le_bytes(seq_bytes));
        let flag = body[8];
        let key_len =
            u32::from_le_bytes([body[9], body[10], body[11], body[12]]) as usize;
        let key_end = 13usize.checked_add(key_len).ok_or_else(corrupt)?;
        if body.len() < key_end {
            return Err(corrupt());
        }
        let key = body[13..key_end].to_vec();

        let mutation = match flag {
            FLAG_TOMBSTONE => {
                if body.len() != key_end {
                    return Err(corrupt());
                }
                Mutation::delete(key)
            }
            FLAG_PUT => {
                if body.len() < key_end + 4 {
                    return Err(corrupt());
                }
                let value_len = u32::from_le_bytes([
                    body[key_end],
                    body[key_end + 1],
                    body[key_end + 2],
                    body[key_end + 3],
                ]) as usize;
                if body.len() != key_end + 4 + value_len {
                    return Err(corrupt());
                }
                Mutation::put(key, body[key_end + 4..].to_vec())
            }
            other => {
                return Err(EngineError::wal_corruption(
                    offset,
                    format!("unknown record log flag {other}"),
                ))
            }
        };
        Ok((seq, mutation))
    }
}
