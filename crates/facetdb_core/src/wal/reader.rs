//! WAL replay.

use crate::error::{EngineError, EngineResult};
use crate::wal::record::{WalRecord, CRC_SIZE, HEADER_SIZE, MAX_PAYLOAD, WAL_FORMAT_VERSION, WAL_MAGIC};
use crate::wal::crc::crc32;
use facetdb_storage::StorageBackend;

/// Streams records out of a log, detecting torn tails and corruption.
///
/// A frame that runs past the end of the log is a torn tail: iteration
/// ends cleanly and [`WalReader::valid_len`] reports where the log should
/// be truncated. Bad magic, a wrong version, an absurd length, or a
/// checksum mismatch on a complete frame is corruption and surfaces as an
/// error.
pub(crate) struct WalReader<'a> {
    backend: &'a dyn StorageBackend,
    len: u64,
    pos: u64,
    valid_len: u64,
}

impl<'a> WalReader<'a> {
    /// Positions a reader at the start of the log.
    pub(crate) fn new(backend: &'a dyn StorageBackend) -> EngineResult<Self> {
        let len = backend.len()?;
        Ok(Self {
            backend,
            len,
            pos: 0,
            valid_len: 0,
        })
    }

    /// Length of the log up to and including the last complete record
    /// read so far.
    pub(crate) fn valid_len(&self) -> u64 {
        self.valid_len
    }

    /// Reads the next record, or `None` at the end of the intact log.
    pub(crate) fn next_record(&mut self) -> EngineResult<Option<(u64, WalRecord)>> {
        let start = self.pos;
        if start == self.len {
            return Ok(None);
        }
        if self.len - start < HEADER_SIZE as u64 {
            // Torn header.
            return Ok(None);
        }

        let header = self.backend.read_at(start, HEADER_SIZE)?;
        if header[..4] != WAL_MAGIC {
            return Err(EngineError::wal_corruption(start, "bad magic"));
        }
        if header[4] != WAL_FORMAT_VERSION {
            return Err(EngineError::wal_corruption(
                start,
                format!("unsupported frame version {}", header[4]),
            ));
        }
        let type_byte = header[5];
        let payload_len =
            u32::from_le_bytes([header[6], header[7], header[8], header[9]]) as usize;
        if payload_len > MAX_PAYLOAD {
            return Err(EngineError::wal_corruption(
                start,
                format!("payload length {payload_len} exceeds limit"),
            ));
        }

        let frame_len = (HEADER_SIZE + payload_len + CRC_SIZE) as u64;
        if self.len - start < frame_len {
            // Torn payload or checksum.
            return Ok(None);
        }

        let body = self
            .backend
            .read_at(start + HEADER_SIZE as u64, payload_len + CRC_SIZE)?;
        let (payload, crc_bytes) = body.split_at(payload_len);

        let mut checked = Vec::with_capacity(HEADER_SIZE - 4 + payload_len);
        checked.extend_from_slice(&header[4..]);
        checked.extend_from_slice(payload);
        let expected = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        if crc32(&checked) != expected {
            return Err(EngineError::wal_corruption(start, "checksum mismatch"));
        }

        let record = WalRecord::from_payload(type_byte, payload, start)?;
        self.pos = start + frame_len;
        self.valid_len = self.pos;
        Ok(Some((start, record)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SequenceNumber, TransactionId};
    use crate::wal::writer::WalWriter;
    use facetdb_storage::InMemoryBackend;

    fn sample_records() -> Vec<WalRecord> {
        vec![
            WalRecord::Begin {
                txn: TransactionId::new(1),
            },
            WalRecord::Put {
                txn: TransactionId::new(1),
                key: b"ent:k".to_vec(),
                value: vec![9, 9],
            },
            WalRecord::Commit {
                txn: TransactionId::new(1),
                seq: SequenceNumber::new(1),
            },
        ]
    }

    fn log_bytes(records: &[WalRecord]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for record in records {
            bytes.extend_from_slice(&record.to_frame());
        }
        bytes
    }

    #[test]
    fn replays_what_was_written() {
        let mut writer = WalWriter::new(Box::new(InMemoryBackend::new()));
        for record in sample_records() {
            writer.append(&record).unwrap();
        }

        let mut reader = WalReader::new(writer.backend()).unwrap();
        let mut replayed = Vec::new();
        while let Some((_, record)) = reader.next_record().unwrap() {
            replayed.push(record);
        }
        assert_eq!(replayed, sample_records());
        assert_eq!(reader.valid_len(), writer.len().unwrap());
    }

    #[test]
    fn torn_tail_ends_iteration_cleanly() {
        let mut bytes = log_bytes(&sample_records());
        let full_len = bytes.len();
        // Chop into the middle of the last frame.
        bytes.truncate(full_len - 3);
        let backend = InMemoryBackend::from_bytes(bytes);

        let mut reader = WalReader::new(&backend).unwrap();
        let mut count = 0;
        while reader.next_record().unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 2);
        assert!(reader.valid_len() < full_len as u64);
    }

    #[test]
    fn bad_magic_is_corruption() {
        let mut bytes = log_bytes(&sample_records());
        bytes[0] = b'X';
        let backend = InMemoryBackend::from_bytes(bytes);
        let mut reader = WalReader::new(&backend).unwrap();
        let err = reader.next_record().unwrap_err();
        assert!(matches!(err, EngineError::WalCorruption { offset: 0, .. }));
    }

    #[test]
    fn flipped_payload_byte_is_corruption() {
        let mut bytes = log_bytes(&sample_records());
        // Flip a byte inside the first frame's payload.
        bytes[HEADER_SIZE + 2] ^= 0xFF;
        let backend = InMemoryBackend::from_bytes(bytes);
        let mut reader = WalReader::new(&backend).unwrap();
        let err = reader.next_record().unwrap_err();
        assert!(matches!(err, EngineError::WalCorruption { .. }));
    }

    #[test]
    fn empty_log_yields_nothing() {
        let backend = InMemoryBackend::new();
        let mut reader = WalReader::new(&backend).unwrap();
        assert!(reader.next_record().unwrap().is_none());
        assert_eq!(reader.valid_len(), 0);
    }
}
