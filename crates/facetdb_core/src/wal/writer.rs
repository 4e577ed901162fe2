//! WAL appender.

use crate::error::EngineResult;
use crate::wal::record::WalRecord;
use facetdb_storage::StorageBackend;

/// Appends frames to the log. One writer exists per engine; the commit
/// lock serializes access, so the writer itself carries no locking.
pub(crate) struct WalWriter {
    backend: Box<dyn StorageBackend>,
}

impl WalWriter {
    /// Wraps a backend positioned at the end of an existing (possibly
    /// empty) log.
    pub(crate) fn new(backend: Box<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Appends one record. Returns the offset of its frame.
    pub(crate) fn append(&mut self, record: &WalRecord) -> EngineResult<u64> {
        let frame = record.to_frame();
        let offset = self.backend.append(&frame)?;
        Ok(offset)
    }

    /// Makes everything appended so far durable.
    pub(crate) fn sync(&mut self) -> EngineResult<()> {
        self.backend.flush()?;
        self.backend.sync()?;
        Ok(())
    }

    /// Current log length in bytes.
    pub(crate) fn len(&self) -> EngineResult<u64> {
        Ok(self.backend.len()?)
    }

    /// Drops every frame at or after `offset`. Used to cut a torn tail
    /// found during recovery.
    pub(crate) fn truncate(&mut self, offset: u64) -> EngineResult<()> {
        self.backend.truncate(offset)?;
        self.backend.sync()?;
        Ok(())
    }

    /// Read access for replay.
    pub(crate) fn backend(&self) -> &dyn StorageBackend {
        self.backend.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransactionId;
    use facetdb_storage::InMemoryBackend;

    #[test]
    fn append_returns_increasing_offsets() {
        let mut writer = WalWriter::new(Box::new(InMemoryBackend::new()));
        let record = WalRecord::Begin {
            txn: TransactionId::new(1),
        };
        let first = writer.append(&record).unwrap();
        let second = writer.append(&record).unwrap();
        assert_eq!(first, 0);
        assert!(second > first);
        assert_eq!(writer.len().unwrap(), second * 2);
    }

    #[test]
    fn truncate_rewinds_the_log() {
        let mut writer = WalWriter::new(Box::new(InMemoryBackend::new()));
        let record = WalRecord::Abort {
            txn: TransactionId::new(1),
        };
        writer.append(&record).unwrap();
        let tail = writer.append(&record).unwrap();
        writer.truncate(tail).unwrap();
        assert_eq!(writer.len().unwrap(), tail);
    }
}
