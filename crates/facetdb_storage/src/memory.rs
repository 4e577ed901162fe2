//! In-memory storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;

/// A storage backend that keeps everything in a heap buffer.
///
/// Used for unit tests, integration tests, and ephemeral engines that do
/// not need persistence.
///
/// # Example
///
/// ```rust
/// use facetdb_storage::{StorageBackend, InMemoryBackend};
///
/// let mut backend = InMemoryBackend::new();
/// backend.append(b"abc").unwrap();
/// assert_eq!(backend.len().unwrap(), 3);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    buf: RwLock<Vec<u8>>,
}

impl InMemoryBackend {
    /// Creates an empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend pre-seeded with `bytes`.
    ///
    /// Handy for recovery tests that replay a hand-built log.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            buf: RwLock::new(bytes),
        }
    }

    /// Returns a copy of the full contents.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.buf.read().clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let buf = self.buf.read();
        let total = buf.len() as u64;
        let start = offset as usize;
        let end = start.saturating_add(len);

        if offset > total || end > buf.len() {
            return Err(StorageError::OutOfBounds {
                offset,
                requested: len,
                len: total,
            });
        }

        Ok(buf[start..end].to_vec())
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut buf = self.buf.write();
        let offset = buf.len() as u64;
        buf.extend_from_slice(data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn len(&self) -> StorageResult<u64> {
        Ok(self.buf.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_len: u64) -> StorageResult<()> {
        let mut buf = self.buf.write();
        let total = buf.len() as u64;
        if new_len > total {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_len,
                len: total,
            });
        }
        buf.truncate(new_len as usize);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.len().unwrap(), 0);
        assert!(backend.is_empty().unwrap());
    }

    #[test]
    fn append_returns_offsets_in_order() {
        let mut backend = InMemoryBackend::new();
        assert_eq!(backend.append(b"one").unwrap(), 0);
        assert_eq!(backend.append(b"two").unwrap(), 3);
        assert_eq!(backend.len().unwrap(), 6);
    }

    #[test]
    fn read_at_returns_appended_bytes() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"facet db").unwrap();
        assert_eq!(backend.read_at(0, 5).unwrap(), b"facet");
        assert_eq!(backend.read_at(6, 2).unwrap(), b"db");
    }

    #[test]
    fn read_past_end_is_out_of_bounds() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"abc").unwrap();
        let err = backend.read_at(2, 4).unwrap_err();
        assert!(matches!(err, StorageError::OutOfBounds { .. }));
        let err = backend.read_at(10, 1).unwrap_err();
        assert!(matches!(err, StorageError::OutOfBounds { .. }));
    }

    #[test]
    fn zero_length_read_succeeds() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"abc").unwrap();
        assert!(backend.read_at(1, 0).unwrap().is_empty());
    }

    #[test]
    fn from_bytes_preserves_seed() {
        let backend = InMemoryBackend::from_bytes(b"seed".to_vec());
        assert_eq!(backend.len().unwrap(), 4);
        assert_eq!(backend.snapshot(), b"seed");
    }

    #[test]
    fn truncate_drops_tail() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"head-tail").unwrap();
        backend.truncate(4).unwrap();
        assert_eq!(backend.read_at(0, 4).unwrap(), b"head");
        assert_eq!(backend.len().unwrap(), 4);
    }

    #[test]
    fn truncate_beyond_end_fails() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"abc").unwrap();
        let err = backend.truncate(99).unwrap_err();
        assert!(matches!(err, StorageError::TruncateBeyondEnd { .. }));
    }
}
