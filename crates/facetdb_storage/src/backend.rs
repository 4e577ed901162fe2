//! Storage backend trait definition.

use crate::error::StorageResult;

/// An append-only byte store.
///
/// Backends never interpret the bytes they hold. The log layers above them
/// own every format decision and rely on three guarantees:
///
/// - `append` returns the offset the data landed at
/// - `read_at` returns exactly the bytes previously appended at that offset
/// - after `flush` returns, all appended bytes survive process termination
///
/// Implementations must be `Send + Sync`; the engine reads concurrently
/// while a single committer appends.
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::OutOfBounds`] if the requested range
    /// extends past the end of the store, or an I/O error from the OS.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends bytes at the end of the store and returns the offset they
    /// were written at.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying write fails.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes all buffered writes down to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Current length of the store in bytes.
    ///
    /// This is also the offset the next `append` will return.
    ///
    /// # Errors
    ///
    /// Returns an error if the length cannot be determined.
    fn len(&self) -> StorageResult<u64>;

    /// Whether the store currently holds no bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the length cannot be determined.
    fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Syncs data and file metadata to durable storage.
    ///
    /// Stronger than `flush`: file length and metadata are durable too.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Discards all bytes at or after `new_len`.
    ///
    /// Used for log truncation after a checkpoint and for dropping a torn
    /// tail found during recovery.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_len` exceeds the current length or the
    /// truncation itself fails.
    fn truncate(&mut self, new_len: u64) -> StorageResult<()>;
}
