//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error from the OS.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A read extended past the end of the store.
    #[error("read out of bounds: offset {offset}, requested {requested}, store length {len}")]
    OutOfBounds {
        /// Requested read offset.
        offset: u64,
        /// Requested read length.
        requested: usize,
        /// Current store length.
        len: u64,
    },

    /// Tried to truncate a store to a length greater than its current one.
    #[error("cannot truncate store of length {len} to {requested}")]
    TruncateBeyondEnd {
        /// Requested new length.
        requested: u64,
        /// Current store length.
        len: u64,
    },

    /// An injected write fault, produced only by the fault-testing wrapper.
    #[error("injected write fault after {writes} writes")]
    InjectedFault {
        /// Number of writes that succeeded before the fault fired.
        writes: u64,
    },
}
