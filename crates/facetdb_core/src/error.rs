//! The engine error taxonomy.
//!
//! One rule shapes the API: a missing key is not an error. Point lookups
//! return `Ok(None)`; errors are reserved for conflicts, corruption, and
//! misuse.

use crate::types::TransactionId;
use facetdb_codec::{CodecError, ValueKind};
use facetdb_storage::StorageError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Optimistic concurrency failure: another transaction committed a
    /// write to the same key after this transaction's snapshot. Retry the
    /// whole transaction.
    #[error("write-write conflict in {txn} on key {key:?}")]
    Conflict {
        /// The losing transaction.
        txn: TransactionId,
        /// Human-readable form of the contended key.
        key: String,
    },

    /// No index registered under the given name.
    #[error("index not found: {name:?}")]
    IndexNotFound {
        /// The requested index name.
        name: String,
    },

    /// An index exists but cannot serve queries until rebuilt.
    #[error("index {name:?} unavailable: {reason}")]
    IndexUnavailable {
        /// The degraded index.
        name: String,
        /// Why it is out of service.
        reason: String,
    },

    /// An error from the storage backend.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// An error encoding or decoding a value or key.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// An indexed field held a value of the wrong kind.
    #[error(
        "schema mismatch on index {index:?}: field {field:?} expects {expected}, got {actual}"
    )]
    SchemaMismatch {
        /// The index whose declaration was violated.
        index: String,
        /// The offending field.
        field: String,
        /// Declared kind.
        expected: ValueKind,
        /// Kind actually present.
        actual: ValueKind,
    },

    /// A query failed mid-flight. Names the pipeline step that failed.
    #[error("execution failed at step {step:?}: {message}")]
    Execution {
        /// The pipeline step that failed.
        step: String,
        /// Failure detail.
        message: String,
    },

    /// The write-ahead log is damaged beyond a torn tail.
    #[error("WAL corruption at offset {offset}: {detail}")]
    WalCorruption {
        /// Byte offset of the damaged record.
        offset: u64,
        /// What was wrong.
        detail: String,
    },

    /// The caller asked for something the engine cannot do in its current
    /// state (commit of a finished transaction, duplicate index, ...).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Another process holds the database directory.
    #[error("database locked: {path}")]
    DatabaseLocked {
        /// The locked directory.
        path: PathBuf,
    },

    /// On-disk format version mismatch.
    #[error("unsupported format version {actual} (engine speaks {expected})")]
    InvalidFormat {
        /// Version this build writes and reads.
        expected: u32,
        /// Version found on disk.
        actual: u32,
    },
}

impl EngineError {
    /// Write-write conflict on `key`.
    pub fn conflict(txn: TransactionId, key: &[u8]) -> Self {
        EngineError::Conflict {
            txn,
            key: String::from_utf8_lossy(key).into_owned(),
        }
    }

    /// Missing index.
    pub fn index_not_found(name: impl Into<String>) -> Self {
        EngineError::IndexNotFound { name: name.into() }
    }

    /// Degraded index.
    pub fn index_unavailable(name: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::IndexUnavailable {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Failed execution step.
    pub fn execution(step: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Execution {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Damaged WAL record.
    pub fn wal_corruption(offset: u64, detail: impl Into<String>) -> Self {
        EngineError::WalCorruption {
            offset,
            detail: detail.into(),
        }
    }

    /// Caller misuse.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        EngineError::InvalidOperation(message.into())
    }

    /// Whether retrying the transaction could succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Conflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransactionId;

    #[test]
    fn conflict_is_retryable() {
        let err = EngineError::conflict(TransactionId::new(7), b"ent:users:u1");
        assert!(err.is_retryable());
        assert!(err.to_string().contains("txn:7"));
    }

    #[test]
    fn storage_errors_convert() {
        let storage = StorageError::OutOfBounds {
            offset: 10,
            requested: 4,
            len: 8,
        };
        let err: EngineError = storage.into();
        assert!(matches!(err, EngineError::Storage(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn messages_name_the_failing_piece() {
        let err = EngineError::execution("hydrate", "decode failed");
        assert_eq!(
            err.to_string(),
            "execution failed at step \"hydrate\": decode failed"
        );
        let err = EngineError::index_unavailable("users_embedding", "corrupt snapshot");
        assert!(err.to_string().contains("users_embedding"));
    }
}
