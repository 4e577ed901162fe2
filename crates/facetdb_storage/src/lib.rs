//! # FacetDB Storage
//!
//! Append-only byte stores underpinning the FacetDB write-ahead log and
//! durable record log.
//!
//! Backends are deliberately dumb: they read, append, flush, and truncate
//! raw bytes. All framing (record envelopes, checksums, key encoding) lives
//! in higher layers that do not care where the bytes end up.
//!
//! ## Backends
//!
//! - [`InMemoryBackend`] - ephemeral storage for tests and throwaway engines
//! - [`FileBackend`] - persistent storage on top of OS file APIs
//! - [`FaultBackend`] - wrapper that injects write failures, for crash and
//!   atomicity testing
//!
//! ## Example
//!
//! ```rust
//! use facetdb_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"record").unwrap();
//! assert_eq!(backend.read_at(offset, 6).unwrap(), b"record");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod fault;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use fault::{FaultBackend, FaultHandle};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
