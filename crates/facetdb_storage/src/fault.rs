//! Fault-injecting backend wrapper for crash and atomicity testing.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const DISARMED: u64 = u64::MAX;

/// Shared handle that arms and disarms a [`FaultBackend`].
///
/// Cloned into tests so the fault can be scheduled after the backend has
/// been handed to the engine.
#[derive(Debug, Clone)]
pub struct FaultHandle {
    budget: Arc<AtomicU64>,
    writes: Arc<AtomicU64>,
}

impl FaultHandle {
    /// Arms the fault: the next `n` appends succeed, every append after
    /// that fails with [`StorageError::InjectedFault`].
    pub fn fail_after_appends(&self, n: u64) {
        self.budget.store(n, Ordering::SeqCst);
    }

    /// Disarms the fault; all appends succeed again.
    pub fn disarm(&self) {
        self.budget.store(DISARMED, Ordering::SeqCst);
    }

    /// Total appends that have reached the inner backend.
    #[must_use]
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }
}

/// Wraps any backend and fails appends on demand.
///
/// Reads, flushes, and truncations always pass through; only `append` is
/// gated, which mirrors a full disk or a torn write at commit time.
#[derive(Debug)]
pub struct FaultBackend<B> {
    inner: B,
    budget: Arc<AtomicU64>,
    writes: Arc<AtomicU64>,
}

impl<B: StorageBackend> FaultBackend<B> {
    /// Wraps `inner` with the fault disarmed.
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            budget: Arc::new(AtomicU64::new(DISARMED)),
            writes: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns a handle for arming the fault from test code.
    #[must_use]
    pub fn handle(&self) -> FaultHandle {
        FaultHandle {
            budget: Arc::clone(&self.budget),
            writes: Arc::clone(&self.writes),
        }
    }
}

impl<B: StorageBackend> StorageBackend for FaultBackend<B> {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let budget = self.budget.load(Ordering::SeqCst);
        if budget != DISARMED {
            if budget == 0 {
                return Err(StorageError::InjectedFault {
                    writes: self.writes.load(Ordering::SeqCst),
                });
            }
            self.budget.store(budget - 1, Ordering::SeqCst);
        }
        let offset = self.inner.append(data)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.inner.flush()
    }

    fn len(&self) -> StorageResult<u64> {
        self.inner.len()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.inner.sync()
    }

    fn truncate(&mut self, new_len: u64) -> StorageResult<()> {
        self.inner.truncate(new_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackend;

    #[test]
    fn disarmed_wrapper_passes_everything_through() {
        let mut backend = FaultBackend::new(InMemoryBackend::new());
        backend.append(b"abc").unwrap();
        backend.append(b"def").unwrap();
        assert_eq!(backend.read_at(0, 6).unwrap(), b"abcdef");
        assert_eq!(backend.handle().writes(), 2);
    }

    #[test]
    fn armed_fault_fires_after_budget() {
        let mut backend = FaultBackend::new(InMemoryBackend::new());
        let handle = backend.handle();
        handle.fail_after_appends(2);

        backend.append(b"a").unwrap();
        backend.append(b"b").unwrap();
        let err = backend.append(b"c").unwrap_err();
        assert!(matches!(err, StorageError::InjectedFault { writes: 2 }));

        // Stays failed until disarmed.
        assert!(backend.append(b"d").is_err());
        handle.disarm();
        backend.append(b"e").unwrap();
        assert_eq!(backend.len().unwrap(), 3);
    }

    #[test]
    fn failed_append_leaves_inner_untouched() {
        let mut backend = FaultBackend::new(InMemoryBackend::new());
        backend.handle().fail_after_appends(0);
        assert!(backend.append(b"lost").is_err());
        assert_eq!(backend.len().unwrap(), 0);
    }
}
