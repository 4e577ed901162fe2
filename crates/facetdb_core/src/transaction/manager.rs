//! Transaction lifecycle and optimistic conflict detection.
//!
//! The manager owns the active-transaction registry, the committed
//! sequence watermark, and the recent-commit footprints that back
//! write-write conflict checks. The engine drives the commit sequence
//! itself; the manager supplies the commit lock that serializes it.

use crate::error::{EngineError, EngineResult};
use crate::transaction::state::{IsolationLevel, TxnState};
use crate::types::{SequenceNumber, TransactionId};
use parking_lot::{Mutex, MutexGuard};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

/// One committed transaction's write footprint, kept for conflict
/// checks against still-running snapshots.
struct CommitFootprint {
    seq: SequenceNumber,
    keys: HashSet<Vec<u8>>,
}

pub(crate) struct TransactionManager {
    next_txn: AtomicU64,
    committed_seq: AtomicU64,
    active: Mutex<HashMap<TransactionId, TxnState>>,
    recent: Mutex<VecDeque<CommitFootprint>>,
    /// Commits at or below this are no longer in `recent`; snapshots
    /// older than it can no longer be checked precisely.
    pruned_below: AtomicU64,
    horizon: usize,
    commit_lock: Mutex<()>,
}

impl TransactionManager {
    /// `committed` is the highest sequence recovered from disk; new
    /// commits continue above it.
    pub(crate) fn new(committed: SequenceNumber, horizon: usize) -> Self {
        Self {
            next_txn: AtomicU64::new(1),
            committed_seq: AtomicU64::new(committed.as_u64()),
            active: Mutex::new(HashMap::new()),
            recent: Mutex::new(VecDeque::new()),
            pruned_below: AtomicU64::new(committed.as_u64()),
            horizon: horizon.max(1),
            commit_lock: Mutex::new(()),
        }
    }

    /// Starts a transaction reading at the current watermark.
    pub(crate) fn begin(&self, isolation: IsolationLevel) -> TransactionId {
        let id = TransactionId::new(self.next_txn.fetch_add(1, Ordering::Relaxed));
        let snapshot = self.committed();
        self.active
            .lock()
            .insert(id, TxnState::new(id, isolation, snapshot));
        id
    }

    /// Runs `f` against a live transaction's staged state.
    pub(crate) fn with_state<T>(
        &self,
        txn: TransactionId,
        f: impl FnOnce(&mut TxnState) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let mut active = self.active.lock();
        let state = active
            .get_mut(&txn)
            .ok_or_else(|| EngineError::invalid_operation(format!("{txn} is not active")))?;
        f(state)
    }

    /// Removes and returns a transaction for commit or abort.
    pub(crate) fn take(&self, txn: TransactionId) -> EngineResult<TxnState> {
        self.active
            .lock()
            .remove(&txn)
            .ok_or_else(|| EngineError::invalid_operation(format!("{txn} is not active")))
    }

    /// The commit serialization point. Held across WAL append, record
    /// log append, memtable publish, and watermark advance.
    pub(crate) fn commit_lock(&self) -> MutexGuard<'_, ()> {
        self.commit_lock.lock()
    }

    /// Highest published commit sequence.
    pub(crate) fn committed(&self) -> SequenceNumber {
        SequenceNumber::new(self.committed_seq.load(Ordering::Acquire))
    }

    /// Publishes a new watermark. Caller holds the commit lock.
    pub(crate) fn advance_committed(&self, seq: SequenceNumber) {
        self.committed_seq.store(seq.as_u64(), Ordering::Release);
    }

    /// Fails with [`EngineError::Conflict`] if any of `keys` was
    /// committed by another transaction after `snapshot`. Caller holds
    /// the commit lock, so the check is exact against all prior commits
    /// still in the window.
    pub(crate) fn check_conflicts(
        &self,
        txn: TransactionId,
        snapshot: SequenceNumber,
        keys: &[Vec<u8>],
    ) -> EngineResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        if snapshot < SequenceNumber::new(self.pruned_below.load(Ordering::Acquire)) {
            // History this snapshot would need has been pruned; the only
            // safe answer is to make the writer retry on fresher state.
            return Err(EngineError::Conflict {
                txn,
                key: "(commit history pruned)".to_string(),
            });
        }
        let recent = self.recent.lock();
        for footprint in recent.iter().rev() {
            if footprint.seq <= snapshot {
                break;
            }
            if let Some(key) = keys.iter().find(|key| footprint.keys.contains(*key)) {
                return Err(EngineError::conflict(txn, key));
            }
        }
        Ok(())
    }

    /// Records a commit's footprint and prunes the window: footprints
    /// older than every active snapshot are useless, and the window
    /// never exceeds the configured horizon.
    pub(crate) fn record_commit(&self, seq: SequenceNumber, keys: HashSet<Vec<u8>>) {
        let min_active = self.min_active_snapshot();
        let mut recent = self.recent.lock();
        recent.push_back(CommitFootprint { seq, keys });
        while let Some(front) = recent.front() {
            let stale = min_active.is_some_and(|min| front.seq <= min) || min_active.is_none();
            if stale || recent.len() > self.horizon {
                let dropped = recent.pop_front().map(|f| f.seq.as_u64());
                if let Some(dropped) = dropped {
                    self.pruned_below.fetch_max(dropped, Ordering::AcqRel);
                }
            } else {
                break;
            }
        }
    }

    /// Oldest snapshot any active transaction still reads at, also the
    /// MVCC version-compaction horizon.
    pub(crate) fn min_active_snapshot(&self) -> Option<SequenceNumber> {
        self.active.lock().values().map(|state| state.snapshot).min()
    }

    pub(crate) fn active_count(&self) -> usize {
        self.active.lock().len()
    }
}
