//! Engine counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic operation counters, shared across the engine.
///
/// Counters are relaxed atomics; they observe throughput, they do not
/// synchronize anything.
#[derive(Debug, Default)]
pub struct EngineStats {
    transactions_started: AtomicU64,
    transactions_committed: AtomicU64,
    transactions_conflicted: AtomicU64,
    transactions_aborted: AtomicU64,
    entities_written: AtomicU64,
    entities_deleted: AtomicU64,
    projection_entries_written: AtomicU64,
    queries_executed: AtomicU64,
    vector_searches: AtomicU64,
    traversals: AtomicU64,
    ttl_entities_expired: AtomicU64,
}

/// A point-in-time copy of [`EngineStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Transactions begun.
    pub transactions_started: u64,
    /// Transactions committed.
    pub transactions_committed: u64,
    /// Commits rejected with a write-write conflict.
    pub transactions_conflicted: u64,
    /// Transactions rolled back by the caller.
    pub transactions_aborted: u64,
    /// Entity upserts committed.
    pub entities_written: u64,
    /// Entity deletions committed.
    pub entities_deleted: u64,
    /// Projection (index, graph, vector) mutations committed.
    pub projection_entries_written: u64,
    /// Queries run through the planner/executor.
    pub queries_executed: u64,
    /// Vector searches served, standalone or inside queries.
    pub vector_searches: u64,
    /// Graph traversals served.
    pub traversals: u64,
    /// Entities removed by TTL sweeps.
    pub ttl_entities_expired: u64,
}

macro_rules! bump {
    ($($method:ident => $field:ident),* $(,)?) => {
        $(
            pub(crate) fn $method(&self, n: u64) {
                self.$field.fetch_add(n, Ordering::Relaxed);
            }
        )*
    };
}

impl EngineStats {
    bump! {
        txn_started => transactions_started,
        txn_committed => transactions_committed,
        txn_conflicted => transactions_conflicted,
        txn_aborted => transactions_aborted,
        entity_written => entities_written,
        entity_deleted => entities_deleted,
        projection_written => projection_entries_written,
        query_executed => queries_executed,
        vector_search => vector_searches,
        traversal => traversals,
        ttl_expired => ttl_entities_expired,
    }

    /// Copies all counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            transactions_started: self.transactions_started.load(Ordering::Relaxed),
            transactions_committed: self.transactions_committed.load(Ordering::Relaxed),
            transactions_conflicted: self.transactions_conflicted.load(Ordering::Relaxed),
            transactions_aborted: self.transactions_aborted.load(Ordering::Relaxed),
            entities_written: self.entities_written.load(Ordering::Relaxed),
            entities_deleted: self.entities_deleted.load(Ordering::Relaxed),
            projection_entries_written: self.projection_entries_written.load(Ordering::Relaxed),
            queries_executed: self.queries_executed.load(Ordering::Relaxed),
            vector_searches: self.vector_searches.load(Ordering::Relaxed),
            traversals: self.traversals.load(Ordering::Relaxed),
            ttl_entities_expired: self.ttl_entities_expired.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = EngineStats::default();
        stats.txn_started(1);
        stats.txn_started(1);
        stats.entity_written(3);
        let snap = stats.snapshot();
        assert_eq!(snap.transactions_started, 2);
        assert_eq!(snap.entities_written, 3);
        assert_eq!(snap.transactions_committed, 0);
    }
}
