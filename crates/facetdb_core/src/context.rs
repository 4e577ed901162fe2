//! Shared engine state.

use crate::config::EngineConfig;
use crate::index::SecondaryIndexes;
use crate::stats::EngineStats;
use crate::store::CanonicalStore;
use crate::transaction::{AuditLog, TransactionManager};
use crate::vector::VectorIndexes;
use crate::wal::WalWriter;
use parking_lot::Mutex;

/// Everything the engine's subsystems share. The facade, the planner,
/// and the executor all borrow this.
pub(crate) struct EngineContext {
    pub(crate) config: EngineConfig,
    pub(crate) stats: EngineStats,
    pub(crate) store: CanonicalStore,
    pub(crate) indexes: SecondaryIndexes,
    pub(crate) vectors: VectorIndexes,
    pub(crate) txns: TransactionManager,
    pub(crate) audit: AuditLog,
    /// Commit-lock holders only.
    pub(crate) wal: Mutex<WalWriter>,
}
