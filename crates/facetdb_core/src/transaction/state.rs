//! Per-transaction staged state.

use crate::entity::Entity;
use crate::graph::Edge;
use crate::types::{EntityKey, SequenceNumber, TransactionId};
use std::collections::BTreeMap;

/// How a transaction's reads relate to concurrent commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Reads see the latest committed data at each call; commits never
    /// conflict (last writer wins).
    ReadCommitted,
    /// Reads see a fixed snapshot taken at `begin`; a commit fails with
    /// [`crate::EngineError::Conflict`] if any written entity was also
    /// committed by someone else after that snapshot.
    #[default]
    Snapshot,
}

/// An edge mutation staged inside a transaction.
#[derive(Debug, Clone)]
pub(crate) enum EdgeOp {
    Add(Edge),
    Remove(Edge),
}

/// Everything a transaction has staged but not committed.
///
/// Writes are kept at the entity/edge level, not as raw keys: index,
/// fulltext, TTL, geo, and vector projections are derived at commit
/// time against the state the commit actually replaces.
pub(crate) struct TxnState {
    pub(crate) id: TransactionId,
    pub(crate) isolation: IsolationLevel,
    /// Read snapshot taken at `begin`.
    pub(crate) snapshot: SequenceNumber,
    /// Last staged write per entity; `None` deletes.
    pub(crate) entity_ops: BTreeMap<EntityKey, Option<Entity>>,
    /// Edge mutations, in staging order.
    pub(crate) edge_ops: Vec<EdgeOp>,
}

impl TxnState {
    pub(crate) fn new(id: TransactionId, isolation: IsolationLevel, snapshot: SequenceNumber) -> Self {
        Self {
            id,
            isolation,
            snapshot,
            entity_ops: BTreeMap::new(),
            edge_ops: Vec::new(),
        }
    }

    /// Stages an entity write, replacing any earlier write to the same
    /// entity in this transaction.
    pub(crate) fn stage_put(&mut self, entity: Entity) {
        self.entity_ops.insert(entity.key().clone(), Some(entity));
    }

    /// Stages an entity deletion.
    pub(crate) fn stage_delete(&mut self, key: EntityKey) {
        self.entity_ops.insert(key, None);
    }

    /// The staged view of an entity, if this transaction touched it.
    /// `Some(None)` means staged for deletion.
    pub(crate) fn staged(&self, key: &EntityKey) -> Option<Option<&Entity>> {
        self.entity_ops.get(key).map(Option::as_ref)
    }

    pub(crate) fn is_read_only(&self) -> bool {
        self.entity_ops.is_empty() && self.edge_ops.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_stage_replaces_earlier() {
        let mut state = TxnState::new(
            TransactionId::new(1),
            IsolationLevel::Snapshot,
            SequenceNumber::ZERO,
        );
        let key = EntityKey::new("users", "u1");
        state.stage_put(Entity::new("users", "u1").with_field("n", 1i64.into()));
        state.stage_delete(key.clone());
        assert!(matches!(state.staged(&key), Some(None)));
        assert_eq!(state.entity_ops.len(), 1);
        assert!(!state.is_read_only());
    }

    #[test]
    fn untouched_entities_are_not_staged() {
        let state = TxnState::new(
            TransactionId::new(1),
            IsolationLevel::ReadCommitted,
            SequenceNumber::ZERO,
        );
        assert!(state.staged(&EntityKey::new("users", "u1")).is_none());
        assert!(state.is_read_only());
    }
}
