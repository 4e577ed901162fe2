//! Graph projections and traversals.
//!
//! Edges are first-class records keyed by a caller-supplied edge pk.
//! Each edge materializes two adjacency entries in the canonical
//! keyspace, `gout:` under its source node and `gin:` under its target,
//! both holding the full edge blob. Traversals are pure prefix scans
//! over a snapshot; neighbors come back in edge-pk order, which makes
//! every traversal deterministic.

use crate::error::{EngineError, EngineResult};
use crate::keyspace;
use crate::store::{CanonicalStore, Mutation};
use crate::types::{EntityKey, SequenceNumber};
use facetdb_codec::{decode_value, encode_value, Value};
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet, VecDeque};

/// Which adjacency list a traversal follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Follow edges away from the node.
    Out,
    /// Follow edges pointing at the node.
    In,
}

/// A directed, optionally weighted edge between two entities.
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    /// Caller-supplied primary key; traversal tie-breaks sort on it.
    pub pk: String,
    /// Source node.
    pub from: EntityKey,
    /// Target node.
    pub to: EntityKey,
    /// Edge label, used by traversal filters.
    pub edge_type: String,
    /// Weight for shortest-path search. An unweighted edge receives its
    /// type's configured default when committed.
    pub weight: Option<f64>,
}

impl Edge {
    /// Builds an unweighted edge.
    pub fn new(
        pk: impl Into<String>,
        from: EntityKey,
        to: EntityKey,
        edge_type: impl Into<String>,
    ) -> Self {
        Self {
            pk: pk.into(),
            from,
            to,
            edge_type: edge_type.into(),
            weight: None,
        }
    }

    /// Sets an explicit weight.
    #[must_use]
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    pub(crate) fn to_blob(&self) -> Vec<u8> {
        let mut map = BTreeMap::new();
        map.insert("pk".to_string(), Value::Text(self.pk.clone()));
        map.insert("from_table".to_string(), Value::Text(self.from.table.clone()));
        map.insert("from_pk".to_string(), Value::Text(self.from.pk.clone()));
        map.insert("to_table".to_string(), Value::Text(self.to.table.clone()));
        map.insert("to_pk".to_string(), Value::Text(self.to.pk.clone()));
        map.insert("type".to_string(), Value::Text(self.edge_type.clone()));
        map.insert(
            "weight".to_string(),
            self.weight.map_or(Value::Null, Value::Float),
        );
        encode_value(&Value::Map(map))
    }

    pub(crate) fn from_blob(blob: &[u8]) -> EngineResult<Self> {
        let value = decode_value(blob)?;
        let text = |field: &str| -> EngineResult<String> {
            value
                .get(field)
                .and_then(Value::as_text)
                .map(str::to_string)
                .ok_or_else(|| {
                    EngineError::execution("edge-decode", format!("missing field {field:?}"))
                })
        };
        Ok(Self {
            pk: text("pk")?,
            from: EntityKey::new(text("from_table")?, text("from_pk")?),
            to: EntityKey::new(text("to_table")?, text("to_pk")?),
            edge_type: text("type")?,
            weight: value.get("weight").and_then(Value::as_float),
        })
    }

    /// The node on the far side, seen from `direction`.
    fn far_node(&self, direction: Direction) -> &EntityKey {
        match direction {
            Direction::Out => &self.to,
            Direction::In => &self.from,
        }
    }
}

/// A path found by shortest-path search.
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    /// Visited nodes, start first.
    pub nodes: Vec<EntityKey>,
    /// Sum of edge weights along the path.
    pub cost: f64,
}

/// Mutations that materialize one edge in both adjacency lists.
pub(crate) fn plan_add_edge(edge: &Edge) -> Vec<Mutation> {
    let blob = edge.to_blob();
    vec![
        Mutation::put(
            keyspace::graph_out_key(&edge.from.table, &edge.from.pk, &edge.pk),
            blob.clone(),
        ),
        Mutation::put(
            keyspace::graph_in_key(&edge.to.table, &edge.to.pk, &edge.pk),
            blob,
        ),
    ]
}

/// Mutations that remove one edge from both adjacency lists.
pub(crate) fn plan_remove_edge(edge: &Edge) -> Vec<Mutation> {
    vec![
        Mutation::delete(keyspace::graph_out_key(
            &edge.from.table,
            &edge.from.pk,
            &edge.pk,
        )),
        Mutation::delete(keyspace::graph_in_key(&edge.to.table, &edge.to.pk, &edge.pk)),
    ]
}

/// Edges adjacent to `node` in the given direction, in edge-pk order,
/// optionally filtered by type.
pub(crate) fn neighbors(
    store: &CanonicalStore,
    snapshot: SequenceNumber,
    node: &EntityKey,
    direction: Direction,
    edge_type: Option<&str>,
    page_size: usize,
) -> EngineResult<Vec<Edge>> {
    let prefix = match direction {
        Direction::Out => keyspace::graph_out_prefix(&node.table, &node.pk),
        Direction::In => keyspace::graph_in_prefix(&node.table, &node.pk),
    };
    let mut edges = Vec::new();
    let mut cursor: Option<Vec<u8>> = None;
    loop {
        let page = store.scan_prefix(&prefix, snapshot, cursor.as_deref(), page_size);
        for (_, blob) in &page.items {
            let edge = Edge::from_blob(blob)?;
            if edge_type.is_none_or(|t| edge.edge_type == t) {
                edges.push(edge);
            }
        }
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    Ok(edges)
}

/// Breadth-first traversal up to `depth` hops. Depth 0 returns just the
/// start node. Nodes appear once, in discovery order; within a level,
/// discovery follows edge-pk order.
pub(crate) fn bfs(
    store: &CanonicalStore,
    snapshot: SequenceNumber,
    start: &EntityKey,
    depth: usize,
    direction: Direction,
    edge_type: Option<&str>,
    page_size: usize,
) -> EngineResult<Vec<EntityKey>> {
    let mut visited = HashSet::new();
    let mut order = vec![start.clone()];
    visited.insert(start.clone());
    let mut frontier = VecDeque::from([start.clone()]);

    for _ in 0..depth {
        let mut next = VecDeque::new();
        while let Some(node) = frontier.pop_front() {
            for edge in neighbors(store, snapshot, &node, direction, edge_type, page_size)? {
                let far = edge.far_node(direction);
                if visited.insert(far.clone()) {
                    order.push(far.clone());
                    next.push_back(far.clone());
                }
            }
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }
    Ok(order)
}

/// Heap entry for Dijkstra; ordered so the binary max-heap pops the
/// cheapest cost first, with the node key breaking ties.
struct QueueEntry {
    cost: f64,
    node: EntityKey,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cost.total_cmp(&other.cost).is_eq() && self.node == other.node
    }
}

impl Eq for QueueEntry {}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Dijkstra shortest path from `from` to `to` over outgoing edges.
/// Edges without a weight cost `default_edge_weight`. Returns `None`
/// when `to` is unreachable. Strict relaxation keeps the first of two
/// equal-cost routes, which is the one reached through the smallest
/// edge pks.
pub(crate) fn shortest_path(
    store: &CanonicalStore,
    snapshot: SequenceNumber,
    from: &EntityKey,
    to: &EntityKey,
    edge_type: Option<&str>,
    default_edge_weight: f64,
    page_size: usize,
) -> EngineResult<Option<Path>> {
    let mut best: HashMap<EntityKey, f64> = HashMap::from([(from.clone(), 0.0)]);
    let mut prev: HashMap<EntityKey, EntityKey> = HashMap::new();
    let mut heap = BinaryHeap::from([QueueEntry {
        cost: 0.0,
        node: from.clone(),
    }]);

    while let Some(QueueEntry { cost, node }) = heap.pop() {
        if node == *to {
            let mut nodes = vec![node.clone()];
            let mut cursor = &node;
            while let Some(parent) = prev.get(cursor) {
                nodes.push(parent.clone());
                cursor = parent;
            }
            nodes.reverse();
            return Ok(Some(Path { nodes, cost }));
        }
        if best.get(&node).is_some_and(|&known| cost > known) {
            continue;
        }
        for edge in neighbors(store, snapshot, &node, Direction::Out, edge_type, page_size)? {
            let weight = edge.weight.unwrap_or(default_edge_weight);
            if weight < 0.0 {
                return Err(EngineError::invalid_operation(format!(
                    "edge {:?} has negative weight {weight}",
                    edge.pk
                )));
            }
            let next_cost = cost + weight;
            let far = edge.far_node(Direction::Out);
            if best.get(far).is_none_or(|&known| next_cost < known) {
                best.insert(far.clone(), next_cost);
                prev.insert(far.clone(), node.clone());
                heap.push(QueueEntry {
                    cost: next_cost,
                    node: far.clone(),
                });
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use facetdb_storage::InMemoryBackend;

    fn node(pk: &str) -> EntityKey {
        EntityKey::new("nodes", pk)
    }

    fn store_with(edges: &[Edge]) -> CanonicalStore {
        let (store, _) = CanonicalStore::open(Box::new(InMemoryBackend::new())).unwrap();
        let mutations: Vec<_> = edges.iter().flat_map(plan_add_edge).collect();
        store
            .apply_committed(SequenceNumber::new(1), &mutations)
            .unwrap();
        store
    }

    fn snap() -> SequenceNumber {
        SequenceNumber::new(1)
    }

    #[test]
    fn edge_blob_round_trips() {
        let edge = Edge::new("e1", node("a"), node("b"), "knows").with_weight(2.5);
        assert_eq!(Edge::from_blob(&edge.to_blob()).unwrap(), edge);
        let unweighted = Edge::new("e2", node("a"), node("b"), "knows");
        assert_eq!(Edge::from_blob(&unweighted.to_blob()).unwrap(), unweighted);
    }

    #[test]
    fn neighbors_come_back_in_edge_pk_order() {
        let store = store_with(&[
            Edge::new("e2", node("a"), node("c"), "knows"),
            Edge::new("e1", node("a"), node("b"), "knows"),
            Edge::new("e3", node("b"), node("a"), "knows"),
        ]);
        let out =
            neighbors(&store, snap(), &node("a"), Direction::Out, None, 16).unwrap();
        let pks: Vec<_> = out.iter().map(|e| e.pk.as_str()).collect();
        assert_eq!(pks, vec!["e1", "e2"]);

        let incoming =
            neighbors(&store, snap(), &node("a"), Direction::In, None, 16).unwrap();
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].pk, "e3");
    }

    #[test]
    fn type_filter_narrows_neighbors() {
        let store = store_with(&[
            Edge::new("e1", node("a"), node("b"), "knows"),
            Edge::new("e2", node("a"), node("c"), "blocks"),
        ]);
        let knows =
            neighbors(&store, snap(), &node("a"), Direction::Out, Some("knows"), 16).unwrap();
        assert_eq!(knows.len(), 1);
        assert_eq!(knows[0].to, node("b"));
    }

    #[test]
    fn bfs_depth_limits() {
        // a -> b -> c
        let store = store_with(&[
            Edge::new("e1", node("a"), node("b"), "knows"),
            Edge::new("e2", node("b"), node("c"), "knows"),
        ]);
        let depth0 = bfs(&store, snap(), &node("a"), 0, Direction::Out, None, 16).unwrap();
        assert_eq!(depth0, vec![node("a")]);
        let depth1 = bfs(&store, snap(), &node("a"), 1, Direction::Out, None, 16).unwrap();
        assert_eq!(depth1, vec![node("a"), node("b")]);
        let depth2 = bfs(&store, snap(), &node("a"), 2, Direction::Out, None, 16).unwrap();
        assert_eq!(depth2, vec![node("a"), node("b"), node("c")]);
        // Deeper than the graph is fine.
        let depth9 = bfs(&store, snap(), &node("a"), 9, Direction::Out, None, 16).unwrap();
        assert_eq!(depth9, depth2);
    }

    #[test]
    fn bfs_visits_each_node_once_in_cycles() {
        let store = store_with(&[
            Edge::new("e1", node("a"), node("b"), "knows"),
            Edge::new("e2", node("b"), node("a"), "knows"),
        ]);
        let order = bfs(&store, snap(), &node("a"), 5, Direction::Out, None, 16).unwrap();
        assert_eq!(order, vec![node("a"), node("b")]);
    }

    #[test]
    fn shortest_path_prefers_cheaper_route() {
        // a -> b -> c costs 2.0; the direct a -> c edge costs 5.0.
        let store = store_with(&[
            Edge::new("e1", node("a"), node("b"), "road").with_weight(1.0),
            Edge::new("e2", node("b"), node("c"), "road").with_weight(1.0),
            Edge::new("e3", node("a"), node("c"), "road").with_weight(5.0),
        ]);
        let path = shortest_path(&store, snap(), &node("a"), &node("c"), None, 1.0, 16)
            .unwrap()
            .unwrap();
        assert_eq!(path.nodes, vec![node("a"), node("b"), node("c")]);
        assert!((path.cost - 2.0).abs() < 1e-9);
    }

    #[test]
    fn shortest_path_uses_default_weight_when_unweighted() {
        let store = store_with(&[
            Edge::new("e1", node("a"), node("b"), "road"),
            Edge::new("e2", node("b"), node("c"), "road"),
        ]);
        let path = shortest_path(&store, snap(), &node("a"), &node("c"), None, 3.0, 16)
            .unwrap()
            .unwrap();
        assert!((path.cost - 6.0).abs() < 1e-9);
    }

    #[test]
    fn shortest_path_reports_unreachable_as_none() {
        let store = store_with(&[Edge::new("e1", node("a"), node("b"), "road")]);
        let path = shortest_path(&store, snap(), &node("b"), &node("a"), None, 1.0, 16).unwrap();
        assert!(path.is_none());

        let to_self = shortest_path(&store, snap(), &node("a"), &node("a"), None, 1.0, 16)
            .unwrap()
            .unwrap();
        assert_eq!(to_self.nodes, vec![node("a")]);
        assert_eq!(to_self.cost, 0.0);
    }

    #[test]
    fn negative_weights_are_rejected() {
        let store = store_with(&[Edge::new("e1", node("a"), node("b"), "road").with_weight(-1.0)]);
        let err = shortest_path(&store, snap(), &node("a"), &node("b"), None, 1.0, 16).unwrap_err();
        assert!(matches!(err, EngineError::InvalidOperation(_)));
    }

    #[test]
    fn removing_an_edge_clears_both_adjacency_lists() {
        let edge = Edge::new("e1", node("a"), node("b"), "knows");
        let store = store_with(&[edge.clone()]);
        store
            .apply_committed(SequenceNumber::new(2), &plan_remove_edge(&edge))
            .unwrap();
        let at2 = SequenceNumber::new(2);
        assert!(neighbors(&store, at2, &node("a"), Direction::Out, None, 16)
            .unwrap()
            .is_empty());
        assert!(neighbors(&store, at2, &node("b"), Direction::In, None, 16)
            .unwrap()
            .is_empty());
    }
}
