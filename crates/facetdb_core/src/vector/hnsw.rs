//! In-RAM hierarchical navigable small-world graph.
//!
//! The graph holds every live embedding of one vector index. Removal
//! tombstones a slot (kept for routing, excluded from results); the
//! compacting rebuild on snapshot load drops tombstones.

use super::metric::DistanceMetric;
use facetdb_codec::{CodecError, Value};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};

/// An f32 distance with a total order, for the search heaps.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Dist(f32);

impl Eq for Dist {}

impl Ord for Dist {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl PartialOrd for Dist {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

struct Slot {
    pk: String,
    vector: Vec<f32>,
    deleted: bool,
    /// Neighbor slot ids, one list per level the node participates in.
    links: Vec<Vec<usize>>,
}

/// One index's graph tier.
pub(crate) struct HnswIndex {
    metric: DistanceMetric,
    m: usize,
    ef_construction: usize,
    level_mult: f64,
    entry: Option<usize>,
    max_level: usize,
    slots: Vec<Slot>,
    by_pk: HashMap<String, usize>,
    live: usize,
    rng: StdRng,
}

impl HnswIndex {
    pub(crate) fn new(metric: DistanceMetric, m: usize, ef_construction: usize) -> Self {
        Self {
            metric,
            m: m.max(2),
            ef_construction: ef_construction.max(m),
            level_mult: 1.0 / (m.max(2) as f64).ln(),
            entry: None,
            max_level: 0,
            slots: Vec::new(),
            by_pk: HashMap::new(),
            live: 0,
            rng: StdRng::from_entropy(),
        }
    }

    /// Live (non-tombstoned) vector count.
    pub(crate) fn len(&self) -> usize {
        self.live
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub(crate) fn contains(&self, pk: &str) -> bool {
        self.by_pk.contains_key(pk)
    }

    pub(crate) fn vector(&self, pk: &str) -> Option<&[f32]> {
        self.by_pk
            .get(pk)
            .map(|&slot| self.slots[slot].vector.as_slice())
    }

    /// Inserts or replaces an embedding. Replacement tombstones the old
    /// slot and inserts fresh; old links keep serving as routing edges.
    pub(crate) fn insert(&mut self, pk: &str, vector: Vec<f32>) {
        if self.by_pk.contains_key(pk) {
            self.remove(pk);
        }

        let level = self.sample_level();
        let id = self.slots.len();
        self.slots.push(Slot {
            pk: pk.to_string(),
            vector,
            deleted: false,
            links: vec![Vec::new(); level + 1],
        });
        self.by_pk.insert(pk.to_string(), id);
        self.live += 1;

        let Some(mut cursor) = self.entry else {
            self.entry = Some(id);
            self.max_level = level;
            return;
        };

        // Greedy descent through levels above the new node's level.
        for lvl in (level + 1..=self.max_level).rev() {
            cursor = self.greedy_closest(&self.slots[id].vector, cursor, lvl);
        }

        // Full search-and-link at each shared level, top down.
        let mut entries = vec![cursor];
        for lvl in (0..=level.min(self.max_level)).rev() {
            let found =
                self.search_layer(&self.slots[id].vector, &entries, self.ef_construction, lvl);
            let cap = if lvl == 0 { self.m * 2 } else { self.m };
            let chosen: Vec<usize> = found.iter().take(cap).map(|&(_, n)| n).collect();
            for &neighbor in &chosen {
                self.slots[id].links[lvl].push(neighbor);
                self.slots[neighbor].links[lvl].push(id);
                self.prune(neighbor, lvl);
            }
            entries = found.into_iter().map(|(_, n)| n).collect();
            if entries.is_empty() {
                entries = vec![cursor];
            }
        }

        if level > self.max_level {
            self.max_level = level;
            self.entry = Some(id);
        }
    }

    /// Tombstones an embedding. No-op when absent.
    pub(crate) fn remove(&mut self, pk: &str) {
        if let Some(id) = self.by_pk.remove(pk) {
            if !self.slots[id].deleted {
                self.slots[id].deleted = true;
                self.live -= 1;
            }
        }
    }

    /// Approximate k-nearest search. With a whitelist, only listed pks
    /// can appear in the result (tombstones never do). Returns
    /// `(pk, distance)` pairs, closest first.
    pub(crate) fn search(
        &self,
        query: &[f32],
        k: usize,
        ef: usize,
        whitelist: Option<&HashSet<String>>,
    ) -> Vec<(String, f32)> {
        let Some(mut cursor) = self.entry else {
            return Vec::new();
        };
        if k == 0 {
            return Vec::new();
        }
        for lvl in (1..=self.max_level).rev() {
            cursor = self.greedy_closest(query, cursor, lvl);
        }
        let ef = ef.max(k);
        let found = self.search_layer(query, &[cursor], ef, 0);
        found
            .into_iter()
            .filter(|&(_, id)| {
                let slot = &self.slots[id];
                !slot.deleted && whitelist.is_none_or(|allow| allow.contains(&slot.pk))
            })
            .take(k)
            .map(|(Dist(d), id)| (self.slots[id].pk.clone(), d))
            .collect()
    }

    /// Every live `(pk, vector)` pair, for snapshot reconciliation.
    pub(crate) fn live_entries(&self) -> impl Iterator<Item = (&str, &[f32])> {
        self.slots
            .iter()
            .filter(|slot| !slot.deleted)
            .map(|slot| (slot.pk.as_str(), slot.vector.as_slice()))
    }

    fn sample_level(&mut self) -> usize {
        let uniform: f64 = self.rng.gen_range(f64::EPSILON..1.0);
        (-uniform.ln() * self.level_mult) as usize
    }

    fn distance(&self, query: &[f32], id: usize) -> Dist {
        Dist(self.metric.distance(query, &self.slots[id].vector))
    }

    fn greedy_closest(&self, query: &[f32], mut cursor: usize, level: usize) -> usize {
        let mut best = self.distance(query, cursor);
        loop {
            let mut improved = false;
            let neighbors = self
                .slots[cursor]
                .links
                .get(level)
                .map_or(&[][..], Vec::as_slice);
            for &neighbor in neighbors {
                let d = self.distance(query, neighbor);
                if d < best {
                    best = d;
                    cursor = neighbor;
                    improved = true;
                }
            }
            if !improved {
                return cursor;
            }
        }
    }

    /// Beam search within one level. Returns up to `ef` nodes sorted by
    /// distance ascending, tombstones included (they still route).
    fn search_layer(
        &self,
        query: &[f32],
        entries: &[usize],
        ef: usize,
        level: usize,
    ) -> Vec<(Dist, usize)> {
        let mut visited: HashSet<usize> = entries.iter().copied().collect();
        let mut candidates: BinaryHeap<Reverse<(Dist, usize)>> = entries
            .iter()
            .map(|&id| Reverse((self.distance(query, id), id)))
            .collect();
        let mut found: BinaryHeap<(Dist, usize)> =
            candidates.iter().map(|&Reverse(pair)| pair).collect();

        while let Some(Reverse((dist, id))) = candidates.pop() {
            let worst = found.peek().map_or(Dist(f32::MAX), |&(d, _)| d);
            if found.len() >= ef && dist > worst {
                break;
            }
            let neighbors = self
                .slots[id]
                .links
                .get(level)
                .map_or(&[][..], Vec::as_slice);
            for &neighbor in neighbors {
                if !visited.insert(neighbor) {
                    continue;
                }
                let d = self.distance(query, neighbor);
                let worst = found.peek().map_or(Dist(f32::MAX), |&(w, _)| w);
                if found.len() < ef || d < worst {
                    candidates.push(Reverse((d, neighbor)));
                    found.push((d, neighbor));
                    if found.len() > ef {
                        found.pop();
                    }
                }
            }
        }
        let mut out = found.into_vec();
        out.sort();
        out
    }

    /// Caps a node's neighbor list after linking, keeping the closest.
    fn prune(&mut self, id: usize, level: usize) {
        let cap = if level == 0 { self.m * 2 } else { self.m };
        if self.slots[id].links[level].len() <= cap {
            return;
        }
        let origin = self.slots[id].vector.clone();
        let mut scored: Vec<(Dist, usize)> = self.slots[id].links[level]
            .iter()
            .map(|&n| (self.distance(&origin, n), n))
            .collect();
        scored.sort();
        scored.dedup_by_key(|&mut (_, n)| n);
        self.slots[id].links[level] = scored.into_iter().take(cap).map(|(_, n)| n).collect();
    }

    /// Snapshot form: metric, graph parameters, and every slot with its
    /// links. Tombstoned slots are skipped, so decoding always yields a
    /// compacted graph.
    pub(crate) fn to_value(&self) -> Value {
        // Map old slot ids to compacted ones.
        let mut remap = HashMap::new();
        for (id, slot) in self.slots.iter().enumerate() {
            if !slot.deleted {
                let next = remap.len() as i64;
                remap.insert(id, next);
            }
        }
        let slots: Vec<Value> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| !slot.deleted)
            .map(|(_, slot)| {
                let links: Vec<Value> = slot
                    .links
                    .iter()
                    .map(|level| {
                        Value::Array(
                            level
                                .iter()
                                .filter_map(|n| remap.get(n).copied().map(Value::Int))
                                .collect(),
                        )
                    })
                    .collect();
                let mut map = BTreeMap::new();
                map.insert("pk".to_string(), Value::Text(slot.pk.clone()));
                map.insert("vector".to_string(), Value::Vector(slot.vector.clone()));
                map.insert("links".to_string(), Value::Array(links));
                Value::Map(map)
            })
            .collect();

        let mut map = BTreeMap::new();
        map.insert("metric".to_string(), Value::Text(self.metric.as_str().to_string()));
        map.insert("m".to_string(), Value::Int(self.m as i64));
        map.insert(
            "ef_construction".to_string(),
            Value::Int(self.ef_construction as i64),
        );
        map.insert(
            "entry".to_string(),
            self.entry
                .and_then(|id| remap.get(&id).copied())
                .map_or(Value::Null, Value::Int),
        );
        map.insert("max_level".to_string(), Value::Int(self.max_level as i64));
        map.insert("slots".to_string(), Value::Array(slots));
        Value::Map(map)
    }

    /// Rebuilds a graph from its snapshot form.
    pub(crate) fn from_value(value: &Value) -> Result<Self, CodecError> {
        let corrupt = || CodecError::InvalidTag { tag: 0, offset: 0 };
        let int = |field: &str| -> Result<i64, CodecError> {
            value.get(field).and_then(Value::as_int).ok_or_else(corrupt)
        };
        let metric = value
            .get("metric")
            .and_then(Value::as_text)
            .and_then(DistanceMetric::from_str)
            .ok_or_else(corrupt)?;
        let m = int("m")? as usize;
        let ef_construction = int("ef_construction")? as usize;
        let max_level = int("max_level")? as usize;
        let entry = match value.get("entry") {
            Some(Value::Null) | None => None,
            Some(Value::Int(id)) => Some(*id as usize),
            Some(_) => return Err(corrupt()),
        };

        let raw_slots = value
            .get("slots")
            .and_then(Value::as_array)
            .ok_or_else(corrupt)?;
        let mut slots = Vec::with_capacity(raw_slots.len());
        let mut by_pk = HashMap::with_capacity(raw_slots.len());
        for (id, raw) in raw_slots.iter().enumerate() {
            let pk = raw
                .get("pk")
                .and_then(Value::as_text)
                .ok_or_else(corrupt)?
                .to_string();
            let vector = raw
                .get("vector")
                .and_then(Value::as_vector)
                .ok_or_else(corrupt)?
                .to_vec();
            let mut links = Vec::new();
            for level in raw.get("links").and_then(Value::as_array).ok_or_else(corrupt)? {
                let neighbors: Option<Vec<usize>> = level
                    .as_array()
                    .ok_or_else(corrupt)?
                    .iter()
                    .map(|n| n.as_int().map(|n| n as usize))
                    .collect();
                let neighbors = neighbors.ok_or_else(corrupt)?;
                if neighbors.iter().any(|&n| n >= raw_slots.len()) {
                    return Err(corrupt());
                }
                links.push(neighbors);
            }
            by_pk.insert(pk.clone(), id);
            slots.push(Slot {
                pk,
                vector,
                deleted: false,
                links,
            });
        }
        if entry.is_some_and(|id| id >= slots.len()) {
            return Err(corrupt());
        }

        let live = slots.len();
        Ok(Self {
            metric,
            m: m.max(2),
            ef_construction: ef_construction.max(m),
            level_mult: 1.0 / (m.max(2) as f64).ln(),
            entry,
            max_level,
            slots,
            by_pk,
            live,
            rng: StdRng::from_entropy(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_index() -> HnswIndex {
        let mut index = HnswIndex::new(DistanceMetric::L2, 8, 32);
        for i in 0..20 {
            index.insert(&format!("p{i}"), vec![i as f32, 0.0]);
        }
        index
    }

    #[test]
    fn nearest_neighbors_on_a_line() {
        let index = grid_index();
        let hits = index.search(&[7.2, 0.0], 3, 32, None);
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].0, "p7");
        let pks: HashSet<_> = hits.iter().map(|(pk, _)| pk.as_str()).collect();
        assert!(pks.contains("p7") && pks.contains("p8") && pks.contains("p6"));
    }

    #[test]
    fn removed_vectors_never_surface() {
        let mut index = grid_index();
        index.remove("p7");
        assert_eq!(index.len(), 19);
        let hits = index.search(&[7.0, 0.0], 3, 32, None);
        assert!(hits.iter().all(|(pk, _)| pk != "p7"));
    }

    #[test]
    fn reinsert_replaces_the_embedding() {
        let mut index = grid_index();
        index.insert("p7", vec![100.0, 0.0]);
        assert_eq!(index.len(), 20);
        assert_eq!(index.vector("p7"), Some(&[100.0, 0.0][..]));
        let hits = index.search(&[100.0, 0.0], 1, 32, None);
        assert_eq!(hits[0].0, "p7");
    }

    #[test]
    fn whitelist_restricts_results() {
        let index = grid_index();
        let allow: HashSet<String> = ["p1".to_string(), "p15".to_string()].into();
        let hits = index.search(&[7.0, 0.0], 2, 32, Some(&allow));
        let pks: Vec<_> = hits.iter().map(|(pk, _)| pk.as_str()).collect();
        assert!(pks.iter().all(|pk| *pk == "p1" || *pk == "p15"));
    }

    #[test]
    fn empty_index_returns_nothing() {
        let index = HnswIndex::new(DistanceMetric::Cosine, 8, 32);
        assert!(index.is_empty());
        assert!(index.search(&[1.0], 5, 16, None).is_empty());
    }

    #[test]
    fn snapshot_round_trip_preserves_search() {
        let mut index = grid_index();
        index.remove("p3");
        let restored = HnswIndex::from_value(&index.to_value()).unwrap();
        assert_eq!(restored.len(), 19);
        assert!(!restored.contains("p3"));
        let hits = restored.search(&[12.1, 0.0], 2, 32, None);
        assert_eq!(hits[0].0, "p12");
    }

    #[test]
    fn corrupt_snapshot_is_rejected() {
        let mut map = BTreeMap::new();
        map.insert("metric".to_string(), Value::Text("l2".to_string()));
        // Missing every other field.
        assert!(HnswIndex::from_value(&Value::Map(map)).is_err());
    }
}
