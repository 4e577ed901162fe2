//! Vector indexes: transactional ground truth, in-RAM search tier.
//!
//! The durable truth of a vector index is its `vec:` records, one per
//! entity, committed in the same batch as the entity itself. The HNSW
//! graph is a RAM tier rebuilt from those records; a `vmeta:` snapshot
//! written at checkpoint lets reopen skip most of the rebuild, and
//! reconciliation against the `vec:` records repairs a stale snapshot.
//!
//! A corrupt record that reconciliation cannot read marks the index
//! unavailable rather than serving wrong answers; entity reads and
//! writes continue unaffected.

mod hnsw;
mod metric;

pub use metric::DistanceMetric;

use crate::error::{EngineError, EngineResult};
use crate::keyspace;
use crate::store::{CanonicalStore, Mutation};
use crate::types::SequenceNumber;
use facetdb_codec::{decode_value, encode_value, Value, ValueKind};
use hnsw::HnswIndex;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Declaration of one vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndexConfig {
    /// Unique index name.
    pub name: String,
    /// Indexed table.
    pub table: String,
    /// Entity field holding the embedding.
    pub field: String,
    /// Required embedding dimension.
    pub dim: usize,
    /// Distance metric.
    pub metric: DistanceMetric,
}

impl VectorIndexConfig {
    /// Builds a config.
    pub fn new(
        name: impl Into<String>,
        table: impl Into<String>,
        field: impl Into<String>,
        dim: usize,
        metric: DistanceMetric,
    ) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            field: field.into(),
            dim,
            metric,
        }
    }

    pub(crate) fn to_value(&self) -> Value {
        let mut map = BTreeMap::new();
        map.insert("name".to_string(), Value::Text(self.name.clone()));
        map.insert("table".to_string(), Value::Text(self.table.clone()));
        map.insert("field".to_string(), Value::Text(self.field.clone()));
        map.insert("dim".to_string(), Value::Int(self.dim as i64));
        map.insert(
            "metric".to_string(),
            Value::Text(self.metric.as_str().to_string()),
        );
        Value::Map(map)
    }

    pub(crate) fn from_value(value: &Value) -> EngineResult<Self> {
        let text = |field: &str| -> EngineResult<String> {
            value
                .get(field)
                .and_then(Value::as_text)
                .map(str::to_string)
                .ok_or_else(|| {
                    EngineError::invalid_operation(format!(
                        "vector index config missing field {field:?}"
                    ))
                })
        };
        let dim = value
            .get("dim")
            .and_then(Value::as_int)
            .filter(|&d| d > 0)
            .ok_or_else(|| EngineError::invalid_operation("vector index config has a bad dim"))?;
        let metric = DistanceMetric::from_str(&text("metric")?).ok_or_else(|| {
            EngineError::invalid_operation("vector index config names an unknown metric")
        })?;
        Ok(Self {
            name: text("name")?,
            table: text("table")?,
            field: text("field")?,
            dim: dim as usize,
            metric,
        })
    }
}

/// One registered index: config plus RAM tier.
pub(crate) struct VectorIndexState {
    pub(crate) config: VectorIndexConfig,
    index: RwLock<HnswIndex>,
    available: AtomicBool,
    unavailable_reason: Mutex<String>,
}

impl VectorIndexState {
    fn mark_unavailable(&self, reason: impl Into<String>) {
        *self.unavailable_reason.lock() = reason.into();
        self.available.store(false, Ordering::Release);
    }

    fn ensure_available(&self) -> EngineResult<()> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(EngineError::index_unavailable(
                &self.config.name,
                self.unavailable_reason.lock().clone(),
            ))
        }
    }
}

/// The registry of vector indexes.
#[derive(Default)]
pub(crate) struct VectorIndexes {
    by_name: RwLock<HashMap<String, Arc<VectorIndexState>>>,
}

impl VectorIndexes {
    /// Registers a config with an empty RAM tier. Fails on a duplicate
    /// name.
    pub(crate) fn register(
        &self,
        config: VectorIndexConfig,
        hnsw_m: usize,
        hnsw_ef_construction: usize,
    ) -> EngineResult<Arc<VectorIndexState>> {
        let mut by_name = self.by_name.write();
        if by_name.contains_key(&config.name) {
            return Err(EngineError::invalid_operation(format!(
                "vector index {:?} already exists",
                config.name
            )));
        }
        let state = Arc::new(VectorIndexState {
            index: RwLock::new(HnswIndex::new(config.metric, hnsw_m, hnsw_ef_construction)),
            config,
            available: AtomicBool::new(true),
            unavailable_reason: Mutex::new(String::new()),
        });
        by_name.insert(state.config.name.clone(), Arc::clone(&state));
        Ok(state)
    }

    pub(crate) fn unregister(&self, name: &str) -> EngineResult<Arc<VectorIndexState>> {
        self.by_name
            .write()
            .remove(name)
            .ok_or_else(|| EngineError::index_not_found(name))
    }

    pub(crate) fn get(&self, name: &str) -> EngineResult<Arc<VectorIndexState>> {
        self.by_name
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::index_not_found(name))
    }

    pub(crate) fn for_table(&self, table: &str) -> Vec<Arc<VectorIndexState>> {
        let mut states: Vec<_> = self
            .by_name
            .read()
            .values()
            .filter(|state| state.config.table == table)
            .cloned()
            .collect();
        states.sort_by(|a, b| a.config.name.cmp(&b.config.name));
        states
    }

    /// Every registered config, for the manifest.
    pub(crate) fn configs(&self) -> Vec<VectorIndexConfig> {
        let mut configs: Vec<_> = self
            .by_name
            .read()
            .values()
            .map(|state| state.config.clone())
            .collect();
        configs.sort_by(|a, b| a.name.cmp(&b.name));
        configs
    }

    /// Plans the `vec:` record mutations for one entity write, mirroring
    /// the shape of the secondary-index planner.
    pub(crate) fn plan_entity_update(
        &self,
        table: &str,
        pk: &str,
        old: Option<&BTreeMap<String, Value>>,
        new: Option<&BTreeMap<String, Value>>,
    ) -> EngineResult<Vec<Mutation>> {
        let mut mutations = Vec::new();
        for state in self.for_table(table) {
            let config = &state.config;
            let new_vector = match new.and_then(|fields| fields.get(&config.field)) {
                None | Some(Value::Null) => None,
                Some(Value::Vector(v)) => {
                    if v.len() != config.dim {
                        return Err(EngineError::invalid_operation(format!(
                            "vector index {:?} expects dimension {}, got {}",
                            config.name,
                            config.dim,
                            v.len()
                        )));
                    }
                    Some(v)
                }
                Some(other) => {
                    return Err(EngineError::SchemaMismatch {
                        index: config.name.clone(),
                        field: config.field.clone(),
                        expected: ValueKind::Vector,
                        actual: other.kind(),
                    })
                }
            };
            let had_old = old
                .and_then(|fields| fields.get(&config.field))
                .is_some_and(|v| !v.is_null());

            let key = keyspace::vector_record_key(&config.name, pk);
            match new_vector {
                Some(v) => {
                    mutations.push(Mutation::put(key, encode_value(&Value::Vector(v.clone()))));
                }
                None if had_old => mutations.push(Mutation::delete(key)),
                None => {}
            }
        }
        Ok(mutations)
    }

    /// Folds a committed batch's `vec:` mutations into the RAM tiers.
    /// Called after publish, under the commit lock, so tiers apply
    /// batches in commit order.
    pub(crate) fn apply_committed(&self, mutations: &[Mutation]) {
        let by_name = self.by_name.read();
        for state in by_name.values() {
            let prefix = keyspace::vector_prefix(&state.config.name);
            for mutation in mutations {
                if !mutation.key.starts_with(&prefix) {
                    continue;
                }
                let Ok(pk) = keyspace::trailing_text_segment(&mutation.key, prefix.len()) else {
                    state.mark_unavailable("unparseable embedding record key");
                    break;
                };
                match &mutation.value {
                    Some(blob) => match decode_embedding(blob) {
                        Ok(vector) => state.index.write().insert(&pk, vector),
                        Err(_) => {
                            state.mark_unavailable(format!(
                                "corrupt embedding record for pk {pk:?}"
                            ));
                            break;
                        }
                    },
                    None => state.index.write().remove(&pk),
                }
            }
        }
    }

    /// Approximate nearest-neighbor search, optionally restricted to a
    /// candidate whitelist.
    pub(crate) fn search(
        &self,
        name: &str,
        query: &[f32],
        k: usize,
        ef: usize,
        whitelist: Option<&HashSet<String>>,
    ) -> EngineResult<Vec<(String, f32)>> {
        let state = self.get(name)?;
        state.ensure_available()?;
        if query.len() != state.config.dim {
            return Err(EngineError::invalid_operation(format!(
                "vector index {:?} expects dimension {}, got {}",
                name,
                state.config.dim,
                query.len()
            )));
        }
        let hits = state.index.read().search(query, k, ef, whitelist);
        Ok(hits)
    }

    /// Live vector count of an index, for planner selectivity decisions.
    pub(crate) fn population(&self, name: &str) -> EngineResult<usize> {
        let state = self.get(name)?;
        state.ensure_available()?;
        let live = state.index.read().len();
        Ok(live)
    }

    /// Snapshot mutations for every available index, committed at
    /// checkpoint and close.
    pub(crate) fn plan_persist(&self) -> Vec<Mutation> {
        self.by_name
            .read()
            .values()
            .filter(|state| state.available.load(Ordering::Acquire))
            .map(|state| {
                Mutation::put(
                    keyspace::vector_meta_key(&state.config.name),
                    encode_value(&state.index.read().to_value()),
                )
            })
            .collect()
    }

    /// Brings one index's RAM tier up to date on open: start from the
    /// persisted snapshot if it decodes, then reconcile against the
    /// `vec:` records so a stale or missing snapshot self-repairs. A
    /// record that will not decode leaves the index unavailable.
    pub(crate) fn load(
        &self,
        name: &str,
        store: &CanonicalStore,
        snapshot: SequenceNumber,
        page_size: usize,
    ) -> EngineResult<()> {
        let state = self.get(name)?;

        let restored = store
            .get(&keyspace::vector_meta_key(name), snapshot)
            .and_then(|blob| decode_value(&blob).ok())
            .and_then(|value| HnswIndex::from_value(&value).ok());
        if let Some(index) = restored {
            *state.index.write() = index;
        }

        // Reconcile: records are truth, the snapshot only a head start.
        let prefix = keyspace::vector_prefix(name);
        let mut records: HashMap<String, Vec<f32>> = HashMap::new();
        let mut cursor: Option<Vec<u8>> = None;
        loop {
            let page = store.scan_prefix(&prefix, snapshot, cursor.as_deref(), page_size);
            for (key, blob) in &page.items {
                let pk = keyspace::trailing_text_segment(key, prefix.len())?;
                match decode_embedding(blob) {
                    Ok(vector) => {
                        records.insert(pk, vector);
                    }
                    Err(_) => {
                        state.mark_unavailable(format!("corrupt embedding record for pk {pk:?}"));
                        return Ok(());
                    }
                }
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        let mut index = state.index.write();
        let stale: Vec<String> = index
            .live_entries()
            .filter(|(pk, vector)| records.get(*pk).map(Vec::as_slice) != Some(vector))
            .map(|(pk, _)| pk.to_string())
            .collect();
        for pk in &stale {
            index.remove(pk);
        }
        for (pk, vector) in records {
            if !index.contains(&pk) {
                index.insert(&pk, vector);
            }
        }
        drop(index);
        state.available.store(true, Ordering::Release);
        Ok(())
    }
}

fn decode_embedding(blob: &[u8]) -> EngineResult<Vec<f32>> {
    match decode_value(blob)? {
        Value::Vector(v) => Ok(v),
        _ => Err(EngineError::execution("embedding-decode", "record is not a vector")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facetdb_storage::InMemoryBackend;

    fn fields(vector: &[f32]) -> BTreeMap<String, Value> {
        [("embedding".to_string(), Value::Vector(vector.to_vec()))]
            .into_iter()
            .collect()
    }

    fn registry() -> VectorIndexes {
        let indexes = VectorIndexes::default();
        indexes
            .register(
                VectorIndexConfig::new("docs_vec", "docs", "embedding", 2, DistanceMetric::L2),
                8,
                32,
            )
            .unwrap();
        indexes
    }

    fn empty_store() -> CanonicalStore {
        CanonicalStore::open(Box::new(InMemoryBackend::new())).unwrap().0
    }

    #[test]
    fn committed_records_feed_the_ram_tier() {
        let indexes = registry();
        let store = empty_store();
        let mut mutations = Vec::new();
        for (pk, v) in [("d1", [0.0, 0.0]), ("d2", [5.0, 5.0]), ("d3", [0.5, 0.5])] {
            mutations.extend(
                indexes
                    .plan_entity_update("docs", pk, None, Some(&fields(&v)))
                    .unwrap(),
            );
        }
        store
            .apply_committed(SequenceNumber::new(1), &mutations)
            .unwrap();
        indexes.apply_committed(&mutations);

        assert_eq!(indexes.population("docs_vec").unwrap(), 3);
        let hits = indexes.search("docs_vec", &[0.4, 0.4], 2, 32, None).unwrap();
        assert_eq!(hits[0].0, "d3");
        assert_eq!(hits[1].0, "d1");
    }

    #[test]
    fn dimension_and_kind_errors() {
        let indexes = registry();
        let err = indexes
            .plan_entity_update("docs", "d1", None, Some(&fields(&[1.0, 2.0, 3.0])))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidOperation(_)));

        let bad_kind: BTreeMap<String, Value> =
            [("embedding".to_string(), Value::Int(7))].into_iter().collect();
        let err = indexes
            .plan_entity_update("docs", "d1", None, Some(&bad_kind))
            .unwrap_err();
        assert!(matches!(err, EngineError::SchemaMismatch { .. }));

        let wrong_query = indexes.search("docs_vec", &[1.0], 1, 16, None).unwrap_err();
        assert!(matches!(wrong_query, EngineError::InvalidOperation(_)));
    }

    #[test]
    fn deleting_the_entity_drops_the_embedding() {
        let indexes = registry();
        let insert = indexes
            .plan_entity_update("docs", "d1", None, Some(&fields(&[1.0, 1.0])))
            .unwrap();
        indexes.apply_committed(&insert);
        let delete = indexes
            .plan_entity_update("docs", "d1", Some(&fields(&[1.0, 1.0])), None)
            .unwrap();
        assert!(matches!(delete[0].value, None));
        indexes.apply_committed(&delete);
        assert_eq!(indexes.population("docs_vec").unwrap(), 0);
    }

    #[test]
    fn snapshot_persist_and_load_round_trip() {
        let indexes = registry();
        let store = empty_store();
        let mut mutations = Vec::new();
        for (pk, v) in [("d1", [0.0, 1.0]), ("d2", [9.0, 9.0])] {
            mutations.extend(
                indexes
                    .plan_entity_update("docs", pk, None, Some(&fields(&v)))
                    .unwrap(),
            );
        }
        store
            .apply_committed(SequenceNumber::new(1), &mutations)
            .unwrap();
        indexes.apply_committed(&mutations);
        store
            .apply_committed(SequenceNumber::new(2), &indexes.plan_persist())
            .unwrap();

        // A fresh registry, as after reopen.
        let reopened = registry();
        reopened
            .load("docs_vec", &store, SequenceNumber::new(2), 16)
            .unwrap();
        assert_eq!(reopened.population("docs_vec").unwrap(), 2);
        let hits = reopened.search("docs_vec", &[0.1, 1.0], 1, 32, None).unwrap();
        assert_eq!(hits[0].0, "d1");
    }

    #[test]
    fn stale_snapshot_reconciles_from_records() {
        let indexes = registry();
        let store = empty_store();
        let insert = indexes
            .plan_entity_update("docs", "d1", None, Some(&fields(&[0.0, 1.0])))
            .unwrap();
        store.apply_committed(SequenceNumber::new(1), &insert).unwrap();
        indexes.apply_committed(&insert);
        store
            .apply_committed(SequenceNumber::new(2), &indexes.plan_persist())
            .unwrap();

        // Commits after the snapshot: d1 moves, d2 appears.
        let mut late = indexes
            .plan_entity_update("docs", "d1", Some(&fields(&[0.0, 1.0])), Some(&fields(&[8.0, 8.0])))
            .unwrap();
        late.extend(
            indexes
                .plan_entity_update("docs", "d2", None, Some(&fields(&[2.0, 2.0])))
                .unwrap(),
        );
        store.apply_committed(SequenceNumber::new(3), &late).unwrap();

        let reopened = registry();
        reopened
            .load("docs_vec", &store, SequenceNumber::new(3), 16)
            .unwrap();
        assert_eq!(reopened.population("docs_vec").unwrap(), 2);
        let hits = reopened.search("docs_vec", &[8.0, 8.0], 1, 32, None).unwrap();
        assert_eq!(hits[0].0, "d1");
    }

    #[test]
    fn corrupt_record_marks_the_index_unavailable() {
        let indexes = registry();
        let store = empty_store();
        let bad = vec![Mutation::put(
            keyspace::vector_record_key("docs_vec", "d1"),
            vec![0xDE, 0xAD],
        )];
        store.apply_committed(SequenceNumber::new(1), &bad).unwrap();
        indexes
            .load("docs_vec", &store, SequenceNumber::new(1), 16)
            .unwrap();

        let err = indexes.search("docs_vec", &[0.0, 0.0], 1, 16, None).unwrap_err();
        assert!(matches!(err, EngineError::IndexUnavailable { .. }));
        let err = indexes.population("docs_vec").unwrap_err();
        assert!(matches!(err, EngineError::IndexUnavailable { .. }));
    }
}
