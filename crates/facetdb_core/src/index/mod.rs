//! Secondary index projections.
//!
//! Indexes are not separate data structures: each index entry is one key
//! in the canonical keyspace, derived from an entity's fields. When an
//! entity is written, the write planner here turns the old and new field
//! sets into entry deletions and insertions; those mutations join the
//! entity's own mutation in the commit batch, so index and entity can
//! never disagree.
//!
//! Entry values carry the entity's pk (geo entries carry the coordinates
//! too), which lets lookups return pk lists without hydrating entities.

mod definition;
mod fulltext;
mod geo;

pub use definition::{IndexDefinition, IndexKind};

pub(crate) use fulltext::tokenize;
pub(crate) use geo::haversine_m;

use crate::error::{EngineError, EngineResult};
use crate::keyspace;
use crate::store::{prefix_upper, CanonicalStore, Mutation};
use crate::types::SequenceNumber;
use facetdb_codec::key_encoding::push_key_value;
use facetdb_codec::{decode_value, encode_value, Value, ValueKind};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;

/// The live index registry and write planner.
#[derive(Default)]
pub(crate) struct SecondaryIndexes {
    by_name: RwLock<HashMap<String, Arc<IndexDefinition>>>,
}

/// A cardinality estimate from bounded probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Estimate {
    /// Entries seen before the probe stopped.
    pub count: usize,
    /// True when the probe hit its limit; the real count is `>= count`.
    pub saturated: bool,
}

impl SecondaryIndexes {
    /// Registers a definition. Fails on a duplicate name.
    pub(crate) fn register(&self, def: IndexDefinition) -> EngineResult<Arc<IndexDefinition>> {
        let mut by_name = self.by_name.write();
        if by_name.contains_key(&def.name) {
            return Err(EngineError::invalid_operation(format!(
                "index {:?} already exists",
                def.name
            )));
        }
        let def = Arc::new(def);
        by_name.insert(def.name.clone(), Arc::clone(&def));
        Ok(def)
    }

    /// Removes a definition. Fails when absent.
    pub(crate) fn unregister(&self, name: &str) -> EngineResult<Arc<IndexDefinition>> {
        self.by_name
            .write()
            .remove(name)
            .ok_or_else(|| EngineError::index_not_found(name))
    }

    /// Looks a definition up by name.
    pub(crate) fn get(&self, name: &str) -> EngineResult<Arc<IndexDefinition>> {
        self.by_name
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::index_not_found(name))
    }

    /// All definitions over a table.
    pub(crate) fn for_table(&self, table: &str) -> Vec<Arc<IndexDefinition>> {
        let mut defs: Vec<_> = self
            .by_name
            .read()
            .values()
            .filter(|def| def.table == table)
            .cloned()
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Every registered definition, for the manifest.
    pub(crate) fn definitions(&self) -> Vec<Arc<IndexDefinition>> {
        let mut defs: Vec<_> = self.by_name.read().values().cloned().collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Plans the index mutations for one entity write. `old` is the field
    /// set visible to the writing transaction, `new` the incoming one;
    /// `None` means absent (insert or delete respectively).
    ///
    /// A schema mismatch in `new` fails the plan, and with it the write,
    /// before anything is staged.
    pub(crate) fn plan_entity_update(
        &self,
        table: &str,
        pk: &str,
        old: Option<&BTreeMap<String, Value>>,
        new: Option<&BTreeMap<String, Value>>,
        min_token_len: usize,
    ) -> EngineResult<Vec<Mutation>> {
        let mut mutations = Vec::new();
        for def in self.for_table(table) {
            let old_entries = match old {
                Some(fields) => entries(&def, pk, fields, min_token_len)?,
                None => Vec::new(),
            };
            let new_entries = match new {
                Some(fields) => entries(&def, pk, fields, min_token_len)?,
                None => Vec::new(),
            };
            for (key, _) in &old_entries {
                if !new_entries.iter().any(|(new_key, _)| new_key == key) {
                    mutations.push(Mutation::delete(key.clone()));
                }
            }
            for (key, value) in new_entries {
                mutations.push(Mutation::put(key, value));
            }
        }
        Ok(mutations)
    }

    /// Point lookup. `values` must cover the index's fields, or a prefix
    /// of them for a composite index. Returns pks in lexicographic order.
    pub(crate) fn lookup_eq(
        &self,
        store: &CanonicalStore,
        snapshot: SequenceNumber,
        def: &IndexDefinition,
        values: &[Value],
        page_size: usize,
    ) -> EngineResult<Vec<String>> {
        let prefix = eq_prefix(def, values)?;
        Ok(drain_pk_entries(store, snapshot, &prefix, page_size))
    }

    /// Ordered lookup over a range index. Returns pks in value order.
    pub(crate) fn lookup_range(
        &self,
        store: &CanonicalStore,
        snapshot: SequenceNumber,
        def: &IndexDefinition,
        low: Bound<&Value>,
        high: Bound<&Value>,
        page_size: usize,
    ) -> EngineResult<Vec<String>> {
        let (start, upper) = range_bounds(def, low, high)?;
        let mut pks = Vec::new();
        let mut cursor: Option<Vec<u8>> = None;
        loop {
            let page = store.scan_bounded(
                start.clone(),
                upper.clone(),
                snapshot,
                cursor.as_deref(),
                page_size,
            );
            pks.extend(
                page.items
                    .iter()
                    .map(|(_, value)| String::from_utf8_lossy(value).into_owned()),
            );
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(pks)
    }

    /// Estimates how many entries match an equality lookup, probing at
    /// most `probe_limit` entries.
    pub(crate) fn estimate_eq(
        &self,
        store: &CanonicalStore,
        snapshot: SequenceNumber,
        def: &IndexDefinition,
        values: &[Value],
        probe_limit: usize,
    ) -> EngineResult<Estimate> {
        let prefix = eq_prefix(def, values)?;
        let page = store.scan_prefix(&prefix, snapshot, None, probe_limit);
        Ok(Estimate {
            count: page.items.len(),
            saturated: page.next_cursor.is_some(),
        })
    }

    /// Estimates how many entries fall in a range, probing at most
    /// `probe_limit` entries.
    pub(crate) fn estimate_range(
        &self,
        store: &CanonicalStore,
        snapshot: SequenceNumber,
        def: &IndexDefinition,
        low: Bound<&Value>,
        high: Bound<&Value>,
        probe_limit: usize,
    ) -> EngineResult<Estimate> {
        let (start, upper) = range_bounds(def, low, high)?;
        let page = store.scan_bounded(start, upper, snapshot, None, probe_limit);
        Ok(Estimate {
            count: page.items.len(),
            saturated: page.next_cursor.is_some(),
        })
    }

    /// Estimates a fulltext match by probing the rarest token's posting
    /// list. An empty token set estimates to zero.
    pub(crate) fn estimate_fulltext(
        &self,
        store: &CanonicalStore,
        snapshot: SequenceNumber,
        def: &IndexDefinition,
        query: &str,
        min_token_len: usize,
        probe_limit: usize,
    ) -> EngineResult<Estimate> {
        let tokens = tokenize(query, min_token_len);
        let mut best = Estimate {
            count: 0,
            saturated: false,
        };
        for (i, token) in tokens.iter().enumerate() {
            let prefix = keyspace::fulltext_token_prefix(&def.name, token);
            let page = store.scan_prefix(&prefix, snapshot, None, probe_limit);
            let probe = Estimate {
                count: page.items.len(),
                saturated: page.next_cursor.is_some(),
            };
            if i == 0 || probe.count < best.count {
                best = probe;
            }
        }
        Ok(best)
    }

    /// Estimates a radius match by probing the covering morton range.
    /// Refinement only shrinks the set, so this is an upper bound.
    pub(crate) fn estimate_geo(
        &self,
        store: &CanonicalStore,
        snapshot: SequenceNumber,
        def: &IndexDefinition,
        lat: f64,
        lon: f64,
        radius_m: f64,
        probe_limit: usize,
    ) -> EngineResult<Estimate> {
        let (start, upper) = geo_scan_bounds(def, lat, lon, radius_m);
        let page = store.scan_bounded(start, upper, snapshot, None, probe_limit);
        Ok(Estimate {
            count: page.items.len(),
            saturated: page.next_cursor.is_some(),
        })
    }

    /// Conjunctive token search. Returns pks (sorted) matching every
    /// token of `query`.
    pub(crate) fn fulltext_search(
        &self,
        store: &CanonicalStore,
        snapshot: SequenceNumber,
        def: &IndexDefinition,
        query: &str,
        min_token_len: usize,
        page_size: usize,
    ) -> EngineResult<Vec<String>> {
        if def.kind != IndexKind::Fulltext {
            return Err(EngineError::invalid_operation(format!(
                "index {:?} is not a fulltext index",
                def.name
            )));
        }
        let tokens = tokenize(query, min_token_len);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let mut result: Option<Vec<String>> = None;
        for token in tokens {
            let prefix = keyspace::fulltext_token_prefix(&def.name, &token);
            let postings = drain_pk_entries(store, snapshot, &prefix, page_size);
            result = Some(match result {
                None => postings,
                Some(acc) => intersect_sorted(&acc, &postings),
            });
            if result.as_ref().is_some_and(Vec::is_empty) {
                break;
            }
        }
        Ok(result.unwrap_or_default())
    }

    /// Radius search. Returns `(pk, meters)` pairs within `radius_m` of
    /// the point, nearest first.
    pub(crate) fn geo_within(
        &self,
        store: &CanonicalStore,
        snapshot: SequenceNumber,
        def: &IndexDefinition,
        lat: f64,
        lon: f64,
        radius_m: f64,
        page_size: usize,
    ) -> EngineResult<Vec<(String, f64)>> {
        if def.kind != IndexKind::Geo {
            return Err(EngineError::invalid_operation(format!(
                "index {:?} is not a geo index",
                def.name
            )));
        }

        let (start, upper) = geo_scan_bounds(def, lat, lon, radius_m);

        let mut hits = Vec::new();
        let mut cursor: Option<Vec<u8>> = None;
        loop {
            let page =
                store.scan_bounded(start.clone(), upper.clone(), snapshot, cursor.as_deref(), page_size);
            for (_, value) in &page.items {
                let (entry_lat, entry_lon, pk) = decode_geo_entry(value)?;
                let distance = haversine_m(lat, lon, entry_lat, entry_lon);
                if distance <= radius_m {
                    hits.push((pk, distance));
                }
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        hits.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(hits)
    }

    /// Collects pks of entities whose TTL field expired at or before
    /// `now`. The caller deletes them in an ordinary transaction.
    pub(crate) fn expired(
        &self,
        store: &CanonicalStore,
        snapshot: SequenceNumber,
        def: &IndexDefinition,
        now: i64,
        page_size: usize,
    ) -> EngineResult<Vec<String>> {
        if def.kind != IndexKind::Ttl {
            return Err(EngineError::invalid_operation(format!(
                "index {:?} is not a TTL index",
                def.name
            )));
        }
        let start = keyspace::ttl_prefix(&def.name);
        // Everything expiring at or before `now` sits below the bound of
        // `now + 1`.
        let upper = Bound::Excluded(keyspace::ttl_bound(&def.name, now.saturating_add(1)));
        let mut pks = Vec::new();
        let mut cursor: Option<Vec<u8>> = None;
        loop {
            let page =
                store.scan_bounded(start.clone(), upper.clone(), snapshot, cursor.as_deref(), page_size);
            pks.extend(
                page.items
                    .iter()
                    .map(|(_, value)| String::from_utf8_lossy(value).into_owned()),
            );
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(pks)
    }
}

/// Scan bounds covering a radius query: the morton covering range when
/// one exists, otherwise the whole geo index.
fn geo_scan_bounds(
    def: &IndexDefinition,
    lat: f64,
    lon: f64,
    radius_m: f64,
) -> (Vec<u8>, Bound<Vec<u8>>) {
    match geo::covering_range(lat, lon, radius_m) {
        Some((start_code, end_code)) => {
            let start = keyspace::geo_cell_bound(&def.name, start_code);
            let upper = if end_code == u64::MAX {
                prefix_upper(&keyspace::geo_prefix(&def.name))
            } else {
                Bound::Excluded(keyspace::geo_cell_bound(&def.name, end_code))
            };
            (start, upper)
        }
        None => {
            let prefix = keyspace::geo_prefix(&def.name);
            let upper = prefix_upper(&prefix);
            (prefix, upper)
        }
    }
}

/// The key namespace holding every entry of an index.
pub(crate) fn entry_namespace(def: &IndexDefinition) -> Vec<u8> {
    match def.kind {
        IndexKind::Fulltext => {
            let mut prefix = keyspace::FULLTEXT.to_vec();
            facetdb_codec::key_encoding::push_key_text(&mut prefix, &def.name);
            prefix
        }
        IndexKind::Ttl => keyspace::ttl_prefix(&def.name),
        IndexKind::Geo => keyspace::geo_prefix(&def.name),
        _ => keyspace::index_value_prefix(&def.name, b""),
    }
}

/// Computes the `(entry key, entry value)` pairs one entity contributes
/// to one index.
pub(crate) fn entries(
    def: &IndexDefinition,
    pk: &str,
    fields: &BTreeMap<String, Value>,
    min_token_len: usize,
) -> EngineResult<Vec<(Vec<u8>, Vec<u8>)>> {
    let pk_value = pk.as_bytes().to_vec();
    match def.kind {
        IndexKind::Equality | IndexKind::Range => {
            let field = def.single_field();
            let value = fields.get(field).unwrap_or(&Value::Null);
            if value.is_null() && def.sparse {
                return Ok(Vec::new());
            }
            check_kind(def, field, value, def.field_kinds[0])?;
            let mut encoded = Vec::new();
            push_key_value(&mut encoded, value)?;
            Ok(vec![(
                keyspace::index_entry_key(&def.name, &encoded, pk),
                pk_value,
            )])
        }
        IndexKind::Composite => {
            let mut encoded = Vec::new();
            for (field, declared) in def.fields.iter().zip(&def.field_kinds) {
                let value = fields.get(field).unwrap_or(&Value::Null);
                if value.is_null() && def.sparse {
                    return Ok(Vec::new());
                }
                check_kind(def, field, value, *declared)?;
                push_key_value(&mut encoded, value)?;
            }
            Ok(vec![(
                keyspace::index_entry_key(&def.name, &encoded, pk),
                pk_value,
            )])
        }
        IndexKind::Fulltext => {
            let field = def.single_field();
            let text = match fields.get(field) {
                None | Some(Value::Null) => return Ok(Vec::new()),
                Some(Value::Text(text)) => text,
                Some(other) => return Err(mismatch(def, field, ValueKind::Text, other)),
            };
            Ok(tokenize(text, min_token_len)
                .into_iter()
                .map(|token| {
                    (
                        keyspace::fulltext_entry_key(&def.name, &token, pk),
                        pk_value.clone(),
                    )
                })
                .collect())
        }
        IndexKind::Ttl => {
            let field = def.single_field();
            let expires_at = match fields.get(field) {
                None | Some(Value::Null) => return Ok(Vec::new()),
                Some(Value::Int(ts)) => *ts,
                Some(other) => return Err(mismatch(def, field, ValueKind::Int, other)),
            };
            Ok(vec![(
                keyspace::ttl_entry_key(&def.name, expires_at, pk),
                pk_value,
            )])
        }
        IndexKind::Geo => {
            let field = def.single_field();
            let (lat, lon) = match fields.get(field) {
                None | Some(Value::Null) => return Ok(Vec::new()),
                Some(value) => coordinates(def, field, value)?,
            };
            let code = geo::morton_encode(lat, lon);
            let entry_value = encode_value(&Value::Array(vec![
                Value::Float(lat),
                Value::Float(lon),
                Value::Text(pk.to_string()),
            ]));
            Ok(vec![(
                keyspace::geo_entry_key(&def.name, code, pk),
                entry_value,
            )])
        }
    }
}

fn check_kind(
    def: &IndexDefinition,
    field: &str,
    value: &Value,
    declared: ValueKind,
) -> EngineResult<()> {
    if value.is_null() || value.kind() == declared {
        Ok(())
    } else {
        Err(mismatch(def, field, declared, value))
    }
}

fn mismatch(def: &IndexDefinition, field: &str, expected: ValueKind, actual: &Value) -> EngineError {
    EngineError::SchemaMismatch {
        index: def.name.clone(),
        field: field.to_string(),
        expected,
        actual: actual.kind(),
    }
}

fn coordinates(def: &IndexDefinition, field: &str, value: &Value) -> EngineResult<(f64, f64)> {
    let items = value
        .as_array()
        .ok_or_else(|| mismatch(def, field, ValueKind::Array, value))?;
    match items {
        [lat, lon] => match (lat.coerce_f64(), lon.coerce_f64()) {
            (Some(lat), Some(lon)) => Ok((lat, lon)),
            _ => Err(mismatch(def, field, ValueKind::Float, value)),
        },
        _ => Err(mismatch(def, field, ValueKind::Array, value)),
    }
}

fn eq_prefix(def: &IndexDefinition, values: &[Value]) -> EngineResult<Vec<u8>> {
    let max = match def.kind {
        IndexKind::Equality | IndexKind::Range => 1,
        IndexKind::Composite => def.fields.len(),
        _ => {
            return Err(EngineError::invalid_operation(format!(
                "index {:?} does not serve point lookups",
                def.name
            )))
        }
    };
    if values.is_empty() || values.len() > max {
        return Err(EngineError::invalid_operation(format!(
            "index {:?} takes 1..={max} lookup values, got {}",
            def.name,
            values.len()
        )));
    }
    let mut encoded = Vec::new();
    for value in values {
        push_key_value(&mut encoded, value)?;
    }
    Ok(keyspace::index_value_prefix(&def.name, &encoded))
}

fn range_bounds(
    def: &IndexDefinition,
    low: Bound<&Value>,
    high: Bound<&Value>,
) -> EngineResult<(Vec<u8>, Bound<Vec<u8>>)> {
    if !matches!(def.kind, IndexKind::Range | IndexKind::Composite) {
        return Err(EngineError::invalid_operation(format!(
            "index {:?} does not serve range lookups",
            def.name
        )));
    }
    let namespace = keyspace::index_value_prefix(&def.name, b"");

    let start = match low {
        Bound::Unbounded => namespace.clone(),
        Bound::Included(value) => {
            let mut encoded = Vec::new();
            push_key_value(&mut encoded, value)?;
            keyspace::index_value_prefix(&def.name, &encoded)
        }
        Bound::Excluded(value) => {
            // Entry keys for this exact value all sort below
            // `prefix ++ value ++ 0xFF`; the next value sorts above it.
            let mut encoded = Vec::new();
            push_key_value(&mut encoded, value)?;
            encoded.push(0xFF);
            keyspace::index_value_prefix(&def.name, &encoded)
        }
    };

    let upper = match high {
        Bound::Unbounded => prefix_upper(&namespace),
        Bound::Excluded(value) => {
            let mut encoded = Vec::new();
            push_key_value(&mut encoded, value)?;
            Bound::Excluded(keyspace::index_value_prefix(&def.name, &encoded))
        }
        Bound::Included(value) => {
            let mut encoded = Vec::new();
            push_key_value(&mut encoded, value)?;
            encoded.push(0xFF);
            Bound::Excluded(keyspace::index_value_prefix(&def.name, &encoded))
        }
    };
    Ok((start, upper))
}

fn drain_pk_entries(
    store: &CanonicalStore,
    snapshot: SequenceNumber,
    prefix: &[u8],
    page_size: usize,
) -> Vec<String> {
    let mut pks = Vec::new();
    let mut cursor: Option<Vec<u8>> = None;
    loop {
        let page = store.scan_prefix(prefix, snapshot, cursor.as_deref(), page_size);
        pks.extend(
            page.items
                .iter()
                .map(|(_, value)| String::from_utf8_lossy(value).into_owned()),
        );
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    pks
}

fn decode_geo_entry(blob: &[u8]) -> EngineResult<(f64, f64, String)> {
    let decoded = decode_value(blob)?;
    if let Some([lat, lon, pk]) = decoded.as_array() {
        if let (Some(lat), Some(lon), Some(pk)) = (lat.as_float(), lon.as_float(), pk.as_text()) {
            return Ok((lat, lon, pk.to_string()));
        }
    }
    Err(EngineError::execution("geo-scan", "malformed geo entry"))
}

/// Merge-intersects two pk lists that are each sorted ascending.
pub(crate) fn intersect_sorted(a: &[String], b: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(a.len().min(b.len()));
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                out.push(a[i].clone());
                i += 1;
                j += 1;
            }
        }
    }
    out
}
