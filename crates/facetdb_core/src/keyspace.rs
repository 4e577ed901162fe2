//! The canonical keyspace layout.
//!
//! Every model lives in one flat, ordered byte keyspace. A short ASCII
//! prefix names the namespace, then order-preserving key segments follow
//! (see `facetdb_codec::key_encoding`); segments are self-delimiting, so
//! prefix scans never misparse a boundary and a table scan is exactly a
//! prefix scan.
//!
//! | prefix   | key shape                                  | value            |
//! |----------|--------------------------------------------|------------------|
//! | `ent:`   | table, pk                                  | entity blob      |
//! | `idx:`   | index name, field value(s), pk             | pk (utf-8)       |
//! | `fts:`   | index name, token, pk                      | pk (utf-8)       |
//! | `ttl:`   | index name, expiry (int), pk               | pk (utf-8)       |
//! | `geo:`   | index name, morton code (u64 be), pk       | [lat, lon, pk]   |
//! | `gout:`  | from table, from pk, edge pk               | edge blob        |
//! | `gin:`   | to table, to pk, edge pk                   | edge blob        |
//! | `vec:`   | index name, pk                             | embedding blob   |
//! | `vmeta:` | index name                                 | adjacency blob   |
//!
//! Projection keys are ordinary keys: they ride in the same commit batch
//! as the entity that produced them, which is what makes a commit atomic
//! across all models.

use crate::error::EngineResult;
use crate::types::EntityKey;
use facetdb_codec::key_encoding::{decode_key_value, push_key_text};
use facetdb_codec::{CodecError, Value};

pub(crate) const ENTITY: &[u8] = b"ent:";
pub(crate) const INDEX: &[u8] = b"idx:";
pub(crate) const FULLTEXT: &[u8] = b"fts:";
pub(crate) const TTL: &[u8] = b"ttl:";
pub(crate) const GEO: &[u8] = b"geo:";
pub(crate) const GRAPH_OUT: &[u8] = b"gout:";
pub(crate) const GRAPH_IN: &[u8] = b"gin:";
pub(crate) const VECTOR: &[u8] = b"vec:";
pub(crate) const VECTOR_META: &[u8] = b"vmeta:";

/// Canonical key of an entity.
pub(crate) fn entity_key(table: &str, pk: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(ENTITY.len() + table.len() + pk.len() + 4);
    key.extend_from_slice(ENTITY);
    push_key_text(&mut key, table);
    push_key_text(&mut key, pk);
    key
}

/// Prefix covering every entity of a table.
pub(crate) fn table_prefix(table: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(ENTITY.len() + table.len() + 2);
    key.extend_from_slice(ENTITY);
    push_key_text(&mut key, table);
    key
}

/// Parses a canonical entity key back into `(table, pk)`.
pub(crate) fn parse_entity_key(key: &[u8]) -> EngineResult<EntityKey> {
    let rest = key
        .strip_prefix(ENTITY)
        .ok_or(CodecError::InvalidTag {
            tag: key.first().copied().unwrap_or(0),
            offset: 0,
        })?;
    let (table, used) = decode_key_value(rest)?;
    let (pk, _) = decode_key_value(&rest[used..])?;
    match (table, pk) {
        (Value::Text(table), Value::Text(pk)) => Ok(EntityKey { table, pk }),
        _ => Err(CodecError::InvalidTag { tag: 0, offset: 0 }.into()),
    }
}

/// One index entry: `idx:` + name + encoded field value(s) + pk.
pub(crate) fn index_entry_key(index: &str, encoded_values: &[u8], pk: &str) -> Vec<u8> {
    let mut key = index_value_prefix(index, encoded_values);
    push_key_text(&mut key, pk);
    key
}

/// Prefix covering every entry of an index that carries the given
/// encoded value segment(s). With an empty segment, covers the whole
/// index.
pub(crate) fn index_value_prefix(index: &str, encoded_values: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(INDEX.len() + index.len() + encoded_values.len() + 2);
    key.extend_from_slice(INDEX);
    push_key_text(&mut key, index);
    key.extend_from_slice(encoded_values);
    key
}

/// One token posting: `fts:` + name + token + pk.
pub(crate) fn fulltext_entry_key(index: &str, token: &str, pk: &str) -> Vec<u8> {
    let mut key = fulltext_token_prefix(index, token);
    push_key_text(&mut key, pk);
    key
}

/// Prefix covering every posting of one token.
pub(crate) fn fulltext_token_prefix(index: &str, token: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(FULLTEXT.len() + index.len() + token.len() + 4);
    key.extend_from_slice(FULLTEXT);
    push_key_text(&mut key, index);
    push_key_text(&mut key, token);
    key
}

/// One expiry entry: `ttl:` + name + expiry + pk. Scanning the index
/// prefix visits entries in expiry order.
pub(crate) fn ttl_entry_key(index: &str, expires_at: i64, pk: &str) -> Vec<u8> {
    let mut key = ttl_bound(index, expires_at);
    push_key_text(&mut key, pk);
    key
}

/// Key position just below the first entry expiring after `expires_at`.
pub(crate) fn ttl_bound(index: &str, expires_at: i64) -> Vec<u8> {
    let mut key = Vec::with_capacity(TTL.len() + index.len() + 11);
    key.extend_from_slice(TTL);
    push_key_text(&mut key, index);
    // Infallible: Int is always key-encodable.
    let _ = facetdb_codec::key_encoding::push_key_value(&mut key, &Value::Int(expires_at));
    key
}

/// Prefix covering a whole TTL index.
pub(crate) fn ttl_prefix(index: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(TTL.len() + index.len() + 2);
    key.extend_from_slice(TTL);
    push_key_text(&mut key, index);
    key
}

/// One spatial entry: `geo:` + name + morton code + pk.
pub(crate) fn geo_entry_key(index: &str, morton: u64, pk: &str) -> Vec<u8> {
    let mut key = geo_cell_bound(index, morton);
    push_key_text(&mut key, pk);
    key
}

/// Key position at the start of a morton code within an index.
pub(crate) fn geo_cell_bound(index: &str, morton: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(GEO.len() + index.len() + 10);
    key.extend_from_slice(GEO);
    push_key_text(&mut key, index);
    key.extend_from_slice(&morton.to_be_bytes());
    key
}

/// Prefix covering a whole geo index.
pub(crate) fn geo_prefix(index: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(GEO.len() + index.len() + 2);
    key.extend_from_slice(GEO);
    push_key_text(&mut key, index);
    key
}

/// Outgoing adjacency entry for an edge.
pub(crate) fn graph_out_key(from_table: &str, from_pk: &str, edge_pk: &str) -> Vec<u8> {
    let mut key = graph_out_prefix(from_table, from_pk);
    push_key_text(&mut key, edge_pk);
    key
}

/// Prefix covering every outgoing edge of a node.
pub(crate) fn graph_out_prefix(table: &str, pk: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(GRAPH_OUT.len() + table.len() + pk.len() + 4);
    key.extend_from_slice(GRAPH_OUT);
    push_key_text(&mut key, table);
    push_key_text(&mut key, pk);
    key
}

/// Incoming adjacency entry for an edge.
pub(crate) fn graph_in_key(to_table: &str, to_pk: &str, edge_pk: &str) -> Vec<u8> {
    let mut key = graph_in_prefix(to_table, to_pk);
    push_key_text(&mut key, edge_pk);
    key
}

/// Prefix covering every incoming edge of a node.
pub(crate) fn graph_in_prefix(table: &str, pk: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(GRAPH_IN.len() + table.len() + pk.len() + 4);
    key.extend_from_slice(GRAPH_IN);
    push_key_text(&mut key, table);
    push_key_text(&mut key, pk);
    key
}

/// Ground-truth embedding record of one entity in a vector index.
pub(crate) fn vector_record_key(index: &str, pk: &str) -> Vec<u8> {
    let mut key = vector_prefix(index);
    push_key_text(&mut key, pk);
    key
}

/// Prefix covering every embedding record of a vector index.
pub(crate) fn vector_prefix(index: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(VECTOR.len() + index.len() + 2);
    key.extend_from_slice(VECTOR);
    push_key_text(&mut key, index);
    key
}

/// Key of the persisted HNSW adjacency snapshot for a vector index.
pub(crate) fn vector_meta_key(index: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(VECTOR_META.len() + index.len() + 2);
    key.extend_from_slice(VECTOR_META);
    push_key_text(&mut key, index);
    key
}

/// Extracts the trailing pk segment from a projection entry key. The pk
/// is duplicated into the entry value precisely so lookups do not need
/// this; traversals and sweeps use it when walking adjacency keys.
pub(crate) fn trailing_text_segment(key: &[u8], prefix_len: usize) -> EngineResult<String> {
    let (value, _) = decode_key_value(&key[prefix_len..])?;
    match value {
        Value::Text(text) => Ok(text),
        _ => Err(CodecError::InvalidTag { tag: 0, offset: prefix_len }.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_keys_round_trip() {
        let key = entity_key("users", "u1");
        let parsed = parse_entity_key(&key).unwrap();
        assert_eq!(parsed, EntityKey::new("users", "u1"));
    }

    #[test]
    fn table_prefix_covers_only_that_table() {
        let users = entity_key("users", "u1");
        let user_stats = entity_key("users_stats", "u1");
        let prefix = table_prefix("users");
        assert!(users.starts_with(&prefix));
        assert!(!user_stats.starts_with(&prefix));
    }

    #[test]
    fn pk_with_separator_bytes_parses_cleanly() {
        let key = entity_key("users", "a:b\0c");
        let parsed = parse_entity_key(&key).unwrap();
        assert_eq!(parsed.pk, "a:b\0c");
    }

    #[test]
    fn ttl_keys_sort_by_expiry() {
        let early = ttl_entry_key("sessions_ttl", 100, "s1");
        let late = ttl_entry_key("sessions_ttl", 200, "s0");
        assert!(early < late);
        assert!(early < ttl_bound("sessions_ttl", 150));
        assert!(ttl_bound("sessions_ttl", 150) < late);
    }

    #[test]
    fn geo_keys_sort_by_morton_code() {
        let a = geo_entry_key("places_geo", 0x00FF, "p1");
        let b = geo_entry_key("places_geo", 0x0100, "p0");
        assert!(a < b);
    }

    #[test]
    fn namespaces_do_not_collide() {
        let ent = entity_key("t", "k");
        let idx = index_value_prefix("t", b"");
        let out = graph_out_prefix("t", "k");
        assert!(!ent.starts_with(INDEX));
        assert!(!idx.starts_with(ENTITY));
        assert!(!out.starts_with(GRAPH_IN));
    }

    #[test]
    fn trailing_pk_extraction() {
        let prefix = graph_out_prefix("users", "u1");
        let key = graph_out_key("users", "u1", "e42");
        assert_eq!(
            trailing_text_segment(&key, prefix.len()).unwrap(),
            "e42"
        );
    }
}
