//! The entity record.

use crate::error::EngineResult;
use crate::types::EntityKey;
use facetdb_codec::{decode_value, encode_value, CodecError, Value};
use std::collections::BTreeMap;

/// A schemaless record: a key and a bag of typed fields.
///
/// Entities are the single source of truth. Index entries, adjacency
/// lists, and vector records are all derived from entity fields and
/// rebuilt from them when needed.
///
/// # Example
///
/// ```rust
/// use facetdb_core::{Entity, Value};
///
/// let user = Entity::new("users", "u1")
///     .with_field("name", Value::Text("ada".into()))
///     .with_field("age", Value::Int(36));
/// assert_eq!(user.field("age"), Some(&Value::Int(36)));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    key: EntityKey,
    fields: BTreeMap<String, Value>,
}

impl Entity {
    /// Creates an empty entity at `(table, pk)`.
    pub fn new(table: impl Into<String>, pk: impl Into<String>) -> Self {
        Self {
            key: EntityKey::new(table, pk),
            fields: BTreeMap::new(),
        }
    }

    /// Creates an entity from an existing key and field map.
    #[must_use]
    pub fn from_parts(key: EntityKey, fields: BTreeMap<String, Value>) -> Self {
        Self { key, fields }
    }

    /// Builder-style field assignment.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// The entity's address.
    #[must_use]
    pub fn key(&self) -> &EntityKey {
        &self.key
    }

    /// The table this entity lives in.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.key.table
    }

    /// The entity's primary key.
    #[must_use]
    pub fn pk(&self) -> &str {
        &self.key.pk
    }

    /// Reads a field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Sets a field, returning the previous value if any.
    pub fn set_field(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.fields.insert(name.into(), value)
    }

    /// Removes a field.
    pub fn remove_field(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    /// All fields, ordered by name.
    #[must_use]
    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    /// Serializes the field map into the stored blob form. The key is not
    /// part of the blob; it is the store key.
    #[must_use]
    pub fn to_blob(&self) -> Vec<u8> {
        encode_value(&Value::Map(self.fields.clone()))
    }

    /// Rebuilds an entity from a stored blob and its key.
    ///
    /// # Errors
    ///
    /// Returns a codec error if the blob is malformed or not a map.
    pub fn from_blob(key: EntityKey, blob: &[u8]) -> EngineResult<Self> {
        match decode_value(blob)? {
            Value::Map(fields) => Ok(Self { key, fields }),
            other => Err(CodecError::InvalidTag {
                tag: other.kind() as u8,
                offset: 0,
            }
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_round_trip() {
        let entity = Entity::new("users", "u1")
            .with_field("age", Value::Int(30))
            .with_field("embedding", Value::Vector(vec![0.1, 0.2]))
            .with_field(
                "address",
                Value::Map(
                    [("city".to_string(), Value::Text("nairobi".into()))]
                        .into_iter()
                        .collect(),
                ),
            );
        let blob = entity.to_blob();
        let back = Entity::from_blob(entity.key().clone(), &blob).unwrap();
        assert_eq!(back, entity);
    }

    #[test]
    fn non_map_blob_is_rejected() {
        let blob = encode_value(&Value::Int(3));
        assert!(Entity::from_blob(EntityKey::new("t", "k"), &blob).is_err());
    }

    #[test]
    fn field_mutation() {
        let mut entity = Entity::new("users", "u1");
        assert_eq!(entity.set_field("age", Value::Int(1)), None);
        assert_eq!(entity.set_field("age", Value::Int(2)), Some(Value::Int(1)));
        assert_eq!(entity.remove_field("age"), Some(Value::Int(2)));
        assert_eq!(entity.field("age"), None);
    }
}
