//! Index definitions.

use crate::error::{EngineError, EngineResult};
use facetdb_codec::{Value, ValueKind};
use std::collections::BTreeMap;

/// What shape of lookup an index serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    /// Point lookups on one field.
    Equality,
    /// Ordered lookups on one field; the entry keys sort by value.
    Range,
    /// Point and prefix lookups over several fields at once.
    Composite,
    /// Inverted token index over a text field.
    Fulltext,
    /// Expiry index over an integer timestamp field, swept periodically.
    Ttl,
    /// Spatial index over a `[lat, lon]` field, morton-coded.
    Geo,
}

impl IndexKind {
    /// Stable name used in manifests and explain output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            IndexKind::Equality => "equality",
            IndexKind::Range => "range",
            IndexKind::Composite => "composite",
            IndexKind::Fulltext => "fulltext",
            IndexKind::Ttl => "ttl",
            IndexKind::Geo => "geo",
        }
    }

    fn from_str(name: &str) -> Option<Self> {
        Some(match name {
            "equality" => IndexKind::Equality,
            "range" => IndexKind::Range,
            "composite" => IndexKind::Composite,
            "fulltext" => IndexKind::Fulltext,
            "ttl" => IndexKind::Ttl,
            "geo" => IndexKind::Geo,
            _ => return None,
        })
    }
}

fn kind_name(kind: ValueKind) -> &'static str {
    match kind {
        ValueKind::Null => "null",
        ValueKind::Bool => "bool",
        ValueKind::Int => "int",
        ValueKind::Float => "float",
        ValueKind::Text => "text",
        ValueKind::Bytes => "bytes",
        ValueKind::Vector => "vector",
        ValueKind::Array => "array",
        ValueKind::Map => "map",
    }
}

fn kind_from_name(name: &str) -> Option<ValueKind> {
    Some(match name {
        "null" => ValueKind::Null,
        "bool" => ValueKind::Bool,
        "int" => ValueKind::Int,
        "float" => ValueKind::Float,
        "text" => ValueKind::Text,
        "bytes" => ValueKind::Bytes,
        "vector" => ValueKind::Vector,
        "array" => ValueKind::Array,
        "map" => ValueKind::Map,
        _ => return None,
    })
}

/// A registered secondary index.
///
/// The definition is pure metadata: which table, which field(s), what
/// kind of lookups, and the declared value kind of each field. Writes to
/// an indexed field of the wrong kind are rejected with a schema
/// mismatch; a missing field indexes as null unless the index is sparse,
/// in which case the entity is simply absent from the index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDefinition {
    /// Unique index name; also the namespace of its entry keys.
    pub name: String,
    /// The indexed table.
    pub table: String,
    /// Indexed field names; more than one only for composite indexes.
    pub fields: Vec<String>,
    /// Declared value kind per field (parallel to `fields`).
    pub field_kinds: Vec<ValueKind>,
    /// Lookup shape.
    pub kind: IndexKind,
    /// Sparse indexes skip entities missing any indexed field.
    pub sparse: bool,
}

impl IndexDefinition {
    /// Point-lookup index over one field.
    pub fn equality(
        name: impl Into<String>,
        table: impl Into<String>,
        field: impl Into<String>,
        field_kind: ValueKind,
    ) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            fields: vec![field.into()],
            field_kinds: vec![field_kind],
            kind: IndexKind::Equality,
            sparse: false,
        }
    }

    /// Ordered index over one field.
    pub fn range(
        name: impl Into<String>,
        table: impl Into<String>,
        field: impl Into<String>,
        field_kind: ValueKind,
    ) -> Self {
        Self {
            kind: IndexKind::Range,
            ..Self::equality(name, table, field, field_kind)
        }
    }

    /// Composite index over several fields, in declared order.
    pub fn composite(
        name: impl Into<String>,
        table: impl Into<String>,
        fields: Vec<(String, ValueKind)>,
    ) -> Self {
        let (fields, field_kinds) = fields.into_iter().unzip();
        Self {
            name: name.into(),
            table: table.into(),
            fields,
            field_kinds,
            kind: IndexKind::Composite,
            sparse: false,
        }
    }

    /// Inverted token index over a text field.
    pub fn fulltext(
        name: impl Into<String>,
        table: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Self {
            kind: IndexKind::Fulltext,
            ..Self::equality(name, table, field, ValueKind::Text)
        }
    }

    /// Expiry index over an integer epoch-seconds field. Always sparse:
    /// entities without the field never expire.
    pub fn ttl(
        name: impl Into<String>,
        table: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Self {
            kind: IndexKind::Ttl,
            sparse: true,
            ..Self::equality(name, table, field, ValueKind::Int)
        }
    }

    /// Spatial index over a `[lat, lon]` array field.
    pub fn geo(
        name: impl Into<String>,
        table: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Self {
            kind: IndexKind::Geo,
            ..Self::equality(name, table, field, ValueKind::Array)
        }
    }

    /// Marks the index sparse.
    #[must_use]
    pub fn with_sparse(mut self, sparse: bool) -> Self {
        self.sparse = sparse;
        self
    }

    /// The single indexed field, for non-composite indexes.
    pub(crate) fn single_field(&self) -> &str {
        &self.fields[0]
    }

    /// Manifest form.
    pub(crate) fn to_value(&self) -> Value {
        let mut map = BTreeMap::new();
        map.insert("name".to_string(), Value::Text(self.name.clone()));
        map.insert("table".to_string(), Value::Text(self.table.clone()));
        map.insert(
            "fields".to_string(),
            Value::Array(
                self.fields
                    .iter()
                    .map(|f| Value::Text(f.clone()))
                    .collect(),
            ),
        );
        map.insert(
            "field_kinds".to_string(),
            Value::Array(
                self.field_kinds
                    .iter()
                    .map(|k| Value::Text(kind_name(*k).to_string()))
                    .collect(),
            ),
        );
        map.insert(
            "kind".to_string(),
            Value::Text(self.kind.as_str().to_string()),
        );
        map.insert("sparse".to_string(), Value::Bool(self.sparse));
        Value::Map(map)
    }

    /// Parses the manifest form.
    pub(crate) fn from_value(value: &Value) -> EngineResult<Self> {
        let bad = |what: &str| {
            EngineError::invalid_operation(format!("malformed index definition: {what}"))
        };
        let text = |field: &str| -> EngineResult<String> {
            value
                .get(field)
                .and_then(Value::as_text)
                .map(str::to_string)
                .ok_or_else(|| bad(field))
        };
        let texts = |field: &str| -> EngineResult<Vec<String>> {
            value
                .get(field)
                .and_then(Value::as_array)
                .ok_or_else(|| bad(field))?
                .iter()
                .map(|v| v.as_text().map(str::to_string).ok_or_else(|| bad(field)))
                .collect()
        };

        let kind = IndexKind::from_str(&text("kind")?).ok_or_else(|| bad("kind"))?;
        let field_kinds = texts("field_kinds")?
            .iter()
            .map(|name| kind_from_name(name).ok_or_else(|| bad("field_kinds")))
            .collect::<EngineResult<Vec<_>>>()?;
        let fields = texts("fields")?;
        if fields.is_empty() || fields.len() != field_kinds.len() {
            return Err(bad("fields"));
        }

        Ok(Self {
            name: text("name")?,
            table: text("table")?,
            fields,
            field_kinds,
            kind,
            sparse: value
                .get("sparse")
                .and_then(Value::as_bool)
                .ok_or_else(|| bad("sparse"))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_fill_kinds() {
        let idx = IndexDefinition::range("users_age", "users", "age", ValueKind::Int);
        assert_eq!(idx.kind, IndexKind::Range);
        assert_eq!(idx.single_field(), "age");
        assert!(!idx.sparse);

        let ttl = IndexDefinition::ttl("sessions_ttl", "sessions", "expires_at");
        assert!(ttl.sparse);
        assert_eq!(ttl.field_kinds, vec![ValueKind::Int]);
    }

    #[test]
    fn manifest_round_trip() {
        let idx = IndexDefinition::composite(
            "users_city_age",
            "users",
            vec![
                ("city".to_string(), ValueKind::Text),
                ("age".to_string(), ValueKind::Int),
            ],
        )
        .with_sparse(true);
        let value = idx.to_value();
        let back = IndexDefinition::from_value(&value).unwrap();
        assert_eq!(back, idx);
    }

    #[test]
    fn malformed_manifest_entries_are_rejected() {
        let mut map = BTreeMap::new();
        map.insert("name".to_string(), Value::Text("x".into()));
        assert!(IndexDefinition::from_value(&Value::Map(map)).is_err());
    }
}
