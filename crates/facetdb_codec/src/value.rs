//! The tagged runtime value.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// A dynamically typed FacetDB value.
///
/// Entity fields, index keys, and query literals are all `Value`s. The
/// engine is schemaless: two entities in the same table may carry
/// different field sets, and the same field name may hold different kinds
/// in different entities (indexes reject that, the store does not).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent / null.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit IEEE 754 float.
    Float(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Dense f32 embedding, the unit of vector search.
    Vector(Vec<f32>),
    /// Ordered list of values.
    Array(Vec<Value>),
    /// String-keyed document, ordered by key.
    Map(BTreeMap<String, Value>),
}

/// The kind of a [`Value`], used in schema checks and error reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// [`Value::Null`]
    Null,
    /// [`Value::Bool`]
    Bool,
    /// [`Value::Int`]
    Int,
    /// [`Value::Float`]
    Float,
    /// [`Value::Text`]
    Text,
    /// [`Value::Bytes`]
    Bytes,
    /// [`Value::Vector`]
    Vector,
    /// [`Value::Array`]
    Array,
    /// [`Value::Map`]
    Map,
}

impl ValueKind {
    /// Rank used for cross-kind canonical ordering.
    fn rank(self) -> u8 {
        match self {
            ValueKind::Null => 0,
            ValueKind::Bool => 1,
            ValueKind::Int => 2,
            ValueKind::Float => 3,
            ValueKind::Text => 4,
            ValueKind::Bytes => 5,
            ValueKind::Vector => 6,
            ValueKind::Array => 7,
            ValueKind::Map => 8,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Text => "text",
            ValueKind::Bytes => "bytes",
            ValueKind::Vector => "vector",
            ValueKind::Array => "array",
            ValueKind::Map => "map",
        };
        f.write_str(name)
    }
}

impl Value {
    /// The kind of this value.
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Text(_) => ValueKind::Text,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::Vector(_) => ValueKind::Vector,
            Value::Array(_) => ValueKind::Array,
            Value::Map(_) => ValueKind::Map,
        }
    }

    /// Total order over all values.
    ///
    /// Kinds order by rank (null < bool < int < float < text < bytes <
    /// vector < array < map); values of the same kind order naturally.
    /// Floats use `total_cmp`, so NaN is ordered rather than poisonous.
    /// The key encoding preserves this order byte-wise.
    #[must_use]
    pub fn cmp_canonical(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            (Value::Vector(a), Value::Vector(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.total_cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Value::Array(a), Value::Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.cmp_canonical(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Value::Map(a), Value::Map(b)) => {
                for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
                    let ord = ka.cmp(kb);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                    let ord = va.cmp_canonical(vb);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (a, b) => a.kind().rank().cmp(&b.kind().rank()),
        }
    }

    /// Whether this is [`Value::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The boolean, if this is a bool.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The integer, if this is an int.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// The float, if this is a float.
    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// The value as f64, coercing ints. Used by numeric aggregation.
    #[must_use]
    pub fn coerce_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// The text, if this is text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The bytes, if this is bytes.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// The embedding, if this is a vector.
    #[must_use]
    pub fn as_vector(&self) -> Option<&[f32]> {
        match self {
            Value::Vector(v) => Some(v),
            _ => None,
        }
    }

    /// The elements, if this is an array.
    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// The entries, if this is a map.
    #[must_use]
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Looks up `field` if this is a map.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        match self {
            Value::Map(m) => m.get(field),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<Vec<f32>> for Value {
    fn from(v: Vec<f32>) -> Self {
        Value::Vector(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(v: BTreeMap<String, Value>) -> Self {
        Value::Map(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_reports_variant() {
        assert_eq!(Value::Null.kind(), ValueKind::Null);
        assert_eq!(Value::Int(1).kind(), ValueKind::Int);
        assert_eq!(Value::Vector(vec![0.5]).kind(), ValueKind::Vector);
    }

    #[test]
    fn canonical_order_ranks_kinds() {
        let ordered = [
            Value::Null,
            Value::Bool(true),
            Value::Int(-5),
            Value::Float(0.0),
            Value::Text("a".into()),
            Value::Bytes(vec![0]),
        ];
        for pair in ordered.windows(2) {
            assert_eq!(pair[0].cmp_canonical(&pair[1]), Ordering::Less);
        }
    }

    #[test]
    fn canonical_order_within_kind() {
        assert_eq!(Value::Int(1).cmp_canonical(&Value::Int(2)), Ordering::Less);
        assert_eq!(
            Value::Text("abc".into()).cmp_canonical(&Value::Text("abd".into())),
            Ordering::Less
        );
        assert_eq!(
            Value::Float(-1.5).cmp_canonical(&Value::Float(1.5)),
            Ordering::Less
        );
    }

    #[test]
    fn nan_is_ordered() {
        let nan = Value::Float(f64::NAN);
        assert_eq!(nan.cmp_canonical(&nan), Ordering::Equal);
        assert_eq!(
            Value::Float(f64::INFINITY).cmp_canonical(&nan),
            Ordering::Less
        );
    }

    #[test]
    fn array_orders_lexicographically() {
        let short = Value::Array(vec![Value::Int(1)]);
        let long = Value::Array(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(short.cmp_canonical(&long), Ordering::Less);
    }

    #[test]
    fn coerce_f64_handles_both_numerics() {
        assert_eq!(Value::Int(3).coerce_f64(), Some(3.0));
        assert_eq!(Value::Float(2.5).coerce_f64(), Some(2.5));
        assert_eq!(Value::Text("x".into()).coerce_f64(), None);
    }

    #[test]
    fn map_field_lookup() {
        let m: BTreeMap<String, Value> =
            [("age".to_string(), Value::Int(30))].into_iter().collect();
        let v = Value::Map(m);
        assert_eq!(v.get("age"), Some(&Value::Int(30)));
        assert_eq!(v.get("name"), None);
    }
}
