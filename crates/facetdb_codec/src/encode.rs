//! Blob encoding: `Value` to bytes.

use crate::value::Value;

pub(crate) const TAG_NULL: u8 = 0x00;
pub(crate) const TAG_BOOL: u8 = 0x01;
pub(crate) const TAG_INT: u8 = 0x02;
pub(crate) const TAG_FLOAT: u8 = 0x03;
pub(crate) const TAG_TEXT: u8 = 0x04;
pub(crate) const TAG_BYTES: u8 = 0x05;
pub(crate) const TAG_VECTOR: u8 = 0x06;
pub(crate) const TAG_ARRAY: u8 = 0x07;
pub(crate) const TAG_MAP: u8 = 0x08;

/// Serializes a value into the tagged binary blob format.
///
/// One tag byte per value, fixed-width little-endian scalars, and `u32`
/// length prefixes for text, bytes, vectors, and containers. Map entries
/// are emitted in key order, so equal maps encode to equal blobs.
#[must_use]
pub fn encode_value(value: &Value) -> Vec<u8> {
    let mut out = Vec::with_capacity(estimated_len(value));
    write_value(&mut out, value);
    out
}

fn estimated_len(value: &Value) -> usize {
    match value {
        Value::Null => 1,
        Value::Bool(_) => 2,
        Value::Int(_) | Value::Float(_) => 9,
        Value::Text(s) => 5 + s.len(),
        Value::Bytes(b) => 5 + b.len(),
        Value::Vector(v) => 5 + v.len() * 4,
        Value::Array(a) => 5 + a.len() * 8,
        Value::Map(m) => 5 + m.len() * 16,
    }
}

fn write_value(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => out.push(TAG_NULL),
        Value::Bool(b) => {
            out.push(TAG_BOOL);
            out.push(u8::from(*b));
        }
        Value::Int(i) => {
            out.push(TAG_INT);
            out.extend_from_slice(&i.to_le_bytes());
        }
        Value::Float(f) => {
            out.push(TAG_FLOAT);
            out.extend_from_slice(&f.to_le_bytes());
        }
        Value::Text(s) => {
            out.push(TAG_TEXT);
            write_len(out, s.len());
            out.extend_from_slice(s.as_bytes());
        }
        Value::Bytes(b) => {
            out.push(TAG_BYTES);
            write_len(out, b.len());
            out.extend_from_slice(b);
        }
        Value::Vector(v) => {
            out.push(TAG_VECTOR);
            write_len(out, v.len());
            for f in v {
                out.extend_from_slice(&f.to_le_bytes());
            }
        }
        Value::Array(a) => {
            out.push(TAG_ARRAY);
            write_len(out, a.len());
            for item in a {
                write_value(out, item);
            }
        }
        Value::Map(m) => {
            out.push(TAG_MAP);
            write_len(out, m.len());
            for (key, item) in m {
                write_len(out, key.len());
                out.extend_from_slice(key.as_bytes());
                write_value(out, item);
            }
        }
    }
}

fn write_len(out: &mut Vec<u8>, len: usize) {
    // Lengths above u32::MAX cannot occur: blobs are bounded well below 4 GiB.
    out.extend_from_slice(&(len as u32).to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_is_one_byte() {
        assert_eq!(encode_value(&Value::Null), vec![TAG_NULL]);
    }

    #[test]
    fn int_is_tag_plus_le_bytes() {
        let blob = encode_value(&Value::Int(1));
        assert_eq!(blob[0], TAG_INT);
        assert_eq!(blob[1..], 1i64.to_le_bytes());
    }

    #[test]
    fn text_carries_length_prefix() {
        let blob = encode_value(&Value::Text("hi".into()));
        assert_eq!(blob, vec![TAG_TEXT, 2, 0, 0, 0, b'h', b'i']);
    }

    #[test]
    fn equal_maps_encode_identically() {
        let a: Value = [
            ("x".to_string(), Value::Int(1)),
            ("y".to_string(), Value::Int(2)),
        ]
        .into_iter()
        .collect::<std::collections::BTreeMap<_, _>>()
        .into();
        let b: Value = [
            ("y".to_string(), Value::Int(2)),
            ("x".to_string(), Value::Int(1)),
        ]
        .into_iter()
        .collect::<std::collections::BTreeMap<_, _>>()
        .into();
        assert_eq!(encode_value(&a), encode_value(&b));
    }
}
