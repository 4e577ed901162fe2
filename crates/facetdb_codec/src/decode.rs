//! Blob decoding: bytes to `Value`.

use crate::encode::{
    TAG_ARRAY, TAG_BOOL, TAG_BYTES, TAG_FLOAT, TAG_INT, TAG_MAP, TAG_NULL, TAG_TEXT, TAG_VECTOR,
};
use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use std::collections::BTreeMap;

/// Deserializes a blob produced by [`crate::encode_value`].
///
/// Rejects truncated input, unknown tags, invalid UTF-8 in text, and
/// trailing bytes after the value.
///
/// # Errors
///
/// Returns a [`CodecError`] describing the first malformed byte.
pub fn decode_value(blob: &[u8]) -> CodecResult<Value> {
    let mut cursor = Cursor::new(blob);
    let value = cursor.read_value()?;
    let remaining = cursor.remaining();
    if remaining != 0 {
        return Err(CodecError::TrailingBytes { remaining });
    }
    Ok(value)
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> CodecResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(CodecError::UnexpectedEof { offset: self.pos });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> CodecResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_len(&mut self) -> CodecResult<usize> {
        let bytes = self.take(4)?;
        let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        if len > self.remaining() {
            return Err(CodecError::LengthOverflow {
                declared: len,
                remaining: self.remaining(),
            });
        }
        Ok(len)
    }

    fn read_text(&mut self) -> CodecResult<String> {
        let len = self.read_len()?;
        let offset = self.pos;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8 { offset })
    }

    fn read_value(&mut self) -> CodecResult<Value> {
        let offset = self.pos;
        let tag = self.read_u8()?;
        match tag {
            TAG_NULL => Ok(Value::Null),
            TAG_BOOL => Ok(Value::Bool(self.read_u8()? != 0)),
            TAG_INT => {
                let bytes = self.take(8)?;
                let mut arr = [0u8; 8];
                arr.copy_from_slice(bytes);
                Ok(Value::Int(i64::from_le_bytes(arr)))
            }
            TAG_FLOAT => {
                let bytes = self.take(8)?;
                let mut arr = [0u8; 8];
                arr.copy_from_slice(bytes);
                Ok(Value::Float(f64::from_le_bytes(arr)))
            }
            TAG_TEXT => Ok(Value::Text(self.read_text()?)),
            TAG_BYTES => {
                let len = self.read_len()?;
                Ok(Value::Bytes(self.take(len)?.to_vec()))
            }
            TAG_VECTOR => {
                let count = self.read_len()?;
                let mut vec = Vec::with_capacity(count);
                for _ in 0..count {
                    let bytes = self.take(4)?;
                    let mut arr = [0u8; 4];
                    arr.copy_from_slice(bytes);
                    vec.push(f32::from_le_bytes(arr));
                }
                Ok(Value::Vector(vec))
            }
            TAG_ARRAY => {
                let count = self.read_len()?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.read_value()?);
                }
                Ok(Value::Array(items))
            }
            TAG_MAP => {
                let count = self.read_len()?;
                let mut map = BTreeMap::new();
                for _ in 0..count {
                    let key = self.read_text()?;
                    let value = self.read_value()?;
                    map.insert(key, value);
                }
                Ok(Value::Map(map))
            }
            other => Err(CodecError::InvalidTag { tag: other, offset }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode_value;
    use proptest::prelude::*;

    fn sample_values() -> Vec<Value> {
        vec![
            Value::Null,
            Value::Bool(false),
            Value::Bool(true),
            Value::Int(i64::MIN),
            Value::Int(0),
            Value::Int(i64::MAX),
            Value::Float(-0.0),
            Value::Float(std::f64::consts::PI),
            Value::Text(String::new()),
            Value::Text("héllo wörld".into()),
            Value::Bytes(vec![0, 255, 1]),
            Value::Vector(vec![1.0, -2.5, 0.0]),
            Value::Array(vec![Value::Int(1), Value::Text("x".into()), Value::Null]),
            Value::Map(
                [
                    ("name".to_string(), Value::Text("u1".into())),
                    ("age".to_string(), Value::Int(30)),
                    (
                        "embedding".to_string(),
                        Value::Vector(vec![0.1, 0.2, 0.3]),
                    ),
                ]
                .into_iter()
                .collect(),
            ),
        ]
    }

    #[test]
    fn round_trips_sample_values() {
        for value in sample_values() {
            let blob = encode_value(&value);
            assert_eq!(decode_value(&blob).unwrap(), value, "value {value:?}");
        }
    }

    #[test]
    fn truncated_input_is_rejected() {
        let blob = encode_value(&Value::Text("hello".into()));
        for cut in 1..blob.len() {
            assert!(decode_value(&blob[..cut]).is_err(), "cut at {cut}");
        }
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut blob = encode_value(&Value::Int(7));
        blob.push(0xAB);
        assert_eq!(
            decode_value(&blob),
            Err(CodecError::TrailingBytes { remaining: 1 })
        );
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert_eq!(
            decode_value(&[0x7F]),
            Err(CodecError::InvalidTag {
                tag: 0x7F,
                offset: 0
            })
        );
    }

    #[test]
    fn bogus_length_is_rejected() {
        // Text claiming 4 GiB of payload.
        let blob = [super::TAG_TEXT, 0xFF, 0xFF, 0xFF, 0xFF];
        assert!(matches!(
            decode_value(&blob),
            Err(CodecError::LengthOverflow { .. })
        ));
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let blob = [super::TAG_TEXT, 2, 0, 0, 0, 0xC3, 0x28];
        assert!(matches!(
            decode_value(&blob),
            Err(CodecError::InvalidUtf8 { .. })
        ));
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Int),
            any::<f64>().prop_map(Value::Float),
            ".{0,24}".prop_map(Value::Text),
            proptest::collection::vec(any::<u8>(), 0..24).prop_map(Value::Bytes),
            proptest::collection::vec(any::<f32>(), 0..8).prop_map(Value::Vector),
        ];
        leaf.prop_recursive(3, 32, 8, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                proptest::collection::btree_map(".{0,8}", inner, 0..6).prop_map(Value::Map),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_round_trip(value in arb_value()) {
            let blob = encode_value(&value);
            let decoded = decode_value(&blob).unwrap();
            // Bit-exact comparison, so NaN payloads survive too.
            prop_assert_eq!(
                encode_value(&decoded),
                blob
            );
        }
    }
}
