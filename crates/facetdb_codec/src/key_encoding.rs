//! Order-preserving encoding for values embedded in index keys.
//!
//! The invariant: for any two key-encodable values `a` and `b`,
//! `memcmp(encode(a), encode(b))` agrees with [`Value::cmp_canonical`].
//! Index keys embed field values through this encoding, so the range and
//! composite indexes answer ordered predicates with nothing more than a
//! byte-order prefix scan of the keyspace.
//!
//! Scalars only: null, bool, int, float, text, and bytes are key-encodable.
//! Vectors, arrays, and maps have their own projections and are rejected.
//!
//! Layout per value: one tag byte ranking the kind, then a payload whose
//! byte order matches value order.
//!
//! - int: `i64` with the sign bit flipped, big-endian
//! - float: IEEE 754 bits, negatives inverted, positives sign-flipped,
//!   big-endian (the `total_cmp` order)
//! - text / bytes: payload with `0x00` escaped as `0x00 0xFF`, closed by a
//!   bare `0x00` terminator, which keeps prefixes sorting first

use crate::error::{CodecError, CodecResult};
use crate::value::Value;

const KEY_TAG_NULL: u8 = 0x05;
const KEY_TAG_FALSE: u8 = 0x10;
const KEY_TAG_TRUE: u8 = 0x11;
const KEY_TAG_INT: u8 = 0x20;
const KEY_TAG_FLOAT: u8 = 0x28;
const KEY_TAG_TEXT: u8 = 0x30;
const KEY_TAG_BYTES: u8 = 0x38;

const TERMINATOR: u8 = 0x00;
const ESCAPE: u8 = 0xFF;

/// Appends the order-preserving form of `value` to `out`.
///
/// # Errors
///
/// Returns [`CodecError::NotKeyEncodable`] for vectors, arrays, and maps.
pub fn push_key_value(out: &mut Vec<u8>, value: &Value) -> CodecResult<()> {
    match value {
        Value::Null => out.push(KEY_TAG_NULL),
        Value::Bool(false) => out.push(KEY_TAG_FALSE),
        Value::Bool(true) => out.push(KEY_TAG_TRUE),
        Value::Int(i) => {
            out.push(KEY_TAG_INT);
            // Flip the sign bit so negatives sort below positives.
            let flipped = (*i as u64) ^ (1u64 << 63);
            out.extend_from_slice(&flipped.to_be_bytes());
        }
        Value::Float(f) => {
            out.push(KEY_TAG_FLOAT);
            out.extend_from_slice(&order_float_bits(*f).to_be_bytes());
        }
        Value::Text(s) => {
            out.push(KEY_TAG_TEXT);
            push_terminated(out, s.as_bytes());
        }
        Value::Bytes(b) => {
            out.push(KEY_TAG_BYTES);
            push_terminated(out, b);
        }
        other => {
            return Err(CodecError::NotKeyEncodable {
                kind: other.kind(),
            })
        }
    }
    Ok(())
}

/// Appends the key form of a text segment without building a [`Value`].
///
/// Equivalent to `push_key_value(out, &Value::Text(text.to_string()))`,
/// minus the allocation. Key builders call this on every segment.
pub fn push_key_text(out: &mut Vec<u8>, text: &str) {
    out.push(KEY_TAG_TEXT);
    push_terminated(out, text.as_bytes());
}

/// Encodes `value` into a fresh buffer. See [`push_key_value`].
///
/// # Errors
///
/// Returns [`CodecError::NotKeyEncodable`] for vectors, arrays, and maps.
pub fn encode_key_value(value: &Value) -> CodecResult<Vec<u8>> {
    let mut out = Vec::with_capacity(10);
    push_key_value(&mut out, value)?;
    Ok(out)
}

/// Decodes one key-encoded value from the front of `input`.
///
/// Returns the value and the number of bytes consumed, so callers can
/// continue parsing the key segments that follow.
///
/// # Errors
///
/// Returns a [`CodecError`] on truncated or malformed input.
pub fn decode_key_value(input: &[u8]) -> CodecResult<(Value, usize)> {
    let tag = *input
        .first()
        .ok_or(CodecError::UnexpectedEof { offset: 0 })?;
    match tag {
        KEY_TAG_NULL => Ok((Value::Null, 1)),
        KEY_TAG_FALSE => Ok((Value::Bool(false), 1)),
        KEY_TAG_TRUE => Ok((Value::Bool(true), 1)),
        KEY_TAG_INT => {
            let bytes = fixed8(input)?;
            let flipped = u64::from_be_bytes(bytes);
            Ok((Value::Int((flipped ^ (1u64 << 63)) as i64), 9))
        }
        KEY_TAG_FLOAT => {
            let bytes = fixed8(input)?;
            let ordered = u64::from_be_bytes(bytes);
            Ok((Value::Float(f64::from_bits(unorder_float_bits(ordered))), 9))
        }
        KEY_TAG_TEXT => {
            let (payload, consumed) = take_terminated(&input[1..])?;
            let text = String::from_utf8(payload)
                .map_err(|_| CodecError::InvalidUtf8 { offset: 1 })?;
            Ok((Value::Text(text), 1 + consumed))
        }
        KEY_TAG_BYTES => {
            let (payload, consumed) = take_terminated(&input[1..])?;
            Ok((Value::Bytes(payload), 1 + consumed))
        }
        other => Err(CodecError::InvalidTag {
            tag: other,
            offset: 0,
        }),
    }
}

fn fixed8(input: &[u8]) -> CodecResult<[u8; 8]> {
    if input.len() < 9 {
        return Err(CodecError::UnexpectedEof {
            offset: input.len(),
        });
    }
    let mut arr = [0u8; 8];
    arr.copy_from_slice(&input[1..9]);
    Ok(arr)
}

fn order_float_bits(f: f64) -> u64 {
    let bits = f.to_bits();
    if bits >> 63 == 1 {
        // Negative: invert everything so more-negative sorts lower.
        !bits
    } else {
        // Non-negative: set the sign bit so it sorts above all negatives.
        bits | (1u64 << 63)
    }
}

fn unorder_float_bits(ordered: u64) -> u64 {
    if ordered >> 63 == 1 {
        ordered & !(1u64 << 63)
    } else {
        !ordered
    }
}

fn push_terminated(out: &mut Vec<u8>, payload: &[u8]) {
    for &b in payload {
        out.push(b);
        if b == TERMINATOR {
            out.push(ESCAPE);
        }
    }
    out.push(TERMINATOR);
}

fn take_terminated(input: &[u8]) -> CodecResult<(Vec<u8>, usize)> {
    let mut payload = Vec::new();
    let mut i = 0;
    while i < input.len() {
        let b = input[i];
        if b == TERMINATOR {
            if input.get(i + 1) == Some(&ESCAPE) {
                payload.push(TERMINATOR);
                i += 2;
            } else {
                return Ok((payload, i + 1));
            }
        } else {
            payload.push(b);
            i += 1;
        }
    }
    Err(CodecError::UnexpectedEof { offset: input.len() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::cmp::Ordering;

    fn enc(v: &Value) -> Vec<u8> {
        encode_key_value(v).unwrap()
    }

    #[test]
    fn ints_sort_across_sign() {
        let values = [i64::MIN, -1000, -1, 0, 1, 42, i64::MAX];
        let keys: Vec<_> = values.iter().map(|i| enc(&Value::Int(*i))).collect();
        for pair in keys.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn floats_sort_across_sign_and_infinity() {
        let values = [
            f64::NEG_INFINITY,
            -1.5,
            -0.0,
            0.0,
            f64::MIN_POSITIVE,
            1.5,
            f64::INFINITY,
        ];
        let keys: Vec<_> = values.iter().map(|f| enc(&Value::Float(*f))).collect();
        for pair in keys.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
    }

    #[test]
    fn text_prefix_sorts_first() {
        assert!(enc(&Value::Text("a".into())) < enc(&Value::Text("ab".into())));
        assert!(enc(&Value::Text("ab".into())) < enc(&Value::Text("b".into())));
    }

    #[test]
    fn embedded_nul_does_not_terminate_early() {
        let with_nul = Value::Text("a\0b".into());
        let plain = Value::Text("a".into());
        assert!(enc(&plain) < enc(&with_nul));
        let (decoded, _) = decode_key_value(&enc(&with_nul)).unwrap();
        assert_eq!(decoded, with_nul);
    }

    #[test]
    fn kinds_rank_like_canonical_order() {
        let ordered = [
            Value::Null,
            Value::Bool(false),
            Value::Bool(true),
            Value::Int(i64::MAX),
            Value::Float(f64::NEG_INFINITY),
            Value::Text(String::new()),
            Value::Bytes(vec![]),
        ];
        let keys: Vec<_> = ordered.iter().map(enc).collect();
        for pair in keys.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn containers_are_rejected() {
        let err = encode_key_value(&Value::Array(vec![])).unwrap_err();
        assert!(matches!(err, CodecError::NotKeyEncodable { .. }));
        let err = encode_key_value(&Value::Vector(vec![1.0])).unwrap_err();
        assert!(matches!(err, CodecError::NotKeyEncodable { .. }));
    }

    #[test]
    fn decode_reports_consumed_length() {
        let mut buf = enc(&Value::Int(7));
        let tail_start = buf.len();
        buf.extend_from_slice(b"tail");
        let (value, consumed) = decode_key_value(&buf).unwrap();
        assert_eq!(value, Value::Int(7));
        assert_eq!(consumed, tail_start);
    }

    fn arb_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Int),
            any::<f64>().prop_map(Value::Float),
            ".{0,16}".prop_map(Value::Text),
            proptest::collection::vec(any::<u8>(), 0..16).prop_map(Value::Bytes),
        ]
    }

    proptest! {
        #[test]
        fn prop_key_order_matches_canonical(a in arb_scalar(), b in arb_scalar()) {
            let ka = enc(&a);
            let kb = enc(&b);
            prop_assert_eq!(ka.cmp(&kb), a.cmp_canonical(&b));
        }

        #[test]
        fn prop_key_round_trip(a in arb_scalar()) {
            let key = enc(&a);
            let (decoded, consumed) = decode_key_value(&key).unwrap();
            prop_assert_eq!(consumed, key.len());
            prop_assert_eq!(decoded.cmp_canonical(&a), Ordering::Equal);
        }
    }
}
