//! # FacetDB Codec
//!
//! The value model and wire formats shared by every FacetDB layer.
//!
//! Two encodings live here, with different goals:
//!
//! - The **blob codec** ([`encode_value`] / [`decode_value`]) serializes a
//!   [`Value`] into the compact tagged binary form entity records are
//!   stored in. It optimizes for size and decode speed, not ordering.
//! - The **key encoding** ([`key_encoding`]) serializes a value so that
//!   `memcmp` on the encoded bytes agrees with [`Value::cmp_canonical`].
//!   Index keys embed values through this encoding, which is what lets a
//!   plain prefix scan of the keyspace answer range predicates.
//!
//! ## Example
//!
//! ```rust
//! use facetdb_codec::{decode_value, encode_value, Value};
//!
//! let v = Value::Map(
//!     [
//!         ("name".to_string(), Value::Text("ada".into())),
//!         ("age".to_string(), Value::Int(36)),
//!     ]
//!     .into_iter()
//!     .collect(),
//! );
//! let blob = encode_value(&v);
//! assert_eq!(decode_value(&blob).unwrap(), v);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decode;
mod encode;
mod error;
pub mod key_encoding;
mod value;

pub use decode::decode_value;
pub use encode::encode_value;
pub use error::{CodecError, CodecResult};
pub use value::{Value, ValueKind};
