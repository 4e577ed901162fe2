//! Error types for encoding and decoding.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors produced while decoding a blob or a key segment.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The input ended before the value was complete.
    #[error("unexpected end of input at offset {offset}")]
    UnexpectedEof {
        /// Offset at which more bytes were needed.
        offset: usize,
    },

    /// An unknown tag byte.
    #[error("invalid value tag {tag:#04x} at offset {offset}")]
    InvalidTag {
        /// The offending tag byte.
        tag: u8,
        /// Offset of the tag.
        offset: usize,
    },

    /// Text bytes that are not valid UTF-8.
    #[error("invalid UTF-8 in text at offset {offset}")]
    InvalidUtf8 {
        /// Offset of the text payload.
        offset: usize,
    },

    /// Bytes left over after the value was fully decoded.
    #[error("{remaining} trailing bytes after value")]
    TrailingBytes {
        /// Number of unread bytes.
        remaining: usize,
    },

    /// A declared length that cannot fit in the remaining input.
    #[error("declared length {declared} exceeds remaining input {remaining}")]
    LengthOverflow {
        /// Length declared by the prefix.
        declared: usize,
        /// Bytes actually remaining.
        remaining: usize,
    },

    /// A value kind that has no order-preserving key form.
    #[error("{kind} values cannot be embedded in index keys")]
    NotKeyEncodable {
        /// The offending kind.
        kind: crate::ValueKind,
    },
}
