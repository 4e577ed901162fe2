//! Full-text tokenization.
//!
//! Deliberately small: lowercase, split on anything that is not
//! alphanumeric, drop short tokens, dedupe. Queries and documents go
//! through the same function, and matching is conjunctive (every query
//! token must appear).

use std::collections::BTreeSet;

/// Tokenizes `text` for indexing or querying.
pub(crate) fn tokenize(text: &str, min_token_len: usize) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .filter(|token| token.chars().count() >= min_token_len)
        .collect()
}
