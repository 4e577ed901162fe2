//! Core identifier types.

use std::fmt;

/// Monotonic commit sequence number.
///
/// Every committed transaction gets the next sequence number; it doubles
/// as the MVCC snapshot timestamp. Zero means "empty engine, nothing
/// committed".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    /// The pre-first-commit sequence number.
    pub const ZERO: SequenceNumber = SequenceNumber(0);

    /// Wraps a raw sequence number.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// The following sequence number.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq:{}", self.0)
    }
}

/// Identifier of a transaction, unique within one engine lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(u64);

impl TransactionId {
    /// Wraps a raw transaction id.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Address of an entity: table name plus primary key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityKey {
    /// The table (collection) the entity lives in.
    pub table: String,
    /// The entity's primary key within the table.
    pub pk: String,
}

impl EntityKey {
    /// Builds an entity key.
    pub fn new(table: impl Into<String>, pk: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            pk: pk.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.table, self.pk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_order_and_advance() {
        let a = SequenceNumber::new(1);
        assert!(SequenceNumber::ZERO < a);
        assert_eq!(a.next().as_u64(), 2);
    }

    #[test]
    fn display_forms() {
        assert_eq!(SequenceNumber::new(42).to_string(), "seq:42");
        assert_eq!(TransactionId::new(9).to_string(), "txn:9");
        assert_eq!(EntityKey::new("users", "u1").to_string(), "users/u1");
    }
}
