//! Identity and namespacing for per-user tables.
//!
//! A user is identified by a UUIDv7 that never leaves the client in clear
//! text. Rows are stored in a table named after a 64-bit XxHash of the id,
//! so a compromised database cannot be linked back to a user, and losing
//! the id means losing access to the rows.

use std::fmt;
use twox_hash::XxHash64;
use uuid::Uuid;

/// User identifier using UUIDv7 for timestamp-sortable IDs.
pub type UserId = Uuid;

/// Seed for the namespace hash. Changing it orphans every stored table.
const NAMESPACE_SEED: u64 = 0;

/// Prefix of every per-user table name.
pub const TABLE_PREFIX: &str = "uid-";

/// Generate a new UUIDv7 user id (timestamp-sortable).
pub fn new_user_id() -> UserId {
    Uuid::now_v7()
}

/// XxHash64 of `bytes`, rendered as 16 lowercase hex digits (big-endian).
pub fn hash64(bytes: &[u8]) -> String {
    hex::encode(XxHash64::oneshot(NAMESPACE_SEED, bytes).to_be_bytes())
}

/// Opaque, one-way table suffix derived from a [`UserId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamespaceId(String);

impl NamespaceId {
    /// Derive the namespace for a user id.
    ///
    /// Hashes the id's little-endian field layout (time-low, time-mid and
    /// time-high byte-swapped), which is the layout existing tables were
    /// created with.
    pub fn derive(user_id: &UserId) -> Self {
        Self(hash64(&user_id.to_bytes_le()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NamespaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of a per-user key/value table: `uid-{namespace}`.
///
/// Only constructible from a [`NamespaceId`], so statement text never
/// contains caller-supplied identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName(String);

impl TableName {
    pub fn for_namespace(namespace: &NamespaceId) -> Self {
        Self(format!("{TABLE_PREFIX}{namespace}"))
    }

    pub fn for_user(user_id: &UserId) -> Self {
        Self::for_namespace(&NamespaceId::derive(user_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The table name as a double-quoted SQL identifier.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        /// The same id always maps to the same namespace.
        #[test]
        fn prop_namespace_is_deterministic(bytes in any::<[u8; 16]>()) {
            let id = Uuid::from_bytes(bytes);
            prop_assert_eq!(NamespaceId::derive(&id), NamespaceId::derive(&id));
            prop_assert_eq!(TableName::for_user(&id), TableName::for_user(&id));
        }

        /// Distinct ids map to distinct namespaces.
        #[test]
        fn prop_distinct_ids_get_distinct_namespaces(
            a in any::<[u8; 16]>(),
            b in any::<[u8; 16]>(),
        ) {
            prop_assume!(a != b);
            let ns_a = NamespaceId::derive(&Uuid::from_bytes(a));
            let ns_b = NamespaceId::derive(&Uuid::from_bytes(b));
            prop_assert_ne!(ns_a, ns_b);
        }
    }
}
