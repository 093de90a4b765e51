//! Entity identifier.

use crate::value::FieldValue;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an entity within its table.
///
/// Remote backends hand out either integer or string identifiers. Negative
/// integers never come from the remote: they are temporary identifiers
/// allocated locally for records created while offline, and `Int(-1)` is the
/// "not yet assigned" sentinel.
///
/// Keys order integers before strings, integers numerically.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityKey {
    /// Integer identifier.
    Int(i64),
    /// String identifier.
    Text(String),
}

impl EntityKey {
    /// The "no identifier yet" sentinel.
    pub const UNSET: EntityKey = EntityKey::Int(-1);

    /// Returns true if this is the unset sentinel.
    #[must_use]
    pub fn is_unset(&self) -> bool {
        *self == Self::UNSET
    }

    /// Returns true if this is a locally allocated temporary identifier.
    #[must_use]
    pub fn is_temporary(&self) -> bool {
        matches!(self, EntityKey::Int(n) if *n < 0)
    }

    /// Returns the integer value, if this is an integer key.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            EntityKey::Int(n) => Some(*n),
            EntityKey::Text(_) => None,
        }
    }

    /// Returns the string value, if this is a string key.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            EntityKey::Int(_) => None,
            EntityKey::Text(s) => Some(s),
        }
    }

    /// Returns the key as it appears inside entity fields that reference it.
    #[must_use]
    pub fn to_field_value(&self) -> FieldValue {
        match self {
            EntityKey::Int(n) => FieldValue::Integer(*n),
            EntityKey::Text(s) => FieldValue::Text(s.clone()),
        }
    }
}

impl Default for EntityKey {
    fn default() -> Self {
        Self::UNSET
    }
}

impl fmt::Debug for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKey::Int(n) => write!(f, "EntityKey({n})"),
            EntityKey::Text(s) => write!(f, "EntityKey({s:?})"),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKey::Int(n) => write!(f, "{n}"),
            EntityKey::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for EntityKey {
    fn from(n: i64) -> Self {
        EntityKey::Int(n)
    }
}

impl From<&str> for EntityKey {
    fn from(s: &str) -> Self {
        EntityKey::Text(s.to_string())
    }
}

impl From<String> for EntityKey {
    fn from(s: String) -> Self {
        EntityKey::Text(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_and_temporary() {
        assert!(EntityKey::UNSET.is_unset());
        assert!(EntityKey::default().is_unset());
        assert!(EntityKey::Int(-2).is_temporary());
        assert!(!EntityKey::Int(0).is_temporary());
        assert!(!EntityKey::Int(42).is_temporary());
        assert!(!EntityKey::from("-2").is_temporary());
    }

    #[test]
    fn ordering_puts_integers_first() {
        let mut keys = vec![
            EntityKey::from("b"),
            EntityKey::Int(10),
            EntityKey::Int(-3),
            EntityKey::from("a"),
            EntityKey::Int(2),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                EntityKey::Int(-3),
                EntityKey::Int(2),
                EntityKey::Int(10),
                EntityKey::from("a"),
                EntityKey::from("b"),
            ]
        );
    }

    #[test]
    fn display() {
        assert_eq!(EntityKey::Int(-2).to_string(), "-2");
        assert_eq!(EntityKey::from("note-1").to_string(), "note-1");
    }

    #[test]
    fn cbor_keeps_variant() {
        for key in [EntityKey::Int(7), EntityKey::from("7")] {
            let mut bytes = Vec::new();
            ciborium::into_writer(&key, &mut bytes).unwrap();
            let decoded: EntityKey = ciborium::from_reader(bytes.as_slice()).unwrap();
            assert_eq!(decoded, key);
        }
    }
}
