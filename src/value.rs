//! Values that datoms can hold.
//!
//! Every attribute declares a [`ValueType`]; the transactor rejects values of
//! any other type. Statements carry a [`TxValue`], which may also be a
//! temporary id standing in for a reference to a new entity.

use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ident::{Entid, TempId};

/// Type tag of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Bool,
    Long,
    Double,
    String,
    Keyword,
    Instant,
    Uuid,
    Ref,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "bool",
            Self::Long => "long",
            Self::Double => "double",
            Self::String => "string",
            Self::Keyword => "keyword",
            Self::Instant => "instant",
            Self::Uuid => "uuid",
            Self::Ref => "ref",
        };
        f.write_str(name)
    }
}

/// A value stored in a datom.
///
/// Doubles compare and hash by bit pattern so that values can key indexes.
///
/// # Examples
///
/// ```
/// use tessera::{Value, ValueType};
///
/// let v = Value::from("a@x.com");
/// assert_eq!(v.value_type(), ValueType::String);
/// assert_eq!(v.as_str(), Some("a@x.com"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Bool(bool),
    Long(i64),
    Double(f64),
    String(String),
    Keyword(String),
    Instant(DateTime<Utc>),
    Uuid(Uuid),
    Ref(Entid),
}

impl Value {
    /// Creates a keyword value such as `:status/active`.
    #[must_use]
    pub fn keyword(k: impl Into<String>) -> Self {
        Self::Keyword(k.into())
    }

    /// Returns the type tag of this value.
    #[must_use]
    pub const fn value_type(&self) -> ValueType {
        match self {
            Self::Bool(_) => ValueType::Bool,
            Self::Long(_) => ValueType::Long,
            Self::Double(_) => ValueType::Double,
            Self::String(_) => ValueType::String,
            Self::Keyword(_) => ValueType::Keyword,
            Self::Instant(_) => ValueType::Instant,
            Self::Uuid(_) => ValueType::Uuid,
            Self::Ref(_) => ValueType::Ref,
        }
    }

    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub const fn as_long(&self) -> Option<i64> {
        match self {
            Self::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub const fn as_double(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) | Self::Keyword(v) => Some(v),
            _ => None,
        }
    }

    pub const fn as_instant(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Instant(v) => Some(*v),
            _ => None,
        }
    }

    pub const fn as_entid(&self) -> Option<Entid> {
        match self {
            Self::Ref(v) => Some(*v),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Long(a), Self::Long(b)) => a == b,
            (Self::Double(a), Self::Double(b)) => a.to_bits() == b.to_bits(),
            (Self::String(a), Self::String(b)) | (Self::Keyword(a), Self::Keyword(b)) => a == b,
            (Self::Instant(a), Self::Instant(b)) => a == b,
            (Self::Uuid(a), Self::Uuid(b)) => a == b,
            (Self::Ref(a), Self::Ref(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Bool(v) => v.hash(state),
            Self::Long(v) => v.hash(state),
            Self::Double(v) => v.to_bits().hash(state),
            Self::String(v) | Self::Keyword(v) => v.hash(state),
            Self::Instant(v) => v.hash(state),
            Self::Uuid(v) => v.hash(state),
            Self::Ref(v) => v.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Long(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v:?}"),
            Self::Keyword(v) => write!(f, "{v}"),
            Self::Instant(v) => write!(f, "#inst \"{}\"", v.to_rfc3339()),
            Self::Uuid(v) => write!(f, "#uuid \"{v}\""),
            Self::Ref(v) => write!(f, "#ref {v}"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Long(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Instant(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Self::Uuid(v)
    }
}

impl From<Entid> for Value {
    fn from(v: Entid) -> Self {
        Self::Ref(v)
    }
}

/// The value position of a statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TxValue {
    /// A concrete value.
    Value(Value),
    /// A reference to an entity created by the same transaction.
    TempId(TempId),
}

impl TxValue {
    /// Type the value will have once tempids are resolved.
    #[must_use]
    pub const fn value_type(&self) -> ValueType {
        match self {
            Self::Value(v) => v.value_type(),
            Self::TempId(_) => ValueType::Ref,
        }
    }
}

impl fmt::Display for TxValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => write!(f, "{v}"),
            Self::TempId(t) => write!(f, "{t}"),
        }
    }
}

impl From<TempId> for TxValue {
    fn from(v: TempId) -> Self {
        Self::TempId(v)
    }
}

impl From<&TempId> for TxValue {
    fn from(v: &TempId) -> Self {
        Self::TempId(v.clone())
    }
}

macro_rules! tx_value_from {
    ($($t:ty),* $(,)?) => {
        $(
            impl From<$t> for TxValue {
                fn from(v: $t) -> Self {
                    Self::Value(Value::from(v))
                }
            }
        )*
    };
}

tx_value_from!(Value, bool, i32, i64, f64, String, &str, DateTime<Utc>, Uuid, Entid);

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_value_types() {
        assert_eq!(Value::Bool(true).value_type(), ValueType::Bool);
        assert_eq!(Value::Long(1).value_type(), ValueType::Long);
        assert_eq!(Value::keyword(":a/b").value_type(), ValueType::Keyword);
        assert_eq!(Value::Ref(Entid::new(65_536)).value_type(), ValueType::Ref);
    }

    #[test]
    fn test_string_and_keyword_differ() {
        assert_ne!(Value::from(":a/b"), Value::keyword(":a/b"));
    }

    #[test]
    fn test_double_hashes_by_bits() {
        let mut set = HashSet::new();
        set.insert(Value::Double(1.5));
        assert!(set.contains(&Value::Double(1.5)));
        assert!(!set.contains(&Value::Double(-1.5)));
        // NaN equals itself by bit pattern, so it can live in an index.
        assert_eq!(Value::Double(f64::NAN), Value::Double(f64::NAN));
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::from("hi").to_string(), "\"hi\"");
        assert_eq!(Value::Long(42).to_string(), "42");
        assert_eq!(Value::keyword(":x/y").to_string(), ":x/y");
        assert_eq!(Value::Ref(Entid::new(65_536)).to_string(), "#ref 65536");
    }

    #[test]
    fn test_accessors_type_mismatch() {
        let v = Value::Bool(true);
        assert!(v.as_long().is_none());
        assert!(v.as_str().is_none());
        assert!(v.as_entid().is_none());
    }

    #[test]
    fn test_value_serialization() {
        let val = Value::Instant(Utc::now());
        let json = serde_json::to_string(&val).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(val, back);
    }

    #[test]
    fn test_tx_value_from() {
        let v: TxValue = "x".into();
        assert_eq!(v.value_type(), ValueType::String);
        let v: TxValue = 3i64.into();
        assert_eq!(v, TxValue::Value(Value::Long(3)));
    }
}
