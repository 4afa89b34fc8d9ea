//! Values
//!
//! [`Value`] is what callers put into a state and what they read back out of
//! it. Raw containers (`Object`, `Array`, `Map`, `Set`) are plain data; as soon
//! as they are written into a state they become nodes and are read back as
//! [`Value::State`] handles. Leaves (numbers, strings, dates, patterns, byte
//! buffers) are stored as-is. [`Value::Ref`] opts a value out of reactivity.

mod path;
mod pattern;

pub use path::{Key, Path};
pub use pattern::Pattern;

use std::time::SystemTime;

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::reference::Ref;
use crate::state::State;

/// A value that can be stored in, or read from, a reactive state.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Absent or null value.
    #[default]
    Null,
    /// Boolean leaf.
    Bool(bool),
    /// Numeric leaf.
    Number(f64),
    /// String leaf.
    String(String),
    /// Point in time, copied by value into snapshots.
    Date(SystemTime),
    /// Regular expression, copied by value into snapshots.
    Pattern(Pattern),
    /// Fixed-size binary buffer, copied by value into snapshots.
    Bytes(Vec<u8>),
    /// Raw object with insertion-ordered properties.
    Object(IndexMap<String, Value>),
    /// Raw sequence.
    Array(Vec<Value>),
    /// Raw key-value map.
    Map(IndexMap<Key, Value>),
    /// Raw set. Duplicate members collapse when the set is wrapped.
    Set(Vec<Value>),
    /// A node already living in a store.
    State(State),
    /// Opaque, non-reactive wrapper.
    Ref(Ref),
}

impl Value {
    /// Build a raw object from `(name, value)` pairs.
    pub fn object<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Value::Object(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Build a raw sequence.
    pub fn array<V, I>(items: I) -> Self
    where
        V: Into<Value>,
        I: IntoIterator<Item = V>,
    {
        Value::Array(items.into_iter().map(Into::into).collect())
    }

    /// Build a raw map from `(key, value)` pairs.
    pub fn map<K, V, I>(entries: I) -> Self
    where
        K: Into<Key>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Build a raw set.
    pub fn set<V, I>(members: I) -> Self
    where
        V: Into<Value>,
        I: IntoIterator<Item = V>,
    {
        Value::Set(members.into_iter().map(Into::into).collect())
    }

    /// Name of the value's kind, used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Date(_) => "date",
            Value::Pattern(_) => "pattern",
            Value::Bytes(_) => "bytes",
            Value::Object(_) => "object",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
            Value::Set(_) => "set",
            Value::State(_) => "state",
            Value::Ref(_) => "ref",
        }
    }

    /// Whether this is a raw container that becomes a node when stored.
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            Value::Object(_) | Value::Array(_) | Value::Map(_) | Value::Set(_)
        )
    }

    /// Identity of the value as a set member.
    ///
    /// Scalars are members by value and states by node. Raw containers get
    /// their identity once they become nodes. Everything else cannot be a
    /// member.
    pub(crate) fn member_key(&self) -> Option<Key> {
        match self {
            Value::Bool(b) => Some(Key::Bool(*b)),
            Value::Number(n) => Some(Key::from(*n)),
            Value::String(s) => Some(Key::Str(s.clone())),
            Value::State(state) => Some(Key::from(state)),
            _ => None,
        }
    }

    /// Reference-equality test used to skip no-op writes.
    ///
    /// Primitive leaves compare by value. Dates, patterns, buffers and raw
    /// containers are fresh objects and never identical to a stored slot.
    pub fn is_identical(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::State(a), Value::State(b)) => a == b,
            (Value::Ref(a), Value::Ref(b)) => a.same_target(b),
            _ => false,
        }
    }

    /// Borrow the node handle, or fail with `InvalidState`.
    pub fn as_state(&self) -> Result<&State> {
        match self {
            Value::State(state) => Ok(state),
            Value::Ref(_) => Err(Error::invalid_state("a ref has no reactive node")),
            other => Err(Error::invalid_state(format!(
                "a plain {} has no reactive node",
                other.kind_name()
            ))),
        }
    }

    /// Numeric content, if any.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// String content, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Boolean content, if any.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The ref wrapper, if any.
    pub fn as_ref_value(&self) -> Option<&Ref> {
        match self {
            Value::Ref(r) => Some(r),
            _ => None,
        }
    }

    /// Whether the value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Pattern(a), Value::Pattern(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Set(a), Value::Set(b)) => a == b,
            _ => self.is_identical(other),
        }
    }
}

macro_rules! number_from {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(value: $t) -> Self {
                    Value::Number(value as f64)
                }
            }
        )*
    };
}

number_from!(i32, i64, u32, u64, usize, f32, f64);

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<SystemTime> for Value {
    fn from(value: SystemTime) -> Self {
        Value::Date(value)
    }
}

impl From<Pattern> for Value {
    fn from(value: Pattern) -> Self {
        Value::Pattern(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::Array(value)
    }
}

impl From<State> for Value {
    fn from(value: State) -> Self {
        Value::State(value)
    }
}

impl From<&State> for Value {
    fn from(value: &State) -> Self {
        Value::State(value.clone())
    }
}

impl From<Ref> for Value {
    fn from(value: Ref) -> Self {
        Value::Ref(value)
    }
}

impl From<Key> for Value {
    fn from(value: Key) -> Self {
        match value {
            Key::Str(s) => Value::String(s),
            Key::Int(i) => Value::Number(i as f64),
            Key::Bool(b) => Value::Bool(b),
            Key::Float(bits) => Value::Number(f64::from_bits(bits)),
            // A node identity needs its store to become a state.
            Key::Node(_) => Value::Null,
        }
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(entries) => Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_objects_become_raw_objects() {
        let value = Value::from(json!({ "count": 0, "tags": ["a", "b"] }));
        match value {
            Value::Object(entries) => {
                assert_eq!(entries["count"], Value::Number(0.0));
                assert_eq!(entries["tags"], Value::array(["a", "b"]));
            }
            other => panic!("expected object, got {other:?}"),
        }
    }

    #[test]
    fn primitives_are_identical_by_value() {
        assert!(Value::from(1).is_identical(&Value::from(1.0)));
        assert!(Value::from("x").is_identical(&Value::from("x")));
        assert!(!Value::Number(f64::NAN).is_identical(&Value::Number(f64::NAN)));
    }

    #[test]
    fn containers_are_never_identical() {
        let a = Value::array([1, 2]);
        assert!(!a.is_identical(&a.clone()));
        assert_eq!(a, a.clone());
        assert!(!Value::Bytes(vec![1]).is_identical(&Value::Bytes(vec![1])));
    }

    #[test]
    fn plain_values_have_no_state() {
        let err = Value::object([("a", 1)]).as_state().unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
    }
}
