//! Snapshots
//!
//! A snapshot is a deep, read-only, point-in-time projection of a node.
//! Snapshot containers are reference counted, so a parent snapshot shares
//! the cached snapshots of its untouched children instead of copying them.
//! Identity can be checked with [`Snapshot::ptr_eq`]: two snapshots of the
//! same node taken without an intervening change are the same allocation.
//!
//! Snapshots cannot be changed. The write methods ([`Snapshot::set`],
//! [`Snapshot::push`], [`Snapshot::delete`]) exist only to report the
//! attempt to the store's read-only hook; the write itself is discarded.

mod engine;

pub(crate) use engine::{snapshot_node, snapshot_value};

use std::any::Any;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use indexmap::IndexMap;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use crate::value::{Key, Path, Pattern, Value};

/// Callback invoked when something tries to write into a snapshot.
pub type ReadOnlyHook = Rc<dyn Fn(&ReadOnlyWrite)>;

/// Description of a rejected snapshot write.
#[derive(Debug)]
pub struct ReadOnlyWrite {
    /// The snapshot container that was targeted.
    pub target: Snapshot,
    /// Property, index, key or operation name involved.
    pub prop: String,
    /// The value the caller tried to write, if any.
    pub value: Option<Value>,
}

/// The default read-only hook: log a warning and move on.
pub fn warn_read_only() -> ReadOnlyHook {
    Rc::new(|write: &ReadOnlyWrite| {
        tracing::warn!(prop = %write.prop, "snapshots are readonly");
    })
}

struct FrozenInner<T> {
    value: T,
    on_read_only: ReadOnlyHook,
}

/// Shared, immutable snapshot container.
pub struct Frozen<T> {
    inner: Rc<FrozenInner<T>>,
}

impl<T> Frozen<T> {
    pub(crate) fn new(value: T, on_read_only: ReadOnlyHook) -> Self {
        Self {
            inner: Rc::new(FrozenInner {
                value,
                on_read_only,
            }),
        }
    }

    /// Whether both containers are the same allocation.
    pub fn ptr_eq(&self, other: &Frozen<T>) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn hook(&self) -> &ReadOnlyHook {
        &self.inner.on_read_only
    }
}

impl<T> Clone for Frozen<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Deref for Frozen<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner.value
    }
}

impl<T: fmt::Debug> fmt::Debug for Frozen<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.value.fmt(f)
    }
}

impl<T: PartialEq> PartialEq for Frozen<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.inner.value == other.inner.value
    }
}

/// A ref's held value, shared without copying.
#[derive(Clone)]
pub struct Opaque(Rc<dyn Any>);

impl Opaque {
    pub(crate) fn new(value: Rc<dyn Any>) -> Self {
        Self(value)
    }

    /// Read the held value as `T`.
    pub fn with<T: 'static, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let cell = self.0.downcast_ref::<std::cell::RefCell<T>>()?;
        let guard = cell.borrow();
        Some(f(&guard))
    }
}

impl PartialEq for Opaque {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Opaque(..)")
    }
}

/// Deep, read-only projection of a node or value.
#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    /// Null or missing.
    Null,
    /// Boolean leaf.
    Bool(bool),
    /// Numeric leaf.
    Number(f64),
    /// String leaf.
    String(Rc<str>),
    /// Copied point in time.
    Date(SystemTime),
    /// Copied pattern.
    Pattern(Pattern),
    /// Copied byte buffer.
    Bytes(Rc<[u8]>),
    /// Object projection.
    Object(Frozen<IndexMap<String, Snapshot>>),
    /// Sequence projection.
    Array(Frozen<Vec<Snapshot>>),
    /// Map projection.
    Map(Frozen<IndexMap<Key, Snapshot>>),
    /// Set projection: member snapshots keyed by member identity.
    Set(Frozen<IndexMap<Key, Snapshot>>),
    /// A ref's held value, returned as-is.
    Opaque(Opaque),
}

impl Snapshot {
    /// Whether both snapshots are the same allocation (or equal leaves).
    pub fn ptr_eq(&self, other: &Snapshot) -> bool {
        match (self, other) {
            (Snapshot::Object(a), Snapshot::Object(b)) => a.ptr_eq(b),
            (Snapshot::Array(a), Snapshot::Array(b)) => a.ptr_eq(b),
            (Snapshot::Map(a), Snapshot::Map(b)) => a.ptr_eq(b),
            (Snapshot::Set(a), Snapshot::Set(b)) => a.ptr_eq(b),
            (Snapshot::String(a), Snapshot::String(b)) => Rc::ptr_eq(a, b),
            (Snapshot::Bytes(a), Snapshot::Bytes(b)) => Rc::ptr_eq(a, b),
            (Snapshot::Opaque(a), Snapshot::Opaque(b)) => a == b,
            (Snapshot::Null, Snapshot::Null) => true,
            (Snapshot::Bool(a), Snapshot::Bool(b)) => a == b,
            (Snapshot::Number(a), Snapshot::Number(b)) => a == b,
            (Snapshot::Date(a), Snapshot::Date(b)) => a == b,
            _ => false,
        }
    }

    /// Look up a direct child by key.
    pub fn get(&self, key: impl Into<Key>) -> Option<&Snapshot> {
        let key = key.into();
        match self {
            Snapshot::Object(entries) => entries.get(key.to_prop().as_str()),
            Snapshot::Array(items) => key.as_index().and_then(|i| items.get(i)),
            Snapshot::Map(entries) | Snapshot::Set(entries) => entries.get(&key),
            _ => None,
        }
    }

    /// Resolve a nested path; missing segments resolve to `Null`.
    pub fn get_path(&self, path: &Path) -> Snapshot {
        let mut current = self;
        for segment in path.segments() {
            let next = match current {
                Snapshot::Map(entries) | Snapshot::Set(entries) => entries
                    .iter()
                    .find(|(k, _)| k.segment() == *segment)
                    .map(|(_, v)| v),
                other => other.get(segment.as_str()),
            };
            match next {
                Some(next) => current = next,
                None => return Snapshot::Null,
            }
        }
        current.clone()
    }

    /// Whether a set snapshot contains `member`.
    pub fn contains(&self, member: impl Into<Key>) -> bool {
        match self {
            Snapshot::Set(members) => members.contains_key(&member.into()),
            _ => false,
        }
    }

    /// Number of direct children; zero for leaves.
    pub fn len(&self) -> usize {
        match self {
            Snapshot::Object(entries) => entries.len(),
            Snapshot::Array(items) => items.len(),
            Snapshot::Map(entries) | Snapshot::Set(entries) => entries.len(),
            _ => 0,
        }
    }

    /// Whether the snapshot has no children.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Numeric content, if any.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Snapshot::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// String content, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Snapshot::String(s) => Some(s),
            _ => None,
        }
    }

    /// Boolean content, if any.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Snapshot::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Whether this is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Snapshot::Null)
    }

    /// Read an opaque ref value as `T`.
    pub fn with_opaque<T: 'static, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        match self {
            Snapshot::Opaque(opaque) => opaque.with(f),
            _ => None,
        }
    }

    /// Attempt a write. The hook is told and the snapshot stays unchanged.
    pub fn set(&self, key: impl Into<Key>, value: impl Into<Value>) {
        self.reject(key.into().to_string(), Some(value.into()));
    }

    /// Attempt to append. The hook is told and the snapshot stays unchanged.
    pub fn push(&self, value: impl Into<Value>) {
        self.reject("push".to_owned(), Some(value.into()));
    }

    /// Attempt a delete. The hook is told and the snapshot stays unchanged.
    pub fn delete(&self, key: impl Into<Key>) {
        self.reject(key.into().to_string(), None);
    }

    fn reject(&self, prop: String, value: Option<Value>) {
        let hook = match self {
            Snapshot::Object(c) => c.hook().clone(),
            Snapshot::Array(c) => c.hook().clone(),
            Snapshot::Map(c) => c.hook().clone(),
            Snapshot::Set(c) => c.hook().clone(),
            _ => warn_read_only(),
        };
        hook(&ReadOnlyWrite {
            target: self.clone(),
            prop,
            value,
        });
    }

    /// Convert to JSON. Maps become objects, sets become arrays, dates
    /// become milliseconds since the epoch and opaque values become null.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Build a detached snapshot from JSON, using the default read-only hook.
    pub fn from_json(value: serde_json::Value) -> Self {
        Self::from_json_with(value, &warn_read_only())
    }

    fn from_json_with(value: serde_json::Value, hook: &ReadOnlyHook) -> Self {
        match value {
            serde_json::Value::Null => Snapshot::Null,
            serde_json::Value::Bool(b) => Snapshot::Bool(b),
            serde_json::Value::Number(n) => Snapshot::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Snapshot::String(s.into()),
            serde_json::Value::Array(items) => Snapshot::Array(Frozen::new(
                items
                    .into_iter()
                    .map(|v| Self::from_json_with(v, hook))
                    .collect(),
                hook.clone(),
            )),
            serde_json::Value::Object(entries) => Snapshot::Object(Frozen::new(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, Self::from_json_with(v, hook)))
                    .collect(),
                hook.clone(),
            )),
        }
    }
}

impl Serialize for Snapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Snapshot::Null | Snapshot::Opaque(_) => serializer.serialize_unit(),
            Snapshot::Bool(b) => serializer.serialize_bool(*b),
            // Integral numbers come out as JSON integers.
            Snapshot::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => {
                serializer.serialize_i64(*n as i64)
            }
            Snapshot::Number(n) => serializer.serialize_f64(*n),
            Snapshot::String(s) => serializer.serialize_str(s),
            Snapshot::Date(t) => {
                let millis = t
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_millis() as f64)
                    .unwrap_or_else(|e| -(e.duration().as_millis() as f64));
                serializer.serialize_f64(millis)
            }
            Snapshot::Pattern(p) => serializer.serialize_str(p.as_str()),
            Snapshot::Bytes(bytes) => {
                let mut seq = serializer.serialize_seq(Some(bytes.len()))?;
                for byte in bytes.iter() {
                    seq.serialize_element(byte)?;
                }
                seq.end()
            }
            Snapshot::Object(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries.iter() {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            Snapshot::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items.iter() {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Snapshot::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries.iter() {
                    map.serialize_entry(&k.segment(), v)?;
                }
                map.end()
            }
            Snapshot::Set(members) => {
                let mut seq = serializer.serialize_seq(Some(members.len()))?;
                for member in members.values() {
                    seq.serialize_element(member)?;
                }
                seq.end()
            }
        }
    }
}

impl PartialEq<serde_json::Value> for Snapshot {
    fn eq(&self, other: &serde_json::Value) -> bool {
        values_match(&self.to_json(), other)
    }
}

/// JSON equality that treats `1` and `1.0` as the same number.
fn values_match(a: &serde_json::Value, b: &serde_json::Value) -> bool {
    use serde_json::Value as J;
    match (a, b) {
        (J::Number(x), J::Number(y)) => x.as_f64() == y.as_f64(),
        (J::Array(x), J::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| values_match(a, b))
        }
        (J::Object(x), J::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(k, v)| y.get(k).is_some_and(|w| values_match(v, w)))
        }
        _ => a == b,
    }
}
