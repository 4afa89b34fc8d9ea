//! Keys and Paths
//!
//! A [`Key`] addresses one slot inside a container: a property name for
//! objects, an index for sequences, a key for maps and a member for sets.
//! A [`Path`] is the ordered list of segments leading from a node down to a
//! nested slot. Subscriptions match paths by segment prefix, so a listener on
//! `a.b` sees `a.b` and `a.b.c` but never `a.bc`.

use std::fmt;

use serde::{Serialize, Serializer};
use smallvec::SmallVec;

use crate::graph::NodeId;
use crate::state::State;

/// Address of one slot inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    /// Property name or string map key.
    Str(String),
    /// Sequence index or integer map key.
    Int(i64),
    /// Boolean map key or set member.
    Bool(bool),
    /// Non-integral number member of a set, as its IEEE-754 bits.
    Float(u64),
    /// Container member of a set, by node identity.
    Node(NodeId),
}

impl Key {
    /// Interpret the key as a sequence index.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Key::Int(i) => usize::try_from(*i).ok(),
            Key::Str(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// The key as an object property name.
    pub fn to_prop(&self) -> String {
        match self {
            Key::Str(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Path segment under which this key is reported.
    pub fn segment(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Str(s) => f.write_str(s),
            Key::Int(i) => write!(f, "{i}"),
            Key::Bool(b) => write!(f, "{b}"),
            Key::Float(bits) => write!(f, "{}", f64::from_bits(*bits)),
            Key::Node(id) => write!(f, "#{}", id.raw()),
        }
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Key::Str(s) => serializer.serialize_str(s),
            Key::Int(i) => serializer.serialize_i64(*i),
            Key::Bool(b) => serializer.serialize_bool(*b),
            Key::Float(bits) => serializer.serialize_f64(f64::from_bits(*bits)),
            Key::Node(_) => serializer.collect_str(self),
        }
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::Str(value.to_owned())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::Str(value)
    }
}

impl From<&String> for Key {
    fn from(value: &String) -> Self {
        Key::Str(value.clone())
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Key::Int(value)
    }
}

impl From<i32> for Key {
    fn from(value: i32) -> Self {
        Key::Int(i64::from(value))
    }
}

impl From<usize> for Key {
    fn from(value: usize) -> Self {
        Key::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

/// Integral numbers become `Int`, so `1.0` and `1` are the same key. All NaNs
/// share one key.
impl From<f64> for Key {
    fn from(value: f64) -> Self {
        if value.fract() == 0.0 && value.abs() < 9.0e15 {
            Key::Int(value as i64)
        } else if value.is_nan() {
            Key::Float(f64::NAN.to_bits())
        } else {
            Key::Float(value.to_bits())
        }
    }
}

impl From<&State> for Key {
    fn from(value: &State) -> Self {
        Key::Node(value.id())
    }
}

impl From<bool> for Key {
    fn from(value: bool) -> Self {
        Key::Bool(value)
    }
}

/// Ordered segments from a node down to a nested slot.
///
/// The empty path designates the node itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Path {
    segments: SmallVec<[String; 4]>,
}

impl Path {
    /// The empty path.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a dotted path such as `"items.0.name"`.
    ///
    /// Empty segments are ignored, so `""` is the root path.
    pub fn parse(dotted: &str) -> Self {
        Self {
            segments: dotted
                .split('.')
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect(),
        }
    }

    /// Single-segment path for a key.
    pub fn from_key(key: &Key) -> Self {
        let mut segments = SmallVec::new();
        segments.push(key.segment());
        Self { segments }
    }

    /// This path with `key` in front of it.
    pub fn prefixed(&self, key: &Key) -> Self {
        let mut segments = SmallVec::with_capacity(self.segments.len() + 1);
        segments.push(key.segment());
        segments.extend(self.segments.iter().cloned());
        Self { segments }
    }

    /// This path with `segment` appended.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    /// Whether `prefix` covers this path segment by segment.
    pub fn starts_with(&self, prefix: &Path) -> bool {
        prefix.segments.len() <= self.segments.len()
            && prefix
                .segments
                .iter()
                .zip(self.segments.iter())
                .all(|(a, b)| a == b)
    }

    /// Borrow the segments.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Whether this is the root path.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Split into the first segment and the remaining path.
    pub fn split_first(&self) -> Option<(&str, Path)> {
        let (first, rest) = self.segments.split_first()?;
        Some((
            first.as_str(),
            Path {
                segments: rest.iter().cloned().collect(),
            },
        ))
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

impl Serialize for Path {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl From<&str> for Path {
    fn from(value: &str) -> Self {
        Path::parse(value)
    }
}

impl From<String> for Path {
    fn from(value: String) -> Self {
        Path::parse(&value)
    }
}

impl From<&Key> for Path {
    fn from(value: &Key) -> Self {
        Path::from_key(value)
    }
}

impl From<Key> for Path {
    fn from(value: Key) -> Self {
        Path::from_key(&value)
    }
}
