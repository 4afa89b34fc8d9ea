//! Graph Nodes
//!
//! This module defines the node type that lives in the state graph: one raw
//! container plus its subscription, parent-link and cache metadata.

use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::{IndexMap, IndexSet};

use crate::reactive::{Handler, Subscriptions};
use crate::reference::Ref;
use crate::snapshot::Snapshot;
use crate::value::{Key, Value};

/// Unique identifier for a node in the state graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

/// The kind of container a node wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// String-keyed, insertion-ordered properties.
    Object,
    /// Index-addressed sequence.
    Array,
    /// Key-value map.
    Map,
    /// Set of unique members.
    Set,
}

impl Kind {
    /// Lowercase name of the kind.
    pub fn name(self) -> &'static str {
        match self {
            Kind::Object => "object",
            Kind::Array => "array",
            Kind::Map => "map",
            Kind::Set => "set",
        }
    }
}

/// What a container holds at one key.
#[derive(Debug, Clone)]
pub(crate) enum Slot {
    /// Any non-container value.
    Leaf(Value),
    /// A nested node.
    Node(NodeId),
    /// An opaque ref.
    Ref(Ref),
}

impl Slot {
    /// Whether two slots hold the same thing (used to find changed indices).
    pub(crate) fn same(&self, other: &Slot) -> bool {
        match (self, other) {
            (Slot::Leaf(a), Slot::Leaf(b)) => a == b,
            (Slot::Node(a), Slot::Node(b)) => a == b,
            (Slot::Ref(a), Slot::Ref(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    pub(crate) fn child(&self) -> Option<NodeId> {
        match self {
            Slot::Node(id) => Some(*id),
            _ => None,
        }
    }

    /// Key under which the slot sits when it is a set member.
    pub(crate) fn member_key(&self) -> Option<Key> {
        match self {
            Slot::Leaf(value) => value.member_key(),
            Slot::Node(id) => Some(Key::Node(*id)),
            Slot::Ref(_) => None,
        }
    }
}

/// The raw container, with nested containers replaced by node IDs.
#[derive(Debug, Clone)]
pub(crate) enum Container {
    Object(IndexMap<String, Slot>),
    Array(Vec<Slot>),
    Map(IndexMap<Key, Slot>),
    /// Members keyed by [`Slot::member_key`].
    Set(IndexMap<Key, Slot>),
}

impl Container {
    pub(crate) fn kind(&self) -> Kind {
        match self {
            Container::Object(_) => Kind::Object,
            Container::Array(_) => Kind::Array,
            Container::Map(_) => Kind::Map,
            Container::Set(_) => Kind::Set,
        }
    }

    /// Read the slot at `key`. Set members read back as themselves.
    pub(crate) fn get(&self, key: &Key) -> Option<Slot> {
        match self {
            Container::Object(entries) => entries.get(key.to_prop().as_str()).cloned(),
            Container::Array(items) => key.as_index().and_then(|i| items.get(i)).cloned(),
            Container::Map(entries) | Container::Set(entries) => entries.get(key).cloned(),
        }
    }

    /// The form of `key` that this container stores and links children
    /// under: a property name for objects, an index for sequences.
    ///
    /// `None` if the key cannot address a slot here.
    pub(crate) fn canonical_key(&self, key: &Key) -> Option<Key> {
        match self {
            Container::Object(_) => Some(Key::Str(key.to_prop())),
            Container::Array(_) => key.as_index().map(Key::from),
            Container::Map(_) | Container::Set(_) => Some(key.clone()),
        }
    }

    /// Find a key by its path segment.
    pub(crate) fn key_for_segment(&self, segment: &str) -> Option<Key> {
        match self {
            Container::Object(_) => Some(Key::Str(segment.to_owned())),
            Container::Array(_) => segment.parse::<usize>().ok().map(Key::from),
            Container::Map(entries) | Container::Set(entries) => {
                entries.keys().find(|k| k.segment() == segment).cloned()
            }
        }
    }

    pub(crate) fn keys(&self) -> Vec<Key> {
        match self {
            Container::Object(entries) => entries.keys().map(Key::from).collect(),
            Container::Array(items) => (0..items.len()).map(Key::from).collect(),
            Container::Map(entries) | Container::Set(entries) => entries.keys().cloned().collect(),
        }
    }

    pub(crate) fn entries(&self) -> Vec<(Key, Slot)> {
        match self {
            Container::Object(entries) => entries
                .iter()
                .map(|(k, v)| (Key::from(k), v.clone()))
                .collect(),
            Container::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| (Key::from(i), v.clone()))
                .collect(),
            Container::Map(entries) | Container::Set(entries) => {
                entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
            }
        }
    }

    /// Nested nodes with the key they hang under.
    pub(crate) fn children(&self) -> Vec<(Key, NodeId)> {
        self.entries()
            .into_iter()
            .filter_map(|(k, slot)| slot.child().map(|id| (k, id)))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            Container::Object(entries) => entries.len(),
            Container::Array(items) => items.len(),
            Container::Map(entries) | Container::Set(entries) => entries.len(),
        }
    }
}

/// A node in the state graph.
pub(crate) struct Node {
    /// Unique identifier for this node.
    id: NodeId,

    /// The wrapped container.
    pub(crate) container: Container,

    /// Default and per-path listeners.
    pub(crate) subscriptions: Subscriptions,

    /// Nodes holding this one, grouped by the key it sits under.
    pub(crate) parents: IndexMap<Key, IndexSet<NodeId>>,

    /// Memoized snapshot; `None` means it must be rebuilt.
    pub(crate) cached: Option<Snapshot>,

    /// Always rebuild the snapshot.
    pub(crate) disable_cache: bool,

    /// Gate registered through `CreateOptions::on_action`.
    pub(crate) on_action: Option<Rc<Handler>>,
}

impl Node {
    /// Create a new unlinked node.
    pub(crate) fn new(id: NodeId, container: Container, disable_cache: bool) -> Self {
        Self {
            id,
            container,
            subscriptions: Subscriptions::default(),
            parents: IndexMap::new(),
            cached: None,
            disable_cache,
            on_action: None,
        }
    }

    /// Get the node's ID.
    pub(crate) fn id(&self) -> NodeId {
        self.id
    }

    /// Get the node's kind.
    pub(crate) fn kind(&self) -> Kind {
        self.container.kind()
    }

    /// Record that `parent` holds this node under `key`.
    pub(crate) fn add_parent(&mut self, key: Key, parent: NodeId) {
        self.parents.entry(key).or_default().insert(parent);
    }

    /// Forget one parent link.
    pub(crate) fn remove_parent(&mut self, key: &Key, parent: NodeId) {
        if let Some(parents) = self.parents.get_mut(key) {
            parents.shift_remove(&parent);
            if parents.is_empty() {
                self.parents.shift_remove(key);
            }
        }
    }

    /// Whether any node holds this one.
    #[cfg(test)]
    pub(crate) fn is_linked(&self) -> bool {
        !self.parents.is_empty()
    }

    /// Every `(key, parent)` link.
    pub(crate) fn parent_links(&self) -> Vec<(Key, NodeId)> {
        self.parents
            .iter()
            .flat_map(|(key, parents)| parents.iter().map(move |p| (key.clone(), *p)))
            .collect()
    }
}
