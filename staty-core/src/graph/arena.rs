//! Node Arena
//!
//! The arena owns every node of a store, indexed by [`NodeId`]. Parent links
//! are stored on the child as `(key, parent id)` pairs, so nodes never hold
//! pointers to each other and a node that loses its last parent is simply
//! unlinked, not destroyed: a caller holding its handle can keep using it.
//!
//! # Invariants
//!
//! - The parent-link graph is a DAG. Before a node is linked under a parent,
//!   [`Graph::find_cycle`] walks up from the parent through all of its
//!   ancestors; if the candidate child is met, the link is refused.
//! - Every `Slot::Node(child)` stored at `key` in node `p` is mirrored by a
//!   `(key, p)` entry in `child`'s parent links, and vice versa.
//!
//! # Propagation
//!
//! [`Graph::propagate`] starts at the mutated node with the path of the
//! changed slot and walks up every parent link, prefixing the path with the
//! key the child hangs under. Every visited node loses its cached snapshot
//! and contributes the handlers whose bucket matches the path.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::trace;

use super::node::{Container, Kind, Node, NodeId, Slot};
use crate::reactive::{ActionName, Handler};
use crate::snapshot::Snapshot;
use crate::value::{Key, Path, Value};

/// What a slot looked like before a single-key write.
pub(crate) struct Prior {
    index: Option<usize>,
    slot: Option<Slot>,
    len: usize,
}

/// Handlers gathered by one propagation walk.
#[derive(Default)]
pub(crate) struct Collected {
    pub(crate) before: Vec<Rc<Handler>>,
    pub(crate) handlers: Vec<Rc<Handler>>,
}

/// Arena of every node in a store.
#[derive(Default)]
pub(crate) struct Graph {
    nodes: HashMap<NodeId, Node>,
}

impl Graph {
    /// Create an empty arena.
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add a node to the arena.
    pub(crate) fn add_node(&mut self, node: Node) -> NodeId {
        let id = node.id();
        self.nodes.insert(id, node);
        id
    }

    /// Get a reference to a node.
    pub(crate) fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Get a mutable reference to a node.
    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    /// Get the total number of nodes in the arena.
    pub(crate) fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Link `child` under `parent` at `key`.
    pub(crate) fn link(&mut self, child: NodeId, key: Key, parent: NodeId) {
        if let Some(node) = self.nodes.get_mut(&child) {
            trace!(child = child.raw(), parent = parent.raw(), key = %key, "link");
            node.add_parent(key, parent);
        }
    }

    /// Remove the link of `child` under `parent` at `key`.
    pub(crate) fn unlink(&mut self, child: NodeId, key: &Key, parent: NodeId) {
        if let Some(node) = self.nodes.get_mut(&child) {
            trace!(child = child.raw(), parent = parent.raw(), key = %key, "unlink");
            node.remove_parent(key, parent);
        }
    }

    /// Look for `target` among `start` and its ancestors.
    ///
    /// `suffix` is the location, relative to `start`, where `target` is about
    /// to be linked. On a hit, the returned path runs from `target` down to
    /// that location.
    pub(crate) fn find_cycle(&self, start: NodeId, target: NodeId, suffix: Path) -> Option<Path> {
        let mut visited = HashSet::new();
        let mut stack = vec![(start, suffix)];
        while let Some((id, path)) = stack.pop() {
            if id == target {
                return Some(path);
            }
            if !visited.insert(id) {
                continue;
            }
            if let Some(node) = self.nodes.get(&id) {
                for (key, parent) in node.parent_links() {
                    stack.push((parent, path.prefixed(&key)));
                }
            }
        }
        None
    }

    /// Turn a value into a slot, creating nodes for raw containers.
    ///
    /// Nested children are linked to their new parents; the returned slot
    /// itself is not linked anywhere yet.
    pub(crate) fn materialize(&mut self, value: Value, disable_cache: bool) -> Slot {
        match value {
            Value::State(state) => Slot::Node(state.id()),
            Value::Ref(r) => Slot::Ref(r),
            container if container.is_container() => {
                self.materialize_as(NodeId::new(), container, disable_cache)
            }
            leaf => Slot::Leaf(leaf),
        }
    }

    /// Like [`Graph::materialize`], but a raw container becomes node `id`.
    pub(crate) fn materialize_as(&mut self, id: NodeId, value: Value, disable_cache: bool) -> Slot {
        match value {
            Value::State(state) => Slot::Node(state.id()),
            Value::Ref(r) => Slot::Ref(r),
            Value::Object(entries) => {
                let mut slots = IndexMap::with_capacity(entries.len());
                for (prop, value) in entries {
                    let slot = self.materialize(value, disable_cache);
                    if let Some(child) = slot.child() {
                        self.link(child, Key::Str(prop.clone()), id);
                    }
                    slots.insert(prop, slot);
                }
                self.add_node(Node::new(id, Container::Object(slots), disable_cache));
                Slot::Node(id)
            }
            Value::Array(items) => {
                let mut slots = Vec::with_capacity(items.len());
                for (index, value) in items.into_iter().enumerate() {
                    let slot = self.materialize(value, disable_cache);
                    if let Some(child) = slot.child() {
                        self.link(child, Key::from(index), id);
                    }
                    slots.push(slot);
                }
                self.add_node(Node::new(id, Container::Array(slots), disable_cache));
                Slot::Node(id)
            }
            Value::Map(entries) => {
                let mut slots = IndexMap::with_capacity(entries.len());
                for (key, value) in entries {
                    let slot = self.materialize(value, disable_cache);
                    if let Some(child) = slot.child() {
                        self.link(child, key.clone(), id);
                    }
                    slots.insert(key, slot);
                }
                self.add_node(Node::new(id, Container::Map(slots), disable_cache));
                Slot::Node(id)
            }
            Value::Set(members) => {
                let mut slots = IndexMap::with_capacity(members.len());
                for member in members {
                    let slot = self.materialize(member, disable_cache);
                    let Some(key) = slot.member_key() else {
                        continue;
                    };
                    if slots.contains_key(&key) {
                        continue;
                    }
                    if let Some(child) = slot.child() {
                        self.link(child, key.clone(), id);
                    }
                    slots.insert(key, slot);
                }
                self.add_node(Node::new(id, Container::Set(slots), disable_cache));
                Slot::Node(id)
            }
            leaf => Slot::Leaf(leaf),
        }
    }

    /// Write (or with `None`, delete) one slot, keeping parent links in sync.
    pub(crate) fn write(&mut self, id: NodeId, key: &Key, slot: Option<Slot>) -> Prior {
        let incoming = slot.as_ref().and_then(Slot::child);
        let Some(node) = self.nodes.get_mut(&id) else {
            return Prior {
                index: None,
                slot: None,
                len: 0,
            };
        };
        let len = node.container.len();
        let Some(key) = node.container.canonical_key(key) else {
            return Prior {
                index: None,
                slot: None,
                len,
            };
        };
        let key = &key;

        let (index, old) = match &mut node.container {
            Container::Object(entries) => {
                let prop = key.to_prop();
                match slot {
                    Some(slot) => {
                        let (index, old) = entries.insert_full(prop, slot);
                        (Some(index), old)
                    }
                    None => match entries.shift_remove_full(prop.as_str()) {
                        Some((index, _, old)) => (Some(index), Some(old)),
                        None => (None, None),
                    },
                }
            }
            Container::Map(entries) | Container::Set(entries) => match slot {
                Some(slot) => {
                    let (index, old) = entries.insert_full(key.clone(), slot);
                    (Some(index), old)
                }
                None => match entries.shift_remove_full(key) {
                    Some((index, _, old)) => (Some(index), Some(old)),
                    None => (None, None),
                },
            },
            Container::Array(items) => {
                let Some(index) = key.as_index() else {
                    return Prior {
                        index: None,
                        slot: None,
                        len,
                    };
                };
                match slot {
                    Some(slot) if index < items.len() => {
                        (Some(index), Some(std::mem::replace(&mut items[index], slot)))
                    }
                    Some(slot) => {
                        items.resize(index, Slot::Leaf(Value::Null));
                        items.push(slot);
                        (Some(index), None)
                    }
                    None if index < items.len() => (
                        Some(index),
                        Some(std::mem::replace(&mut items[index], Slot::Leaf(Value::Null))),
                    ),
                    None => (None, None),
                }
            }
        };

        if let Some(child) = old.as_ref().and_then(Slot::child) {
            self.unlink(child, key, id);
        }
        if let Some(child) = incoming {
            self.link(child, key.clone(), id);
        }

        Prior {
            index,
            slot: old,
            len,
        }
    }

    /// Undo a [`Graph::write`].
    pub(crate) fn restore(&mut self, id: NodeId, key: &Key, prior: Prior) {
        let restored = prior.slot.as_ref().and_then(Slot::child);
        let Some(node) = self.nodes.get_mut(&id) else {
            return;
        };
        let Some(key) = node.container.canonical_key(key) else {
            return;
        };
        let key = &key;

        let current = match &mut node.container {
            Container::Object(entries) => {
                let prop = key.to_prop();
                match prior.slot {
                    None => entries.shift_remove(prop.as_str()),
                    Some(slot) => match entries.get_mut(prop.as_str()) {
                        Some(existing) => Some(std::mem::replace(existing, slot)),
                        None => {
                            let index = prior.index.unwrap_or(entries.len()).min(entries.len());
                            entries.shift_insert(index, prop, slot);
                            None
                        }
                    },
                }
            }
            Container::Map(entries) | Container::Set(entries) => match prior.slot {
                None => entries.shift_remove(key),
                Some(slot) => match entries.get_mut(key) {
                    Some(existing) => Some(std::mem::replace(existing, slot)),
                    None => {
                        let index = prior.index.unwrap_or(entries.len()).min(entries.len());
                        entries.shift_insert(index, key.clone(), slot);
                        None
                    }
                },
            },
            Container::Array(items) => {
                let mut current = None;
                if let Some(index) = key.as_index() {
                    if index < items.len() {
                        current = Some(match prior.slot {
                            Some(slot) => std::mem::replace(&mut items[index], slot),
                            None => items[index].clone(),
                        });
                    }
                }
                items.truncate(prior.len);
                current
            }
        };

        if let Some(child) = current.as_ref().and_then(Slot::child) {
            self.unlink(child, key, id);
        }
        if let Some(child) = restored {
            self.link(child, key.clone(), id);
        }
    }

    /// Replace a whole sequence, relinking every child at its new index.
    ///
    /// Returns the previous slots, or `None` if the node is not a sequence.
    pub(crate) fn replace_array(&mut self, id: NodeId, slots: Vec<Slot>) -> Option<Vec<Slot>> {
        let node = self.nodes.get_mut(&id)?;
        let Container::Array(items) = &mut node.container else {
            return None;
        };
        let old = std::mem::replace(items, slots);
        let new_children: Vec<(usize, NodeId)> = items
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.child().map(|c| (i, c)))
            .collect();

        for (index, slot) in old.iter().enumerate() {
            if let Some(child) = slot.child() {
                self.unlink(child, &Key::from(index), id);
            }
        }
        for (index, child) in new_children {
            self.link(child, Key::from(index), id);
        }
        Some(old)
    }

    /// Drop a node's cached snapshot, returning it.
    pub(crate) fn take_cache(&mut self, id: NodeId) -> Option<Snapshot> {
        self.nodes.get_mut(&id).and_then(|node| node.cached.take())
    }

    /// Put back a cached snapshot saved by [`Graph::take_cache`].
    pub(crate) fn restore_cache(&mut self, id: NodeId, cached: Option<Snapshot>) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.cached = cached;
        }
    }

    /// Drop the cached snapshot of every ancestor of `id`.
    pub(crate) fn invalidate_ancestors(&mut self, id: NodeId) {
        let mut visited = HashSet::new();
        let mut stack: Vec<NodeId> = self
            .nodes
            .get(&id)
            .map(|n| n.parent_links().into_iter().map(|(_, p)| p).collect())
            .unwrap_or_default();
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            if let Some(node) = self.nodes.get_mut(&id) {
                node.cached = None;
                stack.extend(node.parent_links().into_iter().map(|(_, p)| p));
            }
        }
    }

    /// Walk from a mutated node up to every root, invalidating caches and
    /// collecting the handlers that want to hear about `path`.
    pub(crate) fn propagate(&mut self, id: NodeId, path: Path, name: &ActionName) -> Collected {
        let mut collected = Collected::default();
        let mut stack = vec![(id, path)];

        while let Some((id, path)) = stack.pop() {
            let Some(node) = self.nodes.get_mut(&id) else {
                continue;
            };
            node.cached = None;

            if let Some(gate) = &node.on_action {
                collected.before.push(gate.clone());
            }
            for handler in node.subscriptions.matching(&path) {
                if !handler.accepts(name) {
                    continue;
                }
                if handler.is_before() {
                    collected.before.push(handler.clone());
                } else {
                    collected.handlers.push(handler.clone());
                }
            }

            trace!(node = id.raw(), path = %path, "propagate");
            for (key, parent) in node.parent_links().into_iter().rev() {
                stack.push((parent, path.prefixed(&key)));
            }
        }

        collected
    }

    /// Kind of a node.
    pub(crate) fn kind(&self, id: NodeId) -> Option<Kind> {
        self.nodes.get(&id).map(Node::kind)
    }
}
