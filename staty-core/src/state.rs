//! State
//!
//! A [`State`] is the observable handle on one node. All reads and writes go
//! through it: there is no implicit interception, so every call site that
//! wants reactivity calls [`State::get`], [`State::set`], [`State::delete`]
//! or one of the container mutators.
//!
//! # Writes
//!
//! Every write follows the same steps:
//!
//! 1. Skip the write if the new value is identical to the stored one.
//! 2. Check embedded states (foreign store, cycles) before touching anything.
//! 3. Turn raw containers into nodes, write the slot and fix parent links.
//! 4. Drop this node's cached snapshot.
//! 5. Report the change with a rollback that restores the slot, the links and
//!    the cached snapshot.
//!
//! Sequence mutators rewrite the whole slot list in one step and report every
//! index that changed, plus `length` when it changed, inside one action.

use std::any::Any;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::graph::{Container, Graph, Kind, NodeId, Slot};
use crate::reactive::{ActionName, HandlerOutput, Rollback, SubscribeOptions, Unsubscribe};
use crate::reference::Ref;
use crate::snapshot::Snapshot;
use crate::store::Store;
use crate::value::{Key, Path, Value};

/// Observable handle on one node of a store.
///
/// Cloning a state clones the handle; both clones designate the same node.
#[derive(Clone)]
pub struct State {
    store: Store,
    id: NodeId,
}

impl State {
    pub(crate) fn new(store: Store, id: NodeId) -> Self {
        Self { store, id }
    }

    /// The node's ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The store the node lives in.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The node's container kind.
    pub fn kind(&self) -> Kind {
        self.store
            .inner
            .graph
            .borrow()
            .kind(self.id)
            .unwrap_or(Kind::Object)
    }

    fn slot(&self, key: &Key) -> Option<Slot> {
        self.store
            .inner
            .graph
            .borrow()
            .node(self.id)
            .and_then(|node| node.container.get(key))
    }

    fn value_of(&self, slot: Slot) -> Value {
        match slot {
            Slot::Leaf(value) => value,
            Slot::Node(id) => Value::State(State::new(self.store.clone(), id)),
            Slot::Ref(r) => Value::Ref(r),
        }
    }

    /// Read the value at `key`; missing keys read as `Null`.
    ///
    /// Nested containers come back as [`Value::State`], always the same node
    /// for the same slot. Set members read back as themselves.
    pub fn get(&self, key: impl Into<Key>) -> Value {
        self.slot(&key.into())
            .map(|slot| self.value_of(slot))
            .unwrap_or_default()
    }

    /// Read the value at a dotted path.
    pub fn get_path(&self, path: impl Into<Path>) -> Value {
        let path = path.into();
        let mut current = Value::State(self.clone());
        for segment in path.segments() {
            let Value::State(state) = &current else {
                return Value::Null;
            };
            let Some(key) = state.key_for(segment) else {
                return Value::Null;
            };
            current = state.get(key);
        }
        current
    }

    /// Whether `key` is present.
    pub fn has(&self, key: impl Into<Key>) -> bool {
        self.slot(&key.into()).is_some()
    }

    /// Keys in order: property names, indices, map keys or set members.
    pub fn keys(&self) -> Vec<Key> {
        self.store
            .inner
            .graph
            .borrow()
            .node(self.id)
            .map(|node| node.container.keys())
            .unwrap_or_default()
    }

    /// `(key, value)` pairs in order.
    pub fn entries(&self) -> Vec<(Key, Value)> {
        let entries = self
            .store
            .inner
            .graph
            .borrow()
            .node(self.id)
            .map(|node| node.container.entries())
            .unwrap_or_default();
        entries
            .into_iter()
            .map(|(key, slot)| (key, self.value_of(slot)))
            .collect()
    }

    /// Values in order.
    pub fn values(&self) -> Vec<Value> {
        self.entries().into_iter().map(|(_, value)| value).collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.store
            .inner
            .graph
            .borrow()
            .node(self.id)
            .map_or(0, |node| node.container.len())
    }

    /// Whether the container is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write `value` at `key`.
    ///
    /// Writing a non-ref value over a ref updates the ref in place. Writing
    /// an index past the end of a sequence pads it with `Null`.
    pub fn set(&self, key: impl Into<Key>, value: impl Into<Value>) -> Result<()> {
        let key = key.into();
        let value = value.into();

        match self.kind() {
            Kind::Set => return Err(Error::invalid_state("set members are added, not assigned")),
            Kind::Array if key.as_index().is_none() => {
                return Err(Error::invalid_state(format!("`{key}` is not a sequence index")))
            }
            _ => {}
        }
        let key = self.canonical(key);

        let current = self.slot(&key);
        if let Some(slot) = &current {
            if self.is_identical(slot, &value) {
                return Ok(());
            }
        }
        if let Some(Slot::Ref(r)) = current {
            if !matches!(value, Value::Ref(_)) {
                if r.with(|held: &Value| held.is_identical(&value)) == Some(true) {
                    return Ok(());
                }
                return self.update_ref(&key, &r, Rc::new(RefCell::new(value)));
            }
        }

        self.store.check_insert(Some((self.id, &key)), &value)?;

        let id = self.id;
        let (prior, cached, grew) = {
            let mut graph = self.store.inner.graph.borrow_mut();
            let disable_cache = graph.node(id).is_some_and(|node| node.disable_cache);
            let before = graph.node(id).map_or(0, |node| node.container.len());
            let slot = graph.materialize(value, disable_cache);
            let prior = graph.write(id, &key, Some(slot));
            let after = graph.node(id).map_or(0, |node| node.container.len());
            (prior, graph.take_cache(id), self.kind_of(&graph) == Some(Kind::Array) && after != before)
        };

        let undo_key = key.clone();
        let rollback: Rollback = Box::new(move |graph: &mut Graph| {
            graph.restore(id, &undo_key, prior);
            graph.restore_cache(id, cached);
            graph.invalidate_ancestors(id);
        });

        if grew {
            self.store.atomically(|| {
                self.store.run(id, Path::from_key(&key), rollback)?;
                self.store.run(id, Path::parse("length"), Box::new(|_: &mut Graph| {}))
            })
        } else {
            self.store.run(id, Path::from_key(&key), rollback)
        }
    }

    /// Write `value` at a dotted path. Every segment but the last must lead
    /// to a nested state.
    pub fn set_path(&self, path: impl Into<Path>, value: impl Into<Value>) -> Result<()> {
        let path = path.into();
        let Some((last, parents)) = path.segments().split_last() else {
            return Err(Error::invalid_state("cannot assign to the empty path"));
        };

        let mut target = self.clone();
        for segment in parents {
            let next = target.key_for(segment).map(|key| target.get(key));
            target = match next.unwrap_or_default() {
                Value::State(state) => state,
                other => {
                    return Err(Error::invalid_state(format!(
                        "`{segment}` of `{path}` is a {}",
                        other.kind_name()
                    )))
                }
            };
        }

        let key = target
            .key_for(last)
            .unwrap_or_else(|| Key::from(last.as_str()));
        target.set(key, value)
    }

    /// The form of `key` this node stores its slot under.
    fn canonical(&self, key: Key) -> Key {
        self.store
            .inner
            .graph
            .borrow()
            .node(self.id)
            .and_then(|node| node.container.canonical_key(&key))
            .unwrap_or(key)
    }

    /// Resolve a path segment to one of this node's keys.
    fn key_for(&self, segment: &str) -> Option<Key> {
        self.store
            .inner
            .graph
            .borrow()
            .node(self.id)
            .and_then(|node| node.container.key_for_segment(segment))
    }

    /// Remove `key`. Sequences keep their length and read `Null` there.
    ///
    /// Returns whether anything was removed.
    pub fn delete(&self, key: impl Into<Key>) -> Result<bool> {
        let key = self.canonical(key.into());
        if self.slot(&key).is_none() {
            return Ok(false);
        }

        let id = self.id;
        let (prior, cached) = {
            let mut graph = self.store.inner.graph.borrow_mut();
            let prior = graph.write(id, &key, None);
            (prior, graph.take_cache(id))
        };

        let undo_key = key.clone();
        let rollback: Rollback = Box::new(move |graph: &mut Graph| {
            graph.restore(id, &undo_key, prior);
            graph.restore_cache(id, cached);
            graph.invalidate_ancestors(id);
        });
        self.store.run(id, Path::from_key(&key), rollback)?;
        Ok(true)
    }

    /// Replace the value held by the ref at `key`, keeping the ref itself.
    ///
    /// The ref's own cached snapshot is dropped and the node is notified once.
    pub fn replace_ref<T: 'static>(&self, key: impl Into<Key>, value: T) -> Result<()> {
        let key = self.canonical(key.into());
        match self.slot(&key) {
            Some(Slot::Ref(r)) => self.update_ref(&key, &r, Rc::new(RefCell::new(value))),
            _ => Err(Error::invalid_state(format!("`{key}` does not hold a ref"))),
        }
    }

    fn update_ref(&self, key: &Key, target: &Ref, value: Rc<dyn Any>) -> Result<()> {
        let id = self.id;
        let content = target.replace_any(value);
        let cached = self.store.inner.graph.borrow_mut().take_cache(id);

        let target = target.clone();
        let rollback: Rollback = Box::new(move |graph: &mut Graph| {
            target.restore(content);
            graph.restore_cache(id, cached);
            graph.invalidate_ancestors(id);
        });
        self.store.run(id, Path::from_key(key), rollback)
    }

    // ---- Sequences ----

    /// Append values; returns the new length.
    pub fn push<V: Into<Value>>(&self, values: impl IntoIterator<Item = V>) -> Result<usize> {
        let start = self.len();
        let slots = self.prepare(values, start)?;
        self.rewrite(move |items| {
            items.extend(slots);
            items.len()
        })
    }

    /// Remove and return the last value.
    pub fn pop(&self) -> Result<Option<Value>> {
        let removed = self.rewrite(|items| items.pop())?;
        Ok(removed.map(|slot| self.value_of(slot)))
    }

    /// Remove and return the first value.
    pub fn shift(&self) -> Result<Option<Value>> {
        let removed = self.rewrite(|items| (!items.is_empty()).then(|| items.remove(0)))?;
        Ok(removed.map(|slot| self.value_of(slot)))
    }

    /// Prepend values; returns the new length.
    pub fn unshift<V: Into<Value>>(&self, values: impl IntoIterator<Item = V>) -> Result<usize> {
        let slots = self.prepare(values, 0)?;
        self.rewrite(move |items| {
            items.splice(0..0, slots);
            items.len()
        })
    }

    /// Insert one value at `index` (clamped to the length).
    pub fn insert(&self, index: usize, value: impl Into<Value>) -> Result<()> {
        let index = index.min(self.len());
        let slots = self.prepare([value.into()], index)?;
        self.rewrite(move |items| {
            items.splice(index..index, slots);
        })
    }

    /// Remove and return the value at `index`.
    pub fn remove(&self, index: usize) -> Result<Option<Value>> {
        let removed = self.rewrite(|items| (index < items.len()).then(|| items.remove(index)))?;
        Ok(removed.map(|slot| self.value_of(slot)))
    }

    /// Remove `delete_count` values at `start` and insert `values` there.
    /// Returns the removed values.
    pub fn splice<V: Into<Value>>(
        &self,
        start: usize,
        delete_count: usize,
        values: impl IntoIterator<Item = V>,
    ) -> Result<Vec<Value>> {
        let start = start.min(self.len());
        let slots = self.prepare(values, start)?;
        let removed = self.rewrite(move |items| {
            let end = start.saturating_add(delete_count).min(items.len());
            items.splice(start..end, slots).collect::<Vec<_>>()
        })?;
        Ok(removed.into_iter().map(|slot| self.value_of(slot)).collect())
    }

    /// Reverse the sequence in place.
    pub fn reverse(&self) -> Result<()> {
        self.rewrite(|items| items.reverse())
    }

    /// Sort the sequence in place with a comparator over values.
    ///
    /// `compare` must be a total order. The sort may panic otherwise, for
    /// example when numbers are compared with `partial_cmp` and one is NaN;
    /// use [`f64::total_cmp`] for those.
    pub fn sort_by(&self, mut compare: impl FnMut(&Value, &Value) -> Ordering) -> Result<()> {
        self.require(Kind::Array)?;
        let values = self.values();
        let mut order: Vec<usize> = (0..values.len()).collect();
        order.sort_by(|a, b| compare(&values[*a], &values[*b]));

        self.rewrite(move |items| {
            if items.len() == order.len() {
                let old = std::mem::take(items);
                *items = order.iter().map(|i| old[*i].clone()).collect();
            }
        })
    }

    fn require(&self, kind: Kind) -> Result<()> {
        let found = self.kind();
        if found == kind {
            Ok(())
        } else {
            Err(Error::invalid_state(format!(
                "expected a {} state, found a {}",
                kind.name(),
                found.name()
            )))
        }
    }

    fn kind_of(&self, graph: &Graph) -> Option<Kind> {
        graph.kind(self.id)
    }

    /// Check and materialize values about to land at `start..`.
    fn prepare<V: Into<Value>>(&self, values: impl IntoIterator<Item = V>, start: usize) -> Result<Vec<Slot>> {
        self.require(Kind::Array)?;
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        for (offset, value) in values.iter().enumerate() {
            self.store
                .check_insert(Some((self.id, &Key::from(start + offset))), value)?;
        }

        let mut graph = self.store.inner.graph.borrow_mut();
        let disable_cache = graph.node(self.id).is_some_and(|node| node.disable_cache);
        Ok(values
            .into_iter()
            .map(|value| graph.materialize(value, disable_cache))
            .collect())
    }

    /// Apply `f` to the slot list and report what changed in one action.
    fn rewrite<R>(&self, f: impl FnOnce(&mut Vec<Slot>) -> R) -> Result<R> {
        self.require(Kind::Array)?;
        let id = self.id;

        let (result, old, changed, resized, cached) = {
            let mut graph = self.store.inner.graph.borrow_mut();
            let mut items = match graph.node(id).map(|node| &node.container) {
                Some(Container::Array(items)) => items.clone(),
                _ => return Err(Error::invalid_state("expected a sequence")),
            };
            let result = f(&mut items);

            let old = graph.replace_array(id, items).unwrap_or_default();
            let (changed, resized) = match graph.node(id).map(|node| &node.container) {
                Some(Container::Array(new)) => {
                    let longest = old.len().max(new.len());
                    let changed: Vec<usize> = (0..longest)
                        .filter(|i| match (old.get(*i), new.get(*i)) {
                            (Some(a), Some(b)) => !a.same(b),
                            _ => true,
                        })
                        .collect();
                    (changed, old.len() != new.len())
                }
                _ => (Vec::new(), false),
            };
            let cached = if changed.is_empty() {
                None
            } else {
                graph.take_cache(id)
            };
            (result, old, changed, resized, cached)
        };

        if changed.is_empty() {
            return Ok(result);
        }

        let mut rollback: Option<Rollback> = Some(Box::new(move |graph: &mut Graph| {
            graph.replace_array(id, old);
            graph.restore_cache(id, cached);
            graph.invalidate_ancestors(id);
        }));

        self.store.atomically(|| {
            let mut paths: Vec<Path> = changed
                .iter()
                .map(|i| Path::from_key(&Key::from(*i)))
                .collect();
            if resized {
                paths.push(Path::parse("length"));
            }
            for path in paths {
                let undo = rollback.take().unwrap_or_else(|| Box::new(|_: &mut Graph| {}));
                self.store.run(id, path, undo)?;
            }
            Ok(())
        })?;
        Ok(result)
    }

    // ---- Maps and sets ----

    /// Set `key` of a map.
    pub fn insert_entry(&self, key: impl Into<Key>, value: impl Into<Value>) -> Result<()> {
        self.require(Kind::Map)?;
        self.set(key, value)
    }

    /// Add a member to a set. Returns false if it was already there.
    ///
    /// Scalars are members by value. States are members by identity, and a
    /// raw container becomes a new nested state.
    pub fn add(&self, member: impl Into<Value>) -> Result<bool> {
        self.require(Kind::Set)?;
        let value = member.into();
        let fresh = value.is_container().then(NodeId::new);
        let member = match (fresh, value.member_key()) {
            (Some(node), _) => Key::Node(node),
            (None, Some(key)) => key,
            (None, None) => {
                return Err(Error::invalid_state(format!(
                    "a {} cannot be a set member",
                    value.kind_name()
                )))
            }
        };
        if self.has(member.clone()) {
            return Ok(false);
        }
        self.store.check_insert(Some((self.id, &member)), &value)?;

        let id = self.id;
        let (prior, cached) = {
            let mut graph = self.store.inner.graph.borrow_mut();
            let disable_cache = graph.node(id).is_some_and(|node| node.disable_cache);
            let slot = match fresh {
                Some(node) => graph.materialize_as(node, value, disable_cache),
                None => graph.materialize(value, disable_cache),
            };
            let prior = graph.write(id, &member, Some(slot));
            (prior, graph.take_cache(id))
        };

        let undo_member = member.clone();
        let rollback: Rollback = Box::new(move |graph: &mut Graph| {
            graph.restore(id, &undo_member, prior);
            graph.restore_cache(id, cached);
            graph.invalidate_ancestors(id);
        });
        self.store.run(id, Path::from_key(&member), rollback)?;
        Ok(true)
    }

    /// Whether a set holds `member`. Pass a `&State` to look up a container
    /// member.
    pub fn contains(&self, member: impl Into<Key>) -> bool {
        self.has(member)
    }

    /// Remove every entry inside one action.
    pub fn clear(&self) -> Result<()> {
        if self.kind() == Kind::Array {
            return self.rewrite(|items| items.clear());
        }
        let keys = self.keys();
        self.store.atomically(|| {
            for key in keys {
                self.delete(key)?;
            }
            Ok(())
        })
    }

    // ---- Store shortcuts ----

    /// Same as [`Store::subscribe`] on this state.
    pub fn subscribe<F, O>(&self, handler: F, options: SubscribeOptions) -> Result<Unsubscribe>
    where
        F: Fn(&ActionName) -> O + 'static,
        O: HandlerOutput,
    {
        self.store.subscribe(self, handler, options)
    }

    /// Same as [`Store::snapshot`] on this state.
    pub fn snapshot(&self) -> Result<Snapshot> {
        self.store.snapshot(self)
    }

    /// Same as [`Store::snapshot_path`] on this state.
    pub fn snapshot_path(&self, path: impl Into<Path>) -> Result<Snapshot> {
        self.store.snapshot_path(self, path)
    }

    fn is_identical(&self, slot: &Slot, value: &Value) -> bool {
        match (slot, value) {
            (Slot::Leaf(current), value) => current.is_identical(value),
            (Slot::Node(id), Value::State(state)) => *id == state.id && state.store.ptr_eq(&self.store),
            (Slot::Ref(current), Value::Ref(next)) => current.same_target(next),
            _ => false,
        }
    }
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.store.ptr_eq(&other.store)
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::Cell;

    fn counter(state: &State, options: SubscribeOptions) -> Rc<Cell<u32>> {
        let calls = Rc::new(Cell::new(0));
        let seen = calls.clone();
        state
            .subscribe(move |_| seen.set(seen.get() + 1), options)
            .unwrap();
        calls
    }

    #[test]
    fn nested_reads_return_the_same_node() {
        let store = Store::new();
        let state = store.create(json!({ "a": { "b": 1 } })).unwrap();
        let first = state.get("a");
        let second = state.get("a");
        assert_eq!(first, second);
        assert_eq!(state.get_path("a.b"), Value::from(1));
        assert!(state.get("missing").is_null());
    }

    #[test]
    fn identical_write_is_a_no_op() {
        let store = Store::new();
        let state = store.create(json!({ "a": 1 })).unwrap();
        let calls = counter(&state, SubscribeOptions::new());

        state.set("a", 1).unwrap();
        assert_eq!(calls.get(), 0);
        state.set("a", 2).unwrap();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn delete_on_sequence_leaves_null() {
        let store = Store::new();
        let state = store.create(json!([1, 2, 3])).unwrap();
        assert!(state.delete(1).unwrap());
        assert_eq!(state.len(), 3);
        assert_eq!(state.snapshot().unwrap(), json!([1, null, 3]));
        assert!(!state.delete(7).unwrap());
    }

    #[test]
    fn writing_past_the_end_pads() {
        let store = Store::new();
        let state = store.create(json!([1])).unwrap();
        let length = counter(&state, SubscribeOptions::new().prop("length"));
        state.set(2, "c").unwrap();
        assert_eq!(state.snapshot().unwrap(), json!([1, null, "c"]));
        assert_eq!(length.get(), 1);
    }

    #[test]
    fn sequence_mutators() {
        let store = Store::new();
        let state = store.create(json!([3, 1, 2])).unwrap();

        assert_eq!(state.push([4]).unwrap(), 4);
        assert_eq!(state.pop().unwrap(), Some(Value::from(4)));
        assert_eq!(state.shift().unwrap(), Some(Value::from(3)));
        assert_eq!(state.unshift([0]).unwrap(), 3);
        state.insert(1, 9).unwrap();
        assert_eq!(state.snapshot().unwrap(), json!([0, 9, 1, 2]));

        assert_eq!(state.remove(1).unwrap(), Some(Value::from(9)));
        let removed = state.splice(0, 1, [5, 6]).unwrap();
        assert_eq!(removed, vec![Value::from(0)]);
        assert_eq!(state.snapshot().unwrap(), json!([5, 6, 1, 2]));

        state
            .sort_by(|a, b| {
                let (a, b) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
                a.total_cmp(&b)
            })
            .unwrap();
        assert_eq!(state.snapshot().unwrap(), json!([1, 2, 5, 6]));
        state.reverse().unwrap();
        assert_eq!(state.snapshot().unwrap(), json!([6, 5, 2, 1]));
        state.clear().unwrap();
        assert!(state.is_empty());
    }

    #[test]
    fn sort_by_total_order_handles_nan() {
        let store = Store::new();
        let state = store.create(Value::array([2.0, f64::NAN, 1.0])).unwrap();
        state
            .sort_by(|a, b| {
                let (a, b) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
                a.total_cmp(&b)
            })
            .unwrap();
        assert_eq!(state.get(0), Value::from(1.0));
        assert_eq!(state.get(1), Value::from(2.0));
        assert!(state.get(2).as_f64().is_some_and(f64::is_nan));
    }

    #[test]
    fn sequence_mutator_reports_once_per_action() {
        let store = Store::new();
        let state = store.create(json!([1, 2])).unwrap();
        let calls = counter(&state, SubscribeOptions::new());
        let length = counter(&state, SubscribeOptions::new().prop("length"));
        let first = counter(&state, SubscribeOptions::new().prop("0"));

        state.unshift([0]).unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(length.get(), 1);
        assert_eq!(first.get(), 1);

        state.reverse().unwrap();
        assert_eq!(length.get(), 1);
    }

    #[test]
    fn moved_children_keep_their_links() {
        let store = Store::new();
        let state = store.create(json!([{ "x": 1 }, 2])).unwrap();
        let child = state.get(0).as_state().unwrap().clone();
        let calls = counter(&state, SubscribeOptions::new().prop("1.x"));

        state.reverse().unwrap();
        calls.set(0);
        child.set("x", 2).unwrap();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn map_and_set_operations() {
        let store = Store::new();
        let map = store.create(Value::map([(1, "one")])).unwrap();
        map.insert_entry(2, "two").unwrap();
        assert_eq!(map.keys(), vec![Key::Int(1), Key::Int(2)]);
        assert!(map.delete(1).unwrap());
        assert_eq!(map.snapshot().unwrap(), json!({ "2": "two" }));

        let set = store.create(Value::set(["a"])).unwrap();
        let calls = counter(&set, SubscribeOptions::new());
        assert!(set.add("b").unwrap());
        assert!(!set.add("b").unwrap());
        assert!(set.contains("b"));
        assert_eq!(calls.get(), 1);

        set.clear().unwrap();
        assert!(set.is_empty());
        assert_eq!(calls.get(), 2);
        assert!(matches!(set.set("x", 1), Err(Error::InvalidState { .. })));
    }

    #[test]
    fn set_path_descends() {
        let store = Store::new();
        let state = store.create(json!({ "a": { "b": [1, 2] } })).unwrap();
        state.set_path("a.b.1", 3).unwrap();
        assert_eq!(state.snapshot().unwrap(), json!({ "a": { "b": [1, 3] } }));
        assert!(state.set_path("a.b.0.c", 1).is_err());
        assert!(state.set_path("", 1).is_err());
    }

    #[test]
    fn ref_slot_updates_in_place() {
        let store = Store::new();
        let r = Ref::new(1_u32);
        let state = store.create(Value::object([("r", Value::from(r.clone()))])).unwrap();
        let calls = counter(&state, SubscribeOptions::new());

        state.replace_ref("r", 2_u32).unwrap();
        assert_eq!(r.with(|n: &u32| *n), Some(2));
        assert_eq!(calls.get(), 1);

        state.set("r", "plain").unwrap();
        assert!(state.get("r").as_ref_value().unwrap().ptr_eq(&r));
        assert_eq!(r.with(|v: &Value| v.clone()), Some(Value::from("plain")));
        assert_eq!(calls.get(), 2);

        assert!(state.replace_ref("missing", 0_u8).is_err());
    }

    #[test]
    fn ref_slot_ignores_an_identical_plain_value() {
        let store = Store::new();
        let r = Ref::new(Value::from(1));
        let state = store.create(Value::object([("r", Value::from(r))])).unwrap();
        let calls = counter(&state, SubscribeOptions::new());

        state.set("r", 5).unwrap();
        state.set("r", 5).unwrap();
        assert_eq!(calls.get(), 1);
        state.set("r", 6).unwrap();
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn replaced_sequence_child_is_unlinked_by_string_index() {
        let store = Store::new();
        let root = store.create(json!([{ "x": 1 }])).unwrap();
        let old = root.get(0).as_state().unwrap().clone();
        let calls = counter(&root, SubscribeOptions::new());

        root.set("0", json!({ "x": 2 })).unwrap();
        assert_eq!(calls.get(), 1);
        let before = root.snapshot().unwrap();

        old.set("x", 99).unwrap();
        assert_eq!(calls.get(), 1);
        assert!(root.snapshot().unwrap().ptr_eq(&before));
        old.set("loop", root.clone()).unwrap();
        assert_eq!(root.snapshot().unwrap(), json!([{ "x": 2 }]));
    }

    #[test]
    fn replaced_object_child_is_unlinked_by_integer_key() {
        let store = Store::new();
        let root = store.create(json!({ "1": { "x": 1 } })).unwrap();
        let old = root.get("1").as_state().unwrap().clone();
        let calls = counter(&root, SubscribeOptions::new());

        root.set(1, json!({ "x": 2 })).unwrap();
        old.set("x", 99).unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(root.snapshot().unwrap(), json!({ "1": { "x": 2 } }));
    }

    #[test]
    fn delete_by_any_key_form_unlinks_the_child() {
        let store = Store::new();
        let root = store.create(json!({ "1": { "x": 1 } })).unwrap();
        let old = root.get("1").as_state().unwrap().clone();

        assert!(root.delete(1).unwrap());
        let calls = counter(&root, SubscribeOptions::new());
        old.set("x", 2).unwrap();
        assert_eq!(calls.get(), 0);
        assert_eq!(root.snapshot().unwrap(), json!({}));
    }

    #[test]
    fn sets_hold_nested_states() {
        let store = Store::new();
        let set = store
            .create(Value::set([Value::from(json!({ "id": 1 }))]))
            .unwrap();
        assert_eq!(set.len(), 1);
        let first = set.entries()[0].1.as_state().unwrap().clone();
        let calls = counter(&set, SubscribeOptions::new());

        first.set("id", 2).unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(set.snapshot().unwrap(), json!([{ "id": 2 }]));

        let other = store.create(json!({ "id": 3 })).unwrap();
        assert!(set.add(other.clone()).unwrap());
        assert!(!set.add(other.clone()).unwrap());
        assert!(set.contains(&other));
        assert!(set.add(json!({ "id": 3 })).unwrap());
        assert_eq!(set.len(), 3);

        assert!(set.delete(&first).unwrap());
        calls.set(0);
        first.set("id", 4).unwrap();
        assert_eq!(calls.get(), 0);
        assert!(matches!(set.add(Value::Null), Err(Error::InvalidState { .. })));
        assert!(matches!(set.add(set.clone()), Err(Error::CircularReference { .. })));
    }
}
