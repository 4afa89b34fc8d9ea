//! Snapshot construction.
//!
//! A node's snapshot is built from its slots: leaves are copied, refs
//! project through their own snapshot, nested nodes contribute their own
//! (usually cached) snapshot. The result is stored on the node and handed
//! out again until a propagation walk clears it.

use std::rc::Rc;

use indexmap::IndexMap;
use tracing::trace;

use super::{Frozen, ReadOnlyHook, Snapshot};
use crate::error::{Error, Result};
use crate::graph::{Container, Graph, NodeId, Slot};
use crate::value::{Key, Value};

/// Snapshot of one node, served from its cache when possible.
pub(crate) fn snapshot_node(graph: &mut Graph, id: NodeId, hook: &ReadOnlyHook) -> Result<Snapshot> {
    let node = graph
        .node(id)
        .ok_or_else(|| Error::invalid_state("node does not belong to this store"))?;

    if !node.disable_cache {
        if let Some(cached) = &node.cached {
            trace!(node = id.raw(), "snapshot cache hit");
            return Ok(cached.clone());
        }
    }
    trace!(node = id.raw(), "snapshot cache miss");

    let container = node.container.clone();
    let snapshot = match container {
        Container::Object(entries) => {
            let mut out = IndexMap::with_capacity(entries.len());
            for (prop, slot) in entries {
                out.insert(prop, slot_snapshot(graph, &slot, hook)?);
            }
            Snapshot::Object(Frozen::new(out, hook.clone()))
        }
        Container::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for slot in &items {
                out.push(slot_snapshot(graph, slot, hook)?);
            }
            Snapshot::Array(Frozen::new(out, hook.clone()))
        }
        Container::Map(entries) => {
            let mut out = IndexMap::with_capacity(entries.len());
            for (key, slot) in entries {
                out.insert(key, slot_snapshot(graph, &slot, hook)?);
            }
            Snapshot::Map(Frozen::new(out, hook.clone()))
        }
        Container::Set(members) => {
            let mut out = IndexMap::with_capacity(members.len());
            for (key, slot) in members {
                out.insert(key, slot_snapshot(graph, &slot, hook)?);
            }
            Snapshot::Set(Frozen::new(out, hook.clone()))
        }
    };

    if let Some(node) = graph.node_mut(id) {
        if !node.disable_cache {
            node.cached = Some(snapshot.clone());
        }
    }
    Ok(snapshot)
}

fn slot_snapshot(graph: &mut Graph, slot: &Slot, hook: &ReadOnlyHook) -> Result<Snapshot> {
    match slot {
        Slot::Leaf(value) => snapshot_value(graph, value, hook),
        Slot::Node(child) => snapshot_node(graph, *child, hook),
        Slot::Ref(r) => Ok(r.snapshot()),
    }
}

/// Snapshot of any value: nodes go through [`snapshot_node`], raw data is
/// copied into a detached snapshot.
pub(crate) fn snapshot_value(graph: &mut Graph, value: &Value, hook: &ReadOnlyHook) -> Result<Snapshot> {
    let snapshot = match value {
        Value::Null => Snapshot::Null,
        Value::Bool(b) => Snapshot::Bool(*b),
        Value::Number(n) => Snapshot::Number(*n),
        Value::String(s) => Snapshot::String(Rc::from(s.as_str())),
        Value::Date(t) => Snapshot::Date(*t),
        Value::Pattern(p) => Snapshot::Pattern(p.clone()),
        Value::Bytes(b) => Snapshot::Bytes(Rc::from(b.as_slice())),
        Value::Ref(r) => r.snapshot(),
        Value::State(state) => return snapshot_node(graph, state.id(), hook),
        Value::Object(entries) => {
            let mut out = IndexMap::with_capacity(entries.len());
            for (prop, value) in entries {
                out.insert(prop.clone(), snapshot_value(graph, value, hook)?);
            }
            Snapshot::Object(Frozen::new(out, hook.clone()))
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for value in items {
                out.push(snapshot_value(graph, value, hook)?);
            }
            Snapshot::Array(Frozen::new(out, hook.clone()))
        }
        Value::Map(entries) => {
            let mut out = IndexMap::with_capacity(entries.len());
            for (key, value) in entries {
                out.insert(key.clone(), snapshot_value(graph, value, hook)?);
            }
            Snapshot::Map(Frozen::new(out, hook.clone()))
        }
        Value::Set(members) => {
            let mut out = IndexMap::with_capacity(members.len());
            for member in members {
                // Raw containers have no node yet; each one is a distinct member.
                let key = member.member_key().unwrap_or_else(|| Key::Node(NodeId::new()));
                out.entry(key).or_insert(snapshot_value(graph, member, hook)?);
            }
            Snapshot::Set(Frozen::new(out, hook.clone()))
        }
    };
    Ok(snapshot)
}
