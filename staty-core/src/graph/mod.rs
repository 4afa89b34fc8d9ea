//! State Graph
//!
//! This module implements the graph of reactive nodes that make up a store.
//!
//! # Overview
//!
//! The state graph is a directed acyclic graph (DAG) where:
//!
//! - Nodes are wrapped containers (objects, sequences, maps, sets)
//! - Edges are parent links: if node B is stored at key `k` of node A, B
//!   records `(k, A)` as one of its parents
//!
//! When a slot changes, we walk the parent links upward from the mutated
//! node, clearing cached snapshots and collecting the handlers whose path
//! matches the change.
//!
//! # Design Decisions
//!
//! 1. Nodes live in a central arena rather than pointing at each other:
//!    - Child slots hold a [`NodeId`], so no reference cycles can form
//!    - Cycle detection is a walk over integer IDs
//!    - A node can sit under several parents (and keys) at once
//!
//! 2. The arena is indexed by node ID for O(1) lookups.
//!
//! 3. Only upward edges are stored on the node; downward edges are the
//!    container's own slots.

mod arena;
mod listeners;
mod node;

pub(crate) use arena::Graph;
pub use listeners::Listeners;
pub(crate) use node::{Container, Slot};
pub use node::{Kind, NodeId};
