//! Store
//!
//! The store is the execution context every state lives in. It owns the node
//! arena, the stack of open actions, the table of batched handlers and the
//! configuration. A [`State`] is a `(store, node)` pair, so handing a state
//! around hands its store around too; nothing lives in globals.
//!
//! # Borrowing
//!
//! The arena, the action stack and the batch table sit in separate
//! `RefCell`s. Borrows are never held across a call into user code (handlers,
//! gates, read-only hooks), so handlers are free to read and mutate the store
//! they were called from. The only exception is a ref's snapshot projection,
//! which runs while the arena is borrowed and must not touch the store.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::config::{CreateOptions, StoreConfig};
use crate::error::{Error, Result};
use crate::graph::{Graph, Listeners, NodeId, Slot};
use crate::reactive::{
    ActionContext, ActionGuard, ActionName, ActionStack, BatchTable, Callback, Handler, HandlerOutput,
    SubscribeOptions, Unsubscribe,
};
use crate::snapshot::{snapshot_node, snapshot_value, Snapshot};
use crate::state::State;
use crate::value::{Key, Path, Value};

pub(crate) struct StoreInner {
    pub(crate) graph: RefCell<Graph>,
    pub(crate) actions: RefCell<ActionStack>,
    pub(crate) batches: RefCell<BatchTable>,
    pub(crate) config: StoreConfig,
}

/// Shared execution context for a family of states.
///
/// Cloning a store clones the handle.
#[derive(Clone)]
pub struct Store {
    pub(crate) inner: Rc<StoreInner>,
}

/// Anything that designates a node of a store.
pub trait AsState {
    /// The state handle, or `InvalidState` if there is none.
    fn to_state(&self) -> Result<State>;
}

impl AsState for State {
    fn to_state(&self) -> Result<State> {
        Ok(self.clone())
    }
}

impl AsState for Value {
    fn to_state(&self) -> Result<State> {
        self.as_state().cloned()
    }
}

impl<T: AsState + ?Sized> AsState for &T {
    fn to_state(&self) -> Result<State> {
        (**self).to_state()
    }
}

impl Store {
    /// Create a store with the default configuration.
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Create a store with a custom configuration.
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            inner: Rc::new(StoreInner {
                graph: RefCell::new(Graph::new()),
                actions: RefCell::new(ActionStack::default()),
                batches: RefCell::new(BatchTable::default()),
                config,
            }),
        }
    }

    /// Whether both handles point at the same store.
    pub fn ptr_eq(&self, other: &Store) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// The store's configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Wrap a container into a reactive state.
    ///
    /// Wrapping a state of this store returns it unchanged.
    pub fn create(&self, value: impl Into<Value>) -> Result<State> {
        self.create_with(value, CreateOptions::default())
    }

    /// Wrap a container with per-root options.
    pub fn create_with(&self, value: impl Into<Value>, options: CreateOptions) -> Result<State> {
        let state = match value.into() {
            Value::State(state) if state.store().ptr_eq(self) => state,
            Value::State(_) => {
                return Err(Error::InvalidTarget {
                    found: "state of another store",
                })
            }
            value if value.is_container() => {
                self.check_insert(None, &value)?;
                let disable_cache = options.disable_cache.unwrap_or(self.inner.config.disable_cache);
                let slot = self.inner.graph.borrow_mut().materialize(value, disable_cache);
                let Slot::Node(id) = slot else {
                    return Err(Error::InvalidTarget { found: "leaf" });
                };
                debug!(node = id.raw(), "state created");
                State::new(self.clone(), id)
            }
            other => {
                return Err(Error::InvalidTarget {
                    found: other.kind_name(),
                })
            }
        };

        if let Some(on_action) = options.on_action {
            on_action(&state, None)?;

            let store = Rc::downgrade(&self.inner);
            let id = state.id();
            let callback: Callback = Rc::new(move |name: &ActionName| {
                let Some(inner) = store.upgrade() else {
                    return Ok(());
                };
                on_action(&State::new(Store { inner }, id), Some(name))
            });
            let gate = Rc::new(Handler::new(callback, None, true, false));
            if let Some(node) = self.inner.graph.borrow_mut().node_mut(id) {
                node.on_action = Some(gate);
            }
        }

        Ok(state)
    }

    /// Register a handler on a state.
    pub fn subscribe<F, O>(&self, target: impl AsState, handler: F, options: SubscribeOptions) -> Result<Unsubscribe>
    where
        F: Fn(&ActionName) -> O + 'static,
        O: HandlerOutput,
    {
        let state = self.resolve(&target)?;
        if options.batch && options.before {
            return Err(Error::invalid_state("batch and before cannot be combined"));
        }
        if options.autorun && options.before {
            return Err(Error::invalid_state("autorun and before cannot be combined"));
        }

        let callback: Callback = Rc::new(move |name: &ActionName| handler(name).into_result());
        let handler = Rc::new(Handler::new(callback, options.filter, options.before, options.batch));

        let paths: Vec<Option<Path>> = if options.props.is_empty() {
            vec![None]
        } else {
            options.props.into_iter().map(Some).collect()
        };

        {
            let mut graph = self.inner.graph.borrow_mut();
            let node = graph
                .node_mut(state.id())
                .ok_or_else(|| Error::invalid_state("node does not belong to this store"))?;
            for path in &paths {
                node.subscriptions.insert(path.as_ref(), handler.clone());
            }
        }

        if options.autorun {
            let name = ActionName::default();
            if handler.is_batched() {
                self.enqueue_batch(handler.clone(), name);
            } else if let Err(err) = handler.call(&name) {
                self.report(&name, err);
            }
        }

        Ok(Unsubscribe::new(
            Rc::downgrade(&self.inner),
            state.id(),
            paths,
            handler.id(),
        ))
    }

    /// Read-only projection of a state.
    pub fn snapshot(&self, target: impl AsState) -> Result<Snapshot> {
        let state = self.resolve(&target)?;
        let mut graph = self.inner.graph.borrow_mut();
        snapshot_node(&mut graph, state.id(), &self.inner.config.on_read_only)
    }

    /// Read-only projection of the value at `path` under a state.
    ///
    /// Refs along the way are entered through their own snapshot. A missing
    /// segment yields `Snapshot::Null`.
    pub fn snapshot_path(&self, target: impl AsState, path: impl Into<Path>) -> Result<Snapshot> {
        let state = self.resolve(&target)?;
        let hook = &self.inner.config.on_read_only;
        let mut graph = self.inner.graph.borrow_mut();

        let mut id = state.id();
        let mut rest = path.into();
        loop {
            let Some((segment, tail)) = rest.split_first() else {
                return snapshot_node(&mut graph, id, hook);
            };
            let slot = {
                let node = graph
                    .node(id)
                    .ok_or_else(|| Error::invalid_state("node does not belong to this store"))?;
                node.container
                    .key_for_segment(segment)
                    .and_then(|key| node.container.get(&key))
            };
            match slot {
                None => return Ok(Snapshot::Null),
                Some(Slot::Node(child)) => {
                    id = child;
                    rest = tail;
                }
                Some(Slot::Ref(r)) => return Ok(r.snapshot().get_path(&tail)),
                Some(Slot::Leaf(value)) if tail.is_empty() => {
                    return snapshot_value(&mut graph, &value, hook)
                }
                Some(Slot::Leaf(_)) => return Ok(Snapshot::Null),
            }
        }
    }

    /// One snapshot per path, in order.
    pub fn snapshot_paths<P: Into<Path>>(
        &self,
        target: impl AsState,
        paths: impl IntoIterator<Item = P>,
    ) -> Result<Vec<Snapshot>> {
        let state = self.resolve(&target)?;
        paths
            .into_iter()
            .map(|path| self.snapshot_path(&state, path))
            .collect()
    }

    /// Handler counts of a state and its nested states.
    pub fn listeners(&self, target: impl AsState) -> Result<Listeners> {
        let state = self.resolve(&target)?;
        let graph = self.inner.graph.borrow();
        Listeners::collect(&graph, state.id())
            .ok_or_else(|| Error::invalid_state("node does not belong to this store"))
    }

    /// Run `f` as one atomic action named `"_"`.
    pub fn action<T>(&self, f: impl FnOnce(&ActionContext<'_>) -> Result<T>) -> Result<T> {
        self.action_named(ActionName::default(), f)
    }

    /// Run `f` as one atomic action.
    ///
    /// Handlers are notified once, after `f` returns and every `before`
    /// handler has accepted the action. If `f` or a `before` handler fails,
    /// every mutation made by `f` is undone and the error is returned.
    pub fn action_named<T>(
        &self,
        name: impl Into<ActionName>,
        f: impl FnOnce(&ActionContext<'_>) -> Result<T>,
    ) -> Result<T> {
        let name = name.into();
        let id = self.open_action(name.clone(), false)?;
        let guard = ActionGuard::new(self, id);
        let cx = ActionContext::new(self, id, name);
        match f(&cx) {
            Ok(value) => {
                guard.complete()?;
                Ok(value)
            }
            Err(err) => {
                guard.abort();
                Err(err)
            }
        }
    }

    /// Same as [`Store::action`].
    pub fn transaction<T>(&self, f: impl FnOnce(&ActionContext<'_>) -> Result<T>) -> Result<T> {
        self.action(f)
    }

    /// Same as [`Store::action_named`].
    pub fn transaction_named<T>(
        &self,
        name: impl Into<ActionName>,
        f: impl FnOnce(&ActionContext<'_>) -> Result<T>,
    ) -> Result<T> {
        self.action_named(name, f)
    }

    /// Run every task queued on the scheduler, batched handlers included.
    pub fn tick(&self) -> usize {
        self.inner.config.scheduler.drain()
    }

    /// Number of tasks waiting for the next tick.
    pub fn pending_ticks(&self) -> usize {
        self.inner.config.scheduler.pending()
    }

    /// Number of nodes ever created in this store.
    pub fn node_count(&self) -> usize {
        self.inner.graph.borrow().node_count()
    }

    fn resolve(&self, target: &impl AsState) -> Result<State> {
        let state = target.to_state()?;
        self.check_owned(&state)?;
        Ok(state)
    }

    fn check_owned(&self, state: &State) -> Result<()> {
        if state.store().ptr_eq(self) {
            Ok(())
        } else {
            Err(Error::invalid_state("state belongs to another store"))
        }
    }

    /// Validate a value about to be stored at `key` of `parent` (or as a new
    /// root): embedded states must belong to this store and must not be
    /// `parent` or one of its ancestors.
    pub(crate) fn check_insert(&self, parent: Option<(NodeId, &Key)>, value: &Value) -> Result<()> {
        let mut embedded = Vec::new();
        collect_states(value, Path::root(), &mut embedded)?;

        for (at, state) in embedded {
            if !state.store().ptr_eq(self) {
                return Err(Error::InvalidTarget {
                    found: "state of another store",
                });
            }
            let Some((parent, key)) = parent else {
                continue;
            };
            let cycle = self
                .inner
                .graph
                .borrow()
                .find_cycle(parent, state.id(), at.prefixed(key));
            if let Some(path) = cycle {
                let value = self.snapshot(state)?;
                return Err(Error::CircularReference { path, value });
            }
        }
        Ok(())
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

/// Gather the states embedded in a raw value, with their location, and
/// reject set members that have no identity.
fn collect_states<'a>(value: &'a Value, at: Path, out: &mut Vec<(Path, &'a State)>) -> Result<()> {
    match value {
        Value::State(state) => out.push((at, state)),
        Value::Object(entries) => {
            for (prop, value) in entries {
                collect_states(value, at.child(prop.as_str()), out)?;
            }
        }
        Value::Array(items) => {
            for (index, value) in items.iter().enumerate() {
                collect_states(value, at.child(index.to_string()), out)?;
            }
        }
        Value::Map(entries) => {
            for (key, value) in entries {
                collect_states(value, at.child(key.segment()), out)?;
            }
        }
        Value::Set(members) => {
            for member in members {
                let segment = match member.member_key() {
                    Some(key) => key.segment(),
                    // Raw containers only get their node identity when stored.
                    None if member.is_container() => "#new".to_owned(),
                    None => {
                        return Err(Error::invalid_state(format!(
                            "a {} cannot be a set member",
                            member.kind_name()
                        )))
                    }
                };
                collect_states(member, at.child(segment), out)?;
            }
        }
        _ => {}
    }
    Ok(())
}
