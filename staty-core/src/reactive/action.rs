//! Actions
//!
//! An action is a dynamically scoped, atomic unit of mutation. While it is
//! open, every mutation records a rollback closure in the action's history
//! and every interested handler is collected (once) into the action's
//! handler sets. Nothing is dispatched until the action completes.
//!
//! # Stack
//!
//! Each store keeps a stack of open actions, the moral equivalent of a
//! reactive context stack: entering an action pushes a frame, leaving it
//! pops the frame. [`ActionGuard`] makes sure the frame is popped (and its
//! work rolled back) on every exit path, including a panic.
//!
//! # Lifecycle
//!
//! `Open` → `Done` | `Cancelled`. A frame that was cancelled stays on the
//! stack until its closure returns, but no longer collects anything.

use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use super::subscriber::{Handler, HandlerId};
use crate::graph::Graph;
use crate::store::Store;

/// A unique, identity-compared action name.
#[derive(Clone)]
pub struct Symbol {
    id: u64,
    description: Rc<str>,
}

impl Symbol {
    /// Create a fresh symbol. Two symbols with the same description are
    /// still different symbols.
    pub fn new(description: impl Into<Rc<str>>) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self {
            id: COUNTER.fetch_add(1, Ordering::Relaxed),
            description: description.into(),
        }
    }

    /// The symbol naming every auto-opened action.
    pub fn internal() -> Self {
        thread_local! {
            static INTERNAL: Symbol = Symbol {
                id: 0,
                description: Rc::from("internal action"),
            };
        }
        INTERNAL.with(Symbol::clone)
    }

    /// The symbol's description.
    pub fn description(&self) -> &str {
        &self.description
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Symbol {}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.description)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.description)
    }
}

/// Name of an action, handed to filters and handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionName {
    /// A string name, matched by pattern filters.
    Named(String),
    /// A symbol name, matched by identity only.
    Symbol(Symbol),
}

impl ActionName {
    /// Name of auto-opened actions.
    pub fn internal() -> Self {
        ActionName::Symbol(Symbol::internal())
    }

    /// Whether this is the auto-action name.
    pub fn is_internal(&self) -> bool {
        matches!(self, ActionName::Symbol(s) if *s == Symbol::internal())
    }

    /// The string name, if this is not a symbol.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ActionName::Named(n) => Some(n),
            ActionName::Symbol(_) => None,
        }
    }
}

impl Default for ActionName {
    fn default() -> Self {
        ActionName::Named("_".to_owned())
    }
}

impl fmt::Display for ActionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionName::Named(n) => f.write_str(n),
            ActionName::Symbol(s) => s.fmt(f),
        }
    }
}

impl From<&str> for ActionName {
    fn from(value: &str) -> Self {
        ActionName::Named(value.to_owned())
    }
}

impl From<String> for ActionName {
    fn from(value: String) -> Self {
        ActionName::Named(value)
    }
}

impl From<Symbol> for ActionName {
    fn from(value: Symbol) -> Self {
        ActionName::Symbol(value)
    }
}

/// Identifier of an action frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionId(u64);

impl ActionId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Undo closure recorded by a mutation.
pub(crate) type Rollback = Box<dyn FnOnce(&mut Graph)>;

/// Lifecycle state of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionState {
    /// Collecting mutations.
    Open,
    /// Completed and dispatched (or handed to the enclosing action).
    Done,
    /// Rolled back.
    Cancelled,
}

/// One frame of the action stack.
pub(crate) struct Action {
    pub(crate) id: ActionId,
    pub(crate) name: ActionName,
    pub(crate) internal: bool,
    pub(crate) state: ActionState,
    pub(crate) in_rollback: bool,
    pub(crate) before: IndexMap<HandlerId, Rc<Handler>>,
    pub(crate) handlers: IndexMap<HandlerId, Rc<Handler>>,
    pub(crate) history: Vec<Rollback>,
}

impl Action {
    fn new(name: ActionName, internal: bool) -> Self {
        Self {
            id: ActionId::new(),
            name,
            internal,
            state: ActionState::Open,
            in_rollback: false,
            before: IndexMap::new(),
            handlers: IndexMap::new(),
            history: Vec::new(),
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.state == ActionState::Open
    }

    /// Collect a handler into the right set.
    pub(crate) fn add(&mut self, handler: Rc<Handler>) {
        let set = if handler.is_before() {
            &mut self.before
        } else {
            &mut self.handlers
        };
        set.entry(handler.id()).or_insert(handler);
    }

    /// Take over the normal handlers and history of a completed inner action.
    pub(crate) fn absorb(&mut self, inner: Action) {
        for (id, handler) in inner.handlers {
            self.handlers.entry(id).or_insert(handler);
        }
        self.history.extend(inner.history);
    }
}

/// Per-store stack of action frames.
#[derive(Default)]
pub(crate) struct ActionStack {
    frames: Vec<Action>,
}

impl ActionStack {
    pub(crate) fn push(&mut self, name: ActionName, internal: bool) -> ActionId {
        let action = Action::new(name, internal);
        let id = action.id;
        self.frames.push(action);
        id
    }

    /// Remove a frame; it is normally the top one.
    pub(crate) fn pop(&mut self, id: ActionId) -> Option<Action> {
        let index = self.frames.iter().rposition(|a| a.id == id)?;
        debug_assert_eq!(index + 1, self.frames.len(), "action stack popped out of order");
        Some(self.frames.remove(index))
    }

    pub(crate) fn get(&self, id: ActionId) -> Option<&Action> {
        self.frames.iter().rev().find(|a| a.id == id)
    }

    pub(crate) fn get_mut(&mut self, id: ActionId) -> Option<&mut Action> {
        self.frames.iter_mut().rev().find(|a| a.id == id)
    }

    pub(crate) fn top(&self) -> Option<&Action> {
        self.frames.last()
    }

    /// The top frame, if it is still collecting.
    pub(crate) fn current(&self) -> Option<&Action> {
        self.frames.last().filter(|a| a.is_open())
    }

    /// The nearest open frame, searching down from the top.
    pub(crate) fn nearest_open_mut(&mut self) -> Option<&mut Action> {
        self.frames.iter_mut().rev().find(|a| a.is_open())
    }

    /// The nearest open explicit frame.
    pub(crate) fn running_explicit(&self) -> Option<&Action> {
        self.frames.iter().rev().find(|a| a.is_open() && !a.internal)
    }

    pub(crate) fn depth(&self) -> usize {
        self.frames.len()
    }
}

/// Handle given to an action body.
pub struct ActionContext<'a> {
    store: &'a Store,
    id: ActionId,
    name: ActionName,
}

impl<'a> ActionContext<'a> {
    pub(crate) fn new(store: &'a Store, id: ActionId, name: ActionName) -> Self {
        Self { store, id, name }
    }

    /// Roll back everything the action did so far and discard its pending
    /// notifications. Later mutations in the same body are not part of it.
    pub fn cancel(&self) {
        self.store.cancel_action(self.id);
    }

    /// Whether [`ActionContext::cancel`] was called.
    pub fn is_cancelled(&self) -> bool {
        self.store.action_state(self.id) == Some(ActionState::Cancelled)
    }

    /// The action's name.
    pub fn name(&self) -> &ActionName {
        &self.name
    }

    /// The store the action runs in.
    pub fn store(&self) -> &Store {
        self.store
    }
}

/// Scoped owner of an action frame.
///
/// Completing the guard runs the action's completion protocol; dropping it
/// without completing rolls the action back and pops it.
pub(crate) struct ActionGuard<'a> {
    store: &'a Store,
    id: ActionId,
    settled: bool,
}

impl<'a> ActionGuard<'a> {
    pub(crate) fn new(store: &'a Store, id: ActionId) -> Self {
        Self {
            store,
            id,
            settled: false,
        }
    }

    /// Run `before` handlers, then dispatch or hand over to the parent.
    pub(crate) fn complete(mut self) -> crate::Result<()> {
        let result = self.store.finish_action(self.id);
        self.settled = true;
        result
    }

    /// Roll back (unless already cancelled) and pop.
    pub(crate) fn abort(mut self) {
        self.store.abort_action(self.id);
        self.settled = true;
    }
}

impl Drop for ActionGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.store.abort_action(self.id);
        }
    }
}
