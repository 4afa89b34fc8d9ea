//! Subscription options and handles.

use std::cell::Cell;
use std::fmt;
use std::rc::Weak;

use super::filter::Filter;
use super::subscriber::HandlerId;
use crate::graph::NodeId;
use crate::store::StoreInner;
use crate::value::Path;

/// How a handler is registered.
#[derive(Clone, Debug, Default)]
pub struct SubscribeOptions {
    /// Paths to watch; empty means every change reaching the node.
    pub props: Vec<Path>,
    /// Only actions whose name passes the filter notify the handler.
    pub filter: Option<Filter>,
    /// Defer the call to the next scheduler tick, coalescing repeats.
    pub batch: bool,
    /// Run as a validation gate before the action completes.
    pub before: bool,
    /// Call the handler once right away.
    pub autorun: bool,
}

impl SubscribeOptions {
    /// Default options: every change, called at action completion.
    pub fn new() -> Self {
        Self::default()
    }

    /// Watch one more path, given in dotted form.
    pub fn prop(mut self, path: impl Into<Path>) -> Self {
        self.props.push(path.into());
        self
    }

    /// Watch several paths with one handler.
    pub fn props<P: Into<Path>>(mut self, paths: impl IntoIterator<Item = P>) -> Self {
        self.props.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Restrict the handler to some action names.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Defer calls to the next scheduler tick.
    pub fn batch(mut self) -> Self {
        self.batch = true;
        self
    }

    /// Run before the action completes; an error vetoes the action.
    pub fn before(mut self) -> Self {
        self.before = true;
        self
    }

    /// Call the handler once at registration.
    pub fn autorun(mut self) -> Self {
        self.autorun = true;
        self
    }
}

/// Handle returned by `subscribe`; removes the registration on demand.
///
/// Dropping the handle keeps the subscription alive.
pub struct Unsubscribe {
    store: Weak<StoreInner>,
    node: NodeId,
    paths: Vec<Option<Path>>,
    id: HandlerId,
    done: Cell<bool>,
}

impl Unsubscribe {
    pub(crate) fn new(store: Weak<StoreInner>, node: NodeId, paths: Vec<Option<Path>>, id: HandlerId) -> Self {
        Self {
            store,
            node,
            paths,
            id,
            done: Cell::new(false),
        }
    }

    /// The registered handler's ID.
    pub fn id(&self) -> HandlerId {
        self.id
    }

    /// Remove the handler from every bucket it was registered in.
    ///
    /// Returns false if it was already removed or the store is gone.
    pub fn unsubscribe(&self) -> bool {
        if self.done.replace(true) {
            return false;
        }
        let Some(inner) = self.store.upgrade() else {
            return false;
        };
        let mut graph = inner.graph.borrow_mut();
        let Some(node) = graph.node_mut(self.node) else {
            return false;
        };
        let mut removed = false;
        for path in &self.paths {
            removed |= node.subscriptions.remove(path.as_ref(), self.id);
        }
        removed
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("node", &self.node)
            .field("id", &self.id)
            .field("paths", &self.paths)
            .finish()
    }
}
