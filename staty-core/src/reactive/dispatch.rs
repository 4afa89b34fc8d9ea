//! Action completion and handler dispatch.
//!
//! These are the store-side halves of the action protocol: recording a
//! mutation in the current frame, completing a frame (gates, hand-over,
//! dispatch), rolling a frame back, and draining batched handlers.

use std::rc::{Rc, Weak};

use tracing::{debug, trace};

use super::action::{ActionGuard, ActionId, ActionName, ActionState, Rollback};
use super::subscriber::Handler;
use crate::error::{Error, Result};
use crate::graph::NodeId;
use crate::store::{Store, StoreInner};
use crate::value::Path;

impl Store {
    /// Record a mutation of `node` at `path`.
    ///
    /// Joins the open action, or wraps the mutation in an internal action of
    /// its own that completes before returning.
    pub(crate) fn run(&self, node: NodeId, path: Path, rollback: Rollback) -> Result<()> {
        if self
            .inner
            .actions
            .borrow()
            .top()
            .is_some_and(|action| action.in_rollback)
        {
            return Ok(());
        }

        let current = self
            .inner
            .actions
            .borrow()
            .current()
            .map(|action| (action.id, action.name.clone()));

        let (id, name, guard) = match current {
            Some((id, name)) => (id, name, None),
            None => {
                let name = ActionName::internal();
                let id = self.open_action(name.clone(), true)?;
                (id, name, Some(ActionGuard::new(self, id)))
            }
        };

        if let Some(action) = self.inner.actions.borrow_mut().get_mut(id) {
            action.history.push(rollback);
        }

        trace!(node = node.raw(), path = %path, action = %name, "mutation");
        let collected = self.inner.graph.borrow_mut().propagate(node, path, &name);

        if let Some(action) = self.inner.actions.borrow_mut().get_mut(id) {
            for handler in collected.before.into_iter().chain(collected.handlers) {
                action.add(handler);
            }
        }

        match guard {
            Some(guard) => guard.complete(),
            None => Ok(()),
        }
    }

    /// Run `f` so that every mutation it makes lands in one action.
    pub(crate) fn atomically<R>(&self, f: impl FnOnce() -> Result<R>) -> Result<R> {
        if self.inner.actions.borrow().current().is_some() {
            return f();
        }
        let id = self.open_action(ActionName::internal(), true)?;
        let guard = ActionGuard::new(self, id);
        match f() {
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

    /// Push a frame on the action stack.
    pub(crate) fn open_action(&self, name: ActionName, internal: bool) -> Result<ActionId> {
        let mut actions = self.inner.actions.borrow_mut();
        if !internal && !self.inner.config.nested_actions {
            if let Some(running) = actions.running_explicit() {
                return Err(Error::ConcurrentAction {
                    running: running.name.to_string(),
                    requested: name.to_string(),
                });
            }
        }
        let id = actions.push(name, internal);
        debug!(depth = actions.depth(), "action opened");
        Ok(id)
    }

    /// Complete a frame: run its gates, then hand it to the enclosing action
    /// or dispatch it.
    pub(crate) fn finish_action(&self, id: ActionId) -> Result<()> {
        // Gates may mutate and thereby collect more gates; walk by index.
        let mut index = 0;
        loop {
            let next = {
                let actions = self.inner.actions.borrow();
                let Some(action) = actions.get(id) else {
                    return Ok(());
                };
                if !action.is_open() {
                    break;
                }
                action
                    .before
                    .get_index(index)
                    .map(|(_, handler)| (handler.clone(), action.name.clone()))
            };
            let Some((handler, name)) = next else {
                break;
            };
            if let Err(err) = handler.call(&name) {
                debug!(action = %name, error = %err, "action vetoed");
                self.abort_action(id);
                return Err(err);
            }
            index += 1;
        }

        let Some(mut action) = self.inner.actions.borrow_mut().pop(id) else {
            return Ok(());
        };
        if action.state == ActionState::Cancelled {
            debug!(action = %action.name, "cancelled action closed");
            return Ok(());
        }
        action.state = ActionState::Done;

        {
            let mut actions = self.inner.actions.borrow_mut();
            if let Some(parent) = actions.nearest_open_mut() {
                trace!(action = %action.name, parent = %parent.name, "handing over to enclosing action");
                parent.absorb(action);
                return Ok(());
            }
        }

        debug!(action = %action.name, handlers = action.handlers.len(), "action done");
        let name = action.name;
        for handler in action.handlers.into_values() {
            if handler.is_batched() {
                self.enqueue_batch(handler, name.clone());
            } else if let Err(err) = handler.call(&name) {
                self.report(&name, err);
            }
        }
        Ok(())
    }

    /// Roll a frame back (unless it already was) and pop it.
    pub(crate) fn abort_action(&self, id: ActionId) {
        self.rollback(id);
        self.inner.actions.borrow_mut().pop(id);
    }

    /// Roll a frame back but leave it on the stack, marked cancelled.
    pub(crate) fn cancel_action(&self, id: ActionId) {
        self.rollback(id);
    }

    pub(crate) fn action_state(&self, id: ActionId) -> Option<ActionState> {
        self.inner.actions.borrow().get(id).map(|action| action.state)
    }

    fn rollback(&self, id: ActionId) {
        let history = {
            let mut actions = self.inner.actions.borrow_mut();
            let Some(action) = actions.get_mut(id) else {
                return;
            };
            if action.state == ActionState::Cancelled {
                return;
            }
            action.in_rollback = true;
            action.before.clear();
            action.handlers.clear();
            std::mem::take(&mut action.history)
        };

        debug!(steps = history.len(), "rolling back action");
        {
            let mut graph = self.inner.graph.borrow_mut();
            for undo in history.into_iter().rev() {
                undo(&mut graph);
            }
        }

        if let Some(action) = self.inner.actions.borrow_mut().get_mut(id) {
            action.in_rollback = false;
            action.state = ActionState::Cancelled;
        }
    }

    /// Park a batched handler, scheduling a drain if the table was empty.
    pub(crate) fn enqueue_batch(&self, handler: Rc<Handler>, name: ActionName) {
        let first = self.inner.batches.borrow_mut().enqueue(handler, name);
        if first {
            let weak: Weak<StoreInner> = Rc::downgrade(&self.inner);
            self.inner.config.scheduler.schedule(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    Store { inner }.drain_batches();
                }
            }));
        }
    }

    fn drain_batches(&self) {
        let pending = self.inner.batches.borrow_mut().take();
        debug!(count = pending.len(), "draining batched handlers");
        for (handler, name) in pending {
            if let Err(err) = handler.call(&name) {
                self.report(&name, err);
            }
        }
    }

    /// Forward a handler failure to the configured sink.
    pub(crate) fn report(&self, name: &ActionName, err: Error) {
        let err = Error::Subscriber {
            action: name.to_string(),
            source: Box::new(err),
        };
        (self.inner.config.on_subscriber_error)(&err);
    }
}
