//! Reactive Machinery
//!
//! This module implements everything that happens after a slot changes:
//! actions, subscriptions, filters, batching and deferred execution.
//!
//! # Concepts
//!
//! ## Actions
//!
//! An action groups mutations into one atomic unit. Every mutation records
//! how to undo itself in the current action's history and adds the handlers
//! that care about it to the action's handler set. When the action completes,
//! `before` handlers run first and may veto the whole action; only then are
//! the remaining handlers called, each at most once. A mutation made while no
//! action is open runs inside an internal action of its own.
//!
//! ## Subscriptions
//!
//! A subscription attaches a handler to a node, either to every change that
//! reaches the node or to changes under specific paths. Changes deep inside a
//! tree reach every ancestor, with the path re-prefixed at each level.
//!
//! ## Batching
//!
//! A handler registered with `batch` is not called at action completion but
//! on the next scheduler tick, once, no matter how many actions touched it.
//!
//! # Implementation Notes
//!
//! The store keeps a stack of action frames rather than a single "current
//! action" pointer. Frames are owned by scoped guards, so a frame is always
//! popped and its work rolled back when an action body fails or panics.

mod action;
mod batch;
mod dispatch;
mod filter;
mod scheduler;
mod subscribe;
mod subscriber;

pub(crate) use action::{ActionGuard, ActionStack, Rollback};
pub use action::{ActionContext, ActionId, ActionName, ActionState, Symbol};
pub(crate) use batch::BatchTable;
pub use filter::{Filter, NamePredicate};
pub use scheduler::{Scheduler, Task, TickQueue};
pub use subscribe::{SubscribeOptions, Unsubscribe};
pub(crate) use subscriber::{Callback, Subscriptions};
pub use subscriber::{Handler, HandlerId, HandlerOutput};
