//! Staty Core
//!
//! This crate provides a reactive state container for nested data.
//! It implements:
//!
//! - Observable states over objects, sequences, maps and sets
//! - Cached, structurally shared, read-only snapshots
//! - Atomic actions with rollback and `before` validation gates
//! - Path-scoped subscriptions, action-name filters and batched handlers
//! - Opaque refs that opt a value out of reactivity
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `value`: what goes in and comes out of a state (`Value`, `Key`, `Path`)
//! - `graph`: the node arena, parent links, cycle detection, propagation
//! - `snapshot`: read-only projections and their cache
//! - `reactive`: actions, subscriptions, filters, batching, scheduling
//! - `store`: the execution context that ties everything together
//! - `state`: the observable handle callers read and write through
//!
//! # Example
//!
//! ```rust
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! use serde_json::json;
//! use staty_core::{Store, SubscribeOptions};
//!
//! let store = Store::new();
//! let state = store.create(json!({ "count": 0 })).unwrap();
//!
//! let calls = Rc::new(Cell::new(0));
//! let seen = calls.clone();
//! state
//!     .subscribe(move |_| seen.set(seen.get() + 1), SubscribeOptions::new())
//!     .unwrap();
//!
//! // Two writes, one action, one notification.
//! store
//!     .action(|_| {
//!         state.set("count", 1)?;
//!         state.set("count", 2)
//!     })
//!     .unwrap();
//!
//! assert_eq!(calls.get(), 1);
//! assert_eq!(state.snapshot().unwrap(), json!({ "count": 2 }));
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;
pub mod reference;
pub mod snapshot;
pub mod state;
pub mod store;
pub mod value;

pub use config::{CreateOptions, StoreConfig};
pub use error::{Error, Result};
pub use graph::{Kind, Listeners, NodeId};
pub use reactive::{ActionContext, ActionName, Filter, Scheduler, SubscribeOptions, Symbol, TickQueue, Unsubscribe};
pub use reference::Ref;
pub use snapshot::{ReadOnlyWrite, Snapshot};
pub use state::State;
pub use store::{AsState, Store};
pub use value::{Key, Path, Pattern, Value};
