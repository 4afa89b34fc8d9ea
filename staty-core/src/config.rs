//! Store and root configuration.

use std::fmt;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::reactive::{ActionName, HandlerOutput, Scheduler, TickQueue};
use crate::snapshot::{warn_read_only, ReadOnlyHook, ReadOnlyWrite};
use crate::state::State;

/// Receives errors raised by non-`before` handlers.
pub type ErrorSink = Rc<dyn Fn(&Error)>;

/// Gate called with the created state (no name) and then before every
/// action touching it.
pub type OnAction = Rc<dyn Fn(&State, Option<&ActionName>) -> Result<()>>;

/// The default error sink: log a warning.
pub fn warn_subscriber_error() -> ErrorSink {
    Rc::new(|err: &Error| {
        tracing::warn!(error = %err, "subscriber failed");
    })
}

/// Configuration shared by every state of a store.
#[derive(Clone)]
pub struct StoreConfig {
    pub(crate) on_read_only: ReadOnlyHook,
    pub(crate) on_subscriber_error: ErrorSink,
    pub(crate) disable_cache: bool,
    pub(crate) nested_actions: bool,
    pub(crate) scheduler: Rc<dyn Scheduler>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            on_read_only: warn_read_only(),
            on_subscriber_error: warn_subscriber_error(),
            disable_cache: false,
            nested_actions: true,
            scheduler: Rc::new(TickQueue::new()),
        }
    }
}

impl StoreConfig {
    /// Default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Called whenever something tries to write into a snapshot.
    pub fn on_read_only(mut self, hook: impl Fn(&ReadOnlyWrite) + 'static) -> Self {
        self.on_read_only = Rc::new(hook);
        self
    }

    /// Called with every error raised by a non-`before` handler.
    pub fn on_subscriber_error(mut self, sink: impl Fn(&Error) + 'static) -> Self {
        self.on_subscriber_error = Rc::new(sink);
        self
    }

    /// Rebuild snapshots on every call for roots created without an explicit
    /// choice.
    pub fn disable_cache(mut self, disable: bool) -> Self {
        self.disable_cache = disable;
        self
    }

    /// Allow explicit actions to open while another one runs.
    pub fn nested_actions(mut self, allow: bool) -> Self {
        self.nested_actions = allow;
        self
    }

    /// Where batched handlers are deferred to.
    pub fn scheduler(mut self, scheduler: impl Scheduler + 'static) -> Self {
        self.scheduler = Rc::new(scheduler);
        self
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("disable_cache", &self.disable_cache)
            .field("nested_actions", &self.nested_actions)
            .finish_non_exhaustive()
    }
}

/// Options for one created root.
#[derive(Clone, Default)]
pub struct CreateOptions {
    pub(crate) on_action: Option<OnAction>,
    pub(crate) disable_cache: Option<bool>,
}

impl CreateOptions {
    /// No gate, cache policy taken from the store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a gate on the root. Returning an error vetoes the action.
    pub fn on_action<F, O>(mut self, gate: F) -> Self
    where
        F: Fn(&State, Option<&ActionName>) -> O + 'static,
        O: HandlerOutput,
    {
        let wrapped: OnAction = Rc::new(move |state: &State, name: Option<&ActionName>| {
            gate(state, name).into_result()
        });
        self.on_action = Some(wrapped);
        self
    }

    /// Override the store's cache policy for this root and everything
    /// created under it.
    pub fn disable_cache(mut self, disable: bool) -> Self {
        self.disable_cache = Some(disable);
        self
    }
}

impl fmt::Debug for CreateOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateOptions")
            .field("on_action", &self.on_action.is_some())
            .field("disable_cache", &self.disable_cache)
            .finish()
    }
}
