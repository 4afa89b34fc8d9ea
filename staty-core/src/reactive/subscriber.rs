//! Subscriber types for the reactive system.
//!
//! A [`Handler`] is a registered listener: the user callback plus the options
//! it was registered with. Each node keeps its handlers in [`Subscriptions`],
//! one default bucket and one bucket per subscribed path.

use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use super::action::ActionName;
use super::filter::Filter;
use crate::error::{Error, Result};
use crate::value::Path;

/// Unique identifier for a handler.
///
/// A subscription on several paths registers the same handler (same ID) in
/// every bucket, so an action collects it at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

impl HandlerId {
    /// Generate a new unique handler ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for HandlerId {
    fn default() -> Self {
        Self::new()
    }
}

/// What a subscriber callback may return: nothing, or a `Result`.
pub trait HandlerOutput {
    /// Normalize into a `Result`.
    fn into_result(self) -> Result<()>;
}

impl HandlerOutput for () {
    fn into_result(self) -> Result<()> {
        Ok(())
    }
}

impl<E: Into<Error>> HandlerOutput for std::result::Result<(), E> {
    fn into_result(self) -> Result<()> {
        self.map_err(Into::into)
    }
}

pub(crate) type Callback = Rc<dyn Fn(&ActionName) -> Result<()>>;

/// A registered listener.
pub struct Handler {
    id: HandlerId,
    callback: Callback,
    filter: Option<Filter>,
    before: bool,
    batch: bool,
}

impl Handler {
    pub(crate) fn new(callback: Callback, filter: Option<Filter>, before: bool, batch: bool) -> Self {
        Self {
            id: HandlerId::new(),
            callback,
            filter,
            before,
            batch,
        }
    }

    /// The handler's ID.
    pub fn id(&self) -> HandlerId {
        self.id
    }

    /// Whether the handler runs as a validation gate before the action ends.
    pub fn is_before(&self) -> bool {
        self.before
    }

    /// Whether the handler is deferred to the next scheduler tick.
    pub fn is_batched(&self) -> bool {
        self.batch
    }

    /// Whether an action with this name collects the handler.
    pub fn accepts(&self, name: &ActionName) -> bool {
        self.filter.as_ref().map_or(true, |f| f.matches(name))
    }

    /// Invoke the callback.
    pub fn call(&self, name: &ActionName) -> Result<()> {
        (self.callback)(name)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("id", &self.id)
            .field("filter", &self.filter)
            .field("before", &self.before)
            .field("batch", &self.batch)
            .finish()
    }
}

pub(crate) type Bucket = IndexMap<HandlerId, Rc<Handler>>;

/// Per-node listener buckets.
#[derive(Default)]
pub(crate) struct Subscriptions {
    default: Bucket,
    props: IndexMap<Path, Bucket>,
}

impl Subscriptions {
    pub(crate) fn insert(&mut self, path: Option<&Path>, handler: Rc<Handler>) {
        let bucket = match path {
            Some(path) => self.props.entry(path.clone()).or_default(),
            None => &mut self.default,
        };
        bucket.insert(handler.id(), handler);
    }

    pub(crate) fn remove(&mut self, path: Option<&Path>, id: HandlerId) -> bool {
        match path {
            None => self.default.shift_remove(&id).is_some(),
            Some(path) => {
                let Some(bucket) = self.props.get_mut(path) else {
                    return false;
                };
                let removed = bucket.shift_remove(&id).is_some();
                if bucket.is_empty() {
                    self.props.shift_remove(path);
                }
                removed
            }
        }
    }

    /// Handlers interested in a change reported at `path`: every path bucket
    /// that is a prefix of it or lies below it (a replaced ancestor changes
    /// everything underneath), then the default bucket.
    pub(crate) fn matching<'a>(&'a self, path: &'a Path) -> impl Iterator<Item = &'a Rc<Handler>> + 'a {
        let by_path = self
            .props
            .iter()
            .filter(move |(watched, _)| {
                !path.is_empty() && (path.starts_with(watched) || watched.starts_with(path))
            })
            .flat_map(|(_, bucket)| bucket.values());
        by_path.chain(self.default.values())
    }

    pub(crate) fn default_count(&self) -> usize {
        self.default.len()
    }

    pub(crate) fn prop_counts(&self) -> impl Iterator<Item = (&Path, usize)> {
        self.props.iter().map(|(path, bucket)| (path, bucket.len()))
    }

    pub(crate) fn total(&self) -> usize {
        self.default.len() + self.props.values().map(IndexMap::len).sum::<usize>()
    }
}
