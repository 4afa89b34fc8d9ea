//! Ref Implementation
//!
//! A [`Ref`] holds an arbitrary Rust value inside a state without making it
//! reactive. The state tracks the slot the ref sits in, but never looks
//! inside the value, never clones it and never wraps it.
//!
//! # Snapshots
//!
//! Without a mapping function, the snapshot of a ref is the held value
//! itself ([`Snapshot::Opaque`]), shared rather than copied. With a mapping
//! function the snapshot is whatever the function projects, recomputed on
//! every snapshot unless the ref was created with `cache = true`.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::snapshot::{Opaque, Snapshot};

type MapSnapshot = Rc<dyn Fn(&dyn Any) -> Snapshot>;

struct RefInner {
    /// Always a `RefCell<T>` for the `T` the ref was built with.
    value: RefCell<Rc<dyn Any>>,
    map_snapshot: Option<MapSnapshot>,
    cache: bool,
    cached: RefCell<Option<Snapshot>>,
}

/// Opaque, non-reactive wrapper around any `'static` value.
///
/// Cloning a `Ref` clones the handle, not the value.
#[derive(Clone)]
pub struct Ref {
    inner: Rc<RefInner>,
}

/// Saved ref content, used to undo an in-place update.
pub(crate) struct RefContent {
    value: Rc<dyn Any>,
    cached: Option<Snapshot>,
}

impl Ref {
    /// Wrap a value. Its snapshot is the value itself.
    pub fn new<T: 'static>(value: T) -> Self {
        Self::build(value, None, false)
    }

    /// Wrap a value with a snapshot projection.
    ///
    /// When `cache` is true the projection runs once per stored value and is
    /// reused until the ref's slot is reassigned.
    pub fn with_snapshot<T, F>(value: T, map: F, cache: bool) -> Self
    where
        T: 'static,
        F: Fn(&T) -> Snapshot + 'static,
    {
        let map: MapSnapshot = Rc::new(move |any: &dyn Any| {
            match any.downcast_ref::<RefCell<T>>() {
                Some(cell) => map(&cell.borrow()),
                None => Snapshot::Null,
            }
        });
        Self::build(value, Some(map), cache)
    }

    fn build<T: 'static>(value: T, map_snapshot: Option<MapSnapshot>, cache: bool) -> Self {
        let value: Rc<dyn Any> = Rc::new(RefCell::new(value));
        Self {
            inner: Rc::new(RefInner {
                value: RefCell::new(value),
                map_snapshot,
                cache,
                cached: RefCell::new(None),
            }),
        }
    }

    /// Read the held value. Returns `None` when `T` is not the held type.
    pub fn with<T: 'static, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let value = self.inner.value.borrow().clone();
        let cell = value.downcast_ref::<RefCell<T>>()?;
        let guard = cell.borrow();
        Some(f(&guard))
    }

    /// Mutate the held value out of band.
    ///
    /// No subscriber is notified and no cached snapshot is invalidated.
    pub fn with_mut<T: 'static, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let value = self.inner.value.borrow().clone();
        let cell = value.downcast_ref::<RefCell<T>>()?;
        let mut guard = cell.borrow_mut();
        Some(f(&mut guard))
    }

    /// Whether the ref holds a `T`.
    pub fn holds<T: 'static>(&self) -> bool {
        self.inner.value.borrow().is::<RefCell<T>>()
    }

    /// Whether both handles point at the same ref.
    pub fn ptr_eq(&self, other: &Ref) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Whether both refs are the same ref or hold the very same value.
    pub fn same_target(&self, other: &Ref) -> bool {
        self.ptr_eq(other)
            || Rc::ptr_eq(&self.inner.value.borrow(), &other.inner.value.borrow())
    }

    /// Whether the ref projects its snapshot through a mapping function.
    pub fn has_snapshot_map(&self) -> bool {
        self.inner.map_snapshot.is_some()
    }

    /// Snapshot of the held value.
    pub fn snapshot(&self) -> Snapshot {
        let value = self.inner.value.borrow().clone();
        let Some(map) = &self.inner.map_snapshot else {
            return Snapshot::Opaque(Opaque::new(value));
        };

        if self.inner.cache {
            if let Some(cached) = self.inner.cached.borrow().as_ref() {
                return cached.clone();
            }
        }

        let snapshot = map(value.as_ref());
        if self.inner.cache {
            *self.inner.cached.borrow_mut() = Some(snapshot.clone());
        }
        snapshot
    }

    /// Swap in a new value, dropping the ref's own cached snapshot.
    pub(crate) fn replace_any(&self, value: Rc<dyn Any>) -> RefContent {
        let old_value = std::mem::replace(&mut *self.inner.value.borrow_mut(), value);
        let old_cached = self.inner.cached.borrow_mut().take();
        RefContent {
            value: old_value,
            cached: old_cached,
        }
    }

    /// Put back content saved by [`Ref::replace_any`].
    pub(crate) fn restore(&self, content: RefContent) {
        *self.inner.value.borrow_mut() = content.value;
        *self.inner.cached.borrow_mut() = content.cached;
    }
}

impl fmt::Debug for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ref")
            .field("mapped", &self.has_snapshot_map())
            .field("cache", &self.inner.cache)
            .finish_non_exhaustive()
    }
}
