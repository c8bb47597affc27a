//! Derived Implementation
//!
//! A Derived is a cached computed value that re-evaluates only when its
//! dependencies change.
//!
//! # How Deriveds Work
//!
//! 1. On first access, the derived runs its computation and caches the result.
//!
//! 2. When accessed again, if no dependencies have changed, returns the cache.
//!
//! 3. When a cell it reads changes, the derived is marked dirty. When an
//!    upstream derived is invalidated, it is marked maybe-dirty.
//!
//! 4. On next access, a maybe-dirty derived first brings its upstream
//!    deriveds up to date and compares their versions with the ones it saw.
//!
//! 5. If a version moved, recompute. Otherwise, mark clean and return the cache.
//!
//! # Why This Matters
//!
//! This "lazy" approach avoids unnecessary recomputation:
//!
//! - A cell changes
//! - 10 deriveds depend on it
//! - Only the deriveds actually read will recompute
//! - Deriveds that are never read stay dirty (no wasted work)
//!
//! The `PartialEq` bound lets a recomputation that produces an equal value
//! stop propagation: the derived's version does not move, so downstream
//! readers keep their caches.

use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::Rc;

use super::context::untrack;
use super::runtime::{try_with_runtime, with_runtime};
use crate::error::{raise, recover, ReactiveError, Result};
use crate::graph::{ComputeFn, NodeId, Status};

struct DerivedInner<T> {
    id: NodeId,
    compute: Box<dyn Fn() -> T>,
    value: RefCell<Option<T>>,
}

impl<T: PartialEq> DerivedInner<T> {
    /// Run the computation and store the result. Returns whether the cached
    /// value changed.
    fn recompute(&self) -> bool {
        let next = (self.compute)();
        let previous = {
            let mut slot = self.value.borrow_mut();
            if slot.as_ref() == Some(&next) {
                return false;
            }
            slot.replace(next)
        };
        drop(previous);
        true
    }
}

impl<T> Drop for DerivedInner<T> {
    fn drop(&mut self) {
        let id = self.id;
        try_with_runtime(|rt| rt.release(id));
    }
}

/// A cached derived value that recomputes only when dependencies change.
///
/// # Type Parameters
///
/// - `T`: The type of the computed value. Must be Clone + PartialEq.
///
/// The PartialEq bound is needed to detect when the computed value actually
/// changed (some deriveds return the same value even if inputs changed).
///
/// # Example
///
/// ```rust,ignore
/// let count = Cell::new(2);
/// let doubled = Derived::new({
///     let count = count.clone();
///     move || count.get() * 2
/// });
///
/// assert_eq!(doubled.get(), 4);
/// ```
pub struct Derived<T: 'static> {
    inner: Rc<DerivedInner<T>>,
}

impl<T> Derived<T>
where
    T: Clone + PartialEq + 'static,
{
    /// Create a new derived with the given computation function.
    ///
    /// The computation is not run immediately. It runs on first access.
    /// It must not write cells.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        let id = NodeId::new();
        let inner = Rc::new(DerivedInner {
            id,
            compute: Box::new(compute),
            value: RefCell::new(None),
        });

        let weak = Rc::downgrade(&inner);
        let hook: ComputeFn = Rc::new(move || match weak.upgrade() {
            Some(inner) => inner.recompute(),
            None => false,
        });
        with_runtime(|rt| rt.register_derived(id, hook));

        Self { inner }
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// Fails with a cyclic-dependency error if the derived (directly or
    /// through other deriveds) reads itself, and with a disposed-access error
    /// once its owning scope is gone.
    pub fn try_get(&self) -> Result<T> {
        self.try_with(T::clone)
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// # Panics
    ///
    /// Panics with the [`ReactiveError`](crate::ReactiveError) when
    /// [`try_get`](Self::try_get) would fail, and re-raises any panic of the
    /// computation itself.
    pub fn get(&self) -> T {
        match self.try_get() {
            Ok(value) => value,
            Err(err) => raise(err),
        }
    }

    /// Get the current value without registering a dependency.
    pub fn get_untracked(&self) -> T {
        untrack(|| self.get())
    }

    /// Borrow the current value, recomputing if necessary.
    pub fn try_with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        let id = self.inner.id;
        recover(|| with_runtime(|rt| rt.refresh(id)))?;
        with_runtime(|rt| rt.track(id));

        let value = self.inner.value.borrow();
        value.as_ref().map(f).ok_or(ReactiveError::Disposed { node: id })
    }

    /// Borrow the current value, recomputing if necessary.
    ///
    /// # Panics
    ///
    /// See [`get`](Self::get).
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        match self.try_with(f) {
            Ok(result) => result,
            Err(err) => raise(err),
        }
    }
}

impl<T: 'static> Derived<T> {
    /// Get the derived's node ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Current evaluation status, or `None` once disposed.
    pub fn status(&self) -> Option<Status> {
        with_runtime(|rt| rt.status(self.inner.id))
    }

    /// Current version, or `None` once disposed. The version moves only when
    /// a recomputation produces a different value.
    pub fn version(&self) -> Option<u64> {
        with_runtime(|rt| rt.version(self.inner.id))
    }

    /// Check if the derived has a cached value.
    pub fn has_value(&self) -> bool {
        self.inner.value.borrow().is_some()
    }

    /// Get the number of computations that read this derived in their last run.
    pub fn subscriber_count(&self) -> usize {
        with_runtime(|rt| rt.subscriber_count(self.inner.id))
    }
}

impl<T: 'static> Clone for Derived<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Derived<T>
where
    T: Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Derived")
            .field("id", &self.inner.id)
            .field("status", &self.status())
            .field("cached", &*self.inner.value.borrow())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
