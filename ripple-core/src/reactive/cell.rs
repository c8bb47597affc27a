//! Cell Implementation
//!
//! A Cell is the fundamental reactive primitive. It holds a value and
//! tracks which computations depend on it.
//!
//! # How Cells Work
//!
//! 1. When a cell is read within a tracking context (derived/effect), the
//!    read is recorded together with the cell's current version.
//!
//! 2. When a cell is written with a value that differs from the current one,
//!    its version is bumped and all subscribers are marked dirty.
//!
//! 3. Dirty effects are queued for the next flush; dirty deriveds wait to be
//!    read.
//!
//! # Memory Layout
//!
//! Each cell consists of:
//! - A node id (8 bytes) pointing at the cell's node in the runtime graph
//! - The value, behind an `Rc<RefCell<_>>` shared by all clones of the handle
//! - The equality function used to suppress redundant writes

use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::Rc;

use tracing::trace;

use super::runtime::{try_with_runtime, with_runtime};
use crate::error::{raise, Result};
use crate::graph::NodeId;

type EqualsFn<T> = Box<dyn Fn(&T, &T) -> bool>;

struct CellInner<T> {
    id: NodeId,
    value: RefCell<T>,
    equals: EqualsFn<T>,
}

impl<T> Drop for CellInner<T> {
    fn drop(&mut self) {
        let id = self.id;
        try_with_runtime(|rt| rt.release(id));
    }
}

/// A reactive cell holding a value of type T.
///
/// Cloning a cell clones the handle, not the value: all clones read and
/// write the same storage.
///
/// # Example
///
/// ```rust,ignore
/// let count = Cell::new(0);
///
/// // Read the value
/// let value = count.get();
///
/// // Update the value (marks dependents dirty)
/// count.set(5);
/// ```
pub struct Cell<T: 'static> {
    inner: Rc<CellInner<T>>,
}

impl<T> Cell<T>
where
    T: PartialEq + 'static,
{
    /// Create a new cell that compares values with `PartialEq`.
    pub fn new(value: T) -> Self {
        Self::with_equals(value, |a, b| a == b)
    }
}

impl<T: 'static> Cell<T> {
    /// Create a new cell with a custom equality check.
    ///
    /// A write is ignored when `equals(old, new)` returns true. Pass
    /// `|_, _| false` to treat every write as a change.
    pub fn with_equals<F>(value: T, equals: F) -> Self
    where
        F: Fn(&T, &T) -> bool + 'static,
    {
        let id = NodeId::new();
        with_runtime(|rt| rt.register_source(id));
        Self {
            inner: Rc::new(CellInner {
                id,
                value: RefCell::new(value),
                equals: Box::new(equals),
            }),
        }
    }

    /// Get the cell's node ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Borrow the current value, tracking the read.
    ///
    /// The cell must not be written from inside `f`.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        with_runtime(|rt| rt.track(self.inner.id));
        f(&*self.inner.value.borrow())
    }

    /// Borrow the current value without tracking the read.
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&*self.inner.value.borrow())
    }

    /// Write a new value.
    ///
    /// Fails with a purity violation when called from inside a derived
    /// computation, and with a disposed-access error once the cell's owning
    /// scope is gone.
    pub fn try_set(&self, value: T) -> Result<()> {
        let id = self.inner.id;
        with_runtime(|rt| rt.check_writable(id))?;

        let unchanged = (self.inner.equals)(&*self.inner.value.borrow(), &value);
        if unchanged {
            return Ok(());
        }

        let previous = self.inner.value.replace(value);
        drop(previous);

        trace!(cell = %id, "cell written");
        with_runtime(|rt| rt.notify_changed(id));
        Ok(())
    }

    /// Write a new value.
    ///
    /// # Panics
    ///
    /// Panics with the [`ReactiveError`](crate::ReactiveError) when
    /// [`try_set`](Self::try_set) would fail.
    pub fn set(&self, value: T) {
        if let Err(err) = self.try_set(value) {
            raise(err);
        }
    }

    /// Mutate the value in place.
    ///
    /// In-place mutation is always treated as a change, since the old value
    /// is not kept around for comparison.
    pub fn try_update<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let id = self.inner.id;
        with_runtime(|rt| rt.check_writable(id))?;

        let result = f(&mut *self.inner.value.borrow_mut());

        trace!(cell = %id, "cell updated in place");
        with_runtime(|rt| rt.notify_changed(id));
        Ok(result)
    }

    /// Mutate the value in place.
    ///
    /// # Panics
    ///
    /// Panics with the [`ReactiveError`](crate::ReactiveError) when
    /// [`try_update`](Self::try_update) would fail.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        match self.try_update(f) {
            Ok(result) => result,
            Err(err) => raise(err),
        }
    }

    /// Current version, or `None` once the cell has been disposed.
    pub fn version(&self) -> Option<u64> {
        with_runtime(|rt| rt.version(self.inner.id))
    }

    /// Get the number of computations that read this cell in their last run.
    pub fn subscriber_count(&self) -> usize {
        with_runtime(|rt| rt.subscriber_count(self.inner.id))
    }
}

impl<T: Clone + 'static> Cell<T> {
    /// Get the current value.
    ///
    /// If called within a tracking context, this also registers the read.
    pub fn get(&self) -> T {
        self.with(T::clone)
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.with_untracked(T::clone)
    }
}

impl<T: 'static> Clone for Cell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Cell<T>
where
    T: Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cell")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.borrow())
            .field("version", &self.version())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{create_effect, create_root, flush, Derived};
    use crate::ReactiveError;

    #[test]
    fn cell_get_and_set() {
        let cell = Cell::new(0);
        assert_eq!(cell.get(), 0);

        cell.set(42);
        assert_eq!(cell.get(), 42);
    }

    #[test]
    fn cell_update_in_place() {
        let cell = Cell::new(vec![1, 2]);
        cell.update(|v| v.push(3));
        assert_eq!(cell.get(), vec![1, 2, 3]);
        assert_eq!(cell.version(), Some(1));
    }

    #[test]
    fn version_only_moves_on_change() {
        let cell = Cell::new(10);
        assert_eq!(cell.version(), Some(0));

        cell.set(10);
        assert_eq!(cell.version(), Some(0));

        cell.set(11);
        assert_eq!(cell.version(), Some(1));
    }

    #[test]
    fn custom_equality() {
        // Case-insensitive cell
        let cell = Cell::with_equals("Hello".to_string(), |a: &String, b: &String| {
            a.eq_ignore_ascii_case(b)
        });

        cell.set("HELLO".to_string());
        assert_eq!(cell.get(), "Hello");
        assert_eq!(cell.version(), Some(0));

        cell.set("bye".to_string());
        assert_eq!(cell.get(), "bye");
    }

    #[test]
    fn cell_clone_shares_state() {
        let cell1 = Cell::new(0);
        let cell2 = cell1.clone();

        cell1.set(42);
        assert_eq!(cell2.get(), 42);

        cell2.set(100);
        assert_eq!(cell1.get(), 100);
        assert_eq!(cell1.id(), cell2.id());
    }

    #[test]
    fn cell_ids_are_unique() {
        let c1 = Cell::new(0);
        let c2 = Cell::new(0);
        assert_ne!(c1.id(), c2.id());
    }

    #[test]
    fn effect_subscribes_to_cell() {
        let cell = Cell::new(1);
        let _effect = create_effect({
            let cell = cell.clone();
            move || {
                cell.get();
            }
        });

        assert_eq!(cell.subscriber_count(), 0);
        flush().unwrap();
        assert_eq!(cell.subscriber_count(), 1);
    }

    #[test]
    fn write_inside_derived_is_a_purity_violation() {
        let target = Cell::new(0);
        let derived = Derived::new({
            let target = target.clone();
            move || target.try_set(1)
        });

        match derived.get() {
            Err(ReactiveError::PurityViolation { cell, derived: culprit }) => {
                assert_eq!(cell, target.id());
                assert_eq!(culprit, derived.id());
            }
            other => panic!("expected purity violation, got {other:?}"),
        }
        assert_eq!(target.get(), 0);
    }

    #[test]
    fn write_after_disposal_fails() {
        let cell = create_root(|dispose| {
            let cell = Cell::new(1);
            dispose.dispose();
            cell
        });

        assert_eq!(cell.try_set(2), Err(ReactiveError::Disposed { node: cell.id() }));
        // Reads still see the last value
        assert_eq!(cell.get(), 1);
    }
}
