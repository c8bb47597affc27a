//! Ownership Scopes
//!
//! Every node is created inside the scope that is current at the time: a
//! root, a running effect, or nothing at all. The scope records the node as
//! a child, and disposing the scope disposes its children first, newest
//! first, running cleanups bottom-up.
//!
//! Nodes created outside any scope live until their last handle is dropped
//! (cells, deriveds) or until they are disposed explicitly (effects).

use super::runtime::with_runtime;
use crate::graph::NodeId;

/// Handle that tears down a computation and everything it owns.
///
/// Disposers are plain ids: copying one does not extend the lifetime of
/// anything, and disposing twice is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Disposer {
    node: Option<NodeId>,
}

impl Disposer {
    pub(crate) fn new(node: NodeId) -> Self {
        Self { node: Some(node) }
    }

    /// A disposer that owns nothing.
    pub(crate) fn inert() -> Self {
        Self { node: None }
    }

    /// The node this disposer tears down, if any.
    pub fn node(&self) -> Option<NodeId> {
        self.node
    }

    /// Dispose the node and its subtree.
    ///
    /// Pending runs are cancelled immediately. If the node is an effect that
    /// is currently running, the run is allowed to finish and its returned
    /// cleanup runs right after.
    pub fn dispose(&self) {
        if let Some(node) = self.node {
            with_runtime(|rt| rt.dispose(node));
        }
    }

    /// Check whether the node is gone (or was never there).
    pub fn is_disposed(&self) -> bool {
        match self.node {
            Some(node) => !with_runtime(|rt| rt.is_alive(node)),
            None => true,
        }
    }
}

/// Run `f` inside a new root scope and return its result.
///
/// Everything created synchronously inside `f` (and, transitively, by the
/// effects created there) belongs to the root. `f` receives the root's
/// [`Disposer`].
///
/// # Example
///
/// ```rust,ignore
/// let count = Cell::new(0);
///
/// let dispose = create_root(|dispose| {
///     let count = count.clone();
///     create_effect(move || println!("{}", count.get()));
///     dispose
/// });
///
/// flush()?;           // Prints: "0"
/// dispose.dispose();
/// count.set(1);
/// flush()?;           // Prints nothing
/// ```
pub fn create_root<R>(f: impl FnOnce(Disposer) -> R) -> R {
    let id = NodeId::new();
    with_runtime(|rt| {
        rt.register_root(id);
        let _scope = rt.scope(Some(id));
        f(Disposer::new(id))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{create_effect, current_scope, flush, Cell, Cleanup, Derived};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn root_disposal_stops_effects() {
        let cell = Cell::new(0);
        let runs = Rc::new(RefCell::new(Vec::new()));

        let dispose = create_root(|dispose| {
            let cell = cell.clone();
            let runs = runs.clone();
            create_effect(move || runs.borrow_mut().push(cell.get()));
            dispose
        });

        flush().unwrap();
        dispose.dispose();
        cell.set(1);
        flush().unwrap();

        assert_eq!(*runs.borrow(), vec![0]);
        assert_eq!(cell.subscriber_count(), 0);
        assert!(dispose.is_disposed());
    }

    #[test]
    fn cleanups_run_newest_first() {
        let log = Rc::new(RefCell::new(Vec::new()));

        let dispose = create_root(|dispose| {
            for name in ["first", "second", "third"] {
                let log = log.clone();
                create_effect(move || {
                    let log = log.clone();
                    Cleanup::new(move || log.borrow_mut().push(name))
                });
            }
            dispose
        });

        flush().unwrap();
        dispose.dispose();
        assert_eq!(*log.borrow(), vec!["third", "second", "first"]);

        // Idempotent
        dispose.dispose();
        assert_eq!(log.borrow().len(), 3);
    }

    #[test]
    fn nested_effect_children_are_disposed_before_parent() {
        let log = Rc::new(RefCell::new(Vec::new()));

        let dispose = create_root(|dispose| {
            let log = log.clone();
            create_effect(move || {
                let inner_log = log.clone();
                create_effect(move || {
                    let log = inner_log.clone();
                    Cleanup::new(move || log.borrow_mut().push("child"))
                });
                let log = log.clone();
                Cleanup::new(move || log.borrow_mut().push("parent"))
            });
            dispose
        });

        flush().unwrap();
        dispose.dispose();
        assert_eq!(*log.borrow(), vec!["child", "parent"]);
    }

    #[test]
    fn root_returns_closure_result() {
        let (value, dispose) = create_root(|dispose| {
            let derived = Derived::new(|| 21 * 2);
            (derived.get(), dispose)
        });
        assert_eq!(value, 42);
        assert!(!dispose.is_disposed());
        dispose.dispose();
        assert!(dispose.is_disposed());
    }

    #[test]
    fn root_does_not_leak_scope() {
        let (inside, dispose) = create_root(|dispose| (current_scope(), dispose));
        assert_eq!(inside, dispose.node());
        assert_eq!(current_scope(), None);
    }

    #[test]
    fn inert_disposer_is_always_disposed() {
        let disposer = Disposer::inert();
        assert!(disposer.is_disposed());
        assert_eq!(disposer.node(), None);
        disposer.dispose();
    }
}
