//! Reactive Primitives
//!
//! This module implements the core reactive system: cells, deriveds and
//! effects. These primitives form the foundation of Ripple's fine-grained
//! reactivity.
//!
//! # Concepts
//!
//! ## Cells
//!
//! A Cell is a container for mutable state. When a cell's value is read
//! within a tracking context (such as a derived or effect), the read is
//! recorded as a dependency. When the cell's value changes, all dependents
//! are invalidated.
//!
//! ## Deriveds
//!
//! A Derived is a computed value that caches its result. It re-evaluates only
//! when one of its dependencies changes, and only when someone reads it.
//! Derived computations must be pure: writing a cell from inside one fails.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that re-runs whenever its
//! dependencies change. Effects are used to synchronize reactive state with
//! external systems. They never run inline from a write; they are queued and
//! run by [`flush`].
//!
//! ## Scopes
//!
//! Nodes belong to the root or effect that created them. Disposing a scope
//! disposes everything it owns. See [`create_root`].
//!
//! # Implementation Notes
//!
//! The reactive system uses a thread-local tracking context to automatically
//! detect dependencies. When a cell is read, we check if there is an active
//! tracking context and, if so, record the read together with the cell's
//! version.
//!
//! Writes are batched: they only mark nodes and queue effects. The host
//! decides when a tick ends and calls [`flush`] (or wraps its writes in
//! [`batch`]).

mod cell;
mod context;
mod derived;
mod effect;
mod inspect;
mod owner;
mod runtime;
pub mod store;

use std::rc::Rc;

pub use cell::Cell;
pub use context::{untrack, TrackingContext, TrackingGuard, UntrackGuard};
pub use derived::Derived;
pub use effect::{create_effect, create_effect_with_phase, Cleanup, EffectError, EffectOutput, EffectResult, Phase};
pub use inspect::{inspect, inspect_with, Inspect, InspectEvent};
pub use owner::{create_root, Disposer};
pub use store::{wrap, Proxy};

use runtime::with_runtime;

use crate::config::RuntimeConfig;
use crate::error::{EffectFailure, Result};
use crate::graph::{FlushState, NodeId};

/// Run every pending effect until nothing is left to do.
///
/// Each pass runs pre-phase effects, then the commit hook, then post-phase
/// effects. Effects made dirty during a pass run in the next one. Calling
/// `flush` while a flush is in progress is a no-op.
///
/// # Errors
///
/// - [`ReactiveError::UpdateLoop`](crate::ReactiveError::UpdateLoop) when the
///   flush does not settle within the configured number of passes.
/// - [`ReactiveError::EffectsFailed`](crate::ReactiveError::EffectsFailed)
///   when effects failed and no error handler is installed.
pub fn flush() -> Result<()> {
    with_runtime(|rt| rt.flush())
}

/// Run `f`, then flush if this is the outermost batch.
///
/// Writes made inside `f` are coalesced, so effects observe only their
/// final values.
pub fn batch<R>(f: impl FnOnce() -> R) -> Result<R> {
    let value = with_runtime(|rt| {
        let _batch = rt.enter_batch();
        f()
    });

    let outermost = with_runtime(|rt| !rt.in_batch() && rt.flush_state() != FlushState::Flushing);
    if outermost {
        flush()?;
    }
    Ok(value)
}

/// Replace this thread's runtime configuration.
pub fn configure(config: RuntimeConfig) {
    with_runtime(|rt| rt.configure(config));
}

/// This thread's runtime configuration.
pub fn config() -> RuntimeConfig {
    with_runtime(|rt| rt.config())
}

/// Install the hook that runs between pre and post effects in every pass.
pub fn set_commit_hook(hook: impl Fn() + 'static) {
    with_runtime(|rt| rt.set_commit_hook(Some(Rc::new(hook))));
}

pub fn clear_commit_hook() {
    with_runtime(|rt| rt.set_commit_hook(None));
}

/// Route effect failures to `handler` instead of returning them from
/// [`flush`].
pub fn set_error_handler(handler: impl Fn(&EffectFailure) + 'static) {
    with_runtime(|rt| rt.set_error_handler(Some(Rc::new(handler))));
}

pub fn clear_error_handler() {
    with_runtime(|rt| rt.set_error_handler(None));
}

/// Current scheduler state.
pub fn flush_state() -> FlushState {
    with_runtime(|rt| rt.flush_state())
}

/// The scope new nodes are attached to right now, if any.
pub fn current_scope() -> Option<NodeId> {
    with_runtime(|rt| rt.current_owner())
}

/// Number of live nodes in this thread's graph.
pub fn node_count() -> usize {
    with_runtime(|rt| rt.node_count())
}

/// Drop every node, hook and setting on this thread without running
/// cleanups.
///
/// Handles created before the reset keep their values but are detached from
/// the graph. Intended for reusing a thread between tests.
pub fn reset() {
    with_runtime(|rt| rt.reset());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn batch_coalesces_writes() {
        let cell = Cell::new(0);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let _effect = create_effect({
            let cell = cell.clone();
            let seen = seen.clone();
            move || seen.borrow_mut().push(cell.get())
        });
        flush().unwrap();

        let returned = batch(|| {
            for i in 1..=5 {
                cell.set(i);
            }
            "done"
        })
        .unwrap();

        assert_eq!(returned, "done");
        assert_eq!(*seen.borrow(), vec![0, 5]);
    }

    #[test]
    fn nested_batch_flushes_once_at_the_end() {
        let cell = Cell::new(0);
        let runs = Rc::new(RefCell::new(0));
        let _effect = create_effect({
            let cell = cell.clone();
            let runs = runs.clone();
            move || {
                cell.get();
                *runs.borrow_mut() += 1;
            }
        });

        batch(|| {
            cell.set(1);
            batch(|| cell.set(2)).unwrap();
            assert_eq!(*runs.borrow(), 0);
            assert_eq!(flush_state(), FlushState::Collecting);
        })
        .unwrap();

        assert_eq!(*runs.borrow(), 1);
        assert_eq!(flush_state(), FlushState::Idle);
    }

    #[test]
    fn commit_hook_runs_between_phases() {
        let order = Rc::new(RefCell::new(Vec::new()));
        set_commit_hook({
            let order = order.clone();
            move || order.borrow_mut().push("commit")
        });
        let _post = create_effect({
            let order = order.clone();
            move || order.borrow_mut().push("post")
        });
        let _pre = create_effect_with_phase(Phase::Pre, {
            let order = order.clone();
            move || order.borrow_mut().push("pre")
        });

        flush().unwrap();
        assert_eq!(*order.borrow(), vec!["pre", "commit", "post"]);

        clear_commit_hook();
    }

    #[test]
    fn error_handler_receives_failures() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        set_error_handler({
            let seen = seen.clone();
            move |failure: &EffectFailure| seen.borrow_mut().push(failure.cause.to_string())
        });

        let _effect = create_effect(|| -> std::result::Result<(), String> { Err("broken".into()) });
        assert!(flush().is_ok());
        assert_eq!(*seen.borrow(), vec!["broken".to_string()]);

        clear_error_handler();
    }

    #[test]
    fn reset_drops_nodes_and_config() {
        let _cell = Cell::new(1);
        configure(RuntimeConfig {
            max_flush_passes: 5,
            ..RuntimeConfig::default()
        });
        assert!(node_count() > 0);

        reset();
        assert_eq!(node_count(), 0);
        assert_eq!(config(), RuntimeConfig::default());
    }
}
