//! Development Inspection
//!
//! `inspect` watches a set of reactive values and reports their current
//! values whenever one of them changes. It is meant for debugging only:
//! it is a no-op in release builds or when disabled through
//! [`RuntimeConfig::inspect`](crate::RuntimeConfig), and it never fails.

use std::fmt::Debug;
use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, warn};

use super::context::untrack;
use super::effect::{create_effect_with_phase, Phase};
use super::owner::Disposer;
use super::runtime::with_runtime;
use super::store::Proxy;
use super::{Cell, Derived};
use crate::error::failure_cause;
use crate::graph::NodeId;

/// Why an inspect callback fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InspectEvent {
    /// First report, when the watcher starts.
    Init,

    /// A watched value changed.
    Update,
}

/// A reactive value that can be watched by [`inspect`].
pub trait Inspect {
    /// Node backing the value.
    fn node(&self) -> NodeId;

    /// Debug rendering of the current value, read with tracking.
    fn render(&self) -> String;
}

impl<T: Debug + 'static> Inspect for Cell<T> {
    fn node(&self) -> NodeId {
        self.id()
    }

    fn render(&self) -> String {
        self.with(|value| format!("{value:?}"))
    }
}

impl<T> Inspect for Derived<T>
where
    T: Clone + PartialEq + Debug + 'static,
{
    fn node(&self) -> NodeId {
        self.id()
    }

    fn render(&self) -> String {
        match self.try_with(|value| format!("{value:?}")) {
            Ok(rendered) => rendered,
            Err(err) => format!("<{err}>"),
        }
    }
}

impl<T: Debug + 'static> Inspect for Proxy<T> {
    fn node(&self) -> NodeId {
        self.id()
    }

    fn render(&self) -> String {
        self.read(|value| format!("{value:?}"))
    }
}

/// Log every change of `sources` at debug level.
pub fn inspect(sources: Vec<Box<dyn Inspect>>) -> Disposer {
    inspect_with(sources, |event, values| {
        debug!(?event, ?values, "inspect");
    })
}

/// Call `on_change` with the rendered values of `sources`, once on start
/// and again after every change.
///
/// The callback runs untracked. A panic in the callback, or in one of the
/// watched values, is logged and swallowed.
pub fn inspect_with<F>(sources: Vec<Box<dyn Inspect>>, mut on_change: F) -> Disposer
where
    F: FnMut(InspectEvent, &[String]) + 'static,
{
    let enabled = with_runtime(|rt| rt.config().inspect_enabled());
    if !enabled {
        return Disposer::inert();
    }

    let mut event = InspectEvent::Init;
    create_effect_with_phase(Phase::Pre, move || {
        let values: Vec<String> = sources
            .iter()
            .map(|source| {
                panic::catch_unwind(AssertUnwindSafe(|| source.render())).unwrap_or_else(
                    |payload| format!("<panicked: {}>", failure_cause(payload)),
                )
            })
            .collect();

        let current = event;
        event = InspectEvent::Update;
        let reported = untrack(|| panic::catch_unwind(AssertUnwindSafe(|| on_change(current, &values))));
        if let Err(payload) = reported {
            warn!(cause = %failure_cause(payload), "inspect callback panicked");
        }
    })
}
