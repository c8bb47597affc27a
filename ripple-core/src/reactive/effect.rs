//! Effect Implementation
//!
//! An Effect is a side-effecting computation that re-runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect is queued. It first runs on the next flush,
//!    never inline.
//!
//! 2. When any dependency changes, the effect is queued again. Queuing is
//!    deduplicated, so an effect reached through several changed sources
//!    still runs once per flush.
//!
//! 3. Before re-running, the effect runs its previous cleanup and disposes
//!    anything it created during its previous run. Dependencies are rebuilt
//!    from scratch by every run.
//!
//! # Differences from Derived
//!
//! - Deriveds return a value; effects do not.
//! - Deriveds are lazy (compute on access); effects are eager (run on flush).
//! - Deriveds must be pure; effects may write cells. A write that touches the
//!   effect's own sources queues it for another pass.
//!
//! # Cleanup
//!
//! The effect body may return a [`Cleanup`]. It runs before the effect
//! re-runs and when the effect is disposed, exactly once per run.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use super::owner::Disposer;
use super::runtime::with_runtime;
use crate::graph::{NodeId, RunFn};

/// When, within a flush pass, an effect runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Before the host's commit hook.
    Pre,

    /// After the host's commit hook.
    #[default]
    Post,
}

/// Teardown returned by an effect run.
pub struct Cleanup(Box<dyn FnOnce()>);

impl Cleanup {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + 'static,
    {
        Self(Box::new(f))
    }

    pub(crate) fn run(self) {
        (self.0)()
    }
}

impl fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Cleanup(..)")
    }
}

/// Error type an effect body may fail with.
pub type EffectError = Box<dyn std::error::Error + 'static>;

/// What an effect run produced, after normalisation.
pub type EffectResult = Result<Option<Cleanup>, EffectError>;

/// Values an effect body may return.
///
/// Implemented for `()`, [`Cleanup`], `Option<Cleanup>`, and `Result`s of
/// those with any error convertible into [`EffectError`].
pub trait EffectOutput {
    fn into_effect_result(self) -> EffectResult;
}

impl EffectOutput for () {
    fn into_effect_result(self) -> EffectResult {
        Ok(None)
    }
}

impl EffectOutput for Cleanup {
    fn into_effect_result(self) -> EffectResult {
        Ok(Some(self))
    }
}

impl EffectOutput for Option<Cleanup> {
    fn into_effect_result(self) -> EffectResult {
        Ok(self)
    }
}

impl<T, E> EffectOutput for Result<T, E>
where
    T: EffectOutput,
    E: Into<EffectError>,
{
    fn into_effect_result(self) -> EffectResult {
        self.map_err(Into::into).and_then(T::into_effect_result)
    }
}

/// Create a post-phase effect.
///
/// # Example
///
/// ```rust,ignore
/// let count = Cell::new(0);
///
/// let stop = create_effect({
///     let count = count.clone();
///     move || println!("Count is: {}", count.get())
/// });
///
/// flush()?;      // Prints: "Count is: 0"
/// count.set(5);
/// flush()?;      // Prints: "Count is: 5"
/// stop.dispose();
/// ```
pub fn create_effect<F, R>(f: F) -> Disposer
where
    F: FnMut() -> R + 'static,
    R: EffectOutput,
{
    create_effect_with_phase(Phase::Post, f)
}

/// Create an effect that runs in the given phase.
pub fn create_effect_with_phase<F, R>(phase: Phase, mut f: F) -> Disposer
where
    F: FnMut() -> R + 'static,
    R: EffectOutput,
{
    let id = NodeId::new();
    let run: RunFn = Rc::new(RefCell::new(move || f().into_effect_result()));
    with_runtime(|rt| rt.register_effect(id, phase, run));
    Disposer::new(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{flush, Cell};
    use crate::{FailureCause, ReactiveError};
    use std::cell::Cell as Counter;

    #[test]
    fn effect_waits_for_flush() {
        let runs = Rc::new(Counter::new(0));
        let runs_clone = runs.clone();

        let _effect = create_effect(move || runs_clone.set(runs_clone.get() + 1));

        // Not run inline
        assert_eq!(runs.get(), 0);

        flush().unwrap();
        assert_eq!(runs.get(), 1);

        // Nothing changed, nothing to do
        flush().unwrap();
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn effect_reruns_on_dependency_change() {
        let cell = Cell::new(1);
        let seen = Rc::new(RefCell::new(Vec::new()));

        let _effect = create_effect({
            let cell = cell.clone();
            let seen = seen.clone();
            move || seen.borrow_mut().push(cell.get())
        });

        flush().unwrap();
        cell.set(2);
        flush().unwrap();
        cell.set(2);
        flush().unwrap();

        assert_eq!(*seen.borrow(), vec![1, 2]);
    }

    #[test]
    fn cleanup_runs_before_rerun_and_on_dispose() {
        let cell = Cell::new(0);
        let log = Rc::new(RefCell::new(Vec::new()));

        let effect = create_effect({
            let cell = cell.clone();
            let log = log.clone();
            move || {
                let value = cell.get();
                log.borrow_mut().push(format!("run {value}"));
                let log = log.clone();
                Cleanup::new(move || log.borrow_mut().push(format!("cleanup {value}")))
            }
        });

        flush().unwrap();
        cell.set(1);
        flush().unwrap();
        effect.dispose();

        assert_eq!(
            *log.borrow(),
            vec!["run 0", "cleanup 0", "run 1", "cleanup 1"]
        );
    }

    #[test]
    fn disposed_effect_does_not_run() {
        let runs = Rc::new(Counter::new(0));
        let runs_clone = runs.clone();

        let effect = create_effect(move || runs_clone.set(runs_clone.get() + 1));
        effect.dispose();
        flush().unwrap();

        assert_eq!(runs.get(), 0);
        assert!(effect.is_disposed());
    }

    #[test]
    fn failing_effect_does_not_stop_others() {
        let ran = Rc::new(Counter::new(false));

        let failing = create_effect(|| -> Result<(), String> { Err("nope".to_string()) });
        let _other = create_effect({
            let ran = ran.clone();
            move || ran.set(true)
        });

        let err = flush().unwrap_err();
        assert!(ran.get());
        match err {
            ReactiveError::EffectsFailed { failures } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(Some(failures[0].effect), failing.node());
                assert_eq!(failures[0].cause, FailureCause::Message("nope".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn phase_ordering() {
        let order = Rc::new(RefCell::new(Vec::new()));

        let _post = create_effect({
            let order = order.clone();
            move || order.borrow_mut().push("post")
        });
        let _pre = create_effect_with_phase(Phase::Pre, {
            let order = order.clone();
            move || order.borrow_mut().push("pre")
        });

        flush().unwrap();
        assert_eq!(*order.borrow(), vec!["pre", "post"]);
    }

    #[test]
    fn phase_deserializes_lowercase() {
        let phase: Phase = serde_json::from_str("\"pre\"").unwrap();
        assert_eq!(phase, Phase::Pre);
        assert_eq!(Phase::default(), Phase::Post);
    }
}
