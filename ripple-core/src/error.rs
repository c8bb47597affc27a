//! Error Types
//!
//! Every failure the reactive runtime reports is a [`ReactiveError`].
//!
//! Fallible operations come in two flavours. The `try_*` methods return
//! `Result<_, ReactiveError>`. The plain methods (`get`, `set`) treat an
//! error as a programming defect and panic with the `ReactiveError` itself as
//! the panic payload, the same way `RefCell::borrow` panics on a conflicting
//! borrow. Because the payload is typed, a `try_*` call further up the read
//! chain (or the flush loop, for effects) can recover it.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use thiserror::Error;

use crate::graph::NodeId;

/// Result alias used throughout the crate.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

/// Errors raised by the reactive runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// A cell was written while a derived computation was running.
    #[error("cell {cell} was written while derived {derived} was computing; derived computations must be pure")]
    PurityViolation { cell: NodeId, derived: NodeId },

    /// A derived was read while it was already being evaluated.
    #[error("cyclic dependency: derived {node} was read while it was being evaluated")]
    CyclicDependency { node: NodeId },

    /// A flush kept scheduling new passes past the configured bound.
    #[error("update loop: flush did not settle after {passes} passes")]
    UpdateLoop { passes: u32 },

    /// A handle was used after its owning scope was disposed.
    #[error("node {node} was used after it was disposed")]
    Disposed { node: NodeId },

    /// One or more effects failed during a flush.
    #[error("{} effect(s) failed during flush", failures.len())]
    EffectsFailed { failures: Vec<EffectFailure> },
}

/// A single effect failure collected by the flush loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectFailure {
    /// The effect that failed.
    pub effect: NodeId,

    /// What went wrong.
    pub cause: FailureCause,
}

/// Why an effect failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// The effect hit a runtime error, e.g. by reading a cyclic derived.
    Reactive(ReactiveError),

    /// The effect returned an error or panicked with a message.
    Message(String),
}

impl std::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureCause::Reactive(err) => err.fmt(f),
            FailureCause::Message(msg) => f.write_str(msg),
        }
    }
}

/// Panic with `err` as the payload.
pub(crate) fn raise(err: ReactiveError) -> ! {
    panic::panic_any(err)
}

/// Run `f`, turning a `ReactiveError` panic payload back into an `Err`.
///
/// Any other panic keeps unwinding.
pub(crate) fn recover<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => match payload.downcast::<ReactiveError>() {
            Ok(err) => Err(*err),
            Err(payload) => panic::resume_unwind(payload),
        },
    }
}

/// Classify a caught panic payload.
pub(crate) fn failure_cause(payload: Box<dyn Any + Send>) -> FailureCause {
    let payload = match payload.downcast::<ReactiveError>() {
        Ok(err) => return FailureCause::Reactive(*err),
        Err(payload) => payload,
    };
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        FailureCause::Message((*msg).to_string())
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        FailureCause::Message(msg.clone())
    } else {
        FailureCause::Message("effect panicked".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recover_returns_reactive_payload() {
        let node = NodeId::new();
        let result: Result<()> = recover(|| raise(ReactiveError::CyclicDependency { node }));
        assert_eq!(result, Err(ReactiveError::CyclicDependency { node }));
    }

    #[test]
    fn recover_passes_through_ok() {
        assert_eq!(recover(|| Ok(7)), Ok(7));
    }

    #[test]
    #[should_panic(expected = "boom")]
    fn recover_rethrows_foreign_panics() {
        let _ = recover::<()>(|| panic!("boom"));
    }

    #[test]
    fn failure_cause_reads_string_payloads() {
        let payload = panic::catch_unwind(|| panic!("bad {}", 1)).unwrap_err();
        assert_eq!(failure_cause(payload), FailureCause::Message("bad 1".to_string()));
    }

    #[test]
    fn display_messages() {
        let err = ReactiveError::UpdateLoop { passes: 100 };
        assert_eq!(err.to_string(), "update loop: flush did not settle after 100 passes");

        let failures = vec![EffectFailure {
            effect: NodeId::new(),
            cause: FailureCause::Message("x".into()),
        }];
        let err = ReactiveError::EffectsFailed { failures };
        assert_eq!(err.to_string(), "1 effect(s) failed during flush");
    }
}
