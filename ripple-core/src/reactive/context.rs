//! Tracking Context
//!
//! The tracking context records which computation is currently running.
//! This enables automatic dependency tracking: when a cell or derived is
//! read, the read is recorded against the computation on top of the stack.
//!
//! # Implementation
//!
//! We use a thread-local stack of frames. Entering a derived or effect pushes
//! an observing frame that collects reads; `untrack` pushes a sentinel frame
//! that swallows them. Frames are popped by guards, so the stack stays
//! balanced even if a computation panics.
//!
//! This design supports nested contexts (e.g. a derived that reads from
//! another derived), and lets cycle detection see the whole chain.

use std::cell::RefCell;

use indexmap::IndexMap;

use crate::error::{ReactiveError, Result};
use crate::graph::NodeId;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<Frame>> = RefCell::new(Vec::new());
}

/// An entry in the tracking stack.
#[derive(Debug)]
enum Frame {
    /// A computation collecting the reads it makes, with the version seen.
    Observer {
        node: NodeId,
        reads: IndexMap<NodeId, u64>,
    },

    /// Tracking disabled by `untrack`.
    Untracked,
}

/// Process-wide (per thread) view of the tracking stack.
pub struct TrackingContext;

impl TrackingContext {
    /// Enter an observing frame for `node`.
    ///
    /// Fails with a cyclic-dependency error if `node` is already on the
    /// stack. The frame is exited when the returned guard is dropped or
    /// finished.
    pub fn enter(node: NodeId) -> Result<TrackingGuard> {
        CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            let on_stack = stack
                .iter()
                .any(|frame| matches!(frame, Frame::Observer { node: n, .. } if *n == node));
            if on_stack {
                return Err(ReactiveError::CyclicDependency { node });
            }
            stack.push(Frame::Observer {
                node,
                reads: IndexMap::new(),
            });
            Ok(TrackingGuard {
                node,
                finished: false,
            })
        })
    }

    /// Disable tracking until the returned guard is dropped.
    pub fn untracked() -> UntrackGuard {
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(Frame::Untracked));
        UntrackGuard { _private: () }
    }

    /// Check if reads are currently being recorded.
    pub fn is_tracking() -> bool {
        Self::current_observer().is_some()
    }

    /// The computation that would receive a read right now, if any.
    pub fn current_observer() -> Option<NodeId> {
        CONTEXT_STACK.with(|stack| match stack.borrow().last() {
            Some(Frame::Observer { node, .. }) => Some(*node),
            _ => None,
        })
    }

    /// The innermost running computation, looking through `untrack` frames.
    pub fn innermost_computation() -> Option<NodeId> {
        CONTEXT_STACK.with(|stack| {
            stack.borrow().iter().rev().find_map(|frame| match frame {
                Frame::Observer { node, .. } => Some(*node),
                Frame::Untracked => None,
            })
        })
    }

    /// Record a read of `source` at `version`.
    ///
    /// Only the first read of a source in a run is kept.
    pub fn record(source: NodeId, version: u64) {
        CONTEXT_STACK.with(|stack| {
            if let Some(Frame::Observer { reads, .. }) = stack.borrow_mut().last_mut() {
                reads.entry(source).or_insert(version);
            }
        });
    }

    /// Number of frames on the stack.
    pub fn depth() -> usize {
        CONTEXT_STACK.with(|stack| stack.borrow().len())
    }

    /// Drop every frame. Intended for test isolation.
    pub fn reset() {
        CONTEXT_STACK.with(|stack| stack.borrow_mut().clear());
    }

    fn pop(expected: Option<NodeId>) -> Option<IndexMap<NodeId, u64>> {
        CONTEXT_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();
            match popped {
                Some(Frame::Observer { node, reads }) => {
                    // Verify we're popping the right frame.
                    debug_assert_eq!(
                        Some(node),
                        expected,
                        "TrackingContext mismatch: expected {:?}, got {:?}",
                        expected,
                        node
                    );
                    Some(reads)
                }
                Some(Frame::Untracked) => {
                    debug_assert!(expected.is_none(), "TrackingContext mismatch: expected {:?}, got untrack frame", expected);
                    None
                }
                None => None,
            }
        })
    }
}

/// Guard for an observing frame.
pub struct TrackingGuard {
    node: NodeId,
    finished: bool,
}

impl TrackingGuard {
    /// Pop the frame and return the reads it collected.
    pub fn finish(mut self) -> IndexMap<NodeId, u64> {
        self.finished = true;
        TrackingContext::pop(Some(self.node)).unwrap_or_default()
    }
}

impl Drop for TrackingGuard {
    fn drop(&mut self) {
        if !self.finished {
            TrackingContext::pop(Some(self.node));
        }
    }
}

/// Guard for an `untrack` sentinel frame.
pub struct UntrackGuard {
    _private: (),
}

impl Drop for UntrackGuard {
    fn drop(&mut self) {
        TrackingContext::pop(None);
    }
}

/// Run `f` with dependency tracking disabled and return its result.
///
/// Reads inside `f` never register edges, even when `f` runs inside an
/// effect or derived. Tracking is restored on every exit path.
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    let _guard = TrackingContext::untracked();
    f()
}
