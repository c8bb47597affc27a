//! Update Scheduler
//!
//! The scheduler collects effects dirtied during a synchronous tick and
//! hands them out in passes. It is a small state machine:
//!
//! ```text
//! Idle --write/schedule--> Collecting --begin_flush--> Flushing --end_flush--> Idle
//! ```
//!
//! Any changing write moves an idle scheduler to `Collecting`, even one that
//! reaches no effect. Cancelling the last pending run returns it to `Idle`.
//! Scheduling while `Collecting` just adds to the run set. Scheduling while
//! `Flushing` adds to the run set of the next pass; the runtime keeps taking
//! passes until the set stays empty or the pass bound is hit.
//!
//! # Ordering
//!
//! Within a pass, effects run by `(phase, depth, id)`: pre effects first,
//! shallower effects before deeper ones, and creation order as tie-break.

use indexmap::IndexSet;
use tracing::trace;

use super::node::NodeId;
use crate::reactive::Phase;

/// Flush state of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushState {
    /// Nothing pending.
    Idle,

    /// At least one effect is waiting for the next flush.
    Collecting,

    /// A flush is in progress.
    Flushing,
}

/// Sort key for a scheduled effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RunKey {
    pub phase: Phase,
    pub depth: u32,
    pub id: NodeId,
}

/// The run set plus flush state.
pub struct Scheduler {
    state: FlushState,

    /// Effects waiting to run, deduplicated by identity.
    pending: IndexSet<NodeId>,
}

impl Scheduler {
    /// Create a new idle scheduler.
    pub fn new() -> Self {
        Self {
            state: FlushState::Idle,
            pending: IndexSet::new(),
        }
    }

    pub fn state(&self) -> FlushState {
        self.state
    }

    /// Add an effect to the run set.
    ///
    /// Returns `false` if it was already pending.
    pub fn schedule(&mut self, node_id: NodeId) -> bool {
        let inserted = self.pending.insert(node_id);
        if self.state == FlushState::Idle {
            self.state = FlushState::Collecting;
        }
        trace!(node = %node_id, inserted, state = ?self.state, "scheduled effect");
        inserted
    }

    /// Record that a source changed during the current tick.
    pub fn note_write(&mut self) {
        if self.state == FlushState::Idle {
            self.state = FlushState::Collecting;
        }
    }

    /// Remove a pending run, e.g. because the effect was disposed.
    pub fn cancel(&mut self, node_id: NodeId) {
        self.pending.shift_remove(&node_id);
        if self.state == FlushState::Collecting && self.pending.is_empty() {
            self.state = FlushState::Idle;
        }
    }

    pub fn is_pending(&self, node_id: NodeId) -> bool {
        self.pending.contains(&node_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Enter the flushing state.
    ///
    /// Returns `false` if a flush is already running.
    pub fn begin_flush(&mut self) -> bool {
        if self.state == FlushState::Flushing {
            return false;
        }
        self.state = FlushState::Flushing;
        true
    }

    /// Leave the flushing state. Anything still pending stays collected.
    pub fn end_flush(&mut self) {
        self.state = if self.pending.is_empty() {
            FlushState::Idle
        } else {
            FlushState::Collecting
        };
    }

    /// Take the current run set, leaving an empty one for writes made
    /// while the pass executes.
    pub fn take_pass(&mut self) -> Vec<NodeId> {
        std::mem::take(&mut self.pending).into_iter().collect()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Order a pass by `(phase, depth, id)`.
pub fn order_pass(mut keys: Vec<RunKey>) -> Vec<RunKey> {
    keys.sort_unstable();
    keys
}
