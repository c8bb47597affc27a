//! Dependency Graph
//!
//! This module implements the dependency graph that tracks relationships
//! between reactive values and computations, plus the scheduler that orders
//! effect re-runs.
//!
//! # Overview
//!
//! The graph is a directed acyclic graph where:
//!
//! - Nodes represent sources (cells), derived values, effects and root scopes
//! - Edges represent reads: if A read B during its last run, there is an
//!   edge from B to A
//!
//! A second, independent tree links every node to the scope that created it.
//! Disposal walks that tree depth-first.
//!
//! # Design Decisions
//!
//! 1. We use a centralized arena rather than per-node linked lists because:
//!    - It gives depth ordering for batch updates for free
//!    - Handles stay small (`NodeId` plus the typed value)
//!    - Disposal never has to chase reference cycles
//!
//! 2. The graph is indexed by node ID for O(1) lookups.
//!
//! 3. We maintain both directions (sources and subscribers) to enable
//!    efficient traversal either way.

mod arena;
mod node;
mod scheduler;

pub use arena::Graph;
pub use node::{Node, NodeId, NodeKind, Status};
pub use scheduler::{order_pass, FlushState, RunKey, Scheduler};

pub(crate) use node::{ComputeFn, RunFn};
