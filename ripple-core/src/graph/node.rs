//! Graph Nodes
//!
//! This module defines the node types that live in the dependency graph.
//! Every reactive primitive (cell, derived, effect, root scope) owns exactly
//! one node; handles only carry the node's id.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::{IndexMap, IndexSet};
use smallvec::SmallVec;

use crate::reactive::{Cleanup, EffectResult, Phase};

/// Unique identifier for a node in the dependency graph.
///
/// Ids are handed out in increasing order, so comparing two ids compares
/// creation order. The scheduler relies on this for its tie-break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A source node (cell or store proxy). Sources have no dependencies,
    /// only subscribers.
    Source,

    /// A derived node. Has dependencies and may have subscribers.
    Derived,

    /// An effect node. These are leaves of the graph.
    Effect(Phase),

    /// An ownership scope created by `create_root`. Roots take no part in
    /// propagation; they only anchor disposal.
    Root,
}

/// Evaluation status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The node is up-to-date.
    Clean,

    /// An upstream derived was invalidated. Its value may turn out to be
    /// unchanged, so the node has to check its sources before re-running.
    MaybeDirty,

    /// A direct source changed. The node must re-run.
    Dirty,

    /// The node's computation is on the tracking stack right now.
    Running,

    /// The node was disposed while it was running. It is removed from the
    /// graph once the run completes.
    Disposed,
}

/// Type-erased recompute hook for a derived node.
///
/// Runs the user computation, stores the result and reports whether the
/// cached value changed.
pub(crate) type ComputeFn = Rc<dyn Fn() -> bool>;

/// Type-erased body of an effect node.
pub(crate) type RunFn = Rc<RefCell<dyn FnMut() -> EffectResult>>;

/// A node in the dependency graph.
pub struct Node {
    /// Unique identifier for this node.
    id: NodeId,

    /// What kind of node this is.
    kind: NodeKind,

    /// Current evaluation status.
    pub(crate) status: Status,

    /// Bumped every time the value this node exposes changes.
    pub(crate) version: u64,

    /// Longest path from a source to this node. Sources sit at depth zero.
    pub(crate) depth: u32,

    /// Nodes this node read during its last run, with the version observed.
    /// Insertion order is read order.
    sources: IndexMap<NodeId, u64>,

    /// Nodes that read this node during their last run.
    subscribers: IndexSet<NodeId>,

    /// The scope that created this node, if any.
    owner: Option<NodeId>,

    /// Nodes created while this node was the current owner, in creation order.
    children: SmallVec<[NodeId; 4]>,

    /// Teardown returned by the last effect run.
    pub(crate) cleanup: Option<Cleanup>,

    pub(crate) compute: Option<ComputeFn>,
    pub(crate) run: Option<RunFn>,
}

impl Node {
    /// Create a new node with the given kind.
    pub fn new(id: NodeId, kind: NodeKind, owner: Option<NodeId>) -> Self {
        Self {
            id,
            kind,
            status: match kind {
                NodeKind::Source | NodeKind::Root => Status::Clean,
                // Start dirty to ensure first computation
                NodeKind::Derived | NodeKind::Effect(_) => Status::Dirty,
            },
            version: 0,
            depth: 0,
            sources: IndexMap::new(),
            subscribers: IndexSet::new(),
            owner,
            children: SmallVec::new(),
            cleanup: None,
            compute: None,
            run: None,
        }
    }

    /// Get the node's ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Get the node's kind.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn is_clean(&self) -> bool {
        self.status == Status::Clean
    }

    /// Mark the node as maybe dirty (an upstream derived was invalidated).
    pub fn mark_maybe_dirty(&mut self) {
        if self.status == Status::Clean {
            self.status = Status::MaybeDirty;
        }
    }

    /// Mark the node as definitely dirty.
    pub fn mark_dirty(&mut self) {
        if matches!(self.status, Status::Clean | Status::MaybeDirty) {
            self.status = Status::Dirty;
        }
    }

    pub fn mark_clean(&mut self) {
        self.status = Status::Clean;
    }

    pub fn owner(&self) -> Option<NodeId> {
        self.owner
    }

    /// Dependencies recorded by the last run, in read order.
    pub fn sources(&self) -> &IndexMap<NodeId, u64> {
        &self.sources
    }

    pub fn subscribers(&self) -> &IndexSet<NodeId> {
        &self.subscribers
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub(crate) fn add_child(&mut self, child: NodeId) {
        self.children.push(child);
    }

    pub(crate) fn remove_child(&mut self, child: NodeId) {
        self.children.retain(|c| *c != child);
    }

    pub(crate) fn take_children(&mut self) -> SmallVec<[NodeId; 4]> {
        std::mem::take(&mut self.children)
    }

    pub(crate) fn add_subscriber(&mut self, node_id: NodeId) {
        self.subscribers.insert(node_id);
    }

    pub(crate) fn remove_subscriber(&mut self, node_id: NodeId) {
        self.subscribers.shift_remove(&node_id);
    }

    pub(crate) fn remove_source(&mut self, node_id: NodeId) {
        self.sources.shift_remove(&node_id);
    }

    pub(crate) fn replace_sources(&mut self, sources: IndexMap<NodeId, u64>) -> IndexMap<NodeId, u64> {
        std::mem::replace(&mut self.sources, sources)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("status", &self.status)
            .field("version", &self.version)
            .field("depth", &self.depth)
            .field("sources", &self.sources.len())
            .field("subscribers", &self.subscribers.len())
            .field("children", &self.children.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_unique_and_ordered() {
        let id1 = NodeId::new();
        let id2 = NodeId::new();
        assert_ne!(id1, id2);
        assert!(id1 < id2);
    }

    #[test]
    fn source_node_starts_clean() {
        let node = Node::new(NodeId::new(), NodeKind::Source, None);
        assert_eq!(node.kind(), NodeKind::Source);
        assert!(node.is_clean());
    }

    #[test]
    fn computations_start_dirty() {
        let derived = Node::new(NodeId::new(), NodeKind::Derived, None);
        let effect = Node::new(NodeId::new(), NodeKind::Effect(Phase::Post), None);
        assert_eq!(derived.status(), Status::Dirty);
        assert_eq!(effect.status(), Status::Dirty);
    }

    #[test]
    fn status_transitions() {
        let mut node = Node::new(NodeId::new(), NodeKind::Derived, None);

        node.mark_clean();
        assert_eq!(node.status(), Status::Clean);

        node.mark_maybe_dirty();
        assert_eq!(node.status(), Status::MaybeDirty);

        node.mark_dirty();
        assert_eq!(node.status(), Status::Dirty);

        // Maybe-dirty never downgrades a dirty node
        node.mark_maybe_dirty();
        assert_eq!(node.status(), Status::Dirty);

        // A running node is left alone
        node.status = Status::Running;
        node.mark_dirty();
        assert_eq!(node.status(), Status::Running);
    }

    #[test]
    fn children_keep_creation_order() {
        let mut node = Node::new(NodeId::new(), NodeKind::Root, None);
        let a = NodeId::new();
        let b = NodeId::new();
        let c = NodeId::new();
        node.add_child(a);
        node.add_child(b);
        node.add_child(c);
        node.remove_child(b);
        assert_eq!(node.children(), &[a, c]);
    }
}
