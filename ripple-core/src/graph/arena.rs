//! Node Arena
//!
//! The arena owns every node of the dependency graph, indexed by id, and
//! maintains both edge directions: a node's `sources` and, mirrored on each
//! source, its `subscribers`.
//!
//! # Propagation
//!
//! When a source changes we walk its subscribers:
//!
//! 1. Direct subscribers are marked dirty.
//! 2. Every derived reached marks its own subscribers maybe-dirty,
//!    recursively, even if it was already stale. A derived whose last
//!    compute failed stays dirty, and its readers still have to hear about
//!    later writes. Derived values are not recomputed here; readers pull
//!    them later.
//! 3. Every effect reached is reported back so the caller can hand it to
//!    the scheduler, which ignores duplicates.

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::{IndexMap, IndexSet};
use tracing::trace;

use super::node::{Node, NodeId, NodeKind, Status};

/// The dependency graph.
#[derive(Default)]
pub struct Graph {
    /// All nodes in the graph, indexed by ID.
    nodes: HashMap<NodeId, Node>,
}

impl Graph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
        }
    }

    /// Add a node to the graph, linking it under its owner.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = node.id();
        if let Some(owner) = node.owner() {
            if let Some(owner_node) = self.nodes.get_mut(&owner) {
                owner_node.add_child(id);
            }
        }
        self.nodes.insert(id, node);
        id
    }

    /// Remove a node from the graph.
    ///
    /// Also removes all edges involving this node and unlinks it from its
    /// owner. Children are not touched; dispose them first. The removed node
    /// is handed back so the caller can drop it (and the closures it owns)
    /// outside of any borrow of the graph.
    pub fn remove_node(&mut self, node_id: NodeId) -> Option<Node> {
        let node = self.nodes.remove(&node_id)?;

        // Remove this node from its sources' subscriber lists
        for source_id in node.sources().keys() {
            if let Some(source) = self.nodes.get_mut(source_id) {
                source.remove_subscriber(node_id);
            }
        }

        // Remove this node from its subscribers' source lists
        for subscriber_id in node.subscribers() {
            if let Some(subscriber) = self.nodes.get_mut(subscriber_id) {
                subscriber.remove_source(node_id);
            }
        }

        if let Some(owner) = node.owner() {
            if let Some(owner_node) = self.nodes.get_mut(&owner) {
                owner_node.remove_child(node_id);
            }
        }

        Some(node)
    }

    /// Drop every edge from `node_id` to its sources, keeping the node itself.
    pub fn detach_sources(&mut self, node_id: NodeId) {
        let old = match self.nodes.get_mut(&node_id) {
            Some(node) => node.replace_sources(IndexMap::new()),
            None => return,
        };
        for source_id in old.keys() {
            if let Some(source) = self.nodes.get_mut(source_id) {
                source.remove_subscriber(node_id);
            }
        }
    }

    /// Get a reference to a node.
    pub fn get_node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    /// Get a mutable reference to a node.
    pub fn get_node_mut(&mut self, node_id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&node_id)
    }

    pub fn contains(&self, node_id: NodeId) -> bool {
        self.nodes.contains_key(&node_id)
    }

    pub fn kind(&self, node_id: NodeId) -> Option<NodeKind> {
        self.nodes.get(&node_id).map(Node::kind)
    }

    pub fn status(&self, node_id: NodeId) -> Option<Status> {
        self.nodes.get(&node_id).map(Node::status)
    }

    pub fn version(&self, node_id: NodeId) -> Option<u64> {
        self.nodes.get(&node_id).map(|node| node.version)
    }

    /// Replace the sources of `node_id` with the reads captured by its latest
    /// run, fixing up subscriber sets on both old and new sources.
    ///
    /// Reads of nodes that no longer exist are dropped. The node's depth is
    /// recomputed from the surviving sources.
    pub fn reconcile(&mut self, node_id: NodeId, mut reads: IndexMap<NodeId, u64>) {
        reads.retain(|source_id, _| self.nodes.contains_key(source_id));

        let old = match self.nodes.get_mut(&node_id) {
            Some(node) => node.replace_sources(IndexMap::new()),
            None => return,
        };

        for source_id in old.keys() {
            if !reads.contains_key(source_id) {
                if let Some(source) = self.nodes.get_mut(source_id) {
                    source.remove_subscriber(node_id);
                }
            }
        }

        let mut depth = 0;
        for source_id in reads.keys() {
            if let Some(source) = self.nodes.get_mut(source_id) {
                source.add_subscriber(node_id);
                depth = depth.max(source.depth);
            }
        }

        trace!(node = %node_id, sources = reads.len(), "reconciled dependencies");

        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.depth = depth + 1;
            node.replace_sources(reads);
        }
    }

    /// Bump the version of a changed source and propagate dirty flags.
    ///
    /// Returns every effect the change reaches, once each, in the order they
    /// were reached. Effects that were already stale are included.
    pub fn mark_changed(&mut self, source_id: NodeId) -> Vec<NodeId> {
        let mut effects = IndexSet::new();
        let mut expanded = HashSet::new();
        let mut queue = VecDeque::new();

        // Start with the source node's direct subscribers
        match self.nodes.get_mut(&source_id) {
            Some(source) => {
                source.version += 1;
                for subscriber_id in source.subscribers() {
                    queue.push_back((*subscriber_id, Status::Dirty));
                }
            }
            None => return Vec::new(),
        }

        while let Some((node_id, level)) = queue.pop_front() {
            let Some(node) = self.nodes.get_mut(&node_id) else {
                continue;
            };

            // Running effects are rechecked against their sources once the
            // run completes.
            if matches!(node.status(), Status::Running | Status::Disposed) {
                continue;
            }

            match level {
                Status::Dirty => node.mark_dirty(),
                _ => node.mark_maybe_dirty(),
            }

            match node.kind() {
                NodeKind::Effect(_) => {
                    effects.insert(node_id);
                }
                NodeKind::Derived => {
                    if expanded.insert(node_id) {
                        for subscriber_id in node.subscribers() {
                            queue.push_back((*subscriber_id, Status::MaybeDirty));
                        }
                    }
                }
                NodeKind::Source | NodeKind::Root => {}
            }
        }

        effects.into_iter().collect()
    }

    /// Take every node out of the arena.
    pub fn drain(&mut self) -> Vec<Node> {
        self.nodes.drain().map(|(_, node)| node).collect()
    }

    /// Get the total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}
