//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects cells, deriveds and
//! effects. It owns the dependency graph and the scheduler, and drives
//! flushes.
//!
//! # How It Works
//!
//! 1. Every primitive registers a node with the runtime when it is created.
//!
//! 2. When a derived or effect reads a node, the tracking context records
//!    the read; the runtime turns the reads into edges once the run ends.
//!
//! 3. When a cell changes, the runtime:
//!    a. Bumps its version and marks subscribers dirty
//!    b. Marks subscribers of invalidated deriveds maybe-dirty
//!    c. Schedules the effects that were reached
//!    d. Leaves deriveds alone; they recompute on next access
//!
//! 4. `flush()` runs scheduled effects in passes until nothing is pending.
//!
//! # Threading
//!
//! The runtime is thread-local and single-threaded. No user callback ever
//! runs while one of the runtime's `RefCell`s is borrowed, so callbacks are
//! free to read, write, create and dispose.

use std::cell::{Cell as StdCell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use tracing::{debug, error, trace, warn};

use super::context::TrackingContext;
use super::effect::{Cleanup, Phase};
use crate::config::RuntimeConfig;
use crate::error::{failure_cause, EffectFailure, FailureCause, ReactiveError, Result};
use crate::graph::{order_pass, ComputeFn, FlushState, Graph, Node, NodeId, NodeKind, RunFn, RunKey, Scheduler, Status};

thread_local! {
    static RUNTIME: Runtime = Runtime::new();
}

/// Run `f` against this thread's runtime.
pub(crate) fn with_runtime<R>(f: impl FnOnce(&Runtime) -> R) -> R {
    RUNTIME.with(f)
}

/// Like [`with_runtime`], but a no-op while the thread is shutting down.
pub(crate) fn try_with_runtime(f: impl FnOnce(&Runtime)) {
    let _ = RUNTIME.try_with(f);
}

/// The per-thread reactive runtime.
pub(crate) struct Runtime {
    graph: RefCell<Graph>,
    scheduler: RefCell<Scheduler>,

    /// Scope that newly created nodes are attached to.
    owner: StdCell<Option<NodeId>>,

    config: RefCell<RuntimeConfig>,
    commit_hook: RefCell<Option<Rc<dyn Fn()>>>,
    error_handler: RefCell<Option<Rc<dyn Fn(&EffectFailure)>>>,

    /// Handles dropped while the graph was borrowed.
    released: RefCell<Vec<NodeId>>,

    batch_depth: StdCell<u32>,
}

impl Runtime {
    fn new() -> Self {
        Self {
            graph: RefCell::new(Graph::new()),
            scheduler: RefCell::new(Scheduler::new()),
            owner: StdCell::new(None),
            config: RefCell::new(RuntimeConfig::default()),
            commit_hook: RefCell::new(None),
            error_handler: RefCell::new(None),
            released: RefCell::new(Vec::new()),
            batch_depth: StdCell::new(0),
        }
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    pub(crate) fn register_source(&self, id: NodeId) {
        self.insert(Node::new(id, NodeKind::Source, self.owner.get()));
    }

    pub(crate) fn register_derived(&self, id: NodeId, compute: ComputeFn) {
        let mut node = Node::new(id, NodeKind::Derived, self.owner.get());
        node.compute = Some(compute);
        self.insert(node);
    }

    /// Register an effect and queue its first run.
    pub(crate) fn register_effect(&self, id: NodeId, phase: Phase, run: RunFn) {
        let mut node = Node::new(id, NodeKind::Effect(phase), self.owner.get());
        node.run = Some(run);
        self.insert(node);
        self.scheduler.borrow_mut().schedule(id);
    }

    /// Register a root scope. Roots never have an owner.
    pub(crate) fn register_root(&self, id: NodeId) {
        self.insert(Node::new(id, NodeKind::Root, None));
    }

    fn insert(&self, node: Node) {
        trace!(node = %node.id(), kind = ?node.kind(), owner = ?node.owner(), "registered node");
        self.graph.borrow_mut().add_node(node);
    }

    /// Make `owner` the current scope until the returned guard is dropped.
    pub(crate) fn scope(&self, owner: Option<NodeId>) -> OwnerScope<'_> {
        let previous = self.owner.replace(owner);
        OwnerScope {
            runtime: self,
            previous,
        }
    }

    pub(crate) fn current_owner(&self) -> Option<NodeId> {
        self.owner.get()
    }

    // ------------------------------------------------------------------
    // Reads and writes
    // ------------------------------------------------------------------

    /// Record a read of `source` with the running computation, if any.
    pub(crate) fn track(&self, source: NodeId) {
        if !TrackingContext::is_tracking() {
            return;
        }
        let version = self.graph.borrow().version(source);
        if let Some(version) = version {
            TrackingContext::record(source, version);
        }
    }

    /// Check that `source` may be written right now.
    pub(crate) fn check_writable(&self, source: NodeId) -> Result<()> {
        let graph = self.graph.borrow();
        if !graph.contains(source) {
            return Err(ReactiveError::Disposed { node: source });
        }
        if let Some(running) = TrackingContext::innermost_computation() {
            if graph.kind(running) == Some(NodeKind::Derived) {
                return Err(ReactiveError::PurityViolation {
                    cell: source,
                    derived: running,
                });
            }
        }
        Ok(())
    }

    /// A source's value changed: bump its version and schedule dependents.
    pub(crate) fn notify_changed(&self, source: NodeId) {
        let effects = self.graph.borrow_mut().mark_changed(source);
        trace!(source = %source, effects = effects.len(), "source changed");
        let mut scheduler = self.scheduler.borrow_mut();
        scheduler.note_write();
        for effect in effects {
            scheduler.schedule(effect);
        }
    }

    pub(crate) fn version(&self, node: NodeId) -> Option<u64> {
        self.graph.borrow().version(node)
    }

    pub(crate) fn status(&self, node: NodeId) -> Option<Status> {
        self.graph.borrow().status(node)
    }

    pub(crate) fn subscriber_count(&self, node: NodeId) -> usize {
        self.graph
            .borrow()
            .get_node(node)
            .map_or(0, |node| node.subscribers().len())
    }

    pub(crate) fn is_alive(&self, node: NodeId) -> bool {
        matches!(self.status(node), Some(status) if status != Status::Disposed)
    }

    // ------------------------------------------------------------------
    // Derived evaluation
    // ------------------------------------------------------------------

    /// Bring a derived up to date, recomputing it only if one of its sources
    /// actually changed.
    pub(crate) fn refresh(&self, id: NodeId) -> Result<()> {
        let status = self.status(id);
        match status {
            Some(Status::Clean) => Ok(()),
            Some(Status::Dirty) => self.recompute(id),
            Some(Status::MaybeDirty) => {
                if self.sources_changed(id)? {
                    self.recompute(id)
                } else {
                    self.set_status(id, Status::Clean);
                    Ok(())
                }
            }
            Some(Status::Running) => Err(ReactiveError::CyclicDependency { node: id }),
            Some(Status::Disposed) | None => Err(ReactiveError::Disposed { node: id }),
        }
    }

    /// Check the recorded sources of `id`, in read order, refreshing upstream
    /// deriveds on the way. Stops at the first source whose version moved.
    fn sources_changed(&self, id: NodeId) -> Result<bool> {
        let sources: Vec<(NodeId, u64)> = match self.graph.borrow().get_node(id) {
            Some(node) => node.sources().iter().map(|(source, seen)| (*source, *seen)).collect(),
            None => return Ok(false),
        };

        for (source, seen) in sources {
            let kind = self.graph.borrow().kind(source);
            if kind == Some(NodeKind::Derived) {
                self.refresh(source)?;
            }
            match self.version(source) {
                Some(version) if version != seen => return Ok(true),
                _ => {}
            }
        }
        Ok(false)
    }

    fn recompute(&self, id: NodeId) -> Result<()> {
        let compute = {
            let mut graph = self.graph.borrow_mut();
            let node = graph
                .get_node_mut(id)
                .ok_or(ReactiveError::Disposed { node: id })?;
            let compute = node.compute.clone().ok_or(ReactiveError::Disposed { node: id })?;
            node.status = Status::Running;
            compute
        };

        let frame = match TrackingContext::enter(id) {
            Ok(frame) => frame,
            Err(err) => {
                self.set_status(id, Status::Dirty);
                return Err(err);
            }
        };
        let status = RunningGuard {
            graph: &self.graph,
            id,
            armed: true,
        };

        let changed = {
            let _scope = self.scope(None);
            compute()
        };

        let reads = frame.finish();
        status.disarm();

        let mut graph = self.graph.borrow_mut();
        if graph.status(id) != Some(Status::Running) {
            // Disposed from inside its own computation
            let removed = graph.remove_node(id);
            drop(graph);
            drop(removed);
            return Ok(());
        }
        graph.reconcile(id, reads);
        if let Some(node) = graph.get_node_mut(id) {
            if changed {
                node.version += 1;
            }
            node.mark_clean();
        }
        trace!(node = %id, changed, "recomputed derived");
        Ok(())
    }

    fn set_status(&self, id: NodeId, status: Status) {
        if let Some(node) = self.graph.borrow_mut().get_node_mut(id) {
            node.status = status;
        }
    }

    // ------------------------------------------------------------------
    // Effects
    // ------------------------------------------------------------------

    /// Run one effect: cleanup, dispose previous children, run, reconcile.
    fn run_effect(&self, id: NodeId) -> Option<FailureCause> {
        let (run, cleanup, children) = {
            let mut graph = self.graph.borrow_mut();
            let node = graph.get_node_mut(id)?;
            let run = node.run.clone()?;
            node.status = Status::Running;
            (run, node.cleanup.take(), node.take_children())
        };

        for child in children.into_iter().rev() {
            self.dispose(child);
        }

        let mut failure = cleanup.and_then(|cleanup| self.run_cleanup(cleanup));

        let frame = match TrackingContext::enter(id) {
            Ok(frame) => frame,
            Err(err) => {
                self.set_status(id, Status::Dirty);
                return Some(FailureCause::Reactive(err));
            }
        };

        let outcome = {
            let _scope = self.scope(Some(id));
            panic::catch_unwind(AssertUnwindSafe(|| {
                let mut body = run.borrow_mut();
                (&mut *body)()
            }))
        };
        let reads = frame.finish();
        drop(run);

        let (cleanup, cause) = match outcome {
            Ok(Ok(cleanup)) => (cleanup, None),
            Ok(Err(err)) => (None, Some(FailureCause::Message(err.to_string()))),
            Err(payload) => (None, Some(failure_cause(payload))),
        };
        failure = cause.or(failure);

        if self.status(id) != Some(Status::Running) {
            // Disposed mid-run: finish the teardown now that the run is over.
            let late_children = self
                .graph
                .borrow_mut()
                .get_node_mut(id)
                .map(|node| node.take_children())
                .unwrap_or_default();
            for child in late_children.into_iter().rev() {
                self.dispose(child);
            }
            let removed = self.graph.borrow_mut().remove_node(id);
            drop(removed);
            if let Some(cleanup) = cleanup {
                failure = self.run_cleanup(cleanup).or(failure);
            }
            debug!(node = %id, "effect disposed during its run");
            return failure;
        }

        let mut graph = self.graph.borrow_mut();
        graph.reconcile(id, reads);
        if let Some(node) = graph.get_node_mut(id) {
            node.cleanup = cleanup;
            node.mark_clean();
        }
        failure
    }

    /// Run a cleanup untracked and outside any scope.
    fn run_cleanup(&self, cleanup: Cleanup) -> Option<FailureCause> {
        let _untracked = TrackingContext::untracked();
        let _scope = self.scope(None);
        panic::catch_unwind(AssertUnwindSafe(move || cleanup.run()))
            .err()
            .map(failure_cause)
    }

    // ------------------------------------------------------------------
    // Flush
    // ------------------------------------------------------------------

    pub(crate) fn flush(&self) -> Result<()> {
        self.drain_released();

        if !self.scheduler.borrow_mut().begin_flush() {
            // Already flushing; writes made by the caller land in the next pass.
            return Ok(());
        }
        let guard = FlushGuard {
            scheduler: &self.scheduler,
        };

        let max_passes = self.config.borrow().max_flush_passes;
        let mut failures = Vec::new();
        let mut passes = 0u32;

        loop {
            let pending = self.scheduler.borrow_mut().take_pass();
            if pending.is_empty() {
                break;
            }

            if passes >= max_passes {
                self.abandon(&pending);
                for failure in &failures {
                    warn!(?failure, "effect failure dropped by update loop");
                }
                error!(passes, pending = pending.len(), "flush did not settle; aborting update loop");
                return Err(ReactiveError::UpdateLoop { passes: max_passes });
            }
            passes += 1;

            let keys = self.order(pending);
            debug!(pass = passes, effects = keys.len(), "flush pass");

            let split = keys.partition_point(|key| key.phase == Phase::Pre);
            for key in &keys[..split] {
                self.process(key.id, &mut failures);
            }

            let hook = self.commit_hook.borrow().clone();
            if let Some(hook) = hook {
                hook();
            }

            for key in &keys[split..] {
                self.process(key.id, &mut failures);
            }
        }

        drop(guard);
        self.report(failures)
    }

    fn order(&self, pending: Vec<NodeId>) -> Vec<RunKey> {
        let graph = self.graph.borrow();
        let keys = pending
            .into_iter()
            .filter_map(|id| {
                let node = graph.get_node(id)?;
                match node.kind() {
                    NodeKind::Effect(phase) => Some(RunKey {
                        phase,
                        depth: node.depth,
                        id,
                    }),
                    _ => None,
                }
            })
            .collect();
        order_pass(keys)
    }

    /// Decide whether a scheduled effect really has to run, run it, and
    /// re-queue it if it left one of its own sources stale.
    fn process(&self, id: NodeId, failures: &mut Vec<EffectFailure>) {
        let should_run = match self.status(id) {
            Some(Status::Dirty) => true,
            Some(Status::MaybeDirty) => match guarded(|| self.sources_changed(id)) {
                Ok(changed) => changed,
                Err(cause) => {
                    // Left stale so the next write upstream reschedules it.
                    warn!(effect = %id, %cause, "effect source failed");
                    failures.push(EffectFailure { effect: id, cause });
                    return;
                }
            },
            _ => false,
        };

        if !should_run {
            if self.status(id) == Some(Status::MaybeDirty) {
                self.set_status(id, Status::Clean);
            }
            return;
        }

        if let Some(cause) = self.run_effect(id) {
            warn!(effect = %id, %cause, "effect failed");
            failures.push(EffectFailure { effect: id, cause });
        }

        if self.status(id) != Some(Status::Clean) {
            return;
        }
        match guarded(|| self.sources_changed(id)) {
            Ok(true) => {
                trace!(effect = %id, "effect invalidated its own sources; rescheduling");
                self.set_status(id, Status::Dirty);
                self.scheduler.borrow_mut().schedule(id);
            }
            Ok(false) => {}
            Err(cause) => failures.push(EffectFailure { effect: id, cause }),
        }
    }

    fn abandon(&self, pending: &[NodeId]) {
        let mut graph = self.graph.borrow_mut();
        for id in pending {
            if let Some(node) = graph.get_node_mut(*id) {
                if matches!(node.status(), Status::Dirty | Status::MaybeDirty) {
                    node.mark_clean();
                }
            }
        }
    }

    fn report(&self, failures: Vec<EffectFailure>) -> Result<()> {
        if failures.is_empty() {
            return Ok(());
        }
        let handler = self.error_handler.borrow().clone();
        match handler {
            Some(handler) => {
                for failure in &failures {
                    handler(failure);
                }
                Ok(())
            }
            None => Err(ReactiveError::EffectsFailed { failures }),
        }
    }

    pub(crate) fn enter_batch(&self) -> BatchGuard<'_> {
        self.batch_depth.set(self.batch_depth.get() + 1);
        BatchGuard { runtime: self }
    }

    pub(crate) fn in_batch(&self) -> bool {
        self.batch_depth.get() > 0
    }

    // ------------------------------------------------------------------
    // Disposal
    // ------------------------------------------------------------------

    /// Dispose `id` and everything it owns, children first, newest first.
    pub(crate) fn dispose(&self, id: NodeId) {
        let (children, running) = {
            let mut graph = self.graph.borrow_mut();
            let Some(node) = graph.get_node_mut(id) else {
                return;
            };
            if node.status() == Status::Disposed {
                return;
            }
            (node.take_children(), node.status() == Status::Running)
        };

        for child in children.into_iter().rev() {
            self.dispose(child);
        }

        let cleanup = self
            .graph
            .borrow_mut()
            .get_node_mut(id)
            .and_then(|node| node.cleanup.take());
        if let Some(cleanup) = cleanup {
            if let Some(cause) = self.run_cleanup(cleanup) {
                warn!(node = %id, %cause, "cleanup failed during disposal");
            }
        }

        self.scheduler.borrow_mut().cancel(id);

        let removed = {
            let mut graph = self.graph.borrow_mut();
            if running {
                graph.detach_sources(id);
                if let Some(node) = graph.get_node_mut(id) {
                    node.status = Status::Disposed;
                }
                None
            } else {
                graph.remove_node(id)
            }
        };
        drop(removed);
        debug!(node = %id, running, "disposed");
    }

    /// A handle was dropped; forget its node.
    pub(crate) fn release(&self, id: NodeId) {
        let removed = match self.graph.try_borrow_mut() {
            Ok(mut graph) => graph.remove_node(id),
            Err(_) => {
                self.released.borrow_mut().push(id);
                return;
            }
        };
        drop(removed);
    }

    fn drain_released(&self) {
        let released = std::mem::take(&mut *self.released.borrow_mut());
        for id in released {
            self.release(id);
        }
    }

    // ------------------------------------------------------------------
    // Settings and introspection
    // ------------------------------------------------------------------

    pub(crate) fn configure(&self, config: RuntimeConfig) {
        debug!(?config, "runtime configured");
        *self.config.borrow_mut() = config;
    }

    pub(crate) fn config(&self) -> RuntimeConfig {
        self.config.borrow().clone()
    }

    pub(crate) fn set_commit_hook(&self, hook: Option<Rc<dyn Fn()>>) {
        *self.commit_hook.borrow_mut() = hook;
    }

    pub(crate) fn set_error_handler(&self, handler: Option<Rc<dyn Fn(&EffectFailure)>>) {
        *self.error_handler.borrow_mut() = handler;
    }

    pub(crate) fn flush_state(&self) -> FlushState {
        self.scheduler.borrow().state()
    }

    pub(crate) fn node_count(&self) -> usize {
        self.graph.borrow().node_count()
    }

    /// Drop every node and setting without running cleanups.
    pub(crate) fn reset(&self) {
        let nodes = self.graph.borrow_mut().drain();
        *self.scheduler.borrow_mut() = Scheduler::new();
        self.owner.set(None);
        self.batch_depth.set(0);
        self.released.borrow_mut().clear();
        *self.config.borrow_mut() = RuntimeConfig::default();
        let hook = self.commit_hook.borrow_mut().take();
        let handler = self.error_handler.borrow_mut().take();
        TrackingContext::reset();
        drop(nodes);
        drop(hook);
        drop(handler);
        debug!("runtime reset");
    }
}

/// Restores the previous owner scope on drop.
pub(crate) struct OwnerScope<'a> {
    runtime: &'a Runtime,
    previous: Option<NodeId>,
}

impl Drop for OwnerScope<'_> {
    fn drop(&mut self) {
        self.runtime.owner.set(self.previous);
    }
}

/// Puts a derived back to dirty if its computation unwinds.
struct RunningGuard<'a> {
    graph: &'a RefCell<Graph>,
    id: NodeId,
    armed: bool,
}

impl RunningGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Ok(mut graph) = self.graph.try_borrow_mut() {
            if let Some(node) = graph.get_node_mut(self.id) {
                if node.status() == Status::Running {
                    node.status = Status::Dirty;
                }
            }
        }
    }
}

/// Leaves the flushing state on every exit path.
struct FlushGuard<'a> {
    scheduler: &'a RefCell<Scheduler>,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut scheduler) = self.scheduler.try_borrow_mut() {
            scheduler.end_flush();
        }
    }
}

pub(crate) struct BatchGuard<'a> {
    runtime: &'a Runtime,
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        let depth = self.runtime.batch_depth.get();
        self.runtime.batch_depth.set(depth.saturating_sub(1));
    }
}

/// Run `f`, turning both returned errors and panics into a failure cause.
fn guarded<T>(f: impl FnOnce() -> Result<T>) -> std::result::Result<T, FailureCause> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(FailureCause::Reactive(err)),
        Err(payload) => Err(failure_cause(payload)),
    }
}
