//! Ripple Core
//!
//! This crate provides the propagation engine for the Ripple reactive
//! runtime. It implements:
//!
//! - Reactive primitives (cells, deriveds, effects)
//! - Automatic, dynamic dependency tracking
//! - Batched, depth-ordered effect scheduling
//! - Ownership scopes with cascading disposal
//! - Observable store proxies for shared containers
//!
//! Rendering, templating and transport are left to the layers built on top;
//! they only need the read/write/subscribe/dispose surface exposed here.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Core reactive primitives, tracking context and runtime
//! - `graph`: Dependency graph arena and effect scheduler
//! - `error`: Error types surfaced to callers
//! - `config`: Per-thread runtime settings
//!
//! # Example
//!
//! ```rust
//! use ripple_core::{create_effect, flush, Cell, Derived};
//! use std::{cell::RefCell, rc::Rc};
//!
//! // Create a cell
//! let count = Cell::new(1);
//!
//! // Create a derived value
//! let doubled = Derived::new({
//!     let count = count.clone();
//!     move || count.get() * 2
//! });
//!
//! // Create an effect
//! let log = Rc::new(RefCell::new(Vec::new()));
//! let _effect = create_effect({
//!     let (doubled, log) = (doubled.clone(), log.clone());
//!     move || log.borrow_mut().push(doubled.get())
//! });
//!
//! flush().unwrap();
//!
//! // Update the cell, then let effects catch up
//! count.set(5);
//! flush().unwrap();
//!
//! assert_eq!(*log.borrow(), vec![2, 10]);
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;

pub use config::RuntimeConfig;
pub use error::{EffectFailure, FailureCause, ReactiveError, Result};
pub use graph::{FlushState, NodeId, Status};
pub use reactive::{
    batch, configure, create_effect, create_effect_with_phase, create_root, flush, untrack, Cell, Cleanup, Derived,
    Disposer, Phase,
};
