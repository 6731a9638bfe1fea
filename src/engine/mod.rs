//! Fiber Engine - fiber arena, hooks and the reconciliation walk.
//!
//! - [`fiber`]: the double-buffered fiber tree stored in a slot arena
//! - [`hooks`]: state cells and effect cells reached through [`RenderContext`]
//! - [`reconcile`]: `begin_work`, positional child diffing, the unit-of-work cursor
//!
//! # Architecture
//!
//! ```text
//!        Element tree (immutable, rebuilt by components every render)
//!              │ reconcile_children
//!              ▼
//!   work-in-progress fibers ──alternate──► committed fibers
//!              │ commit_root (pipeline)
//!              ▼
//!        host surface
//! ```
//!
//! The engine never decides *when* to work; the scheduler drives it one unit
//! at a time and commits when the cursor runs out.

pub mod fiber;
pub mod hooks;
pub mod reconcile;

pub use fiber::{Fiber, FiberId, FiberKind, FiberTree, PatchKind};
pub use hooks::{Cleanup, Deps, Effect, EffectCallback, RenderContext, SetState, UpdateSink};
pub use reconcile::{
    begin_work, perform_next_unit, perform_unit_of_work, reconcile_children, render_to_completion,
};
