//! # spark-fiber
//!
//! Incremental fiber reconciler with a cooperative, priority-preemptible
//! scheduler.
//!
//! ## Architecture
//!
//! Components are plain render functions that return an element tree. The
//! engine turns that tree into fibers, diffs it against the tree that is on
//! screen, and commits the difference to a host surface. Rendering is split
//! into units of one fiber each, so the scheduler can pause a pass between
//! any two units, resume it on a later host turn, or throw it away when more
//! urgent work arrives:
//! ```text
//! update request → TaskQueue → work loop (time-sliced units) → commit → host
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Elements, components, attribute values, event handlers
//! - [`engine`] - Fiber arena, hooks, reconciliation
//! - [`pipeline`] - Commit engine and mount lifecycle
//! - [`scheduler`] - Priorities, task queue, work loop
//! - [`host`] - Host surface and timing traits plus in-memory implementations
//! - [`error`] - Error taxonomy
//!
//! ## Example
//!
//! ```ignore
//! use spark_fiber::{
//!     Component, Deps, Element, EventHandler, EventLoop, MemorySurface, Scheduler, h, mount, text,
//! };
//!
//! let counter = Component::new("Counter", |cx, _| {
//!     let (count, set_count) = cx.use_state(0);
//!     cx.use_effect(Deps::Always, move || None);
//!     vec![h("button")
//!         .on("click", EventHandler::new(move || set_count.update(|n| n + 1)))
//!         .child(text(count))]
//! });
//!
//! let surface = MemorySurface::new();
//! let event_loop = EventLoop::manual();
//! let scheduler = Scheduler::new(surface.clone(), event_loop.clone());
//! let root = surface.create_container("root");
//! let _handle = mount(&scheduler, Element::component(&counter), root)?;
//! ```

pub mod engine;
pub mod error;
pub mod host;
pub mod pipeline;
pub mod scheduler;
pub mod types;

// Re-export commonly used items
pub use types::*;

pub use engine::{Cleanup, Deps, FiberTree, PatchKind, RenderContext, SetState, UpdateSink};

pub use error::FiberError;

pub use host::{EventLoop, HostKind, HostSurface, HostTiming, MemorySurface, Mutation, NodeHandle};

pub use pipeline::{CommitSummary, MountHandle, mount};

pub use scheduler::{
    CancelToken, ExecutionContext, Priority, Scheduler, SchedulerConfig, SchedulerStats, TaskContext,
    TaskId, TaskStatus, is_higher_priority,
};
