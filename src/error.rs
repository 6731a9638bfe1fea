//! Error types.
//!
//! Most failures in the core are either impossible by construction (hooks
//! only exist on a live [`RenderContext`](crate::engine::RenderContext)) or
//! guarded away (host mutations are checked with `contains` first). What is
//! left is listed here.

use thiserror::Error;

use crate::scheduler::{ExecutionContext, TaskId};

#[derive(Debug, Error)]
pub enum FiberError {
    /// `render`/`unmount` called from inside a render or commit.
    #[error("scheduler is busy ({0:?}); render and unmount cannot be called from components or effects")]
    Reentrant(ExecutionContext),

    /// A scheduled callback returned an error. The task counts as completed.
    #[error("task {id} failed: {message}")]
    TaskFailed { id: TaskId, message: String },

    /// A scheduled callback panicked. The task counts as completed.
    #[error("task {id} panicked: {message}")]
    TaskPanicked { id: TaskId, message: String },

    /// Synchronous updates kept cascading from effects.
    #[error("more than {limit} nested synchronous updates; an effect keeps requesting immediate work")]
    NestedUpdateLimit { limit: usize },

    /// A state cell changed type between renders: hooks were called in a
    /// different order.
    #[error("hook #{index} of component `{component}` changed type (expected {expected}); hooks must be called in the same order every render")]
    HookOrder {
        component: String,
        index: usize,
        expected: &'static str,
    },
}
