//! Scheduler - priorities, the task queue and the cooperative work loop.
//!
//! # Architecture
//!
//! ```text
//!  SetState / request_update / schedule_task
//!                 │
//!                 ▼
//!   ┌──────────────────────────┐   host callback (macrotask)
//!   │ TaskQueue                │◄──────────────┐
//!   │  expired → by expiration │               │
//!   │  else    → by tier       │               │
//!   └────────────┬─────────────┘               │
//!                ▼                             │
//!   work loop: begin pass / run task           │
//!              unit, unit, ... should_yield? ──┘ yes: keep cursor, reschedule
//!                │ done
//!                ▼
//!             commit
//! ```
//!
//! Everything runs on one thread. The scheduler never blocks; it relies on the
//! host to call it back.

mod context;
mod priority;
mod runtime;
mod task_queue;
mod work_loop;

pub use context::{CancelToken, ExecutionContext};
pub use priority::{
    IDLE_TIMEOUT, IMMEDIATE_TIMEOUT, LOW_TIMEOUT, NORMAL_TIMEOUT, Priority, USER_BLOCKING_TIMEOUT,
    is_higher_priority,
};
pub use runtime::{
    DEFAULT_FRAME_BUDGET, DEFAULT_NESTED_UPDATE_LIMIT, Scheduler, SchedulerConfig, SchedulerStats,
};
pub use task_queue::{Task, TaskAction, TaskContext, TaskId, TaskQueue, TaskResult, TaskStatus};
