//! Task Queue - pending scheduling requests with starvation protection.
//!
//! # Ordering
//!
//! ```text
//! 1. expired before unexpired
//! 2. both expired   → earlier expiration first
//! 3. neither expired → more urgent tier first
//! 4. tie            → submission order (task id)
//! ```
//!
//! Expiry depends on the clock, so the queue re-sorts whenever it is read at
//! a different time than it was last sorted.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::error::Error;
use std::fmt;
use std::time::Duration;

use super::context::CancelToken;
use super::priority::Priority;
use crate::host::HostTiming;

// =============================================================================
// Task
// =============================================================================

/// Identity of a scheduled task. Ids increase monotonically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub(crate) u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Completion signal of a task action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Done; drop the task.
    Complete,
    /// Yielded mid-flight; re-enqueue with the original timestamps.
    Continue,
}

pub type TaskResult = Result<TaskStatus, Box<dyn Error>>;

/// Body of a scheduled callback task.
pub type TaskAction = Box<dyn FnMut(&TaskContext<'_>) -> TaskResult>;

pub(crate) enum TaskKind {
    /// Re-render the tree from the root.
    Render,
    /// Arbitrary work scheduled with `Scheduler::schedule_task`.
    Callback(TaskAction),
}

/// A scheduling request.
pub struct Task {
    pub(crate) id: TaskId,
    pub(crate) priority: Priority,
    pub(crate) created_at: Duration,
    pub(crate) expires_at: Duration,
    pub(crate) kind: TaskKind,
}

impl Task {
    pub(crate) fn new(id: TaskId, priority: Priority, now: Duration, kind: TaskKind) -> Self {
        Self {
            id,
            priority,
            created_at: now,
            expires_at: now.saturating_add(priority.timeout()),
            kind,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn created_at(&self) -> Duration {
        self.created_at
    }

    pub fn expires_at(&self) -> Duration {
        self.expires_at
    }

    #[inline]
    pub fn is_expired(&self, now: Duration) -> bool {
        self.expires_at <= now
    }

    pub fn is_render(&self) -> bool {
        matches!(self.kind, TaskKind::Render)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .field("render", &self.is_render())
            .finish()
    }
}

/// Run-order comparison at time `now`.
fn compare(a: &Task, b: &Task, now: Duration) -> Ordering {
    let by_urgency = match (a.is_expired(now), b.is_expired(now)) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (true, true) => a.expires_at.cmp(&b.expires_at),
        (false, false) => a.priority.cmp(&b.priority),
    };
    by_urgency.then(a.id.cmp(&b.id))
}

// =============================================================================
// TaskQueue
// =============================================================================

/// Pending tasks, head = the task that must run next.
#[derive(Debug, Default)]
pub struct TaskQueue {
    tasks: Vec<Task>,
    sorted_at: Option<Duration>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn sort(&mut self, now: Duration) {
        if self.sorted_at != Some(now) {
            self.tasks.sort_by(|a, b| compare(a, b, now));
            self.sorted_at = Some(now);
        }
    }

    /// Insert a task and restore run order.
    pub fn push(&mut self, task: Task, now: Duration) {
        self.tasks.push(task);
        self.sorted_at = None;
        self.sort(now);
    }

    pub fn peek(&mut self, now: Duration) -> Option<&Task> {
        self.sort(now);
        self.tasks.first()
    }

    pub fn pop(&mut self, now: Duration) -> Option<Task> {
        self.sort(now);
        if self.tasks.is_empty() {
            None
        } else {
            Some(self.tasks.remove(0))
        }
    }

    /// True if the head is expired or outranks `current`.
    pub fn has_higher_priority_task(&mut self, current: Priority, now: Duration) -> bool {
        match self.peek(now) {
            Some(head) => head.is_expired(now) || head.priority.is_higher_than(current),
            None => false,
        }
    }

    /// Drop every pending task. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.tasks.len();
        self.tasks.clear();
        self.sorted_at = None;
        dropped
    }

    /// Remove and return every queued render task, in run order.
    pub(crate) fn take_render_tasks(&mut self, now: Duration) -> Vec<Task> {
        self.sort(now);
        let (render, rest): (Vec<Task>, Vec<Task>) =
            std::mem::take(&mut self.tasks).into_iter().partition(Task::is_render);
        self.tasks = rest;
        render
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Number of tasks past their expiration (for monitoring).
    pub fn expired_count(&self, now: Duration) -> usize {
        self.tasks.iter().filter(|t| t.is_expired(now)).count()
    }
}

// =============================================================================
// TaskContext
// =============================================================================

/// What a running callback task can see of the scheduler.
pub struct TaskContext<'a> {
    pub(crate) id: TaskId,
    pub(crate) priority: Priority,
    pub(crate) deadline: Duration,
    pub(crate) timing: &'a dyn HostTiming,
    pub(crate) queue: &'a RefCell<TaskQueue>,
    pub(crate) token: CancelToken,
}

impl TaskContext<'_> {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn now(&self) -> Duration {
        self.timing.now()
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    /// True when the task should return `TaskStatus::Continue` and let the
    /// scheduler run something else: the slice is used up, the task was
    /// interrupted, or a queued task outranks it.
    pub fn should_yield(&self) -> bool {
        let now = self.timing.now();
        if now >= self.deadline || self.token.is_cancelled() {
            return true;
        }
        self.queue
            .try_borrow_mut()
            .map(|mut queue| queue.has_higher_priority_task(self.priority, now))
            .unwrap_or(false)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    fn render_task(id: u64, priority: Priority, created: u64) -> Task {
        Task::new(TaskId(id), priority, ms(created), TaskKind::Render)
    }

    #[test]
    fn test_orders_by_priority_when_nothing_expired() {
        let mut queue = TaskQueue::new();
        queue.push(render_task(1, Priority::Low, 0), ms(0));
        queue.push(render_task(2, Priority::UserBlocking, 0), ms(0));
        queue.push(render_task(3, Priority::Normal, 0), ms(0));
        queue.push(render_task(4, Priority::UserBlocking, 0), ms(0));

        let order: Vec<u64> = std::iter::from_fn(|| queue.pop(ms(1)))
            .map(|t| t.id.0)
            .collect();
        assert_eq!(order, vec![2, 4, 3, 1]);
    }

    #[test]
    fn test_expired_task_outranks_any_tier() {
        let mut queue = TaskQueue::new();
        queue.push(render_task(1, Priority::Low, 0), ms(0));
        queue.push(render_task(2, Priority::UserBlocking, 10_000), ms(10_000));

        // Low expires at 10s; userBlocking created at 10s is fresh
        let head = queue.peek(ms(10_000)).map(|t| t.id.0);
        assert_eq!(head, Some(1));

        // Before expiry the urgent one wins
        let head = queue.peek(ms(9_999)).map(|t| t.id.0);
        assert_eq!(head, Some(2));
    }

    #[test]
    fn test_expired_tasks_ordered_by_expiration() {
        let mut queue = TaskQueue::new();
        queue.push(render_task(1, Priority::Low, 0), ms(0)); // expires 10_000
        queue.push(render_task(2, Priority::Normal, 1_000), ms(1_000)); // expires 6_000

        assert_eq!(queue.pop(ms(20_000)).map(|t| t.id.0), Some(2));
        assert_eq!(queue.pop(ms(20_000)).map(|t| t.id.0), Some(1));
        assert!(queue.pop(ms(20_000)).is_none());
    }

    #[test]
    fn test_has_higher_priority_task() {
        let mut queue = TaskQueue::new();
        assert!(!queue.has_higher_priority_task(Priority::Idle, ms(0)));

        queue.push(render_task(1, Priority::Normal, 0), ms(0));
        assert!(queue.has_higher_priority_task(Priority::Low, ms(0)));
        assert!(!queue.has_higher_priority_task(Priority::Normal, ms(0)));
        assert!(!queue.has_higher_priority_task(Priority::UserBlocking, ms(0)));

        // Once expired it outranks even userBlocking
        assert!(queue.has_higher_priority_task(Priority::UserBlocking, ms(5_000)));
    }

    #[test]
    fn test_clear_and_expired_count() {
        let mut queue = TaskQueue::new();
        queue.push(render_task(1, Priority::UserBlocking, 0), ms(0));
        queue.push(render_task(2, Priority::Idle, 0), ms(0));

        assert_eq!(queue.expired_count(ms(300)), 1);
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_take_render_tasks_leaves_callbacks() {
        let mut queue = TaskQueue::new();
        queue.push(render_task(1, Priority::Normal, 0), ms(0));
        queue.push(
            Task::new(
                TaskId(2),
                Priority::Normal,
                ms(0),
                TaskKind::Callback(Box::new(|_| Ok(TaskStatus::Complete))),
            ),
            ms(0),
        );
        queue.push(render_task(3, Priority::Low, 0), ms(0));

        let taken: Vec<u64> = queue.take_render_tasks(ms(0)).iter().map(|t| t.id.0).collect();
        assert_eq!(taken, vec![1, 3]);
        assert_eq!(queue.len(), 1);
        assert!(!queue.peek(ms(0)).is_some_and(Task::is_render));
    }

    #[test]
    fn test_idle_timeout_does_not_overflow() {
        let task = render_task(1, Priority::Idle, u64::MAX / 2);
        assert!(task.expires_at() >= task.created_at());
    }
}
