//! Scheduler runtime - the handle applications hold and the update entry point.
//!
//! # Dispatch by tier
//!
//! ```text
//! request_update(p)
//!   busy (rendering/committing)? → deferred until the pass is over
//!   Immediate    → clear queue, discard any pass, render + commit synchronously
//!   UserBlocking → enqueue render task, schedule host callback now
//!   Normal/Low/Idle → enqueue render task, one microtask per turn schedules
//!                     the host callback (same-turn requests coalesce)
//! ```
//!
//! The work loop itself lives in `work_loop.rs`.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::mem;
use std::rc::{Rc, Weak};
use std::time::Duration;

use tracing::{debug, error, trace};

use super::context::{CancelToken, ContextGuard, ExecutionContext};
use super::priority::Priority;
use super::task_queue::{Task, TaskAction, TaskContext, TaskId, TaskKind, TaskQueue, TaskResult};
use crate::engine::{FiberTree, UpdateSink, render_to_completion};
use crate::error::FiberError;
use crate::host::{HostSurface, HostTiming, NodeHandle};
use crate::pipeline::commit_root;
use crate::types::Element;

// =============================================================================
// Configuration & Stats
// =============================================================================

/// Default time slice per host callback.
pub const DEFAULT_FRAME_BUDGET: Duration = Duration::from_millis(5);

/// Default cap on synchronous update cascades.
pub const DEFAULT_NESTED_UPDATE_LIMIT: usize = 50;

/// Scheduler tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Work budget of one host callback before a mandatory yield.
    pub frame_budget: Duration,
    /// Rounds of updates requested from inside a commit that may be
    /// dispatched back to back before the rest are dropped.
    pub nested_update_limit: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            frame_budget: DEFAULT_FRAME_BUDGET,
            nested_update_limit: DEFAULT_NESTED_UPDATE_LIMIT,
        }
    }
}

impl SchedulerConfig {
    pub fn with_frame_budget(mut self, budget: Duration) -> Self {
        self.frame_budget = budget;
        self
    }

    pub fn with_nested_update_limit(mut self, limit: usize) -> Self {
        self.nested_update_limit = limit;
        self
    }
}

/// Counters for monitoring and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Render passes started (fresh walks from the root).
    pub passes_started: u64,
    pub commits: u64,
    /// Passes thrown away before commit (preempted or superseded).
    pub passes_discarded: u64,
    pub units_of_work: u64,
    /// Times the work loop gave control back to the host with work left.
    pub yields: u64,
    /// Callback tasks executed (each slice counts).
    pub tasks_run: u64,
    /// Callback tasks that returned an error or panicked.
    pub tasks_failed: u64,
}

// =============================================================================
// Inner state
// =============================================================================

/// The render pass currently in flight.
pub(crate) struct ActivePass {
    /// Most urgent tier among the covered tasks.
    pub(crate) priority: Priority,
    /// Earliest expiration among the covered tasks.
    pub(crate) expires_at: Duration,
    /// Render tasks this pass satisfies once committed.
    pub(crate) covered: Vec<Task>,
    pub(crate) token: CancelToken,
    pub(crate) started_at: Duration,
}

impl ActivePass {
    pub(crate) fn is_expired(&self, now: Duration) -> bool {
        self.expires_at <= now
    }
}

/// A callback task that is executing right now.
pub(crate) struct RunningTask {
    pub(crate) priority: Priority,
    pub(crate) token: CancelToken,
}

pub(crate) struct SchedulerInner {
    pub(crate) this: Weak<SchedulerInner>,
    pub(crate) tree: RefCell<FiberTree>,
    pub(crate) queue: RefCell<TaskQueue>,
    pub(crate) timing: Rc<dyn HostTiming>,
    pub(crate) config: SchedulerConfig,
    pub(crate) context: Cell<ExecutionContext>,
    pub(crate) ambient: Cell<Priority>,
    pub(crate) active: RefCell<Option<ActivePass>>,
    pub(crate) running: RefCell<Option<RunningTask>>,
    /// Requests made while busy, resolved against the ambient priority at
    /// request time.
    pub(crate) deferred: RefCell<Vec<Priority>>,
    /// Bumped by every `render`; stale mount handles compare against it.
    pub(crate) mount_epoch: Cell<u64>,
    pub(crate) host_callback_scheduled: Cell<bool>,
    pub(crate) update_scheduled: Cell<bool>,
    pub(crate) deadline: Cell<Duration>,
    pub(crate) next_task_id: Cell<u64>,
    pub(crate) stats: Cell<SchedulerStats>,
    pub(crate) errors: RefCell<Vec<FiberError>>,
}

impl UpdateSink for SchedulerInner {
    fn request_update(&self, priority: Option<Priority>) {
        SchedulerInner::request_update(self, priority);
    }
}

impl SchedulerInner {
    pub(crate) fn now(&self) -> Duration {
        self.timing.now()
    }

    pub(crate) fn sink(&self) -> Weak<dyn UpdateSink> {
        self.this.clone()
    }

    pub(crate) fn bump(&self, f: impl FnOnce(&mut SchedulerStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }

    pub(crate) fn report(&self, error: FiberError) {
        self.errors.borrow_mut().push(error);
    }

    fn next_id(&self) -> TaskId {
        let id = self.next_task_id.get() + 1;
        self.next_task_id.set(id);
        TaskId(id)
    }

    pub(crate) fn enqueue(&self, priority: Priority, kind: TaskKind) -> TaskId {
        let id = self.next_id();
        let now = self.now();
        self.queue.borrow_mut().push(Task::new(id, priority, now, kind), now);
        id
    }

    // =========================================================================
    // Update entry point
    // =========================================================================

    pub(crate) fn request_update(&self, priority: Option<Priority>) {
        let priority = priority.unwrap_or_else(|| self.ambient.get());
        let context = self.context.get();
        if context.is_busy() {
            trace!(%priority, ?context, "update deferred");
            self.deferred.borrow_mut().push(priority);
            return;
        }
        self.dispatch_update(priority);
        self.drain_deferred();
    }

    pub(crate) fn dispatch_update(&self, priority: Priority) {
        if !self.tree.borrow().is_mounted() {
            debug!(%priority, "update requested with nothing mounted");
            return;
        }
        trace!(%priority, "update requested");
        self.interrupt_if_outranked(priority);

        match priority {
            Priority::Immediate => {
                let dropped = self.queue.borrow_mut().clear();
                debug!(dropped, "immediate update clears the queue");
                self.perform_sync_render();
            }
            Priority::UserBlocking => {
                self.enqueue(priority, TaskKind::Render);
                self.ensure_host_callback_scheduled();
            }
            Priority::Normal | Priority::Low | Priority::Idle => {
                self.enqueue(priority, TaskKind::Render);
                if self.update_scheduled.replace(true) {
                    trace!(%priority, "coalesced into pending batch");
                    return;
                }
                let this = self.this.clone();
                self.timing.queue_microtask(Box::new(move || {
                    if let Some(inner) = this.upgrade() {
                        inner.update_scheduled.set(false);
                        inner.ensure_host_callback_scheduled();
                    }
                }));
            }
        }
    }

    /// Signal the in-flight pass or task if `priority` outranks it.
    fn interrupt_if_outranked(&self, priority: Priority) {
        if let Some(pass) = self.active.borrow().as_ref() {
            if priority.is_higher_than(pass.priority) {
                debug!(%priority, current = %pass.priority, "interrupting render pass");
                pass.token.cancel();
            }
        }
        if let Some(task) = self.running.borrow().as_ref() {
            if priority.is_higher_than(task.priority) {
                debug!(%priority, current = %task.priority, "interrupting running task");
                task.token.cancel();
            }
        }
    }

    /// Dispatch updates that were requested during a render or commit.
    ///
    /// Each round may commit synchronously and request more; rounds past the
    /// configured limit are dropped and reported.
    pub(crate) fn drain_deferred(&self) {
        let mut rounds = 0;
        loop {
            if self.context.get().is_busy() {
                return;
            }
            let pending = mem::take(&mut *self.deferred.borrow_mut());
            if pending.is_empty() {
                return;
            }
            rounds += 1;
            if rounds > self.config.nested_update_limit {
                let limit = self.config.nested_update_limit;
                error!(limit, dropped = pending.len(), "nested update limit exceeded");
                self.report(FiberError::NestedUpdateLimit { limit });
                return;
            }
            for priority in pending {
                self.dispatch_update(priority);
            }
        }
    }

    // =========================================================================
    // Synchronous path
    // =========================================================================

    /// Drop queued render tasks; a synchronous render is about to satisfy them.
    pub(crate) fn retire_render_tasks(&self) {
        let now = self.now();
        let retired = self.queue.borrow_mut().take_render_tasks(now).len();
        if retired > 0 {
            trace!(retired, "queued render tasks satisfied synchronously");
        }
    }

    /// Render from the root and commit without yielding.
    pub(crate) fn perform_sync_render(&self) {
        if let Some(pass) = self.active.borrow_mut().take() {
            pass.token.cancel();
            debug!(covered = pass.covered.len(), "in-flight pass superseded");
        }

        let mut tree = self.tree.borrow_mut();
        if tree.discard_work_in_progress() {
            self.bump(|s| s.passes_discarded += 1);
        }

        let units = {
            let _render = ContextGuard::enter(&self.context, ExecutionContext::RENDERING);
            if tree.prepare_fresh_pass().is_none() {
                return;
            }
            self.bump(|s| s.passes_started += 1);
            render_to_completion(&mut tree, &self.sink())
        };
        self.bump(|s| s.units_of_work += units as u64);

        let _commit = ContextGuard::enter(&self.context, ExecutionContext::COMMITTING);
        if commit_root(&mut tree).is_some() {
            self.bump(|s| s.commits += 1);
        }
        debug!(units, "synchronous render committed");
    }

    // =========================================================================
    // Host callback
    // =========================================================================

    /// Make sure exactly one host callback is pending.
    pub(crate) fn ensure_host_callback_scheduled(&self) {
        if self.host_callback_scheduled.replace(true) {
            return;
        }
        let this = self.this.clone();
        self.timing.schedule_callback(Box::new(move || {
            if let Some(inner) = this.upgrade() {
                inner.host_callback_scheduled.set(false);
                inner.on_host_callback();
            }
        }));
    }
}

// =============================================================================
// Scheduler
// =============================================================================

/// Handle to a scheduler and the fiber tree it drives.
///
/// Cheap to clone. All clones share one tree, one task queue and one clock.
///
/// # Example
///
/// ```ignore
/// let surface = MemorySurface::new();
/// let event_loop = EventLoop::manual();
/// let scheduler = Scheduler::new(surface.clone(), event_loop.clone());
///
/// let root = surface.create_container("root");
/// scheduler.render(h("div").text_child("hello"), root)?;
///
/// scheduler.request_update(Some(Priority::Normal));
/// event_loop.run_until_idle();
/// ```
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<SchedulerInner>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("context", &self.inner.context.get())
            .field("pending_tasks", &self.pending_tasks())
            .field("stats", &self.inner.stats.get())
            .finish()
    }
}

impl Scheduler {
    /// Create a scheduler with the default configuration.
    pub fn new(surface: impl HostSurface + 'static, timing: impl HostTiming + 'static) -> Self {
        Self::with_config(surface, timing, SchedulerConfig::default())
    }

    /// Create a scheduler.
    ///
    /// # Arguments
    /// * `surface` - Host surface commits are applied to
    /// * `timing` - Clock plus macrotask/microtask queues driving the loop
    /// * `config` - Time slice and nested update limit
    pub fn with_config(
        surface: impl HostSurface + 'static,
        timing: impl HostTiming + 'static,
        config: SchedulerConfig,
    ) -> Self {
        let timing: Rc<dyn HostTiming> = Rc::new(timing);
        let inner = Rc::new_cyclic(|this| SchedulerInner {
            this: this.clone(),
            tree: RefCell::new(FiberTree::new(Box::new(surface))),
            queue: RefCell::new(TaskQueue::new()),
            timing,
            config,
            context: Cell::new(ExecutionContext::empty()),
            ambient: Cell::new(Priority::Normal),
            active: RefCell::new(None),
            running: RefCell::new(None),
            deferred: RefCell::new(Vec::new()),
            mount_epoch: Cell::new(0),
            host_callback_scheduled: Cell::new(false),
            update_scheduled: Cell::new(false),
            deadline: Cell::new(Duration::ZERO),
            next_task_id: Cell::new(0),
            stats: Cell::new(SchedulerStats::default()),
            errors: RefCell::new(Vec::new()),
        });
        Self { inner }
    }

    pub fn config(&self) -> SchedulerConfig {
        self.inner.config
    }

    fn ensure_not_busy(&self) -> Result<(), FiberError> {
        let context = self.inner.context.get();
        if context.is_busy() {
            return Err(FiberError::Reentrant(context));
        }
        Ok(())
    }

    /// Render `element` into `container`, replacing whatever was rendered
    /// before, and commit synchronously.
    ///
    /// Rendering into a different container than the previous call first
    /// unmounts the old tree (cleanups run, nodes detach from the old
    /// container), then mounts fresh into the new one.
    ///
    /// # Errors
    /// [`FiberError::Reentrant`] if called from a component or an effect.
    pub fn render(&self, element: Element, container: NodeHandle) -> Result<(), FiberError> {
        self.ensure_not_busy()?;
        let previous = self.inner.tree.borrow().container;
        if let Some(previous) = previous.filter(|&current| current != container) {
            debug!(%previous, %container, "container changed, tearing down previous tree");
            self.inner.tree.borrow_mut().mount(None, previous);
            self.inner.retire_render_tasks();
            self.inner.perform_sync_render();
        }

        self.inner.mount_epoch.set(self.inner.mount_epoch.get() + 1);
        debug!(%container, "render");
        self.inner.tree.borrow_mut().mount(Some(element), container);
        self.inner.retire_render_tasks();
        self.inner.perform_sync_render();
        self.inner.drain_deferred();
        Ok(())
    }

    /// Render an empty tree: run every cleanup and detach every node.
    ///
    /// # Errors
    /// [`FiberError::Reentrant`] if called from a component or an effect.
    pub fn unmount(&self) -> Result<(), FiberError> {
        self.ensure_not_busy()?;
        let container = {
            let tree = self.inner.tree.borrow();
            if tree.committed_root().is_none() {
                return Ok(());
            }
            tree.container
        };
        let Some(container) = container else { return Ok(()) };

        debug!(%container, "unmount");
        self.inner.tree.borrow_mut().mount(None, container);
        self.inner.retire_render_tasks();
        self.inner.perform_sync_render();
        self.inner.drain_deferred();
        Ok(())
    }

    /// Container the current tree renders into.
    pub fn container(&self) -> Option<NodeHandle> {
        self.inner.tree.try_borrow().ok().and_then(|tree| tree.container)
    }

    /// Generation of the latest `render` call. A
    /// [`MountHandle`](crate::MountHandle) owns the tree only while this still
    /// matches the value it was created with.
    pub(crate) fn mount_epoch(&self) -> u64 {
        self.inner.mount_epoch.get()
    }

    /// Unmount only if `epoch` is still the latest mount and the tree still
    /// renders into `container`. Returns whether anything was unmounted.
    pub(crate) fn unmount_if_owned(&self, epoch: u64, container: NodeHandle) -> Result<bool, FiberError> {
        self.ensure_not_busy()?;
        let owned = epoch == self.inner.mount_epoch.get()
            && self.inner.tree.borrow().container == Some(container);
        if !owned {
            debug!(%container, epoch, "stale mount handle, tree left in place");
            return Ok(false);
        }
        self.unmount()?;
        Ok(true)
    }

    /// Request a render pass at `priority`, or at the ambient priority.
    pub fn request_update(&self, priority: Option<Priority>) {
        self.inner.request_update(priority);
    }

    /// Queue arbitrary work.
    ///
    /// The action runs from the work loop in priority order. It may return
    /// [`TaskStatus::Continue`](super::TaskStatus::Continue) to be resumed
    /// later with its original timestamps. Errors and panics are caught,
    /// logged and collected (see [`take_errors`](Self::take_errors)).
    pub fn schedule_task<F>(&self, priority: Priority, action: F) -> TaskId
    where
        F: FnMut(&TaskContext<'_>) -> TaskResult + 'static,
    {
        let action: TaskAction = Box::new(action);
        let id = self.inner.enqueue(priority, TaskKind::Callback(action));
        trace!(task = %id, %priority, "task scheduled");
        self.inner.interrupt_if_outranked(priority);
        self.inner.ensure_host_callback_scheduled();
        id
    }

    /// Run `f` with `priority` as the ambient priority. Restored afterwards,
    /// also when `f` panics.
    pub fn run_with_priority<R>(&self, priority: Priority, f: impl FnOnce() -> R) -> R {
        struct Restore<'a> {
            cell: &'a Cell<Priority>,
            previous: Priority,
        }

        impl Drop for Restore<'_> {
            fn drop(&mut self) {
                self.cell.set(self.previous);
            }
        }

        let _restore = Restore {
            cell: &self.inner.ambient,
            previous: self.inner.ambient.replace(priority),
        };
        f()
    }

    /// Run `f` at [`Priority::Low`].
    pub fn start_transition<R>(&self, f: impl FnOnce() -> R) -> R {
        self.run_with_priority(Priority::Low, f)
    }

    /// Priority used when an update does not name one.
    pub fn current_priority(&self) -> Priority {
        self.inner.ambient.get()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.inner.stats.get()
    }

    /// Errors collected since the last call.
    pub fn take_errors(&self) -> Vec<FiberError> {
        mem::take(&mut *self.inner.errors.borrow_mut())
    }

    pub fn pending_tasks(&self) -> usize {
        self.inner.queue.try_borrow().map(|q| q.len()).unwrap_or(0)
    }

    pub fn execution_context(&self) -> ExecutionContext {
        self.inner.context.get()
    }

    /// A render pass has started and not yet committed.
    pub fn is_rendering(&self) -> bool {
        self.inner.active.try_borrow().map(|a| a.is_some()).unwrap_or(true)
    }

    /// Nothing queued, nothing in flight, no host callback pending.
    pub fn is_idle(&self) -> bool {
        self.pending_tasks() == 0
            && !self.is_rendering()
            && !self.inner.host_callback_scheduled.get()
            && !self.inner.update_scheduled.get()
    }

    /// Read the fiber tree. For inspection between passes.
    ///
    /// # Panics
    /// If called while the scheduler is rendering or committing.
    pub fn with_tree<R>(&self, f: impl FnOnce(&FiberTree) -> R) -> R {
        f(&self.inner.tree.borrow())
    }
}
