//! Work loop - cooperative, time-sliced execution of queued work.
//!
//! Every host callback gets a fixed budget (`frame_budget`). Within it the
//! loop either starts the next task or advances the in-flight render pass,
//! one fiber unit at a time, checking after each unit whether to yield.
//!
//! ```text
//! on_host_callback
//!   deadline = now + budget
//!   loop
//!     budget spent?                  → stop, reschedule if work is left
//!     no pass in flight?             → pop task: Render → begin pass
//!                                                Callback → run it
//!     pass outranked or cancelled?   → discard pass, re-enqueue its tasks
//!     otherwise                      → walk units until done or yield
//!                                      done → commit, retire covered tasks
//! ```
//!
//! A pass whose earliest covered expiration has passed can no longer be
//! preempted by priority. It still yields when the budget is spent.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use tracing::{debug, error, trace};

use super::context::{CancelToken, ContextGuard, ExecutionContext};
use super::runtime::{ActivePass, RunningTask, SchedulerInner};
use super::task_queue::{Task, TaskContext, TaskKind, TaskStatus};
use crate::engine::perform_next_unit;
use crate::error::FiberError;
use crate::pipeline::commit_root;

/// How a slice of render work ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkOutcome {
    /// The tree walk finished; the pass is ready to commit.
    Complete,
    /// Stopped between units; the cursor is kept.
    Yielded,
}

impl SchedulerInner {
    /// Entry point of every host callback.
    pub(crate) fn on_host_callback(&self) {
        if self.context.get().contains(ExecutionContext::FLUSHING) {
            trace!("host callback while flushing; rescheduled");
            self.ensure_host_callback_scheduled();
            return;
        }
        self.deadline.set(self.now() + self.config.frame_budget);
        self.flush_work();
    }

    fn flush_work(&self) {
        {
            let _flush = ContextGuard::enter(&self.context, ExecutionContext::FLUSHING);
            loop {
                let now = self.now();
                if now >= self.deadline.get() {
                    break;
                }

                if self.active.borrow().is_none() {
                    let next = self.queue.borrow_mut().pop(now);
                    let Some(task) = next else { break };
                    if task.is_render() {
                        self.begin_pass(task, now);
                    } else {
                        self.run_callback_task(task);
                        self.drain_deferred();
                    }
                    continue;
                }

                if self.pass_preempted(now) {
                    self.suspend_pass();
                    continue;
                }

                if self.work_until_yield() == WorkOutcome::Complete {
                    self.finish_pass();
                    self.drain_deferred();
                }
            }
        }

        let has_pass = self.active.borrow().is_some();
        let queued = self.queue.borrow().len();
        if has_pass || queued > 0 {
            self.bump(|s| s.yields += 1);
            trace!(has_pass, queued, "yielding to host");
            self.ensure_host_callback_scheduled();
        }
    }

    // =========================================================================
    // Render passes
    // =========================================================================

    /// Start a fresh pass for `first` and every other queued render task.
    fn begin_pass(&self, first: Task, now: Duration) {
        let mut covered = vec![first];
        covered.extend(self.queue.borrow_mut().take_render_tasks(now));

        let priority = covered.iter().map(Task::priority).min().unwrap_or_default();
        let expires_at = covered.iter().map(Task::expires_at).min().unwrap_or(now);

        let (started, discarded) = {
            let mut tree = self.tree.borrow_mut();
            let discarded = tree.has_work_in_progress();
            (tree.prepare_fresh_pass().is_some(), discarded)
        };
        if discarded {
            self.bump(|s| s.passes_discarded += 1);
        }
        if !started {
            debug!(dropped = covered.len(), "nothing mounted; render tasks dropped");
            return;
        }

        self.bump(|s| s.passes_started += 1);
        debug!(%priority, covered = covered.len(), expired = expires_at <= now, "render pass started");
        *self.active.borrow_mut() = Some(ActivePass {
            priority,
            expires_at,
            covered,
            token: CancelToken::new(),
            started_at: now,
        });
    }

    /// True if the in-flight pass must give way: it was cancelled, or the
    /// queue head outranks it. Expired passes are never preempted.
    fn pass_preempted(&self, now: Duration) -> bool {
        let active = self.active.borrow();
        let Some(pass) = active.as_ref() else { return false };
        if pass.is_expired(now) {
            return false;
        }
        pass.token.is_cancelled() || self.queue.borrow_mut().has_higher_priority_task(pass.priority, now)
    }

    /// Yield check between two units of work.
    fn should_yield(&self) -> bool {
        let now = self.now();
        now >= self.deadline.get() || self.pass_preempted(now)
    }

    /// Throw the in-flight pass away and put its tasks back in the queue.
    fn suspend_pass(&self) {
        let Some(pass) = self.active.borrow_mut().take() else { return };
        self.tree.borrow_mut().discard_work_in_progress();
        self.bump(|s| s.passes_discarded += 1);

        let now = self.now();
        debug!(
            priority = %pass.priority,
            requeued = pass.covered.len(),
            "render pass preempted"
        );
        let mut queue = self.queue.borrow_mut();
        for task in pass.covered {
            queue.push(task, now);
        }
    }

    /// Advance the pass until it completes or should yield. At least one unit
    /// runs per call.
    fn work_until_yield(&self) -> WorkOutcome {
        let sink = self.sink();
        let mut tree = self.tree.borrow_mut();
        let _render = ContextGuard::enter(&self.context, ExecutionContext::RENDERING);

        let mut units: u64 = 0;
        let outcome = loop {
            let more = perform_next_unit(&mut tree, &sink);
            units += 1;
            if !more {
                break WorkOutcome::Complete;
            }
            if self.should_yield() {
                break WorkOutcome::Yielded;
            }
        };
        self.bump(|s| s.units_of_work += units);
        trace!(units, ?outcome, "render slice");
        outcome
    }

    /// Commit the finished pass and retire the tasks it covered.
    fn finish_pass(&self) {
        let pass = self.active.borrow_mut().take();
        let summary = {
            let mut tree = self.tree.borrow_mut();
            let _commit = ContextGuard::enter(&self.context, ExecutionContext::COMMITTING);
            commit_root(&mut tree)
        };
        if summary.is_some() {
            self.bump(|s| s.commits += 1);
        }

        if let Some(pass) = pass {
            let elapsed = self.now().saturating_sub(pass.started_at);
            debug!(
                priority = %pass.priority,
                retired = pass.covered.len(),
                elapsed_us = elapsed.as_micros() as u64,
                "render pass committed"
            );
        }
    }

    // =========================================================================
    // Callback tasks
    // =========================================================================

    /// Run one slice of a callback task. Errors and panics complete the task.
    fn run_callback_task(&self, mut task: Task) {
        let TaskKind::Callback(action) = &mut task.kind else { return };
        let id = task.id;
        let token = CancelToken::new();
        *self.running.borrow_mut() = Some(RunningTask {
            priority: task.priority,
            token: token.clone(),
        });

        let cx = TaskContext {
            id,
            priority: task.priority,
            deadline: self.deadline.get(),
            timing: &*self.timing,
            queue: &self.queue,
            token,
        };
        let result = panic::catch_unwind(AssertUnwindSafe(|| action(&cx)));
        *self.running.borrow_mut() = None;
        self.bump(|s| s.tasks_run += 1);

        match result {
            Ok(Ok(TaskStatus::Complete)) => trace!(task = %id, "task complete"),
            Ok(Ok(TaskStatus::Continue)) => {
                trace!(task = %id, "task continues");
                let now = self.now();
                self.queue.borrow_mut().push(task, now);
            }
            Ok(Err(err)) => {
                let message = err.to_string();
                error!(task = %id, error = %message, "task failed");
                self.bump(|s| s.tasks_failed += 1);
                self.report(FiberError::TaskFailed { id, message });
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(task = %id, panic = %message, "task panicked");
                self.bump(|s| s.tasks_failed += 1);
                self.report(FiberError::TaskPanicked { id, message });
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use crate::host::{EventLoop, HostTiming, MemorySurface};
    use crate::scheduler::{Priority, Scheduler, SchedulerConfig, TaskStatus};
    use crate::types::{Component, Element, h, text};
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    fn setup(config: SchedulerConfig) -> (Scheduler, MemorySurface, EventLoop) {
        let surface = MemorySurface::new();
        let event_loop = EventLoop::manual();
        let scheduler = Scheduler::with_config(surface.clone(), event_loop.clone(), config);
        (scheduler, surface, event_loop)
    }

    fn wide_tree(width: usize) -> Element {
        h("ul").children((0..width).map(|i| h("li").child(text(i))))
    }

    #[test]
    fn test_pass_is_sliced_across_host_callbacks() {
        let (scheduler, surface, event_loop) = setup(SchedulerConfig::default());
        let root = surface.create_container("root");
        scheduler.render(wide_tree(20), root).unwrap();
        let before = scheduler.stats();

        // Every clock reading costs 1ms, so a 5ms slice fits a few units
        event_loop.set_auto_advance(Duration::from_millis(1));
        scheduler.request_update(Some(Priority::UserBlocking));
        let callbacks = event_loop.run_until_idle();

        let stats = scheduler.stats();
        assert!(callbacks > 1, "expected several slices, got {callbacks}");
        assert!(stats.yields > before.yields);
        assert_eq!(stats.passes_started - before.passes_started, 1);
        assert_eq!(stats.commits - before.commits, 1);
        assert!(scheduler.is_idle());
    }

    #[test]
    fn test_higher_tier_preempts_pass() {
        let (scheduler, surface, event_loop) = setup(SchedulerConfig::default());
        let root = surface.create_container("root");
        scheduler.render(wide_tree(30), root).unwrap();
        let base = scheduler.stats();

        event_loop.set_auto_advance(Duration::from_millis(1));
        scheduler.request_update(Some(Priority::Low));
        event_loop.run_microtasks();
        assert!(event_loop.run_next_task());
        assert!(scheduler.is_rendering());

        // A userBlocking request outranks the low pass still in flight
        scheduler.request_update(Some(Priority::UserBlocking));
        event_loop.run_until_idle();

        let stats = scheduler.stats();
        assert_eq!(stats.passes_discarded - base.passes_discarded, 1);
        // The replacement pass covered both requests
        assert_eq!(stats.commits - base.commits, 1);
        assert_eq!(scheduler.pending_tasks(), 0);
    }

    #[test]
    fn test_callback_task_continue_and_complete() {
        let (scheduler, _, event_loop) = setup(SchedulerConfig::default());
        let slices = Rc::new(RefCell::new(0));

        let counter = slices.clone();
        scheduler.schedule_task(Priority::Normal, move |_| {
            *counter.borrow_mut() += 1;
            if *counter.borrow() < 3 {
                Ok(TaskStatus::Continue)
            } else {
                Ok(TaskStatus::Complete)
            }
        });
        event_loop.run_until_idle();

        assert_eq!(*slices.borrow(), 3);
        assert_eq!(scheduler.stats().tasks_run, 3);
        assert!(scheduler.take_errors().is_empty());
    }

    #[test]
    fn test_task_context_reports_outranking_work() {
        let (scheduler, _, event_loop) = setup(SchedulerConfig::default());
        let observed = Rc::new(RefCell::new(Vec::new()));

        let log = observed.clone();
        let handle = scheduler.clone();
        scheduler.schedule_task(Priority::Low, move |cx| {
            let before = cx.should_yield();
            handle.schedule_task(Priority::UserBlocking, |_| Ok(TaskStatus::Complete));
            log.borrow_mut().push((before, cx.should_yield(), cx.token().is_cancelled()));
            Ok(TaskStatus::Complete)
        });
        event_loop.run_until_idle();

        assert_eq!(*observed.borrow(), vec![(false, true, true)]);
    }

    #[test]
    fn test_component_render_counts() {
        let renders = Rc::new(RefCell::new(0));
        let count = renders.clone();
        let app = Component::new("App", move |_, _| {
            *count.borrow_mut() += 1;
            vec![text("x")]
        });

        let (scheduler, surface, event_loop) = setup(SchedulerConfig::default());
        let root = surface.create_container("root");
        scheduler.render(Element::component(&app), root).unwrap();
        assert_eq!(*renders.borrow(), 1);

        scheduler.request_update(None);
        scheduler.request_update(None);
        assert_eq!(event_loop.now(), Duration::ZERO);
        event_loop.run_until_idle();
        assert_eq!(*renders.borrow(), 2);
    }
}
