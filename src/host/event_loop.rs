//! Reference [`HostTiming`] - a single-threaded event loop.
//!
//! Models the two host queues the scheduler relies on:
//!
//! - **macrotasks** (`schedule_callback`) - one runs per turn
//! - **microtasks** (`queue_microtask`) - drained at the end of every turn
//!
//! # Clocks
//!
//! - [`EventLoop::manual`] - virtual clock, only moves when told to. With
//!   [`set_auto_advance`](EventLoop::set_auto_advance) every `now()` reading
//!   advances it, which is how tests simulate work that takes time.
//! - [`EventLoop::system`] - wall clock from [`Instant`].
//!
//! # Example
//!
//! ```ignore
//! let event_loop = EventLoop::manual();
//! let scheduler = Scheduler::new(surface.clone(), event_loop.clone());
//! scheduler.render(app, container)?;
//! event_loop.run_until_idle();
//! ```

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

use super::{HostCallback, HostTiming};

enum Clock {
    Manual,
    System(Instant),
}

struct EventLoopInner {
    clock: Clock,
    /// Virtual time (manual clock) or offset added to the system clock.
    offset: Cell<Duration>,
    auto_advance: Cell<Duration>,
    macrotasks: RefCell<VecDeque<HostCallback>>,
    microtasks: RefCell<VecDeque<HostCallback>>,
}

/// Cheap, cloneable handle to an event loop.
#[derive(Clone)]
pub struct EventLoop {
    inner: Rc<EventLoopInner>,
}

impl EventLoop {
    fn with_clock(clock: Clock) -> Self {
        Self {
            inner: Rc::new(EventLoopInner {
                clock,
                offset: Cell::new(Duration::ZERO),
                auto_advance: Cell::new(Duration::ZERO),
                macrotasks: RefCell::new(VecDeque::new()),
                microtasks: RefCell::new(VecDeque::new()),
            }),
        }
    }

    /// Event loop on a virtual clock starting at zero.
    pub fn manual() -> Self {
        Self::with_clock(Clock::Manual)
    }

    /// Event loop on the system monotonic clock.
    pub fn system() -> Self {
        Self::with_clock(Clock::System(Instant::now()))
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.inner.offset.set(self.inner.offset.get() + by);
    }

    /// Advance the clock by `step` on every `now()` reading (0 disables).
    pub fn set_auto_advance(&self, step: Duration) {
        self.inner.auto_advance.set(step);
    }

    pub fn pending_tasks(&self) -> usize {
        self.inner.macrotasks.borrow().len()
    }

    pub fn pending_microtasks(&self) -> usize {
        self.inner.microtasks.borrow().len()
    }

    /// Drain the microtask queue, including microtasks queued while draining.
    ///
    /// Returns the number of microtasks run.
    pub fn run_microtasks(&self) -> usize {
        let mut count = 0;
        loop {
            let next = self.inner.microtasks.borrow_mut().pop_front();
            let Some(callback) = next else { break };
            callback();
            count += 1;
        }
        count
    }

    /// Run one macrotask followed by a microtask checkpoint.
    ///
    /// Returns false if there was no macrotask to run.
    pub fn run_next_task(&self) -> bool {
        let next = self.inner.macrotasks.borrow_mut().pop_front();
        let Some(callback) = next else { return false };
        callback();
        self.run_microtasks();
        true
    }

    /// Run at most `limit` macrotasks. Returns how many ran.
    pub fn run_tasks(&self, limit: usize) -> usize {
        self.run_microtasks();
        let mut count = 0;
        while count < limit && self.run_next_task() {
            count += 1;
        }
        count
    }

    /// Drain microtasks, then run macrotasks until both queues are empty.
    ///
    /// Returns how many macrotasks ran. Never returns if callbacks keep
    /// rescheduling themselves; use [`run_tasks`](Self::run_tasks) for a bound.
    pub fn run_until_idle(&self) -> usize {
        self.run_microtasks();
        let mut count = 0;
        while self.run_next_task() {
            count += 1;
        }
        count
    }
}

impl HostTiming for EventLoop {
    fn now(&self) -> Duration {
        let step = self.inner.auto_advance.get();
        if !step.is_zero() {
            self.advance(step);
        }
        match &self.inner.clock {
            Clock::Manual => self.inner.offset.get(),
            Clock::System(origin) => origin.elapsed() + self.inner.offset.get(),
        }
    }

    fn schedule_callback(&self, callback: HostCallback) {
        self.inner.macrotasks.borrow_mut().push_back(callback);
    }

    fn queue_microtask(&self, callback: HostCallback) {
        self.inner.microtasks.borrow_mut().push_back(callback);
    }
}

// =============================================================================
// Tests
// =============================================================================
