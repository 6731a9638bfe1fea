//! Execution context flags and cancellation tokens.

use std::cell::Cell;
use std::rc::Rc;

bitflags::bitflags! {
    /// What the scheduler is doing right now.
    ///
    /// Update requests made while `RENDERING` or `COMMITTING` are deferred
    /// until the pass is over.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ExecutionContext: u8 {
        /// Inside a host callback's work loop.
        const FLUSHING = 1 << 0;
        /// Walking the fiber tree (component code may run).
        const RENDERING = 1 << 1;
        /// Applying patches and running effects.
        const COMMITTING = 1 << 2;
    }
}

impl ExecutionContext {
    /// Render or commit in progress.
    #[inline]
    pub fn is_busy(self) -> bool {
        self.intersects(ExecutionContext::RENDERING | ExecutionContext::COMMITTING)
    }
}

/// Sets a context flag for its lifetime and restores the previous flags on
/// drop, including during unwinding.
pub(crate) struct ContextGuard<'a> {
    cell: &'a Cell<ExecutionContext>,
    previous: ExecutionContext,
}

impl<'a> ContextGuard<'a> {
    pub(crate) fn enter(cell: &'a Cell<ExecutionContext>, flag: ExecutionContext) -> Self {
        let previous = cell.get();
        cell.set(previous | flag);
        Self { cell, previous }
    }
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        self.cell.set(self.previous);
    }
}

/// Interruption signal handed to running work.
///
/// The scheduler cancels the token of the active task when a more urgent
/// request arrives; the task observes it at its next yield point.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Rc<Cell<bool>>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.set(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.get()
    }
}
