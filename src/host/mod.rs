//! Host collaborators - the surface being patched and the clock driving work.
//!
//! The engine never touches a concrete UI toolkit. It talks to two traits:
//!
//! - [`HostSurface`] - node creation, attributes, listeners, tree insertion
//! - [`HostTiming`] - monotonic clock plus two callback queues
//!
//! # Timing Domains
//!
//! ```text
//! queue_microtask   → runs before the current turn ends   (update coalescing)
//! schedule_callback → runs on a later turn, no min delay   (resume rendering)
//! ```
//!
//! Two reference implementations ship with the crate and back the tests:
//! [`MemorySurface`] (in-memory node tree with a mutation log) and
//! [`EventLoop`] (virtual or system clock with explicit task queues).

mod event_loop;
mod memory;

pub use event_loop::EventLoop;
pub use memory::{MemorySurface, Mutation};

use std::fmt;
use std::time::Duration;

use crate::types::{EventHandler, Value};

/// Opaque handle to a host node. Only the surface that issued it knows what
/// it refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(u64);

impl NodeHandle {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// What kind of node to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKind<'a> {
    Element(&'a str),
    Text,
}

/// Mutation primitives of the surface being rendered to.
///
/// The commit engine checks [`contains`](HostSurface::contains) before every
/// insertion and removal, so implementations never see a removal of a node
/// that is not a child, nor a duplicate insertion.
pub trait HostSurface {
    fn create_node(&mut self, kind: HostKind<'_>) -> NodeHandle;

    fn set_attribute(&mut self, node: NodeHandle, name: &str, value: &Value);

    fn remove_attribute(&mut self, node: NodeHandle, name: &str);

    fn bind_event(&mut self, node: NodeHandle, event: &str, handler: &EventHandler);

    fn unbind_event(&mut self, node: NodeHandle, event: &str, handler: &EventHandler);

    /// Insert `child` under `parent`, before `before` if given, else last.
    fn insert_child(&mut self, parent: NodeHandle, child: NodeHandle, before: Option<NodeHandle>);

    fn remove_child(&mut self, parent: NodeHandle, child: NodeHandle);

    fn contains(&self, parent: NodeHandle, child: NodeHandle) -> bool;
}

/// Callback handed to the host.
pub type HostCallback = Box<dyn FnOnce()>;

/// Clock and callback queues of the host.
pub trait HostTiming {
    /// Monotonic time since an arbitrary origin.
    fn now(&self) -> Duration;

    /// Run `callback` on a later turn (macrotask), with no minimum delay.
    fn schedule_callback(&self, callback: HostCallback);

    /// Run `callback` at the end of the current turn (microtask).
    fn queue_microtask(&self, callback: HostCallback);
}
