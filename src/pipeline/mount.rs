//! Mount API - attach an element tree to a container and tear it down.
//!
//! # Example
//!
//! ```ignore
//! use spark_fiber::pipeline::mount;
//!
//! let handle = mount(&scheduler, Element::component(&app), root)?;
//!
//! // ... drive the event loop ...
//!
//! // Runs every effect cleanup and detaches every node
//! handle.unmount()?;
//! ```

use tracing::warn;

use crate::error::FiberError;
use crate::host::NodeHandle;
use crate::scheduler::Scheduler;
use crate::types::Element;

// =============================================================================
// Mount Handle
// =============================================================================

/// Handle returned by [`mount`].
///
/// Dropping the handle unmounts the tree (best effort: if the drop happens
/// while the scheduler is busy, the failure is logged and the tree stays).
///
/// A handle only owns the tree it mounted. Once a later [`mount`] or
/// [`Scheduler::render`] replaces that tree, unmounting or dropping the old
/// handle leaves the current tree alone.
pub struct MountHandle {
    scheduler: Scheduler,
    container: NodeHandle,
    epoch: u64,
    mounted: bool,
}

impl MountHandle {
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn container(&self) -> NodeHandle {
        self.container
    }

    /// Render an empty tree into the container. Does nothing if the tree has
    /// since been replaced by another mount.
    ///
    /// # Errors
    /// [`FiberError::Reentrant`] if called from a component or an effect.
    pub fn unmount(mut self) -> Result<(), FiberError> {
        self.mounted = false;
        self.scheduler.unmount_if_owned(self.epoch, self.container).map(|_| ())
    }
}

impl Drop for MountHandle {
    fn drop(&mut self) {
        if !self.mounted {
            return;
        }
        if let Err(err) = self.scheduler.unmount_if_owned(self.epoch, self.container) {
            warn!(container = %self.container, error = %err, "unmount on drop failed");
        }
    }
}

// =============================================================================
// Mount Function
// =============================================================================

/// Render `element` into `container` synchronously and return a handle that
/// unmounts it.
///
/// # Arguments
/// * `scheduler` - Scheduler that owns the tree; the handle keeps a clone
/// * `element` - Root of the UI
/// * `container` - Host node to render into
///
/// # Errors
/// [`FiberError::Reentrant`] if called from a component or an effect.
pub fn mount(scheduler: &Scheduler, element: Element, container: NodeHandle) -> Result<MountHandle, FiberError> {
    scheduler.render(element, container)?;
    let epoch = scheduler.mount_epoch();
    Ok(MountHandle {
        scheduler: scheduler.clone(),
        container,
        epoch,
        mounted: true,
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Deps;
    use crate::host::{EventLoop, MemorySurface};
    use crate::types::{Component, h};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn app(log: Rc<RefCell<Vec<&'static str>>>) -> Component {
        Component::new("App", move |cx, _| {
            let log = log.clone();
            cx.use_effect(Deps::OnMount, move || {
                log.borrow_mut().push("mount");
                Some(Box::new(move || log.borrow_mut().push("cleanup")))
            });
            vec![h("main")]
        })
    }

    #[test]
    fn test_mount_and_unmount() {
        let surface = MemorySurface::new();
        let scheduler = Scheduler::new(surface.clone(), EventLoop::manual());
        let root = surface.create_container("root");
        let log = Rc::new(RefCell::new(Vec::new()));

        let handle = mount(&scheduler, Element::component(&app(log.clone())), root).unwrap();
        assert_eq!(surface.inner_markup(root), "<main></main>");
        assert_eq!(*log.borrow(), vec!["mount"]);

        handle.unmount().unwrap();
        assert_eq!(surface.inner_markup(root), "");
        assert_eq!(*log.borrow(), vec!["mount", "cleanup"]);
    }

    #[test]
    fn test_drop_unmounts() {
        let surface = MemorySurface::new();
        let scheduler = Scheduler::new(surface.clone(), EventLoop::manual());
        let root = surface.create_container("root");
        let log = Rc::new(RefCell::new(Vec::new()));

        {
            let _handle = mount(&scheduler, Element::component(&app(log.clone())), root).unwrap();
        }
        assert_eq!(surface.inner_markup(root), "");
        assert_eq!(*log.borrow(), vec!["mount", "cleanup"]);
    }

    #[test]
    fn test_stale_handle_leaves_remount_in_place() {
        let surface = MemorySurface::new();
        let scheduler = Scheduler::new(surface.clone(), EventLoop::manual());
        let root = surface.create_container("root");
        let first_log = Rc::new(RefCell::new(Vec::new()));

        let first = mount(&scheduler, Element::component(&app(first_log.clone())), root).unwrap();
        let second = mount(&scheduler, h("section").text_child("second"), root).unwrap();
        assert_eq!(surface.inner_markup(root), "<section>second</section>");
        assert_eq!(*first_log.borrow(), vec!["mount", "cleanup"]);

        drop(first);
        assert_eq!(surface.inner_markup(root), "<section>second</section>");

        drop(second);
        assert_eq!(surface.inner_markup(root), "");
    }

    #[test]
    fn test_stale_handle_leaves_direct_render_in_place() {
        let surface = MemorySurface::new();
        let scheduler = Scheduler::new(surface.clone(), EventLoop::manual());
        let root = surface.create_container("root");

        let handle = mount(&scheduler, h("p").text_child("mounted"), root).unwrap();
        scheduler.render(h("p").text_child("rendered"), root).unwrap();

        handle.unmount().unwrap();
        assert_eq!(surface.inner_markup(root), "<p>rendered</p>");
    }

    #[test]
    fn test_stale_handle_ignores_tree_in_other_container() {
        let surface = MemorySurface::new();
        let scheduler = Scheduler::new(surface.clone(), EventLoop::manual());
        let root = surface.create_container("root");
        let other = surface.create_container("other");
        let log = Rc::new(RefCell::new(Vec::new()));

        let first = mount(&scheduler, h("p").text_child("first"), root).unwrap();
        let second = mount(&scheduler, Element::component(&app(log.clone())), other).unwrap();
        assert_eq!(surface.inner_markup(root), "");
        assert_eq!(surface.inner_markup(other), "<main></main>");

        first.unmount().unwrap();
        assert_eq!(surface.inner_markup(other), "<main></main>");
        assert_eq!(*log.borrow(), vec!["mount"]);

        second.unmount().unwrap();
        assert_eq!(surface.inner_markup(other), "");
        assert_eq!(*log.borrow(), vec!["mount", "cleanup"]);
    }
}
