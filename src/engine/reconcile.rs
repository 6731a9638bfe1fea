//! Reconciliation - the resumable tree walk of a render pass.
//!
//! One call to [`perform_unit_of_work`] processes exactly one fiber: it runs
//! [`begin_work`] (render a component or create a host node, then diff the
//! children) and returns the next fiber in depth-first pre-order. The cursor
//! lives in [`FiberTree::next_unit`], so a pass can stop between any two
//! units and pick up later.
//!
//! # Positional diff
//!
//! Children are matched by index, not by key:
//!
//! ```text
//! old: [A, B, C]      new: [A, C]
//!
//! 0: A ↔ A  same kind  → UPDATE (reuses host node)
//! 1: B ↔ C  mismatch   → PLACE C, DELETE B
//! 2: C ↔ -  no element → DELETE C
//! ```
//!
//! Reordering same-kind siblings therefore shows up as a run of UPDATEs with
//! swapped attributes, not as moves.

use std::rc::{Rc, Weak};

use tracing::trace;

use super::fiber::{Fiber, FiberId, FiberKind, FiberTree, PatchKind};
use super::hooks::{HookSlot, RenderContext, UpdateSink};
use crate::host::HostKind;
use crate::pipeline::apply_props;
use crate::types::{Element, Props};

/// Process one fiber and return the next one in pre-order.
///
/// Returns `None` when the walk is back at the work-in-progress root, which
/// means the render pass is complete.
pub fn perform_unit_of_work(
    tree: &mut FiberTree,
    id: FiberId,
    sink: &Weak<dyn UpdateSink>,
) -> Option<FiberId> {
    begin_work(tree, id, sink);

    let fiber = tree.fibers.get(id)?;
    if let Some(child) = fiber.first_child {
        return Some(child);
    }

    let mut current = id;
    loop {
        if Some(current) == tree.wip_root {
            return None;
        }
        let fiber = tree.fibers.get(current)?;
        if let Some(sibling) = fiber.next_sibling {
            return Some(sibling);
        }
        current = fiber.parent?;
    }
}

/// Advance the cursor by one unit. Returns true while work remains.
pub fn perform_next_unit(tree: &mut FiberTree, sink: &Weak<dyn UpdateSink>) -> bool {
    let Some(unit) = tree.next_unit else { return false };
    tree.next_unit = perform_unit_of_work(tree, unit, sink);
    tree.next_unit.is_some()
}

/// Walk the current pass to the end without yielding.
///
/// # Returns
/// The number of units processed.
pub fn render_to_completion(tree: &mut FiberTree, sink: &Weak<dyn UpdateSink>) -> usize {
    let mut units = 0;
    while tree.next_unit.is_some() {
        perform_next_unit(tree, sink);
        units += 1;
    }
    units
}

/// Render one fiber and reconcile its children.
pub fn begin_work(tree: &mut FiberTree, id: FiberId, sink: &Weak<dyn UpdateSink>) {
    let Some(fiber) = tree.fibers.get(id) else { return };
    trace!(fiber = fiber.kind.label(), patch = ?fiber.patch, "begin work");

    let elements: Rc<Vec<Element>> = match &fiber.kind {
        FiberKind::Component(component) => {
            let component = component.clone();
            let props = fiber.props.clone();
            let children = fiber.children.clone();
            let previous: Vec<Rc<dyn HookSlot>> = fiber
                .alternate
                .and_then(|alt| tree.fibers.get(alt))
                .map(|alt| alt.hooks.clone())
                .unwrap_or_default();

            let mut cx = RenderContext::new(component.name(), &previous, &children, sink);
            let rendered = component.render(&mut cx, &props);
            let (hooks, effects) = cx.finish();

            if let Some(fiber) = tree.fibers.get_mut(id) {
                fiber.hooks = hooks;
                fiber.effects = effects;
            }
            Rc::new(rendered)
        }
        FiberKind::Host(_) | FiberKind::Text => {
            let children = fiber.children.clone();
            if fiber.host_node.is_none() {
                create_host_node(tree, id);
            }
            children
        }
        FiberKind::Root => fiber.children.clone(),
    };

    reconcile_children(tree, id, &elements);
}

/// Create the detached host node of a host or text fiber, with its initial
/// properties and listeners.
fn create_host_node(tree: &mut FiberTree, id: FiberId) {
    let Some(fiber) = tree.fibers.get(id) else { return };
    let kind = match &fiber.kind {
        FiberKind::Host(tag) => HostKind::Element(tag),
        FiberKind::Text => HostKind::Text,
        FiberKind::Root | FiberKind::Component(_) => return,
    };

    let node = tree.surface.create_node(kind);
    apply_props(tree.surface.as_mut(), node, &Props::new(), &fiber.props);

    if let Some(fiber) = tree.fibers.get_mut(id) {
        fiber.host_node = Some(node);
    }
}

/// Diff `elements` against the children of the parent's alternate, by
/// position, building the new child list and marking deletions.
pub fn reconcile_children(tree: &mut FiberTree, parent: FiberId, elements: &[Element]) {
    let generation = tree.generation;
    let mut old = tree
        .fibers
        .get(parent)
        .and_then(|f| f.alternate)
        .and_then(|alt| tree.fibers.get(alt))
        .and_then(|alt| alt.first_child);
    let mut previous_new: Option<FiberId> = None;
    let mut index = 0;

    while index < elements.len() || old.is_some() {
        let element = elements.get(index);
        let old_fiber = old.and_then(|o| tree.fibers.get(o));
        let next_old = old_fiber.and_then(|f| f.next_sibling);
        let same_kind = match (old_fiber, element) {
            (Some(fiber), Some(element)) => fiber.kind.matches(element.kind()),
            _ => false,
        };

        let new_id = match element {
            Some(element) => {
                let mut fiber = Fiber::from_element(element, parent, generation);
                if same_kind {
                    fiber.host_node = old_fiber.and_then(|f| f.host_node);
                    fiber.alternate = old;
                    fiber.patch = PatchKind::Update;
                }
                Some(tree.fibers.insert(fiber))
            }
            None => None,
        };

        if !same_kind {
            if let Some(old_id) = old {
                if let Some(stale) = tree.fibers.get_mut(old_id) {
                    stale.patch = PatchKind::Delete;
                    tree.deletions.push(old_id);
                }
            }
        }

        if let Some(new_id) = new_id {
            let link = match previous_new {
                None => tree.fibers.get_mut(parent).map(|f| &mut f.first_child),
                Some(prev) => tree.fibers.get_mut(prev).map(|f| &mut f.next_sibling),
            };
            if let Some(link) = link {
                *link = Some(new_id);
            }
            previous_new = Some(new_id);
        }

        old = next_old;
        index += 1;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Deps;
    use crate::host::{MemorySurface, NodeHandle};
    use crate::pipeline::commit_root;
    use crate::types::{Component, h, text};
    use std::cell::RefCell;

    struct NullSink;

    impl UpdateSink for NullSink {
        fn request_update(&self, _priority: Option<crate::scheduler::Priority>) {}
    }

    fn null_sink() -> Weak<dyn UpdateSink> {
        Weak::<NullSink>::new()
    }

    fn setup(element: Element) -> (FiberTree, MemorySurface, NodeHandle) {
        let surface = MemorySurface::new();
        let container = surface.create_container("root");
        let mut tree = FiberTree::new(Box::new(surface.clone()));
        tree.mount(Some(element), container);
        (tree, surface, container)
    }

    fn render(tree: &mut FiberTree, element: Element) {
        let container = tree.container.unwrap();
        tree.mount(Some(element), container);
        tree.prepare_fresh_pass();
        render_to_completion(tree, &null_sink());
    }

    fn list(tags: &[&str]) -> Element {
        h("ul").children(tags.iter().map(|tag| h(tag)))
    }

    /// Patch kinds of the `ul`'s new children plus the deletion list.
    fn patch_kinds(tree: &FiberTree) -> (Vec<(String, PatchKind)>, Vec<(String, PatchKind)>) {
        let root = tree.wip_root().unwrap();
        let ul = tree.children_of(root)[0];
        let describe = |id: FiberId| {
            let fiber = tree.get(id).unwrap();
            (fiber.kind().label().to_string(), fiber.patch())
        };
        let children = tree.children_of(ul).into_iter().map(describe).collect();
        let deleted = tree.deletions().iter().copied().map(describe).collect();
        (children, deleted)
    }

    #[test]
    fn test_positional_patch_kinds() {
        let (mut tree, _, _) = setup(list(&["a", "b", "c"]));
        tree.prepare_fresh_pass();
        render_to_completion(&mut tree, &null_sink());
        commit_root(&mut tree);

        render(&mut tree, list(&["a", "c"]));
        let (children, deleted) = patch_kinds(&tree);

        assert_eq!(
            children,
            vec![
                ("a".to_string(), PatchKind::Update),
                ("c".to_string(), PatchKind::Place),
            ]
        );
        assert_eq!(
            deleted,
            vec![
                ("b".to_string(), PatchKind::Delete),
                ("c".to_string(), PatchKind::Delete),
            ]
        );
    }

    #[test]
    fn test_first_render_places_everything() {
        let (mut tree, _, _) = setup(list(&["a", "b"]));
        tree.prepare_fresh_pass();
        let units = render_to_completion(&mut tree, &null_sink());

        // root, ul, a, b
        assert_eq!(units, 4);
        let (children, deleted) = patch_kinds(&tree);
        assert!(children.iter().all(|(_, patch)| *patch == PatchKind::Place));
        assert!(deleted.is_empty());
    }

    #[test]
    fn test_walk_order_is_preorder() {
        let visited = Rc::new(RefCell::new(Vec::new()));
        let log = visited.clone();
        let leaf = Component::new("Leaf", move |_, props| {
            let name = props.get("name").map(|v| v.to_string()).unwrap_or_default();
            log.borrow_mut().push(name);
            Vec::new()
        });

        let element = h("div")
            .child(
                h("section")
                    .child(Element::component(&leaf).attr("name", "a"))
                    .child(Element::component(&leaf).attr("name", "b")),
            )
            .child(Element::component(&leaf).attr("name", "c"));

        let (mut tree, _, _) = setup(element);
        tree.prepare_fresh_pass();

        // Stepping one unit at a time gives the same order as a full walk
        while perform_next_unit(&mut tree, &null_sink()) {}
        assert_eq!(*visited.borrow(), vec!["a", "b", "c"]);
        assert!(tree.next_unit().is_none());
    }

    #[test]
    fn test_host_nodes_created_detached_with_props() {
        let (mut tree, surface, container) = setup(h("p").attr("class", "x").child(text("hi")));
        tree.prepare_fresh_pass();
        render_to_completion(&mut tree, &null_sink());

        // Nodes exist with their props, but nothing is attached before commit
        assert_eq!(surface.inner_markup(container), "");
        let p = surface.find_by_attribute("class", &"x".into()).unwrap();
        assert_eq!(surface.render_to_string(p), "<p class=\"x\"></p>");

        commit_root(&mut tree);
        assert_eq!(surface.inner_markup(container), "<p class=\"x\">hi</p>");
    }

    #[test]
    fn test_component_hooks_recorded_on_fiber() {
        let counter = Component::new("Counter", |cx, _| {
            let (count, _) = cx.use_state(7);
            cx.use_effect(Deps::OnMount, || None);
            vec![text(count)]
        });

        let (mut tree, surface, container) = setup(Element::component(&counter));
        tree.prepare_fresh_pass();
        render_to_completion(&mut tree, &null_sink());

        let root = tree.wip_root().unwrap();
        let fiber = tree.get(tree.children_of(root)[0]).unwrap();
        assert_eq!(fiber.hook_count(), 1);
        assert_eq!(fiber.effect_count(), 1);
        assert!(fiber.host_node().is_none());

        commit_root(&mut tree);
        assert_eq!(surface.inner_markup(container), "7");
    }
}
