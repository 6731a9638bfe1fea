//! Fiber arena - the double-buffered render tree.
//!
//! Fibers live in a generation-tagged [`SlotMap`]. Every render pass stamps
//! its fibers with a new generation number; `alternate` points one generation
//! back, into the committed tree. After a commit, every fiber that is not part
//! of the new committed generation is dropped in one sweep, and the stale
//! `alternate` keys simply stop resolving.
//!
//! ```text
//! committed (gen N)          work-in-progress (gen N+1)
//!   Root ◄──────alternate─────── Root
//!    │                            │
//!   div ◄───────alternate─────── div      (UPDATE)
//!    │                            │
//!   span                         p        (PLACE; span goes to deletions)
//! ```

use std::rc::Rc;

use slotmap::{SlotMap, new_key_type};

use super::hooks::{Effect, HookSlot};
use crate::host::{HostSurface, NodeHandle};
use crate::types::{Component, Element, ElementKind, Props};

new_key_type! {
    /// Key of a fiber in the arena. Stale keys resolve to nothing.
    pub struct FiberId;
}

// =============================================================================
// Fiber
// =============================================================================

/// What a fiber renders as.
#[derive(Clone, Debug)]
pub enum FiberKind {
    /// Tree root, owns the container node.
    Root,
    Host(Rc<str>),
    Text,
    Component(Component),
}

impl FiberKind {
    pub(crate) fn from_element(kind: &ElementKind) -> Self {
        match kind {
            ElementKind::Host(tag) => FiberKind::Host(tag.clone()),
            ElementKind::Text => FiberKind::Text,
            ElementKind::Component(component) => FiberKind::Component(component.clone()),
        }
    }

    /// Check if an element can reuse this fiber's slot.
    pub(crate) fn matches(&self, kind: &ElementKind) -> bool {
        match (self, kind) {
            (FiberKind::Host(a), ElementKind::Host(b)) => a == b,
            (FiberKind::Text, ElementKind::Text) => true,
            (FiberKind::Component(a), ElementKind::Component(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            FiberKind::Root => "#root",
            FiberKind::Host(tag) => tag,
            FiberKind::Text => "#text",
            FiberKind::Component(component) => component.name(),
        }
    }
}

/// Host action a fiber needs at commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PatchKind {
    #[default]
    None,
    Place,
    Update,
    Delete,
}

/// One render slot of one pass.
pub struct Fiber {
    pub(crate) kind: FiberKind,
    pub(crate) props: Rc<Props>,
    /// Element children (host and root fibers). Components compute theirs.
    pub(crate) children: Rc<Vec<Element>>,
    pub(crate) host_node: Option<NodeHandle>,
    pub(crate) parent: Option<FiberId>,
    pub(crate) first_child: Option<FiberId>,
    pub(crate) next_sibling: Option<FiberId>,
    pub(crate) alternate: Option<FiberId>,
    pub(crate) patch: PatchKind,
    pub(crate) hooks: Vec<Rc<dyn HookSlot>>,
    pub(crate) effects: Vec<Effect>,
    pub(crate) generation: u64,
}

impl Fiber {
    pub(crate) fn from_element(element: &Element, parent: FiberId, generation: u64) -> Self {
        Self {
            kind: FiberKind::from_element(element.kind()),
            props: element.props().clone(),
            children: element.child_elements().clone(),
            host_node: None,
            parent: Some(parent),
            first_child: None,
            next_sibling: None,
            alternate: None,
            patch: PatchKind::Place,
            hooks: Vec::new(),
            effects: Vec::new(),
            generation,
        }
    }

    pub fn kind(&self) -> &FiberKind {
        &self.kind
    }

    pub fn props(&self) -> &Props {
        &self.props
    }

    pub fn host_node(&self) -> Option<NodeHandle> {
        self.host_node
    }

    pub fn patch(&self) -> PatchKind {
        self.patch
    }

    pub fn alternate(&self) -> Option<FiberId> {
        self.alternate
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.len()
    }

    pub fn effect_count(&self) -> usize {
        self.effects.len()
    }
}

// =============================================================================
// FiberTree
// =============================================================================

/// Arena plus the render cursor: the scheduler's view of the tree.
pub struct FiberTree {
    pub(crate) fibers: SlotMap<FiberId, Fiber>,
    pub(crate) surface: Box<dyn HostSurface>,
    pub(crate) container: Option<NodeHandle>,
    pub(crate) root_element: Option<Element>,
    pub(crate) next_unit: Option<FiberId>,
    pub(crate) wip_root: Option<FiberId>,
    pub(crate) committed_root: Option<FiberId>,
    pub(crate) deletions: Vec<FiberId>,
    pub(crate) generation: u64,
}

impl FiberTree {
    pub fn new(surface: Box<dyn HostSurface>) -> Self {
        Self {
            fibers: SlotMap::with_key(),
            surface,
            container: None,
            root_element: None,
            next_unit: None,
            wip_root: None,
            committed_root: None,
            deletions: Vec::new(),
            generation: 0,
        }
    }

    /// Set what to render and where. Takes effect on the next pass.
    pub fn mount(&mut self, element: Option<Element>, container: NodeHandle) {
        self.root_element = element;
        self.container = Some(container);
    }

    pub fn is_mounted(&self) -> bool {
        self.container.is_some()
    }

    /// A pass has started and not yet committed.
    pub fn has_work_in_progress(&self) -> bool {
        self.wip_root.is_some()
    }

    pub fn get(&self, id: FiberId) -> Option<&Fiber> {
        self.fibers.get(id)
    }

    pub fn committed_root(&self) -> Option<FiberId> {
        self.committed_root
    }

    pub fn wip_root(&self) -> Option<FiberId> {
        self.wip_root
    }

    pub fn next_unit(&self) -> Option<FiberId> {
        self.next_unit
    }

    pub fn deletions(&self) -> &[FiberId] {
        &self.deletions
    }

    /// Number of live fibers across both generations.
    pub fn len(&self) -> usize {
        self.fibers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fibers.is_empty()
    }

    /// Start a fresh pass from the root, discarding any unfinished one.
    ///
    /// Returns the new work-in-progress root, or `None` if nothing is mounted.
    pub fn prepare_fresh_pass(&mut self) -> Option<FiberId> {
        self.discard_work_in_progress();
        let container = self.container?;

        self.generation += 1;
        let root = self.fibers.insert(Fiber {
            kind: FiberKind::Root,
            props: Rc::new(Props::new()),
            children: Rc::new(self.root_element.iter().cloned().collect()),
            host_node: Some(container),
            parent: None,
            first_child: None,
            next_sibling: None,
            alternate: self.committed_root,
            patch: PatchKind::None,
            hooks: Vec::new(),
            effects: Vec::new(),
            generation: self.generation,
        });
        self.wip_root = Some(root);
        self.next_unit = Some(root);
        Some(root)
    }

    /// Throw away the unfinished pass, if any.
    ///
    /// Nothing of it was applied to the host besides creating detached nodes,
    /// so dropping its fibers and untagging the committed fibers it marked
    /// for deletion restores the pre-pass state. Returns true if a pass was
    /// discarded.
    pub fn discard_work_in_progress(&mut self) -> bool {
        if self.wip_root.take().is_none() {
            return false;
        }
        self.next_unit = None;
        for id in self.deletions.drain(..) {
            if let Some(fiber) = self.fibers.get_mut(id) {
                fiber.patch = PatchKind::None;
            }
        }
        let discarded = self.generation;
        self.fibers.retain(|_, fiber| fiber.generation != discarded);
        true
    }

    /// Drop every fiber outside the committed generation and clear the
    /// per-pass bookkeeping of the ones that remain.
    pub(crate) fn collect_previous_generation(&mut self) {
        let live = self.generation;
        self.fibers.retain(|_, fiber| {
            if fiber.generation != live {
                return false;
            }
            fiber.patch = PatchKind::None;
            fiber.alternate = None;
            true
        });
    }

    // =========================================================================
    // Navigation
    // =========================================================================

    /// Direct children of a fiber, in order.
    pub fn children_of(&self, id: FiberId) -> Vec<FiberId> {
        let mut out = Vec::new();
        let mut child = self.fibers.get(id).and_then(|f| f.first_child);
        while let Some(c) = child {
            out.push(c);
            child = self.fibers.get(c).and_then(|f| f.next_sibling);
        }
        out
    }

    /// Pre-order walk of the subtree rooted at `root`, iterative.
    pub fn subtree_preorder(&self, root: FiberId) -> Vec<FiberId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if !self.fibers.contains_key(id) {
                continue;
            }
            out.push(id);
            let children = self.children_of(id);
            stack.extend(children.into_iter().rev());
        }
        out
    }

    /// Host node of the nearest ancestor that owns one.
    pub(crate) fn nearest_host_parent(&self, id: FiberId) -> Option<NodeHandle> {
        let mut current = self.fibers.get(id).and_then(|f| f.parent);
        while let Some(p) = current {
            let fiber = self.fibers.get(p)?;
            if let Some(node) = fiber.host_node {
                return Some(node);
            }
            current = fiber.parent;
        }
        None
    }

    /// Outermost host nodes of a subtree: the fiber's own node, or for a
    /// component, the nearest host descendants on every branch.
    pub(crate) fn top_host_nodes(&self, id: FiberId) -> Vec<NodeHandle> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(fiber) = self.fibers.get(current) else { continue };
            match fiber.host_node {
                Some(node) => out.push(node),
                None => stack.extend(self.children_of(current).into_iter().rev()),
            }
        }
        out
    }

    /// Host node to insert a placed fiber's node before: the first attached
    /// host node among its following siblings, looking through components.
    pub(crate) fn host_anchor(&self, id: FiberId) -> Option<NodeHandle> {
        let mut node = id;
        'siblings: loop {
            // Climb until there is a next sibling, but never past a host parent
            loop {
                let fiber = self.fibers.get(node)?;
                if let Some(sibling) = fiber.next_sibling {
                    node = sibling;
                    break;
                }
                let parent = fiber.parent?;
                if self.fibers.get(parent)?.host_node.is_some() {
                    return None;
                }
                node = parent;
            }

            // Descend to the first host node of this sibling's subtree
            loop {
                let fiber = self.fibers.get(node)?;
                if fiber.patch == PatchKind::Place {
                    continue 'siblings;
                }
                if fiber.host_node.is_some() {
                    return fiber.host_node;
                }
                match fiber.first_child {
                    Some(child) => node = child,
                    None => continue 'siblings,
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
