//! In-memory host surface.
//!
//! Keeps a plain node tree and records every mutation in order, which makes
//! commit behavior observable: "how many host writes did this update cost?"
//! is `take_mutations().len()`.
//!
//! `MemorySurface` is a cheap handle. Clone it, hand one clone to the
//! scheduler, keep the other to inspect the tree.
//!
//! Removed nodes stay allocated so tests can still inspect them after a
//! commit. Long-running hosts call [`MemorySurface::prune_detached`] between
//! passes to release them.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Write as _;
use std::rc::Rc;

use super::{HostKind, HostSurface, NodeHandle};
use crate::types::{EventHandler, TEXT_VALUE_ATTR, Value};

/// One recorded host write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Create { node: NodeHandle, kind: String },
    SetAttribute { node: NodeHandle, name: String },
    RemoveAttribute { node: NodeHandle, name: String },
    BindEvent { node: NodeHandle, event: String },
    UnbindEvent { node: NodeHandle, event: String },
    Insert { parent: NodeHandle, child: NodeHandle },
    Remove { parent: NodeHandle, child: NodeHandle },
}

#[derive(Debug)]
struct MemoryNode {
    /// Tag name, or `None` for text nodes.
    tag: Option<String>,
    attributes: BTreeMap<String, Value>,
    listeners: Vec<(String, EventHandler)>,
    children: Vec<NodeHandle>,
    parent: Option<NodeHandle>,
}

#[derive(Debug, Default)]
struct MemoryDom {
    nodes: HashMap<NodeHandle, MemoryNode>,
    containers: HashSet<NodeHandle>,
    next_id: u64,
    log: Vec<Mutation>,
}

impl MemoryDom {
    fn alloc(&mut self, tag: Option<String>) -> NodeHandle {
        self.next_id += 1;
        let handle = NodeHandle::new(self.next_id);
        self.nodes.insert(
            handle,
            MemoryNode {
                tag,
                attributes: BTreeMap::new(),
                listeners: Vec::new(),
                children: Vec::new(),
                parent: None,
            },
        );
        handle
    }

    /// Walk up the parent chain until a container is found.
    fn is_rooted(&self, node: NodeHandle) -> bool {
        let mut current = Some(node);
        while let Some(handle) = current {
            if self.containers.contains(&handle) {
                return true;
            }
            current = self.nodes.get(&handle).and_then(|n| n.parent);
        }
        false
    }

    fn write_node(&self, out: &mut String, node: NodeHandle) {
        let Some(n) = self.nodes.get(&node) else { return };
        match &n.tag {
            None => {
                if let Some(value) = n.attributes.get(TEXT_VALUE_ATTR) {
                    let _ = write!(out, "{value}");
                }
            }
            Some(tag) => {
                let _ = write!(out, "<{tag}");
                for (name, value) in &n.attributes {
                    let _ = write!(out, " {name}=\"{value}\"");
                }
                out.push('>');
                for child in &n.children {
                    self.write_node(out, *child);
                }
                let _ = write!(out, "</{tag}>");
            }
        }
    }
}

/// In-memory [`HostSurface`].
#[derive(Clone, Default)]
pub struct MemorySurface {
    dom: Rc<RefCell<MemoryDom>>,
}

impl MemorySurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a root node to render into. Not recorded as a mutation.
    pub fn create_container(&self, tag: &str) -> NodeHandle {
        let mut dom = self.dom.borrow_mut();
        let node = dom.alloc(Some(tag.to_string()));
        dom.containers.insert(node);
        node
    }

    /// Number of live nodes, containers included.
    pub fn node_count(&self) -> usize {
        self.dom.borrow().nodes.len()
    }

    /// Drop every node not reachable from a container and return how many
    /// were released.
    ///
    /// Only call this while the scheduler is idle. A pass in flight holds
    /// nodes it created but has not inserted yet, and pruning them would
    /// make the commit silently skip those inserts.
    pub fn prune_detached(&self) -> usize {
        let mut dom = self.dom.borrow_mut();
        let detached: Vec<NodeHandle> = dom
            .nodes
            .keys()
            .copied()
            .filter(|handle| !dom.is_rooted(*handle))
            .collect();
        for handle in &detached {
            dom.nodes.remove(handle);
        }
        detached.len()
    }

    /// All mutations recorded so far.
    pub fn mutations(&self) -> Vec<Mutation> {
        self.dom.borrow().log.clone()
    }

    /// Return and clear the mutation log.
    pub fn take_mutations(&self) -> Vec<Mutation> {
        std::mem::take(&mut self.dom.borrow_mut().log)
    }

    /// Serialize a subtree as markup, e.g. `<div id="a">hi</div>`.
    pub fn render_to_string(&self, node: NodeHandle) -> String {
        let dom = self.dom.borrow();
        let mut out = String::new();
        dom.write_node(&mut out, node);
        out
    }

    /// Serialize only the children of a node (handy for containers).
    pub fn inner_markup(&self, node: NodeHandle) -> String {
        let dom = self.dom.borrow();
        let mut out = String::new();
        if let Some(n) = dom.nodes.get(&node) {
            for child in &n.children {
                dom.write_node(&mut out, *child);
            }
        }
        out
    }

    pub fn children(&self, node: NodeHandle) -> Vec<NodeHandle> {
        self.dom
            .borrow()
            .nodes
            .get(&node)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    pub fn parent(&self, node: NodeHandle) -> Option<NodeHandle> {
        self.dom.borrow().nodes.get(&node).and_then(|n| n.parent)
    }

    pub fn attribute(&self, node: NodeHandle, name: &str) -> Option<Value> {
        self.dom
            .borrow()
            .nodes
            .get(&node)
            .and_then(|n| n.attributes.get(name).cloned())
    }

    pub fn listener_count(&self, node: NodeHandle) -> usize {
        self.dom
            .borrow()
            .nodes
            .get(&node)
            .map(|n| n.listeners.len())
            .unwrap_or(0)
    }

    /// Find the first node (in creation order) whose attribute `name` equals `value`.
    pub fn find_by_attribute(&self, name: &str, value: &Value) -> Option<NodeHandle> {
        let dom = self.dom.borrow();
        let mut hits: Vec<NodeHandle> = dom
            .nodes
            .iter()
            .filter(|(_, n)| n.attributes.get(name) == Some(value))
            .map(|(handle, _)| *handle)
            .collect();
        hits.sort();
        hits.into_iter().next()
    }

    /// Check whether `node` is reachable from `root`.
    pub fn is_attached_to(&self, root: NodeHandle, node: NodeHandle) -> bool {
        let dom = self.dom.borrow();
        let mut current = Some(node);
        while let Some(handle) = current {
            if handle == root {
                return true;
            }
            current = dom.nodes.get(&handle).and_then(|n| n.parent);
        }
        false
    }

    /// Invoke every listener bound to `event` on `node`.
    ///
    /// Listeners are cloned out first, so handlers are free to trigger
    /// updates that mutate this surface.
    pub fn dispatch(&self, node: NodeHandle, event: &str) -> usize {
        let handlers: Vec<EventHandler> = self
            .dom
            .borrow()
            .nodes
            .get(&node)
            .map(|n| {
                n.listeners
                    .iter()
                    .filter(|(name, _)| name == event)
                    .map(|(_, handler)| handler.clone())
                    .collect()
            })
            .unwrap_or_default();
        for handler in &handlers {
            handler.call();
        }
        handlers.len()
    }
}

impl HostSurface for MemorySurface {
    fn create_node(&mut self, kind: HostKind<'_>) -> NodeHandle {
        let mut dom = self.dom.borrow_mut();
        let (tag, label) = match kind {
            HostKind::Element(tag) => (Some(tag.to_string()), tag.to_string()),
            HostKind::Text => (None, "#text".to_string()),
        };
        let node = dom.alloc(tag);
        dom.log.push(Mutation::Create { node, kind: label });
        node
    }

    fn set_attribute(&mut self, node: NodeHandle, name: &str, value: &Value) {
        let mut dom = self.dom.borrow_mut();
        if let Some(n) = dom.nodes.get_mut(&node) {
            n.attributes.insert(name.to_string(), value.clone());
            dom.log.push(Mutation::SetAttribute { node, name: name.to_string() });
        }
    }

    fn remove_attribute(&mut self, node: NodeHandle, name: &str) {
        let mut dom = self.dom.borrow_mut();
        if let Some(n) = dom.nodes.get_mut(&node) {
            n.attributes.remove(name);
            dom.log.push(Mutation::RemoveAttribute { node, name: name.to_string() });
        }
    }

    fn bind_event(&mut self, node: NodeHandle, event: &str, handler: &EventHandler) {
        let mut dom = self.dom.borrow_mut();
        if let Some(n) = dom.nodes.get_mut(&node) {
            n.listeners.push((event.to_string(), handler.clone()));
            dom.log.push(Mutation::BindEvent { node, event: event.to_string() });
        }
    }

    fn unbind_event(&mut self, node: NodeHandle, event: &str, handler: &EventHandler) {
        let mut dom = self.dom.borrow_mut();
        if let Some(n) = dom.nodes.get_mut(&node) {
            let before = n.listeners.len();
            n.listeners
                .retain(|(name, bound)| !(name == event && bound.ptr_eq(handler)));
            if n.listeners.len() != before {
                dom.log.push(Mutation::UnbindEvent { node, event: event.to_string() });
            }
        }
    }

    fn insert_child(&mut self, parent: NodeHandle, child: NodeHandle, before: Option<NodeHandle>) {
        let mut dom = self.dom.borrow_mut();
        if !dom.nodes.contains_key(&parent) || !dom.nodes.contains_key(&child) {
            return;
        }

        // Detach from a previous parent first
        let old_parent = dom.nodes.get(&child).and_then(|n| n.parent);
        if let Some(old) = old_parent {
            if let Some(p) = dom.nodes.get_mut(&old) {
                p.children.retain(|c| *c != child);
            }
        }

        if let Some(p) = dom.nodes.get_mut(&parent) {
            let position = before
                .and_then(|anchor| p.children.iter().position(|c| *c == anchor))
                .unwrap_or(p.children.len());
            p.children.insert(position, child);
        }
        if let Some(c) = dom.nodes.get_mut(&child) {
            c.parent = Some(parent);
        }
        dom.log.push(Mutation::Insert { parent, child });
    }

    fn remove_child(&mut self, parent: NodeHandle, child: NodeHandle) {
        let mut dom = self.dom.borrow_mut();
        let removed = match dom.nodes.get_mut(&parent) {
            Some(p) => {
                let before = p.children.len();
                p.children.retain(|c| *c != child);
                p.children.len() != before
            }
            None => false,
        };
        if removed {
            if let Some(c) = dom.nodes.get_mut(&child) {
                c.parent = None;
            }
            dom.log.push(Mutation::Remove { parent, child });
        }
    }

    fn contains(&self, parent: NodeHandle, child: NodeHandle) -> bool {
        self.dom
            .borrow()
            .nodes
            .get(&child)
            .is_some_and(|n| n.parent == Some(parent))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_remove_contains() {
        let mut surface = MemorySurface::new();
        let root = surface.create_container("root");
        let a = surface.create_node(HostKind::Element("a"));
        let b = surface.create_node(HostKind::Element("b"));
        let c = surface.create_node(HostKind::Element("c"));

        surface.insert_child(root, a, None);
        surface.insert_child(root, c, None);
        surface.insert_child(root, b, Some(c));

        assert_eq!(surface.children(root), vec![a, b, c]);
        assert!(surface.contains(root, b));

        surface.remove_child(root, b);
        assert!(!surface.contains(root, b));
        assert_eq!(surface.children(root), vec![a, c]);
        assert_eq!(surface.parent(b), None);
    }

    #[test]
    fn test_remove_non_child_is_not_recorded() {
        let mut surface = MemorySurface::new();
        let root = surface.create_container("root");
        let a = surface.create_node(HostKind::Element("a"));
        surface.take_mutations();

        surface.remove_child(root, a);
        assert!(surface.take_mutations().is_empty());
    }

    #[test]
    fn test_render_to_string() {
        let mut surface = MemorySurface::new();
        let root = surface.create_container("div");
        let span = surface.create_node(HostKind::Element("span"));
        let txt = surface.create_node(HostKind::Text);
        surface.set_attribute(span, "id", &Value::from("x"));
        surface.set_attribute(txt, TEXT_VALUE_ATTR, &Value::from("hello"));
        surface.insert_child(span, txt, None);
        surface.insert_child(root, span, None);

        assert_eq!(surface.render_to_string(root), "<div><span id=\"x\">hello</span></div>");
        assert_eq!(surface.inner_markup(root), "<span id=\"x\">hello</span>");
        assert!(surface.is_attached_to(root, txt));
    }

    #[test]
    fn test_prune_detached_releases_removed_subtrees() {
        let mut surface = MemorySurface::new();
        let root = surface.create_container("root");
        let list = surface.create_node(HostKind::Element("ul"));
        let item = surface.create_node(HostKind::Element("li"));
        let kept = surface.create_node(HostKind::Element("p"));
        surface.insert_child(list, item, None);
        surface.insert_child(root, list, None);
        surface.insert_child(root, kept, None);
        assert_eq!(surface.node_count(), 4);

        surface.remove_child(root, list);
        assert_eq!(surface.prune_detached(), 2);
        assert_eq!(surface.node_count(), 2);
        assert_eq!(surface.children(root), vec![kept]);
        assert_eq!(surface.render_to_string(list), "");

        // Empty containers are never pruned
        let other = surface.create_container("other");
        assert_eq!(surface.prune_detached(), 0);
        assert_eq!(surface.render_to_string(other), "<other></other>");
    }

    #[test]
    fn test_dispatch_and_unbind() {
        use std::cell::Cell;

        let mut surface = MemorySurface::new();
        let button = surface.create_node(HostKind::Element("button"));
        let clicks = Rc::new(Cell::new(0));
        let clicks_clone = clicks.clone();
        let handler = EventHandler::new(move || clicks_clone.set(clicks_clone.get() + 1));

        surface.bind_event(button, "click", &handler);
        assert_eq!(surface.dispatch(button, "click"), 1);
        assert_eq!(surface.dispatch(button, "keydown"), 0);
        assert_eq!(clicks.get(), 1);

        surface.unbind_event(button, "click", &handler);
        assert_eq!(surface.listener_count(button), 0);
        surface.dispatch(button, "click");
        assert_eq!(clicks.get(), 1);
    }
}
