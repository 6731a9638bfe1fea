//! Commit - apply a finished render pass to the host surface.
//!
//! Commit runs to completion in one call and never yields. Order:
//!
//! 1. **Deletions** - run every effect cleanup of each deleted subtree, then
//!    detach its outermost host nodes.
//! 2. **Mutations** - pre-order walk: PLACE inserts the fresh node before the
//!    next attached sibling, UPDATE diffs attributes and listeners, and every
//!    fiber's state cells become the committed state.
//! 3. **Effects** - pre-order walk comparing each effect with the same
//!    position of the previous render.
//! 4. **Swap** - the work-in-progress root becomes the committed root and the
//!    previous generation is dropped.
//!
//! Every insertion and removal is checked with `contains` first, so
//! committing an already-applied tree is a no-op on the host.

use std::mem;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::engine::fiber::{FiberId, FiberKind, FiberTree, PatchKind};
use crate::engine::hooks::commit_effects;
use crate::host::{HostSurface, NodeHandle};
use crate::types::{Props, event_name};

/// Counts of what a commit did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub placed: usize,
    pub updated: usize,
    pub deleted: usize,
}

// =============================================================================
// Attribute diff
// =============================================================================

/// Bring a node's attributes and listeners from `old` to `new`.
///
/// Properties missing from `new` are removed, changed ones set. Listeners
/// whose handler identity changed are unbound and rebound.
///
/// # Returns
/// Number of host writes issued.
pub fn apply_props(surface: &mut dyn HostSurface, node: NodeHandle, old: &Props, new: &Props) -> usize {
    let mut writes = 0;

    for (name, old_value) in old {
        let new_value = new.get(name);
        if new_value == Some(old_value) {
            continue;
        }
        match (event_name(name, old_value), old_value.as_handler()) {
            (Some(event), Some(handler)) => {
                surface.unbind_event(node, &event, handler);
                writes += 1;
            }
            _ if new_value.is_none() => {
                surface.remove_attribute(node, name);
                writes += 1;
            }
            _ => {}
        }
    }

    for (name, value) in new {
        if old.get(name) == Some(value) {
            continue;
        }
        match (event_name(name, value), value.as_handler()) {
            (Some(event), Some(handler)) => surface.bind_event(node, &event, handler),
            _ => surface.set_attribute(node, name, value),
        }
        writes += 1;
    }

    writes
}

// =============================================================================
// Commit
// =============================================================================

/// Commit the finished work-in-progress tree.
///
/// Returns `None` if there is no pass, or the pass is not finished.
pub fn commit_root(tree: &mut FiberTree) -> Option<CommitSummary> {
    let root = tree.wip_root?;
    if tree.next_unit.is_some() {
        return None;
    }
    let mut summary = CommitSummary::default();

    let deletions = mem::take(&mut tree.deletions);
    for &id in &deletions {
        commit_deletion(tree, id);
        summary.deleted += 1;
    }

    let order = tree.subtree_preorder(root);
    for &id in &order {
        commit_work(tree, id, &mut summary);
    }

    for &id in &order {
        commit_fiber_effects(tree, id);
    }

    tree.committed_root = Some(root);
    tree.wip_root = None;
    tree.next_unit = None;
    tree.collect_previous_generation();

    debug!(
        placed = summary.placed,
        updated = summary.updated,
        deleted = summary.deleted,
        fibers = tree.len(),
        "commit"
    );
    Some(summary)
}

/// Run the cleanups of a deleted subtree, then detach its host nodes.
fn commit_deletion(tree: &mut FiberTree, id: FiberId) {
    for fiber_id in tree.subtree_preorder(id) {
        if let Some(fiber) = tree.fibers.get_mut(fiber_id) {
            for effect in fiber.effects.iter_mut() {
                effect.clean_up();
            }
        }
    }

    let Some(parent) = tree.nearest_host_parent(id) else { return };
    for node in tree.top_host_nodes(id) {
        if tree.surface.contains(parent, node) {
            tree.surface.remove_child(parent, node);
        }
    }
}

fn commit_work(tree: &mut FiberTree, id: FiberId, summary: &mut CommitSummary) {
    let Some(fiber) = tree.fibers.get(id) else { return };

    match (fiber.patch, fiber.host_node) {
        (PatchKind::Place, Some(node)) => {
            if let Some(parent) = tree.nearest_host_parent(id) {
                if !tree.surface.contains(parent, node) {
                    let anchor = tree.host_anchor(id);
                    trace!(%node, %parent, anchor = ?anchor, "place");
                    tree.surface.insert_child(parent, node, anchor);
                    summary.placed += 1;
                }
            }
        }
        (PatchKind::Update, Some(node)) => {
            let old_props = fiber
                .alternate
                .and_then(|alt| tree.fibers.get(alt))
                .map(|alt| alt.props.clone());
            if let Some(old_props) = old_props {
                if !Rc::ptr_eq(&old_props, &fiber.props) {
                    let new_props = fiber.props.clone();
                    if apply_props(tree.surface.as_mut(), node, &old_props, &new_props) > 0 {
                        summary.updated += 1;
                    }
                }
            }
        }
        _ => {}
    }

    if let Some(fiber) = tree.fibers.get(id) {
        for hook in &fiber.hooks {
            hook.commit();
        }
    }
}

fn commit_fiber_effects(tree: &mut FiberTree, id: FiberId) {
    let Some(fiber) = tree.fibers.get(id) else { return };
    if !matches!(fiber.kind, FiberKind::Component(_)) {
        return;
    }

    let previous = fiber
        .alternate
        .and_then(|alt| tree.fibers.get_mut(alt))
        .map(|alt| mem::take(&mut alt.effects))
        .unwrap_or_default();

    if let Some(fiber) = tree.fibers.get_mut(id) {
        if fiber.effects.is_empty() && previous.is_empty() {
            return;
        }
        let component = fiber.kind.label();
        commit_effects(&mut fiber.effects, previous, component);
    }
}

// =============================================================================
// Tests
// =============================================================================
