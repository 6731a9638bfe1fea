//! Commit Pipeline
//!
//! Everything that happens after a render pass finishes: applying patches to
//! the host surface, running effects, and the mount lifecycle around it.
//!
//! # Pipeline Architecture
//!
//! ```text
//! finished work-in-progress tree
//!   → deletions (cleanups, detach)
//!   → placements + attribute diffs + state commit
//!   → effects
//!   → swap committed root, drop previous generation
//! ```
//!
//! ## Key Design Principles
//!
//! - **Atomic**: a commit never yields; partial host states are never visible
//! - **Idempotent**: insertions and removals are `contains`-checked
//! - **Deferred side effects**: effects only run once the host is up to date

pub mod commit;
pub mod mount;

pub use commit::{CommitSummary, apply_props, commit_root};
pub use mount::{MountHandle, mount};
