//! Virtual directory tree reconstructed from flat object keys.
//!
//! Nodes live in an arena owned by [`DirTree`]; parents are plain
//! [`NodeId`] handles used only to push aggregate deltas upward.
//! [`SharedTree`] is the one lock-guarded owner the scanner and the
//! deletion engine mutate through.

pub mod dir_tree;
pub mod error;
pub mod node;
pub mod shared;
pub mod sort;

pub use dir_tree::{DirTree, IngestEffect, Removed};
pub use error::TreeError;
pub use node::{NodeId, NodeKind, NodeSummary, TreeNode};
pub use shared::{IngestSummary, SharedTree};
pub use sort::{SortIndex, SortMode};

/// Split an object key or a `/`-terminated prefix into path segments.
///
/// A single trailing `/` only terminates a prefix. Every other `/` separates
/// two segments, empty ones included, so `a//b` and `a/b` stay distinct.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    let trimmed = path.strip_suffix('/').unwrap_or(path);
    (!path.is_empty())
        .then(|| trimmed.split('/'))
        .into_iter()
        .flatten()
}

/// Inverse of [`segments`] for a node path: a path whose last segment is
/// empty gets the terminating `/` so it splits back the same way.
pub fn join_segments<S: AsRef<str>>(parts: &[S]) -> String {
    let names: Vec<&str> = parts.iter().map(|part| part.as_ref()).collect();
    let mut joined = names.join("/");
    if parts.last().is_some_and(|last| last.as_ref().is_empty()) {
        joined.push('/');
    }
    joined
}
