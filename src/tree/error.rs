use thiserror::Error;

use crate::tree::node::NodeKind;

/// A tree invariant breach. These are programmer or data-shape errors and
/// abort the single mutation that hit them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("object key has no path segments: {key:?}")]
    EmptyKey { key: String },

    #[error("{path}: cannot treat {found:?} node as {expected:?}")]
    KindMismatch {
        path: String,
        expected: NodeKind,
        found: NodeKind,
    },

    #[error("{path}: aggregate {stored_size} B / {stored_count} objects, children sum to {expected_size} B / {expected_count}")]
    AggregateMismatch {
        path: String,
        stored_size: u64,
        stored_count: u64,
        expected_size: u64,
        expected_count: u64,
    },

    #[error("{path}: {kind:?} node has children")]
    LeafWithChildren { path: String, kind: NodeKind },

    #[error("{path}: parent link does not point back to the owning directory")]
    BrokenParentLink { path: String },

    #[error("root node must be a bucket root without a parent")]
    BadRoot,
}
