use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Handle into the [`DirTree`](crate::tree::DirTree) arena.
///
/// The generation makes handles to freed slots resolve to nothing instead of
/// to whichever node reused the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    BucketRoot,
    Directory,
    File,
    /// A location whose contents could not be listed. Size unknown, not zero.
    ScanErrorLeaf,
}

impl NodeKind {
    pub fn is_dir(&self) -> bool {
        matches!(self, NodeKind::BucketRoot | NodeKind::Directory)
    }
}

#[derive(Debug, Clone)]
pub struct TreeNode {
    pub(crate) name: String,
    pub(crate) kind: NodeKind,
    /// Own size, files only.
    pub(crate) size: u64,
    pub(crate) aggregate_size: u64,
    pub(crate) aggregate_count: u64,
    pub(crate) children: HashMap<String, NodeId>,
    pub(crate) parent: Option<NodeId>,
    /// Full object key for files, failed listing prefix for error leaves.
    pub(crate) key: Option<String>,
    /// Key of the `dir/` marker object, if the store has one.
    pub(crate) marker: Option<String>,
    pub(crate) last_modified: Option<DateTime<Utc>>,
    pub(crate) delete_failed: Option<String>,
    pub(crate) scan_error: Option<String>,
    /// Bumped whenever the child set or a child's aggregate changes.
    pub(crate) version: u64,
}

impl TreeNode {
    pub(crate) fn new(name: &str, kind: NodeKind, parent: Option<NodeId>) -> Self {
        Self {
            name: name.to_string(),
            kind,
            size: 0,
            aggregate_size: 0,
            aggregate_count: 0,
            children: HashMap::new(),
            parent,
            key: None,
            marker: None,
            last_modified: None,
            delete_failed: None,
            scan_error: None,
            version: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn aggregate_size(&self) -> u64 {
        self.aggregate_size
    }

    pub fn aggregate_count(&self) -> u64 {
        self.aggregate_count
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn marker(&self) -> Option<&str> {
        self.marker.as_deref()
    }

    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.last_modified
    }

    pub fn delete_failed(&self) -> Option<&str> {
        self.delete_failed.as_deref()
    }

    pub fn scan_error(&self) -> Option<&str> {
        self.scan_error.as_deref()
    }

    pub fn child(&self, name: &str) -> Option<NodeId> {
        self.children.get(name).copied()
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn summary(&self, id: NodeId) -> NodeSummary {
        NodeSummary {
            id,
            name: self.name.clone(),
            kind: self.kind,
            size: self.aggregate_size,
            count: self.aggregate_count,
            delete_failed: self.delete_failed.clone(),
            scan_error: self.scan_error.clone(),
        }
    }
}

/// Read-side copy of one node, safe to hold after the tree lock is released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSummary {
    pub id: NodeId,
    pub name: String,
    pub kind: NodeKind,
    pub size: u64,
    pub count: u64,
    pub delete_failed: Option<String>,
    pub scan_error: Option<String>,
}

impl NodeSummary {
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    /// Size column text. Error leaves have no known size.
    pub fn format_size(&self) -> String {
        match self.kind {
            NodeKind::ScanErrorLeaf => "?".to_string(),
            _ => humansize::format_size(self.size, humansize::BINARY),
        }
    }
}
