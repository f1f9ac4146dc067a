use std::sync::{Arc, PoisonError, RwLock};

use crate::store::ObjectRecord;
use crate::tree::dir_tree::{DirTree, IngestEffect};
use crate::tree::error::TreeError;
use crate::tree::node::{NodeId, NodeSummary};
use crate::tree::sort::{SortIndex, SortMode};

/// Result of ingesting one listing page.
#[derive(Debug, Default)]
pub struct IngestSummary {
    /// Objects newly added (markers and replacements excluded).
    pub created: u64,
    /// Net byte change across the page.
    pub bytes_added: i64,
    pub violations: Vec<TreeError>,
}

struct Inner {
    tree: RwLock<DirTree>,
    sort: SortIndex,
}

/// The single owner of the directory tree.
///
/// All shape changes and aggregate propagation happen under one write lock.
/// Readers get copied [`NodeSummary`] values and never hold the lock beyond
/// the call.
#[derive(Clone)]
pub struct SharedTree {
    inner: Arc<Inner>,
}

impl Default for SharedTree {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedTree {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                tree: RwLock::new(DirTree::new()),
                sort: SortIndex::new(),
            }),
        }
    }

    /// Run `f` with shared access.
    pub fn read<R>(&self, f: impl FnOnce(&DirTree) -> R) -> R {
        let guard = self.inner.tree.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    /// Run `f` with exclusive access.
    pub(crate) fn write<R>(&self, f: impl FnOnce(&mut DirTree) -> R) -> R {
        let mut guard = self.inner.tree.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    pub fn root(&self) -> NodeId {
        self.read(|tree| tree.root())
    }

    pub fn ingest(&self, record: &ObjectRecord) -> Result<IngestEffect, TreeError> {
        self.write(|tree| tree.ingest(record))
    }

    /// Ingest a whole page under one lock acquisition.
    pub fn ingest_all(&self, records: &[ObjectRecord]) -> IngestSummary {
        self.write(|tree| {
            let mut summary = IngestSummary::default();
            for record in records {
                match tree.ingest(record) {
                    Ok(IngestEffect::Created) => {
                        summary.created += 1;
                        summary.bytes_added += record.size as i64;
                    }
                    Ok(IngestEffect::Replaced { old_size }) => {
                        summary.bytes_added += record.size as i64 - old_size as i64;
                    }
                    Ok(IngestEffect::Marker) => {}
                    Err(err) => summary.violations.push(err),
                }
            }
            summary
        })
    }

    /// Create the directory for a discovered common prefix if absent.
    pub fn discover_prefix(&self, prefix: &str) -> Result<NodeId, TreeError> {
        self.write(|tree| tree.ensure_dir(prefix))
    }

    pub fn mark_scan_failed(&self, prefix: &str, reason: &str) -> Result<NodeId, TreeError> {
        self.write(|tree| tree.mark_scan_failed(prefix, reason))
    }

    pub fn find(&self, path: &str) -> Option<NodeId> {
        self.read(|tree| tree.find(path))
    }

    pub fn summary(&self, id: NodeId) -> Option<NodeSummary> {
        self.read(|tree| tree.get(id).map(|node| node.summary(id)))
    }

    /// Ordered snapshot of a directory's children.
    pub fn children(&self, dir: NodeId, mode: SortMode) -> Vec<NodeSummary> {
        self.read(|tree| {
            self.inner
                .sort
                .children(tree, dir, mode)
                .iter()
                .filter_map(|id| tree.get(*id).map(|node| node.summary(*id)))
                .collect()
        })
    }

    pub fn prune_sort_cache(&self) {
        self.read(|tree| self.inner.sort.prune(tree));
    }

    pub fn sort_index(&self) -> &SortIndex {
        &self.inner.sort
    }

    pub fn check_invariants(&self) -> Result<(), TreeError> {
        self.read(|tree| tree.check_invariants())
    }
}
