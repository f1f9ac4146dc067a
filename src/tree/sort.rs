//! Per-directory child ordering, cached until the directory changes.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::tree::dir_tree::DirTree;
use crate::tree::node::{NodeId, TreeNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortMode {
    /// Largest first, equal sizes by name.
    #[default]
    SizeDesc,
    NameAsc,
}

impl SortMode {
    pub fn toggle(self) -> Self {
        match self {
            SortMode::SizeDesc => SortMode::NameAsc,
            SortMode::NameAsc => SortMode::SizeDesc,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SortMode::SizeDesc => "size",
            SortMode::NameAsc => "name",
        }
    }

    fn compare(&self, a: &TreeNode, b: &TreeNode) -> Ordering {
        match self {
            SortMode::SizeDesc => b
                .aggregate_size
                .cmp(&a.aggregate_size)
                .then_with(|| a.name.cmp(&b.name)),
            SortMode::NameAsc => a
                .name
                .to_lowercase()
                .cmp(&b.name.to_lowercase())
                .then_with(|| a.name.cmp(&b.name)),
        }
    }
}

struct CachedOrder {
    version: u64,
    order: Arc<[NodeId]>,
}

/// Read-side cache of sorted child lists.
///
/// An entry is valid while its directory's version matches, so any mutation
/// to the child set or to a child's aggregate invalidates it implicitly.
#[derive(Default)]
pub struct SortIndex {
    cache: Mutex<HashMap<(NodeId, SortMode), CachedOrder>>,
    recomputed: AtomicU64,
}

impl SortIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ordered children of `dir`, recomputed only if `dir` changed.
    pub fn children(&self, tree: &DirTree, dir: NodeId, mode: SortMode) -> Arc<[NodeId]> {
        let Some(node) = tree.get(dir) else {
            return Arc::from(Vec::new());
        };
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cached) = cache.get(&(dir, mode)) {
            if cached.version == node.version {
                return Arc::clone(&cached.order);
            }
        }

        let mut entries: Vec<(NodeId, &TreeNode)> = tree.children(dir).collect();
        entries.sort_by(|(_, a), (_, b)| mode.compare(a, b));
        let order: Arc<[NodeId]> = entries.into_iter().map(|(id, _)| id).collect();
        self.recomputed.fetch_add(1, AtomicOrdering::Relaxed);
        cache.insert(
            (dir, mode),
            CachedOrder {
                version: node.version,
                order: Arc::clone(&order),
            },
        );
        order
    }

    /// Forget cached orders of directories that no longer exist.
    pub fn prune(&self, tree: &DirTree) {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache.retain(|(id, _), _| tree.get(*id).is_some());
    }

    /// How many times an order was (re)computed. Used to observe caching.
    pub fn recomputations(&self) -> u64 {
        self.recomputed.load(AtomicOrdering::Relaxed)
    }
}
