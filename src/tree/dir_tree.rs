use crate::store::ObjectRecord;
use crate::tree::error::TreeError;
use crate::tree::node::{NodeId, NodeKind, TreeNode};
use crate::tree::{join_segments, segments};

struct Slot {
    generation: u32,
    node: Option<TreeNode>,
}

/// What an accepted ingest did to the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestEffect {
    Created,
    /// Same key seen again; aggregates moved by the size difference only.
    Replaced { old_size: u64 },
    /// A `dir/` marker object, recorded on its directory.
    Marker,
}

/// A file removed by a confirmed deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Removed {
    pub size: u64,
    pub count: u64,
}

/// Arena-owned directory tree with bottom-up size and count aggregates.
pub struct DirTree {
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: NodeId,
}

impl Default for DirTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DirTree {
    pub fn new() -> Self {
        let mut tree = Self {
            slots: Vec::new(),
            free: Vec::new(),
            root: NodeId { index: 0, generation: 0 },
        };
        tree.root = tree.alloc(TreeNode::new("/", NodeKind::BucketRoot, None));
        tree
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn get(&self, id: NodeId) -> Option<&TreeNode> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut TreeNode> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    /// Number of live nodes, root included.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.get(self.root).map_or(true, |root| root.children.is_empty())
    }

    fn alloc(&mut self, node: TreeNode) -> NodeId {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.node = Some(node);
                NodeId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                NodeId {
                    index: (self.slots.len() - 1) as u32,
                    generation: 0,
                }
            }
        }
    }

    fn release(&mut self, id: NodeId) -> Option<TreeNode> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Some(node)
    }

    /// Find a node by `/`-separated path relative to the bucket root.
    pub fn find(&self, path: &str) -> Option<NodeId> {
        let mut current = self.root;
        for segment in segments(path) {
            current = self.get(current)?.child(segment)?;
        }
        Some(current)
    }

    /// Find a node by its segment names, empty names included.
    pub fn find_segments<S: AsRef<str>>(&self, parts: &[S]) -> Option<NodeId> {
        let mut current = self.root;
        for segment in parts {
            current = self.get(current)?.child(segment.as_ref())?;
        }
        Some(current)
    }

    /// Display path of a node, `""` for the root. `find` maps it back to
    /// the same node.
    pub fn path_of(&self, id: NodeId) -> String {
        join_segments(&self.names_of(id))
    }

    /// Listing prefix that covers everything under a directory, `""` for root.
    pub fn prefix_of(&self, id: NodeId) -> String {
        let names = self.names_of(id);
        if names.is_empty() {
            String::new()
        } else {
            format!("{}/", names.join("/"))
        }
    }

    fn names_of(&self, id: NodeId) -> Vec<&str> {
        let mut parts = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let Some(node) = self.get(current) else { break };
            if node.kind == NodeKind::BucketRoot {
                break;
            }
            parts.push(node.name.as_str());
            cursor = node.parent;
        }
        parts.reverse();
        parts
    }

    pub fn children(&self, id: NodeId) -> impl Iterator<Item = (NodeId, &TreeNode)> + '_ {
        self.get(id)
            .into_iter()
            .flat_map(|node| node.children.values())
            .filter_map(move |child| self.get(*child).map(|node| (*child, node)))
    }

    /// Walk `parts` from the root, checking that every existing node on the
    /// way can act as a directory. Nothing is mutated.
    fn check_dir_chain(&self, parts: &[&str]) -> Result<(), TreeError> {
        let mut current = self.root;
        for (depth, part) in parts.iter().enumerate() {
            let Some(child) = self.get(current).and_then(|n| n.child(part)) else {
                return Ok(());
            };
            let kind = self.get(child).map(|n| n.kind).unwrap_or(NodeKind::Directory);
            if kind == NodeKind::File {
                return Err(TreeError::KindMismatch {
                    path: join_segments(&parts[..=depth]),
                    expected: NodeKind::Directory,
                    found: kind,
                });
            }
            current = child;
        }
        Ok(())
    }

    /// Create missing directories along `parts`. Error leaves on the way are
    /// turned into directories since the location turned out to be listable.
    /// Caller must have run `check_dir_chain`.
    fn create_dir_chain(&mut self, parts: &[&str]) -> NodeId {
        let mut current = self.root;
        for part in parts {
            let existing = self.get(current).and_then(|n| n.child(part));
            current = match existing {
                Some(child) => {
                    if let Some(node) = self.node_mut(child) {
                        if node.kind == NodeKind::ScanErrorLeaf {
                            node.kind = NodeKind::Directory;
                            node.key = None;
                        }
                    }
                    child
                }
                None => self.attach(current, TreeNode::new(part, NodeKind::Directory, Some(current))),
            };
        }
        current
    }

    fn attach(&mut self, parent: NodeId, node: TreeNode) -> NodeId {
        let name = node.name.clone();
        let id = self.alloc(node);
        if let Some(parent_node) = self.node_mut(parent) {
            parent_node.children.insert(name, id);
            parent_node.version += 1;
        }
        id
    }

    /// Push a size/count delta from `from` up to the root, bumping versions.
    fn propagate(&mut self, from: NodeId, size_delta: i64, count_delta: i64) {
        let mut cursor = Some(from);
        while let Some(id) = cursor {
            let Some(node) = self.node_mut(id) else { break };
            node.aggregate_size = node.aggregate_size.saturating_add_signed(size_delta);
            node.aggregate_count = node.aggregate_count.saturating_add_signed(count_delta);
            node.version += 1;
            cursor = node.parent;
        }
    }

    /// Upsert one listed object.
    pub fn ingest(&mut self, record: &ObjectRecord) -> Result<IngestEffect, TreeError> {
        if record.is_dir_marker() {
            let dir = self.ensure_dir(&record.key)?;
            if let Some(node) = self.node_mut(dir) {
                if node.kind == NodeKind::Directory {
                    node.marker = Some(record.key.clone());
                }
            }
            return Ok(IngestEffect::Marker);
        }

        let parts: Vec<&str> = segments(&record.key).collect();
        let Some((leaf, dirs)) = parts.split_last() else {
            return Err(TreeError::EmptyKey {
                key: record.key.clone(),
            });
        };
        self.check_dir_chain(dirs)?;

        // Validate the leaf before touching anything
        let parent_lookup = self.find_segments(dirs);
        let existing = parent_lookup
            .and_then(|p| self.get(p))
            .and_then(|p| p.child(leaf))
            .and_then(|id| self.get(id).map(|n| (id, n.kind, n.size)));
        if let Some((_, kind, _)) = existing {
            if kind.is_dir() {
                return Err(TreeError::KindMismatch {
                    path: join_segments(&parts),
                    expected: NodeKind::File,
                    found: kind,
                });
            }
        }

        let parent = self.create_dir_chain(dirs);
        let size = record.size;
        match existing {
            Some((id, NodeKind::File, old_size)) => {
                if let Some(node) = self.node_mut(id) {
                    node.size = size;
                    node.aggregate_size = size;
                    node.key = Some(record.key.clone());
                    node.last_modified = record.last_modified;
                }
                let delta = size as i64 - old_size as i64;
                if delta != 0 {
                    self.propagate(parent, delta, 0);
                }
                Ok(IngestEffect::Replaced { old_size })
            }
            Some((id, _, _)) => {
                // Error leaf replaced by the real object; it counted zero
                if let Some(node) = self.node_mut(id) {
                    node.kind = NodeKind::File;
                    node.size = size;
                    node.aggregate_size = size;
                    node.aggregate_count = 1;
                    node.key = Some(record.key.clone());
                    node.scan_error = None;
                    node.last_modified = record.last_modified;
                }
                self.propagate(parent, size as i64, 1);
                Ok(IngestEffect::Created)
            }
            None => {
                let mut node = TreeNode::new(leaf, NodeKind::File, Some(parent));
                node.size = size;
                node.aggregate_size = size;
                node.aggregate_count = 1;
                node.key = Some(record.key.clone());
                node.last_modified = record.last_modified;
                self.attach(parent, node);
                self.propagate(parent, size as i64, 1);
                Ok(IngestEffect::Created)
            }
        }
    }

    /// Make sure a directory exists for a discovered common prefix.
    pub fn ensure_dir(&mut self, prefix: &str) -> Result<NodeId, TreeError> {
        let parts: Vec<&str> = segments(prefix).collect();
        self.check_dir_chain(&parts)?;
        Ok(self.create_dir_chain(&parts))
    }

    /// Record that listing `prefix` failed for good.
    ///
    /// A `/`-terminated prefix marks its directory position: an absent or
    /// childless directory becomes a scan error leaf, one that already has
    /// children keeps them and carries the error. A character-split prefix
    /// (`logs/a`) gets a `a*` leaf in its parent directory.
    pub fn mark_scan_failed(&mut self, prefix: &str, reason: &str) -> Result<NodeId, TreeError> {
        let (dir_part, stem) = match prefix.rfind('/') {
            Some(pos) => (&prefix[..=pos], &prefix[pos + 1..]),
            None => ("", prefix),
        };

        if stem.is_empty() {
            let parts: Vec<&str> = segments(dir_part).collect();
            let Some((leaf, dirs)) = parts.split_last() else {
                // The bucket root itself could not be listed
                let root = self.root;
                if let Some(node) = self.node_mut(root) {
                    node.scan_error = Some(reason.to_string());
                }
                return Ok(root);
            };
            return self.place_error_leaf(dirs, leaf, prefix, reason);
        }

        let parts: Vec<&str> = segments(dir_part).collect();
        let name = format!("{}*", stem);
        self.place_error_leaf(&parts, &name, prefix, reason)
    }

    fn place_error_leaf(
        &mut self,
        dirs: &[&str],
        name: &str,
        prefix: &str,
        reason: &str,
    ) -> Result<NodeId, TreeError> {
        self.check_dir_chain(dirs)?;
        let parent_lookup = self.find_segments(dirs);
        let existing = parent_lookup
            .and_then(|p| self.get(p))
            .and_then(|p| p.child(name))
            .and_then(|id| self.get(id).map(|n| (id, n.kind, n.children.is_empty())));

        match existing {
            Some((id, NodeKind::File, _)) => Err(TreeError::KindMismatch {
                path: self.path_of(id),
                expected: NodeKind::Directory,
                found: NodeKind::File,
            }),
            Some((id, NodeKind::Directory, false)) => {
                if let Some(node) = self.node_mut(id) {
                    node.scan_error = Some(reason.to_string());
                }
                Ok(id)
            }
            Some((id, _, _)) => {
                // The leaf's listing prefix covers the marker key, a rescan records it again
                let parent = self.create_dir_chain(dirs);
                if let Some(node) = self.node_mut(id) {
                    node.kind = NodeKind::ScanErrorLeaf;
                    node.key = Some(prefix.to_string());
                    node.marker = None;
                    node.scan_error = Some(reason.to_string());
                }
                if let Some(parent_node) = self.node_mut(parent) {
                    parent_node.version += 1;
                }
                Ok(id)
            }
            None => {
                let parent = self.create_dir_chain(dirs);
                let mut node = TreeNode::new(name, NodeKind::ScanErrorLeaf, Some(parent));
                node.key = Some(prefix.to_string());
                node.scan_error = Some(reason.to_string());
                Ok(self.attach(parent, node))
            }
        }
    }

    /// Remove the object `key` after the store confirmed its deletion, then
    /// collapse directories it left empty. Keys not in the tree return `None`.
    pub fn remove_object(&mut self, key: &str) -> Option<Removed> {
        if key.ends_with('/') {
            let dir = self.find(key)?;
            let node = self.node_mut(dir)?;
            if node.marker.as_deref() != Some(key) {
                return None;
            }
            node.marker = None;
            self.collapse_from(dir);
            return Some(Removed { size: 0, count: 0 });
        }

        let id = self.find(key)?;
        let node = self.get(id)?;
        if node.kind != NodeKind::File || node.key.as_deref() != Some(key) {
            return None;
        }
        let parent = node.parent?;
        let removed = Removed {
            size: node.aggregate_size,
            count: node.aggregate_count,
        };
        self.detach(id);
        self.propagate(parent, -(removed.size as i64), -(removed.count as i64));
        self.collapse_from(parent);
        Some(removed)
    }

    /// Flag a file whose delete the store refused. Returns false for unknown keys.
    pub fn mark_delete_failed(&mut self, key: &str, reason: &str) -> bool {
        let target = if key.ends_with('/') {
            self.find(key).filter(|id| self.get(*id).and_then(|n| n.marker.as_deref()) == Some(key))
        } else {
            self.find(key).filter(|id| self.get(*id).and_then(|n| n.key.as_deref()) == Some(key))
        };
        let Some(id) = target else { return false };
        let parent = self.get(id).and_then(|n| n.parent);
        if let Some(node) = self.node_mut(id) {
            node.delete_failed = Some(reason.to_string());
        }
        if let Some(parent) = parent {
            if let Some(parent_node) = self.node_mut(parent) {
                parent_node.version += 1;
            }
        }
        true
    }

    /// Drop everything below `id` ahead of a rescan. An error leaf is removed
    /// itself so the rescan can recreate the location. Returns what was dropped.
    pub fn clear_subtree(&mut self, id: NodeId) -> Removed {
        let Some(node) = self.get(id) else {
            return Removed { size: 0, count: 0 };
        };
        let removed = Removed {
            size: node.aggregate_size,
            count: node.aggregate_count,
        };
        match node.kind {
            NodeKind::ScanErrorLeaf | NodeKind::File => {
                let parent = node.parent;
                self.detach(id);
                if let Some(parent) = parent {
                    self.propagate(parent, -(removed.size as i64), -(removed.count as i64));
                }
            }
            NodeKind::Directory | NodeKind::BucketRoot => {
                let children: Vec<NodeId> = node.children.values().copied().collect();
                for child in children {
                    self.free_recursive(child);
                }
                let mut parent = None;
                if let Some(node) = self.node_mut(id) {
                    node.children.clear();
                    node.scan_error = None;
                    node.aggregate_size = 0;
                    node.aggregate_count = 0;
                    node.version += 1;
                    parent = node.parent;
                }
                if let Some(parent) = parent {
                    self.propagate(parent, -(removed.size as i64), -(removed.count as i64));
                }
            }
        }
        removed
    }

    /// Remove `id` and everything below it, then collapse emptied ancestors.
    /// The root cannot be removed.
    pub fn remove_subtree(&mut self, id: NodeId) -> Option<Removed> {
        let node = self.get(id)?;
        let parent = node.parent?;
        let removed = Removed {
            size: node.aggregate_size,
            count: node.aggregate_count,
        };
        self.detach(id);
        self.propagate(parent, -(removed.size as i64), -(removed.count as i64));
        self.collapse_from(parent);
        Some(removed)
    }

    /// Unlink `id` from its parent and free it with all descendants.
    fn detach(&mut self, id: NodeId) {
        let Some(node) = self.get(id) else { return };
        let name = node.name.clone();
        if let Some(parent) = node.parent {
            if let Some(parent_node) = self.node_mut(parent) {
                parent_node.children.remove(&name);
                parent_node.version += 1;
            }
        }
        self.free_recursive(id);
    }

    fn free_recursive(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.release(current) {
                stack.extend(node.children.into_values());
            }
        }
    }

    /// Remove empty, markerless directories from `start` upward, stopping
    /// below the root.
    fn collapse_from(&mut self, start: NodeId) {
        let mut cursor = start;
        loop {
            let Some(node) = self.get(cursor) else { return };
            let collapsible = node.kind == NodeKind::Directory
                && node.children.is_empty()
                && node.marker.is_none()
                && node.scan_error.is_none();
            if !collapsible {
                return;
            }
            let Some(parent) = node.parent else { return };
            self.detach(cursor);
            cursor = parent;
        }
    }

    /// Every object key stored under `id`: file keys plus directory markers.
    /// Error leaves contribute nothing since their contents are unknown.
    pub fn collect_keys(&self, id: NodeId) -> Vec<String> {
        let mut keys = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.get(current) else { continue };
            match node.kind {
                NodeKind::File => keys.extend(node.key.clone()),
                NodeKind::Directory | NodeKind::BucketRoot => {
                    keys.extend(node.marker.clone());
                    stack.extend(node.children.values().copied());
                }
                NodeKind::ScanErrorLeaf => {}
            }
        }
        keys
    }

    /// True if any error leaf or flagged directory sits at or below `id`.
    pub fn has_scan_errors(&self, id: NodeId) -> bool {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.get(current) else { continue };
            if node.scan_error.is_some() {
                return true;
            }
            stack.extend(node.children.values().copied());
        }
        false
    }

    /// Verify every structural and aggregate invariant of the whole tree.
    pub fn check_invariants(&self) -> Result<(), TreeError> {
        let root = self.get(self.root).ok_or(TreeError::BadRoot)?;
        if root.kind != NodeKind::BucketRoot || root.parent.is_some() {
            return Err(TreeError::BadRoot);
        }
        // Post-order over an explicit stack so deep trees cannot overflow
        let mut stack = vec![(self.root, false)];
        while let Some((id, visited)) = stack.pop() {
            let Some(node) = self.get(id) else { continue };
            if !visited {
                stack.push((id, true));
                for child in node.children.values() {
                    stack.push((*child, false));
                }
                continue;
            }
            match node.kind {
                NodeKind::File | NodeKind::ScanErrorLeaf => {
                    if !node.children.is_empty() {
                        return Err(TreeError::LeafWithChildren {
                            path: self.path_of(id),
                            kind: node.kind,
                        });
                    }
                    let (size, count) = if node.kind == NodeKind::File {
                        (node.size, 1)
                    } else {
                        (0, 0)
                    };
                    if node.aggregate_size != size || node.aggregate_count != count {
                        return Err(TreeError::AggregateMismatch {
                            path: self.path_of(id),
                            stored_size: node.aggregate_size,
                            stored_count: node.aggregate_count,
                            expected_size: size,
                            expected_count: count,
                        });
                    }
                }
                NodeKind::Directory | NodeKind::BucketRoot => {
                    let mut size = 0u64;
                    let mut count = 0u64;
                    for (name, child) in &node.children {
                        let child_node = self.get(*child).ok_or_else(|| TreeError::BrokenParentLink {
                            path: format!("{}/{}", self.path_of(id), name),
                        })?;
                        if child_node.parent != Some(id) || &child_node.name != name {
                            return Err(TreeError::BrokenParentLink {
                                path: self.path_of(*child),
                            });
                        }
                        size += child_node.aggregate_size;
                        count += child_node.aggregate_count;
                    }
                    if node.aggregate_size != size || node.aggregate_count != count {
                        return Err(TreeError::AggregateMismatch {
                            path: self.path_of(id),
                            stored_size: node.aggregate_size,
                            stored_count: node.aggregate_count,
                            expected_size: size,
                            expected_count: count,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}
