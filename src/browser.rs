//! Read and command API the presentation layer drives.
//!
//! Navigation never mutates the tree. The working directory is kept as path
//! segments so it survives node removal: when a deletion or refresh takes the
//! current directory away, the browser falls back to the deepest ancestor
//! that still exists.

use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::delete::{DeleteError, DeleteOptions, DeleteReport, DeleteSession, DeleteTarget, DeletionEngine};
use crate::scan::{Coverage, ScanHandle, ScanOptions, ScanSnapshot, Scanner};
use crate::store::ObjectStore;
use crate::tree::{segments, DirTree, NodeId, NodeSummary, SharedTree, SortMode};

pub struct Browser {
    tree: SharedTree,
    scanner: Scanner,
    engine: Arc<DeletionEngine>,
    root_prefix: String,
    cwd: Vec<String>,
    sort_mode: SortMode,
    scan: Option<ScanHandle>,
    pending_delete: Option<DeleteSession>,
}

impl Browser {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        root_prefix: &str,
        scan_options: ScanOptions,
        delete_options: DeleteOptions,
    ) -> Self {
        let tree = SharedTree::new();
        let coverage = Arc::new(Coverage::new());
        let scanner = Scanner::new(Arc::clone(&store), tree.clone(), Arc::clone(&coverage), scan_options);
        let engine = Arc::new(DeletionEngine::new(store, tree.clone(), coverage, delete_options));
        Self {
            tree,
            scanner,
            engine,
            root_prefix: root_prefix.to_string(),
            cwd: segments(root_prefix).map(str::to_string).collect(),
            sort_mode: SortMode::default(),
            scan: None,
            pending_delete: None,
        }
    }

    pub fn tree(&self) -> &SharedTree {
        &self.tree
    }

    /// Start the initial scan in the background.
    pub fn start_scan(&mut self) {
        self.scan = Some(self.scanner.spawn(&self.root_prefix));
    }

    pub fn scan_handle(&self) -> Option<&ScanHandle> {
        self.scan.as_ref()
    }

    pub fn take_scan(&mut self) -> Option<ScanHandle> {
        self.scan.take()
    }

    pub fn is_scanning(&self) -> bool {
        self.scan.as_ref().is_some_and(|scan| !scan.is_finished())
    }

    pub fn cancel_scan(&self) {
        if let Some(scan) = &self.scan {
            scan.cancel();
        }
    }

    pub fn progress(&self) -> Option<ScanSnapshot> {
        self.scan.as_ref().map(|scan| scan.progress().snapshot())
    }

    /// Rescan the current directory. Refused while a scan is running.
    pub fn refresh(&mut self) -> bool {
        if self.is_scanning() {
            return false;
        }
        let prefix = self.tree.read(|tree| tree.prefix_of(self.locate(tree)));
        self.scan = Some(self.scanner.spawn_refresh(&prefix));
        true
    }

    /// Ordered children of the directory at `path`. Unknown paths are empty.
    pub fn get_children(&self, path: &str, mode: SortMode) -> Vec<NodeSummary> {
        match self.tree.find(path) {
            Some(id) => self.tree.children(id, mode),
            None => Vec::new(),
        }
    }

    pub fn current_children(&self) -> Vec<NodeSummary> {
        let dir = self.tree.read(|tree| self.locate(tree));
        self.tree.children(dir, self.sort_mode)
    }

    /// Current directory as a path relative to the bucket root.
    pub fn cwd(&self) -> String {
        self.tree.read(|tree| tree.path_of(self.locate(tree)))
    }

    pub fn current_summary(&self) -> Option<NodeSummary> {
        let dir = self.tree.read(|tree| self.locate(tree));
        self.tree.summary(dir)
    }

    /// Descend into `path`, relative to the current directory. Only
    /// directories can be entered.
    pub fn enter(&mut self, path: &str) -> bool {
        let mut target = self.existing_cwd();
        target.extend(segments(path).map(str::to_string));
        let is_dir = self.tree.read(|tree| {
            tree.find_segments(target.as_slice())
                .and_then(|id| tree.get(id))
                .is_some_and(|node| node.kind().is_dir())
        });
        if is_dir {
            self.cwd = target;
        }
        is_dir
    }

    /// Descend into the child directory called `name`. Unlike [`Browser::enter`]
    /// the name is taken as is, so an empty-named directory can be entered.
    pub fn enter_child(&mut self, name: &str) -> bool {
        let mut target = self.existing_cwd();
        target.push(name.to_string());
        let is_dir = self.tree.read(|tree| {
            tree.find_segments(target.as_slice())
                .and_then(|id| tree.get(id))
                .is_some_and(|node| node.kind().is_dir())
        });
        if is_dir {
            self.cwd = target;
        }
        is_dir
    }

    /// Go to the parent. Returns the name of the directory left behind.
    pub fn up(&mut self) -> Option<String> {
        self.cwd = self.existing_cwd();
        self.cwd.pop()
    }

    pub fn sort_mode(&self) -> SortMode {
        self.sort_mode
    }

    pub fn set_sort_mode(&mut self, mode: SortMode) {
        self.sort_mode = mode;
    }

    pub fn toggle_sort(&mut self) -> SortMode {
        self.sort_mode = self.sort_mode.toggle();
        self.sort_mode
    }

    /// Root aggregate size and object count.
    pub fn totals(&self) -> (u64, u64) {
        self.tree
            .summary(self.tree.root())
            .map_or((0, 0), |root| (root.size, root.count))
    }

    /// Select a child of the current directory for deletion.
    pub fn request_delete(&mut self, name: &str) -> Result<&DeleteTarget, DeleteError> {
        let id = self
            .tree
            .read(|tree| tree.get(self.locate(tree)).and_then(|dir| dir.child(name)))
            .ok_or(DeleteError::NodeGone)?;
        self.request_delete_id(id)
    }

    pub fn request_delete_id(&mut self, id: NodeId) -> Result<&DeleteTarget, DeleteError> {
        if let Some(mut previous) = self.pending_delete.take() {
            self.engine.cancel(&mut previous)?;
        }
        let session = self.engine.request(id)?;
        Ok(self.pending_delete.insert(session).target())
    }

    pub fn pending_delete(&self) -> Option<&DeleteTarget> {
        self.pending_delete.as_ref().map(DeleteSession::target)
    }

    pub fn cancel_delete(&mut self) -> Result<(), DeleteError> {
        match self.pending_delete.take() {
            Some(mut session) => self.engine.cancel(&mut session),
            None => Ok(()),
        }
    }

    /// Run the pending deletion in the background.
    pub fn confirm_delete(&mut self) -> Option<JoinHandle<Result<DeleteReport, DeleteError>>> {
        let mut session = self.pending_delete.take()?;
        let engine = Arc::clone(&self.engine);
        Some(tokio::spawn(async move { engine.confirm(&mut session).await }))
    }

    /// Longest prefix of `cwd` that still resolves to a directory.
    fn existing_cwd(&self) -> Vec<String> {
        self.tree.read(|tree| {
            let mut current = tree.root();
            let mut depth = 0;
            for segment in &self.cwd {
                match tree.get(current).and_then(|node| node.child(segment)) {
                    Some(child) if tree.get(child).is_some_and(|node| node.kind().is_dir()) => {
                        current = child;
                        depth += 1;
                    }
                    _ => break,
                }
            }
            self.cwd[..depth].to_vec()
        })
    }

    fn locate(&self, tree: &DirTree) -> NodeId {
        let mut current = tree.root();
        for segment in &self.cwd {
            match tree.get(current).and_then(|node| node.child(segment)) {
                Some(child) if tree.get(child).is_some_and(|node| node.kind().is_dir()) => current = child,
                _ => break,
            }
        }
        current
    }
}
