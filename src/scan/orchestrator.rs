use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::retry::{with_retry, RetryPolicy};
use crate::scan::coverage::Coverage;
use crate::scan::progress::{ScanProgress, ScanState};
use crate::scan::queue::WorkQueue;
use crate::scan::task::{ScanTask, TaskState};
use crate::store::{ListPage, ObjectRecord, ObjectStore, StoreError};
use crate::tree::SharedTree;

pub const DEFAULT_SPLIT_ALPHABET: &str = "0123456789abcdefghijklmnopqrstuvwxyz";

/// Leading characters to split `prefix` on: the alphabet, the characters
/// the first page shows and, when the page is truncated, every ASCII
/// character above the highest one shown.
fn split_chars(alphabet: &str, prefix: &str, page: &ListPage) -> BTreeSet<char> {
    let mut chars: BTreeSet<char> = alphabet.chars().collect();
    let seen: BTreeSet<char> = page
        .entries
        .iter()
        .map(|e| e.key.as_str())
        .chain(page.common_prefixes.iter().map(String::as_str))
        .filter_map(|key| key.strip_prefix(prefix))
        .filter_map(|rest| rest.chars().next())
        .collect();
    if page.is_truncated {
        let above = seen.last().copied().unwrap_or('\0');
        chars.extend((0u8..=0x7f).map(char::from).filter(|&c| c > above));
    }
    chars.extend(seen);
    chars
}

/// Tunables for one scan.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Listing workers.
    pub concurrency: usize,
    /// Fall back to character splitting when the partition root's first
    /// delimited page has fewer common prefixes than this.
    pub split_threshold: usize,
    pub split_alphabet: String,
    pub retry: RetryPolicy,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            concurrency: 16,
            split_threshold: 2,
            split_alphabet: DEFAULT_SPLIT_ALPHABET.to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

/// A prefix that could not be listed after all retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanFailure {
    pub prefix: String,
    pub error: StoreError,
}

#[derive(Debug, Clone)]
pub struct ScanSummary {
    pub root: String,
    pub state: ScanState,
    pub objects: u64,
    pub bytes: u64,
    pub failures: Vec<ScanFailure>,
    /// Tasks left in the queue when the scan was cancelled.
    pub abandoned: usize,
}

/// A scan running in the background.
pub struct ScanHandle {
    progress: Arc<ScanProgress>,
    cancel: CancellationToken,
    join: JoinHandle<ScanSummary>,
}

impl ScanHandle {
    pub fn progress(&self) -> &Arc<ScanProgress> {
        &self.progress
    }

    /// Ask workers to stop. Whatever is already in the tree stays valid.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub async fn wait(self) -> ScanSummary {
        match self.join.await {
            Ok(summary) => summary,
            Err(err) => {
                tracing::error!(error = %err, "scan task panicked or was aborted");
                self.progress.finish(ScanState::Cancelled);
                let snap = self.progress.snapshot();
                ScanSummary {
                    root: String::new(),
                    state: ScanState::Cancelled,
                    objects: snap.objects,
                    bytes: snap.bytes,
                    failures: Vec::new(),
                    abandoned: snap.outstanding,
                }
            }
        }
    }
}

/// Everything a worker needs, shared across the pool.
struct ScanContext {
    store: Arc<dyn ObjectStore>,
    tree: SharedTree,
    coverage: Arc<Coverage>,
    options: ScanOptions,
    queue: WorkQueue,
    progress: Arc<ScanProgress>,
    cancel: CancellationToken,
    failures: Mutex<Vec<ScanFailure>>,
}

/// Discovers the bucket namespace and feeds it into the tree.
#[derive(Clone)]
pub struct Scanner {
    store: Arc<dyn ObjectStore>,
    tree: SharedTree,
    coverage: Arc<Coverage>,
    options: ScanOptions,
}

impl Scanner {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        tree: SharedTree,
        coverage: Arc<Coverage>,
        options: ScanOptions,
    ) -> Self {
        Self {
            store,
            tree,
            coverage,
            options,
        }
    }

    pub fn tree(&self) -> &SharedTree {
        &self.tree
    }

    pub fn coverage(&self) -> &Arc<Coverage> {
        &self.coverage
    }

    /// Start scanning `root_prefix` on the runtime.
    pub fn spawn(&self, root_prefix: &str) -> ScanHandle {
        let progress = Arc::new(ScanProgress::new());
        let cancel = CancellationToken::new();
        let scanner = self.clone();
        let root = root_prefix.to_string();
        let join = {
            let progress = Arc::clone(&progress);
            let cancel = cancel.clone();
            tokio::spawn(async move { scanner.scan(&root, progress, cancel).await })
        };
        ScanHandle {
            progress,
            cancel,
            join,
        }
    }

    /// Drop what the tree holds under a directory prefix and scan it again.
    pub async fn refresh(&self, prefix: &str) -> ScanSummary {
        self.clear(prefix);
        self.scan(prefix, Arc::new(ScanProgress::new()), CancellationToken::new())
            .await
    }

    /// Background form of [`Scanner::refresh`].
    pub fn spawn_refresh(&self, prefix: &str) -> ScanHandle {
        self.clear(prefix);
        self.spawn(prefix)
    }

    fn clear(&self, prefix: &str) {
        let removed = self.tree.write(|tree| {
            let id = tree.find(prefix)?;
            Some(tree.clear_subtree(id))
        });
        if let Some(removed) = removed {
            tracing::info!(prefix, objects = removed.count, bytes = removed.size, "cleared subtree for rescan");
        }
        self.tree.prune_sort_cache();
    }

    /// Scan `root_prefix` to completion or cancellation.
    pub async fn scan(
        &self,
        root_prefix: &str,
        progress: Arc<ScanProgress>,
        cancel: CancellationToken,
    ) -> ScanSummary {
        let ctx = Arc::new(ScanContext {
            store: Arc::clone(&self.store),
            tree: self.tree.clone(),
            coverage: Arc::clone(&self.coverage),
            options: self.options.clone(),
            queue: WorkQueue::new(Arc::clone(&progress), cancel.clone()),
            progress: Arc::clone(&progress),
            cancel,
            failures: Mutex::new(Vec::new()),
        });

        tracing::info!(
            store = %self.store.display_name(),
            root = root_prefix,
            concurrency = ctx.options.concurrency,
            "scan started"
        );

        ctx.coverage.begin(root_prefix);
        ctx.enqueue(ScanTask::partition_root(root_prefix));

        let mut workers = JoinSet::new();
        for worker in 0..ctx.options.concurrency.max(1) {
            let ctx = Arc::clone(&ctx);
            workers.spawn(async move { ctx.run_worker(worker).await });
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                tracing::error!(error = %err, "scan worker stopped abnormally");
            }
        }

        let abandoned = ctx.queue.drain_pending().len();
        let failures = std::mem::take(&mut *ctx.failures.lock().unwrap_or_else(PoisonError::into_inner));
        let state = if ctx.cancel.is_cancelled() {
            ScanState::Cancelled
        } else if failures.is_empty() {
            ScanState::Complete
        } else {
            ScanState::CompletedWithErrors
        };
        progress.finish(state);

        let snap = progress.snapshot();
        tracing::info!(
            root = root_prefix,
            state = state.label(),
            objects = snap.objects,
            bytes = snap.bytes,
            failed = failures.len(),
            abandoned,
            "scan finished"
        );

        ScanSummary {
            root: root_prefix.to_string(),
            state,
            objects: snap.objects,
            bytes: snap.bytes,
            failures,
            abandoned,
        }
    }
}

impl ScanContext {
    fn enqueue(&self, task: ScanTask) {
        self.coverage.pending(&task.prefix);
        self.progress.task_spawned();
        self.queue.push(task);
    }

    async fn run_worker(&self, worker: usize) {
        while let Some(mut task) = self.queue.next().await {
            task.state = TaskState::InFlight;
            self.process(&mut task).await;
            tracing::debug!(worker, prefix = %task.prefix, state = ?task.state, "task finished");
            self.queue.complete();
        }
    }

    /// Drain one task's pagination, spawning child tasks on the way.
    ///
    /// A cancelled task leaves its state `InFlight` and its prefix unsettled,
    /// and hands its open listing back to the store.
    async fn process(&self, task: &mut ScanTask) {
        let mut first_page = true;
        let start_after = task.start_after();
        loop {
            if self.cancel.is_cancelled() {
                if let Some(token) = task.continuation_token.take() {
                    self.store.release_token(&token).await;
                }
                return;
            }

            let token = task.continuation_token.clone();
            let after = if first_page { start_after.as_deref() } else { None };
            let result = with_retry(&self.options.retry, "list", || {
                self.progress.list_call();
                self.store
                    .list_objects(&task.prefix, Some('/'), after, token.as_deref())
            })
            .await;

            let page = match result {
                Ok(page) => page,
                Err(err) => {
                    self.fail(task, err);
                    return;
                }
            };

            if first_page && task.partition_root && self.should_split(&page) {
                if let Some(only) = Self::single_directory(&page) {
                    // Nothing to split here; the keys live one level down
                    tracing::debug!(prefix = %task.prefix, next = %only, "descending into only directory");
                    self.apply_entries(&page);
                    self.discover(only, true);
                    task.state = TaskState::Done;
                    self.coverage.settle(&task.prefix);
                    self.progress.task_done();
                    return;
                }
                self.split(task, &page);
                task.state = TaskState::Done;
                self.coverage.settle(&task.prefix);
                self.progress.task_done();
                return;
            }
            first_page = false;

            self.apply_page(task, &page);

            match page.next_token {
                Some(next) if page.is_truncated => task.continuation_token = Some(next),
                _ => break,
            }
        }

        task.state = TaskState::Done;
        self.coverage.settle(&task.prefix);
        self.progress.task_done();
    }

    fn should_split(&self, page: &ListPage) -> bool {
        let empty = page.entries.is_empty() && page.common_prefixes.is_empty() && !page.is_truncated;
        !empty && page.common_prefixes.len() < self.options.split_threshold
    }

    /// The one common prefix of a complete page, if it has exactly one.
    fn single_directory(page: &ListPage) -> Option<&str> {
        match page.common_prefixes.as_slice() {
            [only] if !page.is_truncated => Some(only.as_str()),
            _ => None,
        }
    }

    /// Replace the partition root with one task per leading character.
    ///
    /// The first page is dropped; the character tasks list it again. A
    /// complete first page names every leading character there is, so the
    /// alphabet plus what it shows covers the prefix. A truncated one only
    /// rules out characters sorting below the last one it shows: every ASCII
    /// character above that gets a task too, and a tail task lists whatever
    /// starts with a non-ASCII character.
    fn split(&self, task: &ScanTask, page: &ListPage) {
        let mut chars = split_chars(&self.options.split_alphabet, &task.prefix, page);
        let tail = page.is_truncated;
        if tail {
            chars.retain(char::is_ascii);
        }

        tracing::info!(
            prefix = %task.prefix,
            prefixes = page.common_prefixes.len(),
            tasks = chars.len(),
            tail,
            "flat namespace, splitting by leading character"
        );
        // No character task lists the prefix's own marker object
        let marker: Vec<ObjectRecord> = page
            .entries
            .iter()
            .filter(|e| e.key == task.prefix)
            .cloned()
            .collect();
        if !marker.is_empty() {
            self.apply_entries(&ListPage {
                entries: marker,
                ..ListPage::default()
            });
        }
        for c in chars {
            self.enqueue(ScanTask::new(format!("{}{}", task.prefix, c)));
        }
        if tail {
            self.enqueue(ScanTask::tail(task.prefix.clone()));
        }
    }

    fn discover(&self, prefix: &str, partition_root: bool) {
        if let Err(err) = self.tree.discover_prefix(prefix) {
            self.progress.violation();
            tracing::error!(prefix = %prefix, error = %err, "tree invariant violated");
            return;
        }
        self.enqueue(if partition_root {
            ScanTask::partition_root(prefix)
        } else {
            ScanTask::new(prefix)
        });
    }

    fn apply_page(&self, task: &ScanTask, page: &ListPage) {
        if !task.tail {
            self.apply_listing(page);
            return;
        }
        // The tail listing starts inside the range of the DEL character task
        let owned = ListPage {
            entries: page.entries.iter().filter(|e| task.owns(&e.key)).cloned().collect(),
            common_prefixes: page
                .common_prefixes
                .iter()
                .filter(|p| task.owns(p))
                .cloned()
                .collect(),
            next_token: None,
            is_truncated: page.is_truncated,
        };
        self.apply_listing(&owned);
    }

    fn apply_listing(&self, page: &ListPage) {
        for prefix in &page.common_prefixes {
            self.discover(prefix, false);
        }
        self.apply_entries(page);
    }

    fn apply_entries(&self, page: &ListPage) {
        let summary = self.tree.ingest_all(&page.entries);
        self.progress.add_objects(summary.created, summary.bytes_added);
        for err in summary.violations {
            self.progress.violation();
            tracing::error!(error = %err, "tree invariant violated");
        }
        tracing::debug!(
            objects = page.entries.len(),
            prefixes = page.common_prefixes.len(),
            truncated = page.is_truncated,
            "page ingested"
        );
    }

    fn fail(&self, task: &mut ScanTask, err: StoreError) {
        task.state = TaskState::Failed;
        self.progress.task_failed();
        tracing::error!(prefix = %task.prefix, error = %err, "listing failed, marking subtree unknown");
        if let Err(tree_err) = self.tree.mark_scan_failed(&task.prefix, &err.to_string()) {
            self.progress.violation();
            tracing::error!(prefix = %task.prefix, error = %tree_err, "could not place scan error leaf");
        }
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ScanFailure {
                prefix: task.prefix.clone(),
                error: err,
            });
    }
}
