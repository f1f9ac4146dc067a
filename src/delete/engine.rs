use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;

use crate::delete::batch::{chunk_keys, BatchState, DeletionBatch};
use crate::delete::error::DeleteError;
use crate::delete::session::{DeleteSession, DeleteState, DeleteTarget, SubtreeLocks};
use crate::retry::{with_retry, RetryPolicy};
use crate::scan::Coverage;
use crate::store::{DeleteOutcome, ObjectStore, MAX_DELETE_BATCH};
use crate::tree::{NodeId, NodeKind, SharedTree};

#[derive(Debug, Clone)]
pub struct DeleteOptions {
    /// Batches in flight at once. Kept below the scan pool.
    pub concurrency: usize,
    pub batch_size: usize,
    pub retry: RetryPolicy,
}

impl Default for DeleteOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            batch_size: MAX_DELETE_BATCH,
            retry: RetryPolicy::default(),
        }
    }
}

/// Where the resolved key set came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    Tree,
    /// Flat listing of the store, used when the subtree is not fully known.
    Listing,
}

/// What a finished deletion did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteReport {
    pub path: String,
    pub state: DeleteState,
    pub source: KeySource,
    pub requested: usize,
    pub deleted: usize,
    pub deleted_bytes: u64,
    /// Keys the store did not remove, with the reason it gave.
    pub failed: Vec<(String, String)>,
    pub batches: usize,
}

impl DeleteReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn describe(&self) -> String {
        if self.is_success() {
            format!(
                "Deleted {} objects ({}) from {}",
                self.deleted,
                humansize::format_size(self.deleted_bytes, humansize::BINARY),
                display_path(&self.path)
            )
        } else {
            format!(
                "Deleted {} of {} objects from {}, {} failed",
                self.deleted,
                self.requested,
                display_path(&self.path),
                self.failed.len()
            )
        }
    }
}

fn display_path(path: &str) -> String {
    format!("/{}", path)
}

/// Totals from applying one batch of outcomes to the tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Applied {
    pub deleted: usize,
    pub bytes: u64,
    pub failed: usize,
}

pub struct DeletionEngine {
    store: Arc<dyn ObjectStore>,
    tree: SharedTree,
    coverage: Arc<Coverage>,
    locks: SubtreeLocks,
    options: DeleteOptions,
}

impl DeletionEngine {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        tree: SharedTree,
        coverage: Arc<Coverage>,
        options: DeleteOptions,
    ) -> Self {
        Self {
            store,
            tree,
            coverage,
            locks: SubtreeLocks::new(),
            options,
        }
    }

    pub fn locks(&self) -> &SubtreeLocks {
        &self.locks
    }

    /// Capture `id` as a deletion target and wait for confirmation.
    pub fn request(&self, id: NodeId) -> Result<DeleteSession, DeleteError> {
        let target = self.tree.read(|tree| -> Result<DeleteTarget, DeleteError> {
            let node = tree.get(id).ok_or(DeleteError::NodeGone)?;
            let scope = match node.kind() {
                NodeKind::BucketRoot => return Err(DeleteError::RootNotDeletable),
                NodeKind::Directory => tree.prefix_of(id),
                NodeKind::File | NodeKind::ScanErrorLeaf => {
                    node.key().map(str::to_string).unwrap_or_else(|| tree.path_of(id))
                }
            };
            Ok(DeleteTarget {
                id,
                kind: node.kind(),
                path: tree.path_of(id),
                scope,
                size: node.aggregate_size(),
                count: node.aggregate_count(),
            })
        })?;
        tracing::info!(path = %target.path, kind = ?target.kind, "deletion requested");
        Ok(DeleteSession::new(target))
    }

    pub fn cancel(&self, session: &mut DeleteSession) -> Result<(), DeleteError> {
        session.advance(DeleteState::Cancelled)?;
        tracing::info!(path = %session.target().path, "deletion cancelled");
        session.advance(DeleteState::Idle)
    }

    /// Run a confirmed deletion to the end. Not cancellable from here on.
    ///
    /// Fails with `SubtreeBusy` and stays in `ConfirmPending` if an
    /// overlapping deletion is running.
    pub async fn confirm(&self, session: &mut DeleteSession) -> Result<DeleteReport, DeleteError> {
        if session.state() != DeleteState::ConfirmPending {
            return Err(DeleteError::InvalidTransition {
                from: session.state(),
                to: DeleteState::Confirmed,
            });
        }
        let target = session.target().clone();
        let guard = self
            .locks
            .try_acquire_scope(target.lock_scope())
            .ok_or_else(|| DeleteError::SubtreeBusy(target.scope.clone()))?;
        session.advance(DeleteState::Confirmed)?;
        session.hold(guard);

        session.advance(DeleteState::Resolving)?;
        let (keys, source) = match self.resolve(&target).await {
            Ok(resolved) => resolved,
            Err(err) => {
                tracing::error!(path = %target.path, error = %err, "could not resolve keys");
                session.advance(DeleteState::PartiallyFailed)?;
                return Err(err);
            }
        };

        session.advance(DeleteState::Deleting)?;
        let mut report = self.delete_keys(keys).await;
        report.path = target.path.clone();
        report.source = source;
        if report.is_success() && source == KeySource::Listing {
            // The store holds nothing under the scope any more, unknown parts included
            self.tree.write(|tree| tree.remove_subtree(target.id));
            self.tree.prune_sort_cache();
        }
        report.state = if report.is_success() {
            DeleteState::Done
        } else {
            DeleteState::PartiallyFailed
        };
        session.advance(report.state)?;

        tracing::info!(
            path = %target.path,
            source = ?source,
            deleted = report.deleted,
            failed = report.failed.len(),
            batches = report.batches,
            "deletion finished"
        );
        Ok(report)
    }

    /// The set of object keys backing `target`.
    ///
    /// The tree is trusted only when the subtree is completely scanned and
    /// holds no error leaves. Otherwise the store is listed flat.
    pub async fn resolve(&self, target: &DeleteTarget) -> Result<(Vec<String>, KeySource), DeleteError> {
        let from_tree = self.tree.read(|tree| -> Result<Option<Vec<String>>, DeleteError> {
            let node = tree.get(target.id).ok_or(DeleteError::NodeGone)?;
            Ok(match node.kind() {
                NodeKind::File => node.key().map(|key| vec![key.to_string()]),
                NodeKind::Directory
                    if self.coverage.is_complete(&target.scope) && !tree.has_scan_errors(target.id) =>
                {
                    Some(tree.collect_keys(target.id))
                }
                _ => None,
            })
        })?;

        if let Some(mut keys) = from_tree {
            keys.sort();
            tracing::debug!(path = %target.path, keys = keys.len(), "resolved keys from tree");
            return Ok((keys, KeySource::Tree));
        }

        let keys = self.list_flat(&target.scope).await?;
        tracing::debug!(path = %target.path, keys = keys.len(), "resolved keys from listing");
        Ok((keys, KeySource::Listing))
    }

    async fn list_flat(&self, prefix: &str) -> Result<Vec<String>, DeleteError> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = with_retry(&self.options.retry, "list", || {
                self.store.list_objects(prefix, None, None, token.as_deref())
            })
            .await?;
            keys.extend(page.entries.into_iter().map(|record| record.key));
            match page.next_token {
                Some(next) if page.is_truncated => token = Some(next),
                _ => break,
            }
        }
        Ok(keys)
    }

    /// Delete `keys` in concurrent batches, applying each batch's outcome to
    /// the tree as soon as it returns.
    pub async fn delete_keys(&self, keys: Vec<String>) -> DeleteReport {
        let requested = keys.len();
        let batches = chunk_keys(keys, self.options.batch_size);
        let mut report = DeleteReport {
            path: String::new(),
            state: DeleteState::Deleting,
            source: KeySource::Tree,
            requested,
            deleted: 0,
            deleted_bytes: 0,
            failed: Vec::new(),
            batches: batches.len(),
        };

        let mut finished = stream::iter(batches)
            .map(|batch| self.submit(batch))
            .buffer_unordered(self.options.concurrency.max(1));

        while let Some(batch) = finished.next().await {
            let applied = self.apply_outcome(&batch.outcomes);
            report.deleted += applied.deleted;
            report.deleted_bytes += applied.bytes;
            report
                .failed
                .extend(batch.failed().map(|(key, reason)| (key.to_string(), reason.to_string())));
        }
        report.failed.sort();
        report
    }

    async fn submit(&self, mut batch: DeletionBatch) -> DeletionBatch {
        batch.state = BatchState::Submitted;
        tracing::debug!(batch = batch.index, keys = batch.keys.len(), "submitting delete batch");
        let result = with_retry(&self.options.retry, "delete", || self.store.delete_objects(&batch.keys)).await;
        match result {
            Ok(outcomes) => batch.record(outcomes),
            Err(err) => {
                tracing::error!(batch = batch.index, keys = batch.keys.len(), error = %err, "delete batch failed");
                batch.fail_all(&err.to_string());
            }
        }
        batch
    }

    /// Remove confirmed keys from the tree and flag refused ones.
    pub fn apply_outcome(&self, outcomes: &HashMap<String, DeleteOutcome>) -> Applied {
        let applied = self.tree.write(|tree| {
            let mut applied = Applied::default();
            for (key, outcome) in outcomes {
                match outcome {
                    DeleteOutcome::Deleted => {
                        applied.deleted += 1;
                        if let Some(removed) = tree.remove_object(key) {
                            applied.bytes += removed.size;
                        }
                    }
                    DeleteOutcome::Failed(reason) => {
                        applied.failed += 1;
                        tree.mark_delete_failed(key, reason);
                    }
                }
            }
            applied
        });
        self.tree.prune_sort_cache();
        applied
    }
}
