use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::scan::progress::ScanProgress;
use crate::scan::task::ScanTask;

/// Shared task queue with a live outstanding-task counter.
///
/// A task counts as outstanding from [`push`](Self::push) until the worker
/// that took it calls [`complete`](Self::complete). Workers push child tasks
/// before completing their own, so the counter only reaches zero once the
/// whole namespace has been drained.
pub struct WorkQueue {
    tasks: Mutex<VecDeque<ScanTask>>,
    notify: Notify,
    progress: Arc<ScanProgress>,
    cancel: CancellationToken,
}

impl WorkQueue {
    pub fn new(progress: Arc<ScanProgress>, cancel: CancellationToken) -> Self {
        Self {
            tasks: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            progress,
            cancel,
        }
    }

    pub fn push(&self, task: ScanTask) {
        self.progress.outstanding.fetch_add(1, Ordering::SeqCst);
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(task);
        self.notify.notify_one();
    }

    /// Wait for the next task. `None` once the scan is drained or cancelled.
    pub async fn next(&self) -> Option<ScanTask> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent push or completion
            // cannot slip between the check and the wait
            notified.as_mut().enable();

            if self.cancel.is_cancelled() {
                return None;
            }
            if let Some(task) = self.pop() {
                return Some(task);
            }
            if self.outstanding() == 0 {
                return None;
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = self.cancel.cancelled() => return None,
            }
        }
    }

    fn pop(&self) -> Option<ScanTask> {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    /// Mark one taken task as finished, whatever its outcome.
    pub fn complete(&self) {
        if self.progress.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.notify.notify_waiters();
        }
    }

    pub fn outstanding(&self) -> usize {
        self.progress.outstanding()
    }

    /// Take every task still queued, e.g. after cancellation.
    pub fn drain_pending(&self) -> Vec<ScanTask> {
        let drained: Vec<ScanTask> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for _ in &drained {
            self.progress.outstanding.fetch_sub(1, Ordering::SeqCst);
        }
        drained
    }
}
