use std::collections::HashMap;

use crate::store::{DeleteOutcome, MAX_DELETE_BATCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Pending,
    Submitted,
    PartiallyFailed,
    Done,
}

/// Keys submitted to the store in one multi-delete request.
#[derive(Debug, Clone)]
pub struct DeletionBatch {
    pub index: usize,
    pub keys: Vec<String>,
    pub state: BatchState,
    pub outcomes: HashMap<String, DeleteOutcome>,
}

impl DeletionBatch {
    pub fn new(index: usize, keys: Vec<String>) -> Self {
        Self {
            index,
            keys,
            state: BatchState::Pending,
            outcomes: HashMap::new(),
        }
    }

    /// Take the store's per-key answer. Keys the store left out count as failed.
    pub fn record(&mut self, mut outcomes: HashMap<String, DeleteOutcome>) {
        self.outcomes = self
            .keys
            .iter()
            .map(|key| {
                let outcome = outcomes
                    .remove(key)
                    .unwrap_or_else(|| DeleteOutcome::Failed("store returned no result".to_string()));
                (key.clone(), outcome)
            })
            .collect();
        self.state = if self.failed().next().is_some() {
            BatchState::PartiallyFailed
        } else {
            BatchState::Done
        };
    }

    /// The request itself failed after retries; nothing in it was deleted.
    pub fn fail_all(&mut self, reason: &str) {
        self.outcomes = self
            .keys
            .iter()
            .map(|key| (key.clone(), DeleteOutcome::Failed(reason.to_string())))
            .collect();
        self.state = BatchState::PartiallyFailed;
    }

    pub fn deleted(&self) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| outcome.is_deleted())
            .map(|(key, _)| key.as_str())
    }

    pub fn failed(&self) -> impl Iterator<Item = (&str, &str)> {
        self.outcomes.iter().filter_map(|(key, outcome)| match outcome {
            DeleteOutcome::Failed(reason) => Some((key.as_str(), reason.as_str())),
            DeleteOutcome::Deleted => None,
        })
    }
}

/// Split keys into batches of at most `batch_size`, never above the
/// store's multi-delete ceiling.
pub fn chunk_keys(keys: Vec<String>, batch_size: usize) -> Vec<DeletionBatch> {
    let size = batch_size.clamp(1, MAX_DELETE_BATCH);
    keys.chunks(size)
        .enumerate()
        .map(|(index, chunk)| DeletionBatch::new(index, chunk.to_vec()))
        .collect()
}
