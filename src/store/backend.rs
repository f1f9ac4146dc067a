use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::store::error::StoreError;

/// Store-imposed ceiling on keys per multi-delete request.
pub const MAX_DELETE_BATCH: usize = 1000;

/// A discovered remote object. Produced by listing, consumed once by the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRecord {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

impl ObjectRecord {
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
            last_modified: None,
        }
    }

    /// Zero-byte `foo/` objects that consoles create to represent folders.
    pub fn is_dir_marker(&self) -> bool {
        self.key.ends_with('/')
    }
}

/// One page returned by [`ObjectStore::list_objects`].
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub entries: Vec<ObjectRecord>,
    pub common_prefixes: Vec<String>,
    pub next_token: Option<String>,
    pub is_truncated: bool,
}

/// Per-key result of a multi-delete request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    Failed(String),
}

impl DeleteOutcome {
    pub fn is_deleted(&self) -> bool {
        matches!(self, DeleteOutcome::Deleted)
    }
}

/// The two remote operations the scanner and the deletion engine need.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List one page under `prefix`.
    ///
    /// With a delimiter, keys are grouped by path segment and the groups come
    /// back as `common_prefixes`. Without one, the listing is flat.
    /// `start_after` skips every key and prefix that sorts at or before it;
    /// it only applies to the first page of a listing.
    async fn list_objects(
        &self,
        prefix: &str,
        delimiter: Option<char>,
        start_after: Option<&str>,
        continuation_token: Option<&str>,
    ) -> Result<ListPage, StoreError>;

    /// The caller will not ask for the page behind `token`.
    async fn release_token(&self, _token: &str) {}

    /// Delete up to [`MAX_DELETE_BATCH`] keys in one request.
    ///
    /// An `Err` means the request as a whole failed. Individual keys that the
    /// store refused are reported as [`DeleteOutcome::Failed`] inside `Ok`.
    async fn delete_objects(
        &self,
        keys: &[String],
    ) -> Result<HashMap<String, DeleteOutcome>, StoreError>;

    /// Location shown in titles and logs, e.g. `s3://bucket`.
    fn display_name(&self) -> String {
        "store".to_string()
    }
}
