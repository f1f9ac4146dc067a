//! Remote object store access.
//!
//! The core only talks to the store through the [`ObjectStore`] trait: a
//! paginated listing call and a batched delete call. [`S3Store`] implements
//! it for S3-compatible buckets through OpenDAL.

pub mod backend;
pub mod error;
pub mod s3;

pub use backend::{DeleteOutcome, ListPage, ObjectRecord, ObjectStore, MAX_DELETE_BATCH};
pub use error::StoreError;
pub use s3::{S3Provider, S3Store};
