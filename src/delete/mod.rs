//! Deletion engine: resolve a selected node to object keys, delete them in
//! bounded batches and apply what the store confirmed back into the tree.

pub mod batch;
pub mod engine;
pub mod error;
pub mod session;

pub use batch::{chunk_keys, BatchState, DeletionBatch};
pub use engine::{DeleteOptions, DeleteReport, DeletionEngine, KeySource};
pub use error::DeleteError;
pub use session::{DeleteSession, DeleteState, DeleteTarget, LockScope, SubtreeGuard, SubtreeLocks};
