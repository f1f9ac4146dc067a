use thiserror::Error;

use crate::delete::session::DeleteState;
use crate::store::StoreError;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeleteError {
    #[error("the bucket root cannot be deleted")]
    RootNotDeletable,

    #[error("the selected entry no longer exists")]
    NodeGone,

    #[error("another deletion is running under {0}")]
    SubtreeBusy(String),

    #[error("cannot move deletion from {from:?} to {to:?}")]
    InvalidTransition { from: DeleteState, to: DeleteState },

    #[error("could not list keys to delete: {0}")]
    Resolve(#[from] StoreError),
}
