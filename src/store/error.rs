use thiserror::Error;

/// Errors surfaced by an [`ObjectStore`](crate::store::ObjectStore) call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Network, timeout or throttling failure. Worth retrying.
    #[error("transport error: {0}")]
    Transport(String),

    /// The credentials may not touch this prefix. Fatal for the prefix only.
    #[error("access denied: {0}")]
    Authorization(String),

    /// The store answered with something we cannot use.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Transport(_))
    }
}

impl From<opendal::Error> for StoreError {
    fn from(err: opendal::Error) -> Self {
        match err.kind() {
            opendal::ErrorKind::PermissionDenied => StoreError::Authorization(err.to_string()),
            opendal::ErrorKind::Unexpected | opendal::ErrorKind::RateLimited => {
                StoreError::Transport(err.to_string())
            }
            _ if err.is_temporary() => StoreError::Transport(err.to_string()),
            _ => StoreError::InvalidResponse(err.to_string()),
        }
    }
}
