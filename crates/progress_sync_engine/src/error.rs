//! Error types for the sync engine.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
///
/// Only total failures reach the caller of a sync cycle. Partial failures
/// are reported through the retry queue of a successful result.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Nothing is queued for retry.
    #[error("no items to sync")]
    NoItemsToSync,

    /// The remote store could not be reached.
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    /// The stored checkpoint is unreadable or belongs to another user.
    #[error("invalid sync state: {0}")]
    InvalidSyncState(String),

    /// Local storage failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Engine configuration is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// Fetching did not complete in time.
    #[error("operation timed out")]
    Timeout,
}

impl SyncError {
    /// Creates a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkUnavailable(message.into())
    }

    /// Creates a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::NetworkUnavailable(_) | SyncError::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::network("connection reset").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
        assert!(!SyncError::storage("disk full").is_retryable());
        assert!(!SyncError::InvalidSyncState("foreign checkpoint".into()).is_retryable());
    }

    #[test]
    fn error_display() {
        let err = SyncError::NoItemsToSync;
        assert_eq!(err.to_string(), "no items to sync");

        let err = SyncError::network("dns failure");
        assert_eq!(err.to_string(), "network unavailable: dns failure");
    }
}
