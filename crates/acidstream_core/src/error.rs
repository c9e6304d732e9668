//! Error types for acidstream core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in acidstream core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Stream storage error.
    #[error("storage error: {0}")]
    Storage(#[from] acidstream_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A background blocking task failed to complete.
    #[error("blocking I/O task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// The journal is structurally corrupted or has an invalid format.
    #[error("journal corruption: {message}")]
    JournalCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// A journal record is inconsistent with the current target state.
    ///
    /// This is never repaired automatically: the backup data cannot be
    /// trusted to restore the target.
    #[error("invalid backup data: {message}")]
    InvalidBackupData {
        /// Description of the inconsistency.
        message: String,
    },

    /// Reverse replay failed while undoing a record.
    ///
    /// The index is 1-based in undo order (1 = the last-appended record).
    /// After this error the target must be treated as inconsistent until
    /// a retried rollback completes.
    #[error("rollback failed at record {index}: {source}")]
    RollbackFailed {
        /// 1-based undo-order index of the record being processed.
        index: u64,
        /// The underlying failure.
        #[source]
        source: Box<CoreError>,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a journal corruption error.
    pub fn journal_corruption(message: impl Into<String>) -> Self {
        Self::JournalCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid backup data error.
    pub fn invalid_backup_data(message: impl Into<String>) -> Self {
        Self::InvalidBackupData {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Wraps a failure with the undo-order index of the record being
    /// processed when it occurred.
    #[must_use]
    pub fn rollback_failed(index: u64, source: CoreError) -> Self {
        Self::RollbackFailed {
            index,
            source: Box::new(source),
        }
    }
}
