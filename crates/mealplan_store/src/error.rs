//! Error types for the document store.

use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in document store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store cannot be reached.
    #[error("store unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
    },

    /// A query filter could not be interpreted.
    #[error("invalid filter: {message}")]
    InvalidFilter {
        /// Description of the problem.
        message: String,
    },

    /// An update document could not be interpreted.
    #[error("invalid update: {message}")]
    InvalidUpdate {
        /// Description of the problem.
        message: String,
    },

    /// A document is not a JSON object or carries an invalid field.
    #[error("invalid document: {message}")]
    InvalidDocument {
        /// Description of the problem.
        message: String,
    },

    /// A unique index (including `_id`) rejected a write.
    #[error("duplicate key in {collection}: index {index} already contains {key}")]
    DuplicateKey {
        /// Collection that rejected the write.
        collection: String,
        /// Index that was violated.
        index: String,
        /// Rendered key value.
        key: String,
    },

    /// I/O error while loading or saving a snapshot.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON error while loading or saving a snapshot.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Creates an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates an invalid filter error.
    pub fn invalid_filter(message: impl Into<String>) -> Self {
        Self::InvalidFilter {
            message: message.into(),
        }
    }

    /// Creates an invalid update error.
    pub fn invalid_update(message: impl Into<String>) -> Self {
        Self::InvalidUpdate {
            message: message.into(),
        }
    }

    /// Creates an invalid document error.
    pub fn invalid_document(message: impl Into<String>) -> Self {
        Self::InvalidDocument {
            message: message.into(),
        }
    }

    /// Returns true if the caller supplied something malformed, as opposed to
    /// the store itself failing.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            StoreError::InvalidFilter { .. }
                | StoreError::InvalidUpdate { .. }
                | StoreError::InvalidDocument { .. }
                | StoreError::DuplicateKey { .. }
        )
    }
}
