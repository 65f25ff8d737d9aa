//! Error types for the backup subsystem.

use mealplan_store::StoreError;
use thiserror::Error;

/// Result type for backup operations.
pub type BackupResult<T> = Result<T, BackupError>;

/// Errors that can occur in backup operations.
#[derive(Debug, Error)]
pub enum BackupError {
    /// Export format is not one of the supported kinds.
    #[error("unsupported export format: {0}")]
    UnsupportedFormat(String),

    /// A version string could not be parsed.
    #[error("invalid version: {0}")]
    InvalidVersion(String),

    /// A script submitted for execution was not text.
    #[error("Script must be a string")]
    InvalidScript,

    /// The underlying store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Serialization of an export failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BackupError {
    /// Returns true if the error was caused by caller input.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            BackupError::UnsupportedFormat(_)
                | BackupError::InvalidVersion(_)
                | BackupError::InvalidScript
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(BackupError::UnsupportedFormat("xml".into()).is_validation());
        assert!(BackupError::InvalidVersion("x".into()).is_validation());
        assert!(BackupError::InvalidScript.is_validation());
        assert_eq!(BackupError::InvalidScript.to_string(), "Script must be a string");
        assert!(!BackupError::Store(StoreError::unavailable("down")).is_validation());
    }
}
