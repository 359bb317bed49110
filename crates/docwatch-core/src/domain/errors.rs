//! Domain error types
//!
//! Validation failures raised when constructing domain newtypes.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid document identifier
    #[error("Invalid document ID: {0}")]
    InvalidDocumentId(String),

    /// Invalid folder identifier
    #[error("Invalid folder ID: {0}")]
    InvalidFolderId(String),

    /// Invalid change cursor
    #[error("Invalid change cursor: {0}")]
    InvalidCursor(String),

    /// Invalid channel identifier
    #[error("Invalid channel ID: {0}")]
    InvalidChannelId(String),

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
