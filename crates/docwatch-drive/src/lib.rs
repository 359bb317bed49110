//! Docwatch Drive - Google Drive REST adapter
//!
//! Provides async access to:
//! - Drive v3 file metadata, folder listings, downloads and exports
//! - Drive v3 change feed (start tokens and paged change listings)
//! - Drive v3 push-notification channels (watch / stop)
//! - Docs v1 structured documents and Sheets v4 sheet enumeration
//! - OAuth2 refresh-token handling with keyring-backed storage
//!
//! ## Modules
//!
//! - [`auth`] - Keyring token storage and the credential provider
//! - [`client`] - HTTP client, host routing and status mapping
//! - [`files`] - File metadata, folder enumeration and content retrieval
//! - [`changes`] - Change feed queries
//! - [`channels`] - Watch channel registration and cancellation
//! - [`documents`] - Docs and Sheets APIs
//! - [`provider`] - [`IDocumentStore`](docwatch_core::ports::IDocumentStore) implementation

pub mod auth;
pub mod changes;
pub mod channels;
pub mod client;
pub mod documents;
pub mod files;
pub mod provider;

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when communicating with the Google APIs
#[derive(Debug, Error)]
pub enum DriveError {
    /// Authentication credentials are invalid or expired
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Insufficient permissions, or the request was refused (e.g. quota)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The requested resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The resource or token is no longer valid
    #[error("Gone: {0}")]
    Gone(String),

    /// The request was malformed or referenced an invalid value
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Rate limit exceeded; retry after the specified duration
    #[error("Too many requests, retry after {retry_after:?}")]
    TooManyRequests {
        /// Duration to wait before retrying
        retry_after: Duration,
    },

    /// A server-side error occurred (5xx)
    #[error("Server error: {0}")]
    ServerError(String),

    /// A network-level error occurred
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The API response could not be parsed or was malformed
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}
