//! Docwatch Monitor - remote-change monitoring and notification fan-out
//!
//! Provides:
//! - Modification ledger for equality-based change detection
//! - Watch registry for file channels and the single folder channel
//! - Content normalization across document formats
//! - Sequenced notification dispatch and an in-process subscriber hub
//! - The change reconciler tying these together
//!
//! ## Modules
//!
//! - `ledger` - Last observed modification marker per document
//! - [`registry`] - Active watch channels and the folder change cursor
//! - [`remote`] - Credential-gated, time-bounded access to the document store
//! - [`normalizer`] - MIME-driven conversion of documents to plain text
//! - [`dispatcher`] - Sequenced publishing of document events
//! - [`hub`] - In-process subscriber fan-out
//! - [`reconciler`] - Notification handling and watch lifecycle

pub mod dispatcher;
pub mod hub;
mod keyed_lock;
mod ledger;
pub mod normalizer;
pub mod reconciler;
pub mod registry;
pub mod remote;

use std::time::Duration;

use thiserror::Error;

pub use reconciler::{ChangeReconciler, Notification, ReconcileReport, TargetState};

/// Errors surfaced by the monitoring engine
///
/// Only setup and stop operations return these to callers; reconciliation
/// paths log them and degrade to "no update emitted this cycle".
#[derive(Debug, Error)]
pub enum MonitorError {
    /// No usable credential (missing, expired without refresh, or refresh failed)
    #[error("Authorization failed: {0}")]
    Auth(String),

    /// The remote store rejected a watch request
    #[error("Watch registration for {target} rejected: {reason}")]
    Registration {
        /// Target the watch was requested for
        target: String,
        /// Error reported by the store
        reason: String,
    },

    /// Metadata or content retrieval failed for one document
    #[error("Fetch failed for {document_id}: {reason}")]
    Fetch {
        /// Document being fetched
        document_id: String,
        /// Underlying error
        reason: String,
    },

    /// Content could not be converted to text
    #[error("Normalization failed for {document_id}: {reason}")]
    Normalization {
        /// Document being normalized
        document_id: String,
        /// Underlying error
        reason: String,
    },

    /// The folder change cursor is no longer accepted by the store
    #[error("Change cursor invalidated: {0}")]
    CursorInvalidated(String),

    /// A remote call exceeded the configured bound
    #[error("Remote call {operation} timed out after {after:?}")]
    Timeout {
        /// Port operation that timed out
        operation: &'static str,
        /// Configured bound
        after: Duration,
    },

    /// The target has no active watch
    #[error("Not watched: {0}")]
    NotWatched(String),
}
