//! Document store port (driven/secondary port)
//!
//! This module defines the capability set the monitoring core needs from the
//! remote document store: watch-channel registration, metadata lookup,
//! folder enumeration, cursor-based change listing, and content retrieval.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because errors at port boundaries are adapter-specific.
//!   The single error the core must distinguish, an expired or unknown change
//!   cursor, travels as a typed [`CursorInvalidated`] inside the `anyhow::Error`.
//! - Every method takes the bearer token explicitly; the core refreshes the
//!   credential before each call, so adapters stay stateless with respect
//!   to authentication.
//! - The DTOs here are port-level shapes, not domain entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::newtypes::{ChangeCursor, ChannelId, DocumentId, FolderId, ModifiedMarker};

// ============================================================================
// Metadata and listings
// ============================================================================

/// Metadata of a single document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Remote document identifier
    pub id: DocumentId,
    /// Display name
    pub name: String,
    /// MIME type as reported by the store
    pub mime_type: String,
    /// Opaque modification marker
    pub modified: ModifiedMarker,
    /// Identifiers of the folders that directly contain the document
    pub parents: Vec<String>,
    /// Whether the document sits in the trash
    pub trashed: bool,
}

impl DocumentMetadata {
    /// Returns true if the document is a direct child of `folder`
    pub fn is_child_of(&self, folder: &FolderId) -> bool {
        self.parents.iter().any(|p| p == folder.as_str())
    }
}

/// One page of a folder enumeration
#[derive(Debug, Clone, Default)]
pub struct FolderPage {
    /// Documents on this page
    pub items: Vec<DocumentMetadata>,
    /// Token for the next page (None on the last page)
    pub next_page_token: Option<String>,
}

/// A single entry of a change listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEntry {
    /// Document the change refers to
    pub id: DocumentId,
    /// Whether the document was removed (deleted or access revoked)
    pub removed: bool,
}

/// One page of a change listing
#[derive(Debug, Clone, Default)]
pub struct ChangePage {
    /// Changes on this page
    pub changes: Vec<ChangeEntry>,
    /// Continuation token when more changes are pending
    pub next_page_token: Option<ChangeCursor>,
    /// Terminal "caught up" token, present only on the last page
    pub new_start_cursor: Option<ChangeCursor>,
}

impl ChangePage {
    /// The cursor to store after this page has been processed
    ///
    /// Prefers the terminal token; falls back to the continuation token.
    pub fn next_cursor(&self) -> Option<&ChangeCursor> {
        self.new_start_cursor
            .as_ref()
            .or(self.next_page_token.as_ref())
    }

    /// Returns true if this page carries the terminal token
    pub fn is_caught_up(&self) -> bool {
        self.new_start_cursor.is_some()
    }
}

// ============================================================================
// Watch channels
// ============================================================================

/// Parameters of a watch request
#[derive(Debug, Clone)]
pub struct ChannelRequest {
    /// Identifier chosen for the new channel
    pub channel_id: ChannelId,
    /// Public address the store will POST notifications to
    pub address: String,
}

/// Channel as acknowledged by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    /// Echo of the requested channel identifier
    pub channel_id: ChannelId,
    /// Opaque identifier of the watched resource, required to stop the channel
    pub resource_id: Option<String>,
    /// When the store stops delivering notifications, if provided
    pub expires_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Structured (rich-text) documents
// ============================================================================

/// Structured body of a rich-text document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredDocument {
    /// Document title
    #[serde(default)]
    pub title: String,
    /// Top-level structural elements, in document order
    #[serde(default, rename = "body", with = "body_content")]
    pub content: Vec<StructuralElement>,
}

/// A top-level element of a structured document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuralElement {
    /// Present if the element is a paragraph
    pub paragraph: Option<Paragraph>,
}

/// A paragraph made of inline elements
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paragraph {
    /// Inline elements, in order
    #[serde(default)]
    pub elements: Vec<ParagraphElement>,
}

/// An inline element of a paragraph
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParagraphElement {
    /// Present if the element is a run of text
    pub text_run: Option<TextRun>,
}

/// A run of text with uniform styling
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRun {
    /// The text content
    #[serde(default)]
    pub content: String,
}

/// (De)serializes `{"body": {"content": [...]}}` straight into a `Vec`
mod body_content {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::StructuralElement;

    #[derive(Serialize, Deserialize)]
    struct Body<T> {
        #[serde(default)]
        content: Vec<T>,
    }

    #[allow(clippy::ptr_arg)]
    pub fn serialize<S: Serializer>(
        content: &Vec<StructuralElement>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        Body {
            content: content.clone(),
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<StructuralElement>, D::Error> {
        Body::<StructuralElement>::deserialize(deserializer).map(|b| b.content)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// The change cursor passed to [`IDocumentStore::list_changes`] has expired
/// or is unknown to the store
///
/// Adapters return this wrapped in `anyhow::Error`; callers detect it with
/// `err.downcast_ref::<CursorInvalidated>()`. Recovering requires a full
/// folder re-scan before a new cursor can be trusted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Change cursor invalidated: {cursor}")]
pub struct CursorInvalidated {
    /// The rejected cursor
    pub cursor: String,
}

// ============================================================================
// IDocumentStore trait
// ============================================================================

/// Port trait for the remote document store
#[async_trait::async_trait]
pub trait IDocumentStore: Send + Sync {
    /// Registers a push channel scoped to one document
    async fn watch_document(
        &self,
        bearer: &str,
        id: &DocumentId,
        request: &ChannelRequest,
    ) -> anyhow::Result<ChannelInfo>;

    /// Registers a push channel on the change feed, starting at `cursor`
    async fn watch_changes(
        &self,
        bearer: &str,
        cursor: &ChangeCursor,
        request: &ChannelRequest,
    ) -> anyhow::Result<ChannelInfo>;

    /// Cancels a channel
    async fn stop_channel(
        &self,
        bearer: &str,
        channel_id: &ChannelId,
        resource_id: Option<&str>,
    ) -> anyhow::Result<()>;

    /// Retrieves the current metadata of a document
    async fn get_metadata(&self, bearer: &str, id: &DocumentId)
        -> anyhow::Result<DocumentMetadata>;

    /// Lists one page of non-trashed documents directly parented by `folder`
    async fn list_folder(
        &self,
        bearer: &str,
        folder: &FolderId,
        page_token: Option<&str>,
    ) -> anyhow::Result<FolderPage>;

    /// Returns a cursor positioned at "now"
    async fn get_start_cursor(&self, bearer: &str) -> anyhow::Result<ChangeCursor>;

    /// Lists one page of changes since `cursor`
    ///
    /// # Errors
    /// Returns [`CursorInvalidated`] (inside `anyhow::Error`) when the cursor
    /// is no longer accepted by the store.
    async fn list_changes(&self, bearer: &str, cursor: &ChangeCursor)
        -> anyhow::Result<ChangePage>;

    /// Downloads the raw bytes of a binary document
    async fn download(&self, bearer: &str, id: &DocumentId) -> anyhow::Result<Vec<u8>>;

    /// Exports a native document into `target_mime`
    async fn export(
        &self,
        bearer: &str,
        id: &DocumentId,
        target_mime: &str,
    ) -> anyhow::Result<Vec<u8>>;

    /// Retrieves the paragraph tree of a rich-text document
    async fn get_structured_document(
        &self,
        bearer: &str,
        id: &DocumentId,
    ) -> anyhow::Result<StructuredDocument>;

    /// Lists the sheet titles of a cloud spreadsheet, in tab order
    async fn list_sheet_titles(&self, bearer: &str, id: &DocumentId)
        -> anyhow::Result<Vec<String>>;

    /// Exports one sheet of a cloud spreadsheet as CSV
    async fn export_sheet_csv(
        &self,
        bearer: &str,
        id: &DocumentId,
        sheet_title: &str,
    ) -> anyhow::Result<Vec<u8>>;
}
