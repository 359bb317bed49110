//! Document records and content classification
//!
//! A [`DocumentRecord`] is the ledger's view of one remote document: the
//! last modification marker observed for it. [`ContentKind`] classifies a
//! document by MIME type into the closed set of formats the normalizer
//! understands.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{DocumentId, ModifiedMarker};

/// MIME type of a native rich-text document
pub const MIME_RICH_TEXT: &str = "application/vnd.google-apps.document";

/// MIME type of a native cloud spreadsheet
pub const MIME_SPREADSHEET: &str = "application/vnd.google-apps.spreadsheet";

/// MIME type of a folder
pub const MIME_FOLDER: &str = "application/vnd.google-apps.folder";

/// MIME type of comma-separated values
pub const MIME_CSV: &str = "text/csv";

/// MIME type of an Office Open XML workbook
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// MIME type of a legacy binary workbook
pub const MIME_XLS: &str = "application/vnd.ms-excel";

// ============================================================================
// DocumentRecord
// ============================================================================

/// Last observed state of a remote document
///
/// Exists in the ledger if and only if the document has been observed at
/// least once (initial scan, watch setup, or a change event).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Remote document identifier
    pub id: DocumentId,
    /// Display name at the time of the last observation
    pub name: String,
    /// Modification marker at the time of the last observation
    pub modified: ModifiedMarker,
    /// When this process last recorded a change for the document
    pub observed_at: DateTime<Utc>,
}

impl DocumentRecord {
    /// Creates a record observed now
    pub fn new(id: DocumentId, name: impl Into<String>, modified: ModifiedMarker) -> Self {
        Self {
            id,
            name: name.into(),
            modified,
            observed_at: Utc::now(),
        }
    }
}

// ============================================================================
// ContentKind
// ============================================================================

/// Closed set of content formats, derived from a document's MIME type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentKind {
    /// Structured rich-text document (paragraph tree)
    RichText,
    /// Delimited text (CSV), decoded verbatim
    Delimited,
    /// Binary workbook file with one or more sheets
    Workbook,
    /// Cloud-native spreadsheet exported sheet by sheet
    Spreadsheet,
    /// Folder; never produces content
    Folder,
    /// Anything else; carries the original MIME type
    Unsupported(String),
}

impl ContentKind {
    /// Classifies a MIME type
    pub fn from_mime(mime_type: &str) -> Self {
        match mime_type {
            MIME_RICH_TEXT => ContentKind::RichText,
            MIME_CSV => ContentKind::Delimited,
            MIME_XLSX | MIME_XLS => ContentKind::Workbook,
            MIME_SPREADSHEET => ContentKind::Spreadsheet,
            MIME_FOLDER => ContentKind::Folder,
            other => ContentKind::Unsupported(other.to_string()),
        }
    }

    /// Returns true if documents of this kind can never produce content
    pub fn is_folder(&self) -> bool {
        matches!(self, ContentKind::Folder)
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentKind::RichText => write!(f, "rich_text"),
            ContentKind::Delimited => write!(f, "delimited"),
            ContentKind::Workbook => write!(f, "workbook"),
            ContentKind::Spreadsheet => write!(f, "spreadsheet"),
            ContentKind::Folder => write!(f, "folder"),
            ContentKind::Unsupported(mime) => write!(f, "unsupported({mime})"),
        }
    }
}
