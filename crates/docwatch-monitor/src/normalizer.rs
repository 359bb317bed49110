//! Content normalization
//!
//! Converts a document into one plain-text representation, chosen by its
//! MIME type. Each supported format is a [`ContentSource`]; the
//! [`ContentNormalizer`] picks the source and absorbs every failure.
//!
//! | Kind          | Source                                                  |
//! |---------------|---------------------------------------------------------|
//! | RichText      | Docs paragraph tree, one line per paragraph             |
//! | Delimited     | Raw bytes decoded as UTF-8, verbatim                    |
//! | Workbook      | Every sheet rendered as CSV (calamine), blank-line joined |
//! | Spreadsheet   | Per-sheet CSV export, failed sheets skipped             |
//! | Folder        | No content                                              |
//! | anything else | `[unsupported content type: <mime>]`                    |

use std::io::Cursor;
use std::sync::Arc;

use anyhow::{Context, Result};
use calamine::{open_workbook_auto_from_rs, Data, Range, Reader};
use tracing::{debug, warn};

use docwatch_core::domain::{ContentKind, DocumentId};
use docwatch_core::ports::StructuredDocument;

use crate::remote::RemoteStore;
use crate::MonitorError;

/// Separator placed between sheets of a multi-sheet document
const SHEET_SEPARATOR: &str = "\n\n";

/// Text emitted for documents of an unsupported type
pub fn unsupported_placeholder(mime_type: &str) -> String {
    format!("[unsupported content type: {mime_type}]")
}

// ============================================================================
// ContentSource
// ============================================================================

/// One document format able to produce plain text
#[async_trait::async_trait]
pub trait ContentSource: Send + Sync {
    /// Fetches the document and renders it as plain text
    async fn produce(&self, remote: &RemoteStore, id: &DocumentId) -> Result<String>;
}

async fn download(remote: &RemoteStore, id: &DocumentId) -> Result<Vec<u8>> {
    remote
        .call("download", |store, bearer| async move {
            store.download(&bearer, id).await
        })
        .await
}

/// Rich-text documents read through their paragraph tree
pub struct RichTextSource;

/// Delimited text (CSV) files
pub struct DelimitedSource;

/// Binary workbooks (xlsx / xls)
pub struct WorkbookSource;

/// Cloud-native spreadsheets exported sheet by sheet
pub struct SpreadsheetSource;

#[async_trait::async_trait]
impl ContentSource for RichTextSource {
    async fn produce(&self, remote: &RemoteStore, id: &DocumentId) -> Result<String> {
        let document = remote
            .call("get_structured_document", |store, bearer| async move {
                store.get_structured_document(&bearer, id).await
            })
            .await?;
        Ok(paragraph_text(&document))
    }
}

#[async_trait::async_trait]
impl ContentSource for DelimitedSource {
    async fn produce(&self, remote: &RemoteStore, id: &DocumentId) -> Result<String> {
        let bytes = download(remote, id).await?;
        decode_utf8(bytes)
    }
}

#[async_trait::async_trait]
impl ContentSource for WorkbookSource {
    async fn produce(&self, remote: &RemoteStore, id: &DocumentId) -> Result<String> {
        let bytes = download(remote, id).await?;
        render_workbook(bytes)
    }
}

#[async_trait::async_trait]
impl ContentSource for SpreadsheetSource {
    async fn produce(&self, remote: &RemoteStore, id: &DocumentId) -> Result<String> {
        let titles = remote
            .call("list_sheet_titles", |store, bearer| async move {
                store.list_sheet_titles(&bearer, id).await
            })
            .await?;

        let mut sheets = Vec::with_capacity(titles.len());
        for title in &titles {
            let exported = remote
                .call("export_sheet_csv", |store, bearer| async move {
                    store.export_sheet_csv(&bearer, id, title).await
                })
                .await
                .and_then(decode_utf8);
            match exported {
                Ok(text) => sheets.push(text),
                Err(e) => {
                    warn!(document_id = %id, sheet = %title, error = %format!("{e:#}"), "Skipping sheet");
                }
            }
        }

        Ok(sheets.join(SHEET_SEPARATOR))
    }
}

// ============================================================================
// ContentNormalizer
// ============================================================================

/// Picks the [`ContentSource`] for a MIME type and absorbs its failures
pub struct ContentNormalizer {
    remote: Arc<RemoteStore>,
}

impl ContentNormalizer {
    pub fn new(remote: Arc<RemoteStore>) -> Self {
        Self { remote }
    }

    /// Returns the plain text of a document, or `None` when there is nothing
    /// to report
    ///
    /// `None` covers folders, empty documents and any fetch or conversion
    /// failure; failures are logged here and never propagated.
    pub async fn normalize(&self, id: &DocumentId, mime_type: &str) -> Option<String> {
        let kind = ContentKind::from_mime(mime_type);
        let source: &dyn ContentSource = match &kind {
            ContentKind::Folder => return None,
            ContentKind::Unsupported(mime) => return Some(unsupported_placeholder(mime)),
            ContentKind::RichText => &RichTextSource,
            ContentKind::Delimited => &DelimitedSource,
            ContentKind::Workbook => &WorkbookSource,
            ContentKind::Spreadsheet => &SpreadsheetSource,
        };

        match source.produce(&self.remote, id).await {
            Ok(text) if text.is_empty() => {
                debug!(document_id = %id, %kind, "Document produced no text");
                None
            }
            Ok(text) => Some(text),
            Err(e) => {
                let error = MonitorError::Normalization {
                    document_id: id.to_string(),
                    reason: format!("{e:#}"),
                };
                warn!(document_id = %id, %kind, error = %error, "Normalization failed");
                None
            }
        }
    }
}

// ============================================================================
// Format helpers
// ============================================================================

/// Concatenates the text runs of every paragraph, one newline per paragraph
///
/// Non-paragraph elements (tables, section breaks) contribute nothing.
/// Trailing whitespace is trimmed.
pub fn paragraph_text(document: &StructuredDocument) -> String {
    let mut text = String::new();
    for paragraph in document.content.iter().filter_map(|e| e.paragraph.as_ref()) {
        for run in paragraph.elements.iter().filter_map(|e| e.text_run.as_ref()) {
            text.push_str(&run.content);
        }
        text.push('\n');
    }
    text.truncate(text.trim_end().len());
    text
}

fn decode_utf8(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).context("Content is not valid UTF-8")
}

/// Parses a workbook and renders all of its sheets
pub fn render_workbook(bytes: Vec<u8>) -> Result<String> {
    let mut workbook =
        open_workbook_auto_from_rs(Cursor::new(bytes)).context("Failed to open workbook")?;

    let mut sheets = Vec::new();
    for name in workbook.sheet_names() {
        let range = workbook
            .worksheet_range(&name)
            .with_context(|| format!("Failed to read sheet '{name}'"))?;
        sheets.push((name, range));
    }

    Ok(render_sheets(&sheets))
}

/// Renders named sheets as CSV, separated by a blank line
///
/// Sheet names only delimit sheets while rendering; they never appear in the
/// output. Empty sheets are left out.
pub fn render_sheets(sheets: &[(String, Range<Data>)]) -> String {
    sheets
        .iter()
        .map(|(_, range)| range_to_csv(range))
        .filter(|csv| !csv.is_empty())
        .collect::<Vec<_>>()
        .join(SHEET_SEPARATOR)
}

/// Renders one sheet as CSV (comma separated, `\n` line endings)
pub fn range_to_csv(range: &Range<Data>) -> String {
    range
        .rows()
        .map(|row| {
            row.iter()
                .map(|cell| csv_field(&cell_text(cell)))
                .collect::<Vec<_>>()
                .join(",")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        other => other.to_string(),
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
