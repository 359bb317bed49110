//! Drive v3 file operations
//!
//! Metadata lookups, folder enumeration, raw downloads and native-format
//! exports.
//!
//! See: <https://developers.google.com/drive/api/reference/rest/v3/files>

use anyhow::{Context, Result};
use reqwest::Method;
use serde::Deserialize;
use tracing::{debug, warn};

use docwatch_core::domain::newtypes::{DocumentId, FolderId, ModifiedMarker};
use docwatch_core::ports::document_store::{DocumentMetadata, FolderPage};

use crate::client::{Api, DriveClient};
use crate::DriveError;

/// Field mask applied to every file resource request
const FILE_FIELDS: &str = "id,name,mimeType,modifiedTime,parents,trashed";

/// Page size used when enumerating a folder
const LIST_PAGE_SIZE: &str = "100";

// ============================================================================
// Drive API response types
// ============================================================================

/// A Drive `File` resource, restricted to [`FILE_FIELDS`]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DriveFile {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    mime_type: String,
    modified_time: Option<String>,
    #[serde(default)]
    parents: Vec<String>,
    #[serde(default)]
    trashed: bool,
}

/// Response of `files.list`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

impl DriveFile {
    /// Converts the wire representation into port metadata
    pub(crate) fn into_metadata(self) -> Result<DocumentMetadata, DriveError> {
        let id = DocumentId::new(self.id)
            .map_err(|e| DriveError::InvalidResponse(e.to_string()))?;
        let modified = self.modified_time.ok_or_else(|| {
            DriveError::InvalidResponse(format!("file {id} has no modifiedTime"))
        })?;

        Ok(DocumentMetadata {
            id,
            name: self.name,
            mime_type: self.mime_type,
            modified: ModifiedMarker::new(modified),
            parents: self.parents,
            trashed: self.trashed,
        })
    }
}

// ============================================================================
// Operations
// ============================================================================

/// Retrieves the metadata of one file
pub async fn get_metadata(
    client: &DriveClient,
    bearer: &str,
    id: &DocumentId,
) -> Result<DocumentMetadata> {
    let path = format!("/drive/v3/files/{}", id.as_str());
    debug!(document_id = %id, "Fetching file metadata");

    let file: DriveFile = client
        .send(
            client
                .request(Method::GET, Api::Drive, &path, bearer)
                .query(&[("fields", FILE_FIELDS), ("supportsAllDrives", "true")]),
        )
        .await
        .with_context(|| format!("Failed to fetch metadata of {id}"))?
        .json()
        .await
        .context("Failed to parse file metadata")?;

    Ok(file.into_metadata()?)
}

/// Builds the `q` expression selecting non-trashed children of `folder`
pub fn children_query(folder: &FolderId) -> String {
    format!("'{}' in parents and trashed = false", folder.as_str())
}

/// Lists one page of the non-trashed direct children of a folder
///
/// Entries the adapter cannot interpret (e.g. missing `modifiedTime`) are
/// skipped with a warning rather than failing the whole page.
pub async fn list_folder(
    client: &DriveClient,
    bearer: &str,
    folder: &FolderId,
    page_token: Option<&str>,
) -> Result<FolderPage> {
    let query = children_query(folder);
    let fields = format!("nextPageToken,files({FILE_FIELDS})");

    let mut request = client
        .request(Method::GET, Api::Drive, "/drive/v3/files", bearer)
        .query(&[
            ("q", query.as_str()),
            ("fields", fields.as_str()),
            ("pageSize", LIST_PAGE_SIZE),
            ("supportsAllDrives", "true"),
            ("includeItemsFromAllDrives", "true"),
        ]);
    if let Some(token) = page_token {
        request = request.query(&[("pageToken", token)]);
    }

    debug!(folder_id = %folder, has_page_token = page_token.is_some(), "Listing folder");

    let list: FileList = client
        .send(request)
        .await
        .with_context(|| format!("Failed to list folder {folder}"))?
        .json()
        .await
        .context("Failed to parse folder listing")?;

    let mut items = Vec::with_capacity(list.files.len());
    for file in list.files {
        match file.into_metadata() {
            Ok(meta) => items.push(meta),
            Err(e) => warn!(folder_id = %folder, error = %e, "Skipping unreadable folder entry"),
        }
    }

    Ok(FolderPage {
        items,
        next_page_token: list.next_page_token,
    })
}

/// Downloads the raw bytes of a binary file
pub async fn download(client: &DriveClient, bearer: &str, id: &DocumentId) -> Result<Vec<u8>> {
    let path = format!("/drive/v3/files/{}", id.as_str());

    let bytes = client
        .send(
            client
                .request(Method::GET, Api::Drive, &path, bearer)
                .query(&[("alt", "media")]),
        )
        .await
        .with_context(|| format!("Failed to download {id}"))?
        .bytes()
        .await
        .context("Failed to read download body")?;

    debug!(document_id = %id, bytes = bytes.len(), "Downloaded file");
    Ok(bytes.to_vec())
}

/// Exports a Google-native file into `target_mime`
pub async fn export(
    client: &DriveClient,
    bearer: &str,
    id: &DocumentId,
    target_mime: &str,
) -> Result<Vec<u8>> {
    let path = format!("/drive/v3/files/{}/export", id.as_str());

    let bytes = client
        .send(
            client
                .request(Method::GET, Api::Drive, &path, bearer)
                .query(&[("mimeType", target_mime)]),
        )
        .await
        .with_context(|| format!("Failed to export {id} as {target_mime}"))?
        .bytes()
        .await
        .context("Failed to read export body")?;

    debug!(document_id = %id, bytes = bytes.len(), target_mime, "Exported file");
    Ok(bytes.to_vec())
}
