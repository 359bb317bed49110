//! Drive v3 change feed
//!
//! Implements cursor-based incremental listing for the monitored folder.
//!
//! ## Change Feed Flow
//!
//! 1. **Start**: [`get_start_cursor`] returns a token positioned at "now"
//! 2. **List**: [`list_changes`] returns one page of changes since a token
//! 3. **Continue**: a page with `nextPageToken` has more changes pending;
//!    the last page carries `newStartPageToken` instead
//! 4. **Invalidation**: an expired or unknown token is answered with
//!    404/410 and surfaces as [`CursorInvalidated`]
//!
//! Unlike a full delta walk, one call returns exactly one page: the caller
//! owns the cursor and decides how far to follow continuation tokens.

use anyhow::{Context, Result};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use docwatch_core::domain::newtypes::{ChangeCursor, DocumentId};
use docwatch_core::ports::document_store::{ChangeEntry, ChangePage, CursorInvalidated};

use crate::client::{check_status, Api, DriveClient};
use crate::DriveError;

/// Field mask for `changes.list`
const CHANGE_FIELDS: &str = "nextPageToken,newStartPageToken,changes(fileId,removed,changeType)";

/// Page size used when listing changes
const CHANGE_PAGE_SIZE: &str = "100";

// ============================================================================
// Drive API response types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartPageToken {
    start_page_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangeList {
    #[serde(default)]
    changes: Vec<DriveChange>,
    next_page_token: Option<String>,
    new_start_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveChange {
    file_id: Option<String>,
    #[serde(default)]
    removed: bool,
    change_type: Option<String>,
}

impl ChangeList {
    /// Converts a raw page, dropping entries that do not refer to a file
    fn into_page(self) -> Result<ChangePage, DriveError> {
        let mut changes = Vec::with_capacity(self.changes.len());
        for change in self.changes {
            if change.change_type.as_deref().is_some_and(|t| t != "file") {
                debug!(change_type = ?change.change_type, "Skipping non-file change");
                continue;
            }
            let Some(file_id) = change.file_id else {
                continue;
            };
            match DocumentId::new(file_id) {
                Ok(id) => changes.push(ChangeEntry {
                    id,
                    removed: change.removed,
                }),
                Err(e) => warn!(error = %e, "Skipping change with unusable file ID"),
            }
        }

        let next_page_token = self
            .next_page_token
            .filter(|t| !t.is_empty())
            .map(ChangeCursor::new)
            .transpose()
            .map_err(|e| DriveError::InvalidResponse(e.to_string()))?;
        let new_start_cursor = self
            .new_start_page_token
            .filter(|t| !t.is_empty())
            .map(ChangeCursor::new)
            .transpose()
            .map_err(|e| DriveError::InvalidResponse(e.to_string()))?;

        if next_page_token.is_none() && new_start_cursor.is_none() {
            return Err(DriveError::InvalidResponse(
                "change page carries neither nextPageToken nor newStartPageToken".to_string(),
            ));
        }

        Ok(ChangePage {
            changes,
            next_page_token,
            new_start_cursor,
        })
    }
}

// ============================================================================
// Operations
// ============================================================================

/// Returns a change cursor positioned at the current end of the feed
pub async fn get_start_cursor(client: &DriveClient, bearer: &str) -> Result<ChangeCursor> {
    let token: StartPageToken = client
        .send(
            client
                .request(Method::GET, Api::Drive, "/drive/v3/changes/startPageToken", bearer)
                .query(&[("supportsAllDrives", "true")]),
        )
        .await
        .context("Failed to fetch start page token")?
        .json()
        .await
        .context("Failed to parse start page token")?;

    debug!(cursor = %token.start_page_token, "Fetched start cursor");
    Ok(ChangeCursor::new(token.start_page_token)?)
}

/// Lists one page of changes since `cursor`
///
/// # Errors
///
/// Returns [`CursorInvalidated`] when the store answers 404 or 410 for the
/// supplied token, and a [`DriveError`] for any other failure.
pub async fn list_changes(
    client: &DriveClient,
    bearer: &str,
    cursor: &ChangeCursor,
) -> Result<ChangePage> {
    debug!(cursor = %cursor, "Listing changes");

    let response = client
        .request(Method::GET, Api::Drive, "/drive/v3/changes", bearer)
        .query(&[
            ("pageToken", cursor.as_str()),
            ("fields", CHANGE_FIELDS),
            ("pageSize", CHANGE_PAGE_SIZE),
            ("includeRemoved", "true"),
            ("supportsAllDrives", "true"),
            ("includeItemsFromAllDrives", "true"),
        ])
        .send()
        .await
        .map_err(DriveError::from)
        .context("Failed to send changes request")?;

    // Checked before the generic mapping: an expired token must be
    // distinguishable from any other failure.
    if matches!(response.status(), StatusCode::NOT_FOUND | StatusCode::GONE) {
        warn!(cursor = %cursor, status = response.status().as_u16(), "Change cursor rejected");
        return Err(CursorInvalidated {
            cursor: cursor.to_string(),
        }
        .into());
    }

    let list: ChangeList = check_status(response)
        .await
        .context("Changes request returned error status")?
        .json()
        .await
        .context("Failed to parse changes response")?;

    let page = list.into_page()?;
    debug!(
        changes = page.changes.len(),
        has_next = page.next_page_token.is_some(),
        caught_up = page.is_caught_up(),
        "Received change page"
    );
    Ok(page)
}
