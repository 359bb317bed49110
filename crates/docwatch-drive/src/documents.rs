//! Docs v1 and Sheets v4 access
//!
//! Rich-text documents are read through the Docs API as a paragraph tree;
//! cloud spreadsheets are enumerated through the Sheets API and exported one
//! sheet at a time through the `gviz` CSV endpoint, which (unlike
//! `files.export`) can address a single sheet by title.

use anyhow::{Context, Result};
use reqwest::Method;
use serde::Deserialize;
use tracing::debug;

use docwatch_core::domain::newtypes::DocumentId;
use docwatch_core::ports::document_store::StructuredDocument;

use crate::client::{Api, DriveClient};

#[derive(Debug, Deserialize)]
struct Spreadsheet {
    #[serde(default)]
    sheets: Vec<Sheet>,
}

#[derive(Debug, Deserialize)]
struct Sheet {
    properties: Option<SheetProperties>,
}

#[derive(Debug, Deserialize)]
struct SheetProperties {
    #[serde(default)]
    title: String,
}

impl Spreadsheet {
    fn titles(self) -> Vec<String> {
        self.sheets
            .into_iter()
            .filter_map(|s| s.properties)
            .map(|p| p.title)
            .collect()
    }
}

/// Retrieves the structured body of a rich-text document
pub async fn get_structured_document(
    client: &DriveClient,
    bearer: &str,
    id: &DocumentId,
) -> Result<StructuredDocument> {
    let path = format!("/v1/documents/{}", id.as_str());

    let document: StructuredDocument = client
        .send(client.request(Method::GET, Api::Docs, &path, bearer))
        .await
        .with_context(|| format!("Failed to fetch document {id}"))?
        .json()
        .await
        .context("Failed to parse document body")?;

    debug!(document_id = %id, elements = document.content.len(), "Fetched structured document");
    Ok(document)
}

/// Lists sheet titles of a spreadsheet in tab order
pub async fn list_sheet_titles(
    client: &DriveClient,
    bearer: &str,
    id: &DocumentId,
) -> Result<Vec<String>> {
    let path = format!("/v4/spreadsheets/{}", id.as_str());

    let spreadsheet: Spreadsheet = client
        .send(
            client
                .request(Method::GET, Api::Sheets, &path, bearer)
                .query(&[("fields", "sheets.properties.title")]),
        )
        .await
        .with_context(|| format!("Failed to fetch sheets of {id}"))?
        .json()
        .await
        .context("Failed to parse spreadsheet")?;

    Ok(spreadsheet.titles())
}

/// Exports one sheet of a spreadsheet as CSV
pub async fn export_sheet_csv(
    client: &DriveClient,
    bearer: &str,
    id: &DocumentId,
    sheet_title: &str,
) -> Result<Vec<u8>> {
    let path = format!("/spreadsheets/d/{}/gviz/tq", id.as_str());

    let bytes = client
        .send(
            client
                .request(Method::GET, Api::Export, &path, bearer)
                .query(&[("tqx", "out:csv"), ("sheet", sheet_title)]),
        )
        .await
        .with_context(|| format!("Failed to export sheet '{sheet_title}' of {id}"))?
        .bytes()
        .await
        .context("Failed to read sheet export")?;

    Ok(bytes.to_vec())
}
