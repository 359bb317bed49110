//! DriveDocumentStore - IDocumentStore implementation for Google Drive
//!
//! Wraps the [`DriveClient`] and delegates to the files, changes, channels
//! and documents modules to fulfil the [`IDocumentStore`] port contract.
//!
//! ## Design Notes
//!
//! - The store is stateless apart from the HTTP client; the bearer token
//!   arrives with every call, so no interior mutability is needed.
//! - Errors are returned as `anyhow::Error` wrapping [`DriveError`](crate::DriveError)
//!   or, for an expired change cursor, [`CursorInvalidated`](docwatch_core::ports::CursorInvalidated).
//! - A 401 additionally carries [`CredentialRejected`] so the engine can tell
//!   a revoked token from any other failure.

use anyhow::Result;

use docwatch_core::ports::credentials::CredentialRejected;

use docwatch_core::domain::newtypes::{ChangeCursor, ChannelId, DocumentId, FolderId};
use docwatch_core::ports::document_store::{
    ChangePage, ChannelInfo, ChannelRequest, DocumentMetadata, FolderPage, IDocumentStore,
    StructuredDocument,
};

use crate::client::DriveClient;
use crate::{changes, channels, documents, files, DriveError};

/// Marks authorization failures with [`CredentialRejected`]
fn flag_rejected(error: anyhow::Error) -> anyhow::Error {
    match error.downcast_ref::<DriveError>() {
        Some(DriveError::Unauthorized(_)) => error.context(CredentialRejected),
        _ => error,
    }
}

/// Google Drive adapter for the [`IDocumentStore`] port
#[derive(Debug, Clone)]
pub struct DriveDocumentStore {
    client: DriveClient,
}

impl DriveDocumentStore {
    /// Creates a store over an existing client
    pub fn new(client: DriveClient) -> Self {
        Self { client }
    }

    /// Returns the underlying client
    pub fn client(&self) -> &DriveClient {
        &self.client
    }
}

#[async_trait::async_trait]
impl IDocumentStore for DriveDocumentStore {
    async fn watch_document(
        &self,
        bearer: &str,
        id: &DocumentId,
        request: &ChannelRequest,
    ) -> Result<ChannelInfo> {
        channels::watch_document(&self.client, bearer, id, request)
            .await
            .map_err(flag_rejected)
    }

    async fn watch_changes(
        &self,
        bearer: &str,
        cursor: &ChangeCursor,
        request: &ChannelRequest,
    ) -> Result<ChannelInfo> {
        channels::watch_changes(&self.client, bearer, cursor, request)
            .await
            .map_err(flag_rejected)
    }

    async fn stop_channel(
        &self,
        bearer: &str,
        channel_id: &ChannelId,
        resource_id: Option<&str>,
    ) -> Result<()> {
        channels::stop_channel(&self.client, bearer, channel_id, resource_id)
            .await
            .map_err(flag_rejected)
    }

    async fn get_metadata(&self, bearer: &str, id: &DocumentId) -> Result<DocumentMetadata> {
        files::get_metadata(&self.client, bearer, id)
            .await
            .map_err(flag_rejected)
    }

    async fn list_folder(
        &self,
        bearer: &str,
        folder: &FolderId,
        page_token: Option<&str>,
    ) -> Result<FolderPage> {
        files::list_folder(&self.client, bearer, folder, page_token)
            .await
            .map_err(flag_rejected)
    }

    async fn get_start_cursor(&self, bearer: &str) -> Result<ChangeCursor> {
        changes::get_start_cursor(&self.client, bearer)
            .await
            .map_err(flag_rejected)
    }

    async fn list_changes(&self, bearer: &str, cursor: &ChangeCursor) -> Result<ChangePage> {
        changes::list_changes(&self.client, bearer, cursor)
            .await
            .map_err(flag_rejected)
    }

    async fn download(&self, bearer: &str, id: &DocumentId) -> Result<Vec<u8>> {
        files::download(&self.client, bearer, id)
            .await
            .map_err(flag_rejected)
    }

    async fn export(&self, bearer: &str, id: &DocumentId, target_mime: &str) -> Result<Vec<u8>> {
        files::export(&self.client, bearer, id, target_mime)
            .await
            .map_err(flag_rejected)
    }

    async fn get_structured_document(
        &self,
        bearer: &str,
        id: &DocumentId,
    ) -> Result<StructuredDocument> {
        documents::get_structured_document(&self.client, bearer, id)
            .await
            .map_err(flag_rejected)
    }

    async fn list_sheet_titles(&self, bearer: &str, id: &DocumentId) -> Result<Vec<String>> {
        documents::list_sheet_titles(&self.client, bearer, id)
            .await
            .map_err(flag_rejected)
    }

    async fn export_sheet_csv(
        &self,
        bearer: &str,
        id: &DocumentId,
        sheet_title: &str,
    ) -> Result<Vec<u8>> {
        documents::export_sheet_csv(&self.client, bearer, id, sheet_title)
            .await
            .map_err(flag_rejected)
    }
}
