//! Shared fixtures: an in-memory document store, fixed credentials and a
//! recording sink

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use tokio::sync::Notify;

use docwatch_core::domain::document::{MIME_RICH_TEXT, MIME_SPREADSHEET};
use docwatch_core::domain::{ChangeCursor, ChannelId, DocumentId, FolderId, ModifiedMarker};
use docwatch_core::ports::{
    ChangeEntry, ChangePage, ChannelInfo, ChannelRequest, Credential, CredentialRejected, CursorInvalidated,
    DocumentEvent, DocumentMetadata, FolderPage, ICredentialProvider, IDocumentStore,
    INotificationSink, Paragraph, ParagraphElement, StructuralElement, StructuredDocument,
    SubscriberScope, TextRun,
};
use docwatch_monitor::reconciler::ReconcilerSettings;
use docwatch_monitor::ChangeReconciler;

pub const FOLDER: &str = "folder-1";

pub fn doc(id: &str) -> DocumentId {
    DocumentId::new(id.to_string()).unwrap()
}

pub fn folder() -> FolderId {
    FolderId::new(FOLDER.to_string()).unwrap()
}

pub fn cursor(token: &str) -> ChangeCursor {
    ChangeCursor::new(token.to_string()).unwrap()
}

// ============================================================================
// FakeStore
// ============================================================================

/// Programmable change-feed response for one cursor
#[derive(Clone)]
pub enum ChangeResponse {
    Page(ChangePage),
    Invalidated,
    Unavailable,
}

#[derive(Default)]
pub struct FakeState {
    pub metadata: HashMap<DocumentId, DocumentMetadata>,
    /// Paragraph text of rich-text documents
    pub texts: HashMap<DocumentId, String>,
    /// Sheets of cloud spreadsheets; `None` fails the export
    pub sheets: HashMap<DocumentId, Vec<(String, Option<String>)>>,
    pub changes: HashMap<String, ChangeResponse>,
    pub start_cursors: Vec<String>,
    pub failing_metadata: HashSet<DocumentId>,
    /// `get_metadata` for these never answers
    pub hanging_metadata: HashSet<DocumentId>,
    /// Bearer tokens answered with a 401
    pub revoked: HashSet<String>,
    pub reject_watches: bool,
    pub folder_page_size: usize,

    pub watch_requests: Vec<ChannelRequest>,
    pub stopped: Vec<ChannelId>,
    pub content_fetches: Vec<DocumentId>,
    pub listed_cursors: Vec<String>,
    /// Bearer token of every call, in order
    pub bearers: Vec<String>,
}

/// In-memory document store
pub struct FakeStore {
    pub state: Mutex<FakeState>,
    /// When set, `watch_document` signals `entered` and waits on `gate`
    pub watch_gate: Mutex<Option<(Arc<Notify>, Arc<Notify>)>>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                start_cursors: vec!["start-1".to_string()],
                folder_page_size: 100,
                ..FakeState::default()
            }),
            watch_gate: Mutex::new(None),
        }
    }

    /// Puts a rich-text document into the monitored folder
    pub fn put_text(&self, id: &str, name: &str, marker: &str, text: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .metadata
            .insert(doc(id), metadata(id, name, MIME_RICH_TEXT, marker, &[FOLDER]));
        state.texts.insert(doc(id), text.to_string());
    }

    /// Puts a cloud spreadsheet into the monitored folder
    pub fn put_spreadsheet(&self, id: &str, name: &str, marker: &str, sheets: &[(&str, Option<&str>)]) {
        let mut state = self.state.lock().unwrap();
        state
            .metadata
            .insert(doc(id), metadata(id, name, MIME_SPREADSHEET, marker, &[FOLDER]));
        state.sheets.insert(
            doc(id),
            sheets
                .iter()
                .map(|(t, c)| (t.to_string(), c.map(str::to_string)))
                .collect(),
        );
    }

    /// Changes the text and the modification marker of a document
    pub fn edit(&self, id: &str, marker: &str, text: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(m) = state.metadata.get_mut(&doc(id)) {
            m.modified = ModifiedMarker::new(marker);
        }
        state.texts.insert(doc(id), text.to_string());
    }

    pub fn set_parents(&self, id: &str, parents: &[&str]) {
        let mut state = self.state.lock().unwrap();
        if let Some(m) = state.metadata.get_mut(&doc(id)) {
            m.parents = parents.iter().map(|p| p.to_string()).collect();
        }
    }

    pub fn trash(&self, id: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(m) = state.metadata.get_mut(&doc(id)) {
            m.trashed = true;
        }
    }

    pub fn fail_metadata(&self, id: &str) {
        self.state.lock().unwrap().failing_metadata.insert(doc(id));
    }

    pub fn hang_metadata(&self, id: &str) {
        self.state.lock().unwrap().hanging_metadata.insert(doc(id));
    }

    /// Answers every later call carrying `bearer` with a 401
    pub fn revoke(&self, bearer: &str) {
        self.state.lock().unwrap().revoked.insert(bearer.to_string());
    }

    /// Number of store calls made so far
    pub fn calls(&self) -> usize {
        self.state.lock().unwrap().bearers.len()
    }

    pub fn bearers(&self) -> Vec<String> {
        self.state.lock().unwrap().bearers.clone()
    }

    /// Programs the page returned when listing changes from `from`
    pub fn set_changes(&self, from: &str, entries: &[(&str, bool)], next: Next) {
        let (next_page_token, new_start_cursor) = match next {
            Next::Page(c) => (Some(cursor(c)), None),
            Next::CaughtUp(c) => (None, Some(cursor(c))),
        };
        let page = ChangePage {
            changes: entries
                .iter()
                .map(|(id, removed)| ChangeEntry {
                    id: doc(id),
                    removed: *removed,
                })
                .collect(),
            next_page_token,
            new_start_cursor,
        };
        self.state
            .lock()
            .unwrap()
            .changes
            .insert(from.to_string(), ChangeResponse::Page(page));
    }

    pub fn set_change_response(&self, from: &str, response: ChangeResponse) {
        self.state
            .lock()
            .unwrap()
            .changes
            .insert(from.to_string(), response);
    }

    /// Queues the cursors handed out by successive `get_start_cursor` calls
    pub fn set_start_cursors(&self, cursors: &[&str]) {
        self.state.lock().unwrap().start_cursors = cursors.iter().map(|c| c.to_string()).collect();
    }

    pub fn content_fetches(&self) -> Vec<DocumentId> {
        self.state.lock().unwrap().content_fetches.clone()
    }

    pub fn stopped(&self) -> Vec<ChannelId> {
        self.state.lock().unwrap().stopped.clone()
    }

    pub fn watch_requests(&self) -> usize {
        self.state.lock().unwrap().watch_requests.len()
    }

    /// Makes the next `watch_document` call wait; returns (entered, release)
    pub fn gate_watches(&self) -> (Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        *self.watch_gate.lock().unwrap() = Some((Arc::clone(&entered), Arc::clone(&release)));
        (entered, release)
    }

    fn admit(&self, bearer: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.bearers.push(bearer.to_string());
        if state.revoked.contains(bearer) {
            return Err(anyhow::anyhow!("401 invalid credentials").context(CredentialRejected));
        }
        Ok(())
    }

    fn channel(&self, request: &ChannelRequest) -> anyhow::Result<ChannelInfo> {
        let mut state = self.state.lock().unwrap();
        if state.reject_watches {
            anyhow::bail!("push notifications are not enabled for this address");
        }
        state.watch_requests.push(request.clone());
        Ok(ChannelInfo {
            channel_id: request.channel_id.clone(),
            resource_id: Some(format!("res-{}", state.watch_requests.len())),
            expires_at: Some(Utc::now() + Duration::hours(1)),
        })
    }
}

pub enum Next<'a> {
    Page(&'a str),
    CaughtUp(&'a str),
}

pub fn metadata(id: &str, name: &str, mime: &str, marker: &str, parents: &[&str]) -> DocumentMetadata {
    DocumentMetadata {
        id: doc(id),
        name: name.to_string(),
        mime_type: mime.to_string(),
        modified: ModifiedMarker::new(marker),
        parents: parents.iter().map(|p| p.to_string()).collect(),
        trashed: false,
    }
}

#[async_trait::async_trait]
impl IDocumentStore for FakeStore {
    async fn watch_document(
        &self,
        bearer: &str,
        _id: &DocumentId,
        request: &ChannelRequest,
    ) -> anyhow::Result<ChannelInfo> {
        self.admit(bearer)?;
        let gate = self.watch_gate.lock().unwrap().take();
        if let Some((entered, release)) = gate {
            entered.notify_one();
            release.notified().await;
        }
        self.channel(request)
    }

    async fn watch_changes(
        &self,
        bearer: &str,
        _cursor: &ChangeCursor,
        request: &ChannelRequest,
    ) -> anyhow::Result<ChannelInfo> {
        self.admit(bearer)?;
        self.channel(request)
    }

    async fn stop_channel(
        &self,
        bearer: &str,
        channel_id: &ChannelId,
        _resource_id: Option<&str>,
    ) -> anyhow::Result<()> {
        self.admit(bearer)?;
        self.state.lock().unwrap().stopped.push(channel_id.clone());
        Ok(())
    }

    async fn get_metadata(&self, bearer: &str, id: &DocumentId) -> anyhow::Result<DocumentMetadata> {
        self.admit(bearer)?;
        let hang = self.state.lock().unwrap().hanging_metadata.contains(id);
        if hang {
            std::future::pending::<()>().await;
        }
        let state = self.state.lock().unwrap();
        if state.failing_metadata.contains(id) {
            anyhow::bail!("500 backend error");
        }
        state
            .metadata
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("404 file not found: {id}"))
    }

    async fn list_folder(
        &self,
        bearer: &str,
        folder: &FolderId,
        page_token: Option<&str>,
    ) -> anyhow::Result<FolderPage> {
        self.admit(bearer)?;
        let state = self.state.lock().unwrap();
        let mut items: Vec<DocumentMetadata> = state
            .metadata
            .values()
            .filter(|m| !m.trashed && m.is_child_of(folder))
            .cloned()
            .collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));

        let offset: usize = page_token.map(|t| t.parse().unwrap()).unwrap_or(0);
        let end = (offset + state.folder_page_size).min(items.len());
        let next_page_token = (end < items.len()).then(|| end.to_string());
        Ok(FolderPage {
            items: items[offset..end].to_vec(),
            next_page_token,
        })
    }

    async fn get_start_cursor(&self, bearer: &str) -> anyhow::Result<ChangeCursor> {
        self.admit(bearer)?;
        let mut state = self.state.lock().unwrap();
        let token = if state.start_cursors.len() > 1 {
            state.start_cursors.remove(0)
        } else {
            state.start_cursors[0].clone()
        };
        Ok(cursor(&token))
    }

    async fn list_changes(&self, bearer: &str, from: &ChangeCursor) -> anyhow::Result<ChangePage> {
        self.admit(bearer)?;
        let mut state = self.state.lock().unwrap();
        state.listed_cursors.push(from.to_string());
        match state.changes.get(from.as_str()).cloned() {
            Some(ChangeResponse::Page(page)) => Ok(page),
            Some(ChangeResponse::Invalidated) => Err(CursorInvalidated {
                cursor: from.to_string(),
            }
            .into()),
            Some(ChangeResponse::Unavailable) => anyhow::bail!("503 service unavailable"),
            None => Ok(ChangePage {
                changes: Vec::new(),
                next_page_token: None,
                new_start_cursor: Some(from.clone()),
            }),
        }
    }

    async fn download(&self, bearer: &str, id: &DocumentId) -> anyhow::Result<Vec<u8>> {
        self.admit(bearer)?;
        anyhow::bail!("no binary content for {id}")
    }

    async fn export(&self, bearer: &str, id: &DocumentId, _target_mime: &str) -> anyhow::Result<Vec<u8>> {
        self.admit(bearer)?;
        anyhow::bail!("no export for {id}")
    }

    async fn get_structured_document(
        &self,
        bearer: &str,
        id: &DocumentId,
    ) -> anyhow::Result<StructuredDocument> {
        self.admit(bearer)?;
        let mut state = self.state.lock().unwrap();
        state.content_fetches.push(id.clone());
        let text = state
            .texts
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no document {id}"))?;
        Ok(StructuredDocument {
            title: id.to_string(),
            content: text
                .lines()
                .map(|line| StructuralElement {
                    paragraph: Some(Paragraph {
                        elements: vec![ParagraphElement {
                            text_run: Some(TextRun {
                                content: line.to_string(),
                            }),
                        }],
                    }),
                })
                .collect(),
        })
    }

    async fn list_sheet_titles(&self, bearer: &str, id: &DocumentId) -> anyhow::Result<Vec<String>> {
        self.admit(bearer)?;
        let mut state = self.state.lock().unwrap();
        state.content_fetches.push(id.clone());
        Ok(state
            .sheets
            .get(id)
            .map(|sheets| sheets.iter().map(|(t, _)| t.clone()).collect())
            .unwrap_or_default())
    }

    async fn export_sheet_csv(
        &self,
        bearer: &str,
        id: &DocumentId,
        sheet_title: &str,
    ) -> anyhow::Result<Vec<u8>> {
        self.admit(bearer)?;
        let state = self.state.lock().unwrap();
        state
            .sheets
            .get(id)
            .and_then(|sheets| sheets.iter().find(|(t, _)| t == sheet_title))
            .and_then(|(_, csv)| csv.clone())
            .map(String::into_bytes)
            .ok_or_else(|| anyhow::anyhow!("export of sheet '{sheet_title}' failed"))
    }
}

// ============================================================================
// Credentials and sink
// ============================================================================

/// Credential provider handing out `token-{n}` on the n-th load
pub struct FixedCredentials {
    stored: bool,
    loads: AtomicUsize,
    refreshes: AtomicUsize,
}

impl FixedCredentials {
    pub fn valid() -> Self {
        Self::with_stored(true)
    }

    pub fn missing() -> Self {
        Self::with_stored(false)
    }

    fn with_stored(stored: bool) -> Self {
        Self {
            stored,
            loads: AtomicUsize::new(0),
            refreshes: AtomicUsize::new(0),
        }
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ICredentialProvider for FixedCredentials {
    async fn get_credential(&self) -> anyhow::Result<Option<Credential>> {
        let n = self.loads.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(self.stored.then(|| Credential {
            access_token: format!("token-{n}"),
            refresh_token: Some("refresh".to_string()),
            expires_at: Utc::now() + Duration::hours(1),
        }))
    }

    async fn refresh_if_needed(&self, credential: &Credential) -> anyhow::Result<Credential> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(credential.clone())
    }

    async fn persist(&self, _credential: &Credential) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<(DocumentEvent, SubscriberScope)>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<(DocumentEvent, SubscriberScope)> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

#[async_trait::async_trait]
impl INotificationSink for RecordingSink {
    async fn deliver(&self, event: &DocumentEvent, scope: &SubscriberScope) -> anyhow::Result<usize> {
        self.events
            .lock()
            .unwrap()
            .push((event.clone(), scope.clone()));
        Ok(1)
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub store: Arc<FakeStore>,
    pub sink: Arc<RecordingSink>,
    pub credentials: Arc<FixedCredentials>,
    pub reconciler: Arc<ChangeReconciler>,
}

pub fn settings() -> ReconcilerSettings {
    ReconcilerSettings {
        callback_address: "https://hooks.example.com/notifications".to_string(),
        remote_timeout: std::time::Duration::from_secs(5),
        fetch_concurrency: 4,
        max_change_pages: 10,
    }
}

pub fn harness() -> Harness {
    harness_with(FixedCredentials::valid(), settings())
}

pub fn harness_with(credentials: FixedCredentials, settings: ReconcilerSettings) -> Harness {
    let store = Arc::new(FakeStore::new());
    let sink = Arc::new(RecordingSink::default());
    let credentials = Arc::new(credentials);
    let reconciler = Arc::new(ChangeReconciler::new(
        store.clone(),
        credentials.clone(),
        sink.clone(),
        settings,
    ));
    Harness {
        store,
        sink,
        credentials,
        reconciler,
    }
}

/// Folder-change notification as delivered by the store
pub fn changes_notification() -> docwatch_monitor::Notification {
    docwatch_monitor::Notification {
        resource_uri: "https://www.googleapis.com/drive/v3/changes?alt=json&pageToken=1".to_string(),
        channel_id: Some("folder-1-1".to_string()),
        resource_state: Some("change".to_string()),
    }
}

/// File-scoped notification as delivered by the store
pub fn file_notification(id: &str) -> docwatch_monitor::Notification {
    docwatch_monitor::Notification {
        resource_uri: format!("https://www.googleapis.com/drive/v3/files/{id}?alt=json"),
        channel_id: Some(format!("{id}-1")),
        resource_state: Some("update".to_string()),
    }
}
