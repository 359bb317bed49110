//! Change reconciler
//!
//! Turns "something changed, go check" push notifications into deduplicated,
//! normalized document events.
//!
//! ## Reconciliation Flow
//!
//! 1. **Route**: the notification's resource URI names either one file
//!    (`/files/{id}`) or the change feed (`/changes`); `sync` handshakes and
//!    unknown resources are ignored
//! 2. **File path**: fetch metadata, compare the modification marker with the
//!    ledger, and on a change normalize and publish to the document's room
//! 3. **Folder path**: list changes since the stored cursor, process the page
//!    entries concurrently, publish changed documents to everyone, then
//!    advance the cursor; repeat until caught up or the page budget is spent
//! 4. **Invalidation**: a rejected cursor triggers a full re-scan of the
//!    folder before a fresh cursor is installed
//!
//! ## Concurrency
//!
//! - Work on one document (metadata, ledger compare, fetch, publish) runs
//!   under that document's lock, so a stale fetch can never overwrite a newer
//!   observation.
//! - Folder cycles, folder setup and cursor recovery are serialized by one
//!   cycle lock; the cursor itself only moves by compare-and-swap.
//! - Stopping a watch removes it from the registry immediately. In-flight
//!   work completes, but cursor advances and renewals for the stopped target
//!   no longer apply.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};

use docwatch_core::config::MonitorConfig;
use docwatch_core::domain::{
    ChangeCursor, ChannelId, ContentKind, DocumentId, DocumentRecord, FolderId, WatchChannel,
    WatchTarget,
};
use docwatch_core::ports::{
    ChangeEntry, ChannelRequest, CursorInvalidated, DocumentMetadata, ICredentialProvider,
    IDocumentStore, INotificationSink, SubscriberScope,
};

use crate::dispatcher::NotificationDispatcher;
use crate::keyed_lock::KeyedLocks;
use crate::ledger::{ModificationLedger, Observation};
use crate::normalizer::ContentNormalizer;
use crate::registry::{FolderWatch, WatchRegistry};
use crate::remote::RemoteStore;
use crate::MonitorError;

// ============================================================================
// Settings
// ============================================================================

/// Tunables of the reconciler
#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    /// Public address handed to the store for push delivery
    pub callback_address: String,
    /// Bound applied to every remote call
    pub remote_timeout: Duration,
    /// Maximum documents fetched and normalized in parallel
    pub fetch_concurrency: usize,
    /// Maximum change pages followed per notification
    pub max_change_pages: u32,
}

impl ReconcilerSettings {
    /// Derives settings from the `monitor` configuration section
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            callback_address: config.callback_address.clone(),
            remote_timeout: config.remote_timeout(),
            fetch_concurrency: config.fetch_concurrency,
            max_change_pages: config.max_change_pages,
        }
    }
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self::from_config(&MonitorConfig::default())
    }
}

// ============================================================================
// Notifications
// ============================================================================

/// An inbound push notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Resource reference (`X-Goog-Resource-URI`)
    pub resource_uri: String,
    /// Channel the notification arrived on (`X-Goog-Channel-ID`)
    pub channel_id: Option<String>,
    /// Resource state (`X-Goog-Resource-State`), e.g. `sync`, `update`, `change`
    pub resource_state: Option<String>,
}

/// What a notification refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifiedResource {
    /// A single watched file
    File(DocumentId),
    /// The change feed of the watched folder
    Changes,
}

impl Notification {
    /// Creates a notification carrying only a resource reference
    pub fn new(resource_uri: impl Into<String>) -> Self {
        Self {
            resource_uri: resource_uri.into(),
            channel_id: None,
            resource_state: None,
        }
    }

    /// Returns true for the handshake sent when a channel is created
    pub fn is_sync(&self) -> bool {
        self.resource_state.as_deref() == Some("sync")
    }

    /// Classifies the resource reference
    pub fn resource(&self) -> Option<NotifiedResource> {
        parse_resource(&self.resource_uri)
    }
}

/// Classifies a resource reference by its path segments
///
/// `.../files/{id}...` is file-scoped; a path with a `changes` segment is
/// folder-scoped. Anything else is unrecognized.
pub fn parse_resource(uri: &str) -> Option<NotifiedResource> {
    let path = uri.split(['?', '#']).next().unwrap_or_default();
    let mut segments = path.split('/').filter(|s| !s.is_empty());

    while let Some(segment) = segments.next() {
        match segment {
            "files" => {
                return segments
                    .next()
                    .and_then(|id| DocumentId::new(id.to_string()).ok())
                    .map(NotifiedResource::File);
            }
            "changes" => return Some(NotifiedResource::Changes),
            _ => {}
        }
    }
    None
}

// ============================================================================
// Reports and states
// ============================================================================

/// Per-target state derived from the registry and the locks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    /// No watch is registered
    Idle,
    /// A channel is active and a baseline exists
    Watching,
    /// A notification for the target is being processed
    Reconciling,
}

impl std::fmt::Display for TargetState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetState::Idle => write!(f, "idle"),
            TargetState::Watching => write!(f, "watching"),
            TargetState::Reconciling => write!(f, "reconciling"),
        }
    }
}

/// Summary of one reconciliation cycle or scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Events published
    pub dispatched: u32,
    /// Documents whose marker matched the ledger
    pub unchanged: u32,
    /// Documents forgotten (removed or trashed)
    pub removed: u32,
    /// Documents skipped because they are outside the monitored folder
    pub skipped: u32,
    /// Documents whose metadata fetch or publish failed
    pub failed: u32,
    /// Changed documents that produced no text
    pub no_content: u32,
    /// Change pages processed
    pub pages: u32,
    /// Whether the folder was re-scanned after cursor invalidation
    pub rescanned: bool,
    /// Whether the cycle ended early on a cycle-level failure
    pub aborted: bool,
    /// Whether the notification did not match any active watch
    pub ignored: bool,
    /// Cursor stored at the end of the cycle, if it moved
    pub cursor: Option<ChangeCursor>,
}

impl ReconcileReport {
    fn ignored() -> Self {
        Self {
            ignored: true,
            ..Self::default()
        }
    }

    fn absorb(&mut self, other: &ReconcileReport) {
        self.dispatched += other.dispatched;
        self.unchanged += other.unchanged;
        self.removed += other.removed;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.no_content += other.no_content;
    }
}

/// Result of a folder watch setup
#[derive(Debug, Clone)]
pub struct FolderRegistration {
    /// The new folder channel
    pub channel: WatchChannel,
    /// Cursor acquired before the initial scan
    pub cursor: ChangeCursor,
    /// Folder whose watch was displaced, if any
    pub replaced: Option<FolderId>,
    /// Outcome of the initial scan
    pub initial_scan: ReconcileReport,
}

/// Outcome of one per-document unit of work
enum Outcome {
    Dispatch {
        id: DocumentId,
        name: String,
        text: String,
    },
    Unchanged,
    NoContent,
    Removed,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Copy)]
enum ScanMode {
    /// Folder setup: seed the ledger and publish every document
    Initial,
    /// Cursor recovery: publish only documents whose marker changed
    Rescan,
}

#[derive(Debug, Clone, Copy)]
enum Audience {
    Everyone,
    DocumentRoom,
}

fn registration_error(target: &WatchTarget, error: anyhow::Error) -> MonitorError {
    match error.downcast::<MonitorError>() {
        Ok(monitor_error) => monitor_error,
        Err(error) => MonitorError::Registration {
            target: target.to_string(),
            reason: format!("{error:#}"),
        },
    }
}

// ============================================================================
// ChangeReconciler
// ============================================================================

/// Owns the ledger and the registry and reacts to push notifications
pub struct ChangeReconciler {
    remote: Arc<RemoteStore>,
    ledger: ModificationLedger,
    registry: WatchRegistry,
    normalizer: ContentNormalizer,
    dispatcher: NotificationDispatcher,
    document_locks: KeyedLocks<DocumentId>,
    folder_cycle: Mutex<()>,
    settings: ReconcilerSettings,
}

impl ChangeReconciler {
    pub fn new(
        store: Arc<dyn IDocumentStore>,
        credentials: Arc<dyn ICredentialProvider>,
        sink: Arc<dyn INotificationSink>,
        settings: ReconcilerSettings,
    ) -> Self {
        let remote = Arc::new(RemoteStore::new(store, credentials, settings.remote_timeout));
        Self {
            normalizer: ContentNormalizer::new(Arc::clone(&remote)),
            dispatcher: NotificationDispatcher::new(sink),
            remote,
            ledger: ModificationLedger::new(),
            registry: WatchRegistry::new(),
            document_locks: KeyedLocks::new(),
            folder_cycle: Mutex::new(()),
            settings,
        }
    }

    // ------------------------------------------------------------------------
    // Watch setup
    // ------------------------------------------------------------------------

    /// Watches a single document
    ///
    /// Re-registering replaces the previous channel. The current marker
    /// becomes the baseline when the document has no record yet; an existing
    /// record is kept so a pending change is still reported. Nothing is
    /// published.
    ///
    /// # Errors
    /// [`MonitorError::Auth`] without a usable credential,
    /// [`MonitorError::Registration`] when the store rejects the document or
    /// the channel, [`MonitorError::Timeout`] when the store does not answer.
    #[instrument(skip(self), fields(document_id = %id))]
    pub async fn register_file_watch(&self, id: &DocumentId) -> Result<WatchChannel, MonitorError> {
        let guard = self.document_locks.lock(id).await;
        let established = self.establish_file_watch(id).await;
        drop(guard);
        self.document_locks.prune();
        let (channel, previous) = established?;

        if let Some(previous) = previous.filter(|p| p.id != channel.id) {
            debug!(previous_channel = %previous.id, "Replacing file channel");
            self.stop_remote(&previous).await;
        }

        info!(
            channel_id = %channel.id,
            expires_at = ?channel.expires_at,
            "File watch registered"
        );
        Ok(channel)
    }

    /// Checks the document, opens its channel and seeds the ledger; returns
    /// the new channel and the one it replaced
    async fn establish_file_watch(
        &self,
        id: &DocumentId,
    ) -> Result<(WatchChannel, Option<WatchChannel>), MonitorError> {
        let target = WatchTarget::File(id.clone());
        let metadata = self
            .remote
            .call("get_metadata", |store, bearer| async move {
                store.get_metadata(&bearer, id).await
            })
            .await
            .map_err(|e| registration_error(&target, e))?;
        if metadata.trashed {
            return Err(MonitorError::Registration {
                target: target.to_string(),
                reason: "document is in the trash".to_string(),
            });
        }
        if ContentKind::from_mime(&metadata.mime_type).is_folder() {
            return Err(MonitorError::Registration {
                target: target.to_string(),
                reason: "target is a folder; register a folder watch instead".to_string(),
            });
        }

        let channel = self.open_channel(&target, None).await?;
        let previous = self.registry.insert_file(id, channel.clone());
        if !self.ledger.seed(id, &metadata.name, &metadata.modified) {
            debug!("Keeping existing ledger record as baseline");
        }
        Ok((channel, previous))
    }

    /// Watches the change feed of a folder
    ///
    /// Acquires a start cursor, scans the folder (seeding the ledger and
    /// publishing every document to everyone), then opens the channel. Only
    /// one folder is watched at a time: a previous folder watch is replaced
    /// and its cursor discarded.
    ///
    /// # Errors
    /// As for [`register_file_watch`](Self::register_file_watch); a failed
    /// folder enumeration is a registration error.
    #[instrument(skip(self), fields(folder_id = %folder_id))]
    pub async fn register_folder_watch(
        &self,
        folder_id: &FolderId,
    ) -> Result<FolderRegistration, MonitorError> {
        let _cycle = self.folder_cycle.lock().await;
        let target = WatchTarget::Folder(folder_id.clone());

        let cursor = self
            .start_cursor()
            .await
            .map_err(|e| registration_error(&target, e))?;

        let initial_scan = self.scan_folder(folder_id, ScanMode::Initial).await;
        self.document_locks.prune();
        let initial_scan = initial_scan.map_err(|e| registration_error(&target, e))?;

        let channel = self.open_channel(&target, Some(&cursor)).await?;

        let displaced = self.registry.install_folder(FolderWatch {
            folder_id: folder_id.clone(),
            channel: channel.clone(),
            cursor: cursor.clone(),
        });

        let replaced = match displaced {
            Some(previous) => {
                if previous.folder_id == *folder_id {
                    info!("Re-registered folder watch");
                } else {
                    warn!(
                        previous_folder = %previous.folder_id,
                        "Only one folder can be watched; replacing the previous folder watch"
                    );
                }
                self.stop_remote(&previous.channel).await;
                Some(previous.folder_id)
            }
            None => None,
        };

        info!(
            channel_id = %channel.id,
            cursor = %cursor,
            documents = initial_scan.dispatched,
            "Folder watch registered"
        );
        Ok(FolderRegistration {
            channel,
            cursor,
            replaced,
            initial_scan,
        })
    }

    /// Requests a new channel for `target` and swaps it in
    ///
    /// If the target was stopped (or renewed elsewhere) while the request was
    /// in flight, the new channel is closed and nothing is re-armed.
    #[instrument(skip(self), fields(target = %target))]
    pub async fn renew(&self, target: &WatchTarget) -> Result<WatchChannel, MonitorError> {
        let current = self
            .registry
            .channel_for(target)
            .ok_or_else(|| MonitorError::NotWatched(target.to_string()))?;

        let cursor = match target {
            WatchTarget::Folder(_) => self.registry.folder_cursor(),
            WatchTarget::File(_) => None,
        };
        let channel = self.open_channel(target, cursor.as_ref()).await?;

        let installed = match target {
            WatchTarget::File(id) => {
                self.registry
                    .replace_file_if(id, &current.id, channel.clone())
            }
            WatchTarget::Folder(folder_id) => {
                self.registry
                    .replace_folder_channel_if(folder_id, &current.id, channel.clone())
            }
        };

        if !installed {
            info!(channel_id = %channel.id, "Target changed during renewal; closing new channel");
            self.stop_remote(&channel).await;
            return Err(MonitorError::NotWatched(target.to_string()));
        }

        if current.id != channel.id {
            self.stop_remote(&current).await;
        }
        info!(
            channel_id = %channel.id,
            expires_at = ?channel.expires_at,
            "Channel renewed"
        );
        Ok(channel)
    }

    /// Renews every channel expiring within `margin`
    pub async fn renew_expiring(
        &self,
        margin: chrono::Duration,
    ) -> Vec<(WatchTarget, Result<WatchChannel, MonitorError>)> {
        let mut results = Vec::new();
        for channel in self.registry.expiring_within(margin) {
            let target = channel.target.clone();
            let result = self.renew(&target).await;
            if let Err(e) = &result {
                warn!(target = %target, error = %e, "Channel renewal failed");
            }
            results.push((target, result));
        }
        results
    }

    /// Stops watching `target`
    ///
    /// Takes effect for future notifications immediately; cancelling the
    /// channel with the store is best-effort.
    #[instrument(skip(self), fields(target = %target))]
    pub async fn stop(&self, target: &WatchTarget) -> Result<WatchChannel, MonitorError> {
        let removed = match target {
            WatchTarget::File(id) => self.registry.remove_file(id),
            WatchTarget::Folder(folder_id) => {
                self.registry.remove_folder(folder_id).map(|w| w.channel)
            }
        }
        .ok_or_else(|| MonitorError::NotWatched(target.to_string()))?;

        info!(channel_id = %removed.id, "Watch stopped");
        self.stop_remote(&removed).await;
        Ok(removed)
    }

    /// Stops the folder watch, whichever folder it targets
    pub async fn stop_folder(&self) -> Result<WatchChannel, MonitorError> {
        let watch = self
            .registry
            .folder()
            .ok_or_else(|| MonitorError::NotWatched("folder".to_string()))?;
        self.stop(&WatchTarget::Folder(watch.folder_id)).await
    }

    /// Stops every watch; returns how many were stopped
    pub async fn stop_all(&self) -> usize {
        let mut stopped = 0;
        for channel in self.registry.channels() {
            if self.stop(&channel.target).await.is_ok() {
                stopped += 1;
            }
        }
        stopped
    }

    // ------------------------------------------------------------------------
    // Notification handling
    // ------------------------------------------------------------------------

    /// Processes one push notification
    ///
    /// Never fails: every error degrades to "no update emitted" and is
    /// reflected in the report.
    #[instrument(
        skip(self, notification),
        fields(resource = %notification.resource_uri, channel_id = ?notification.channel_id)
    )]
    pub async fn handle_notification(&self, notification: &Notification) -> ReconcileReport {
        if notification.is_sync() {
            debug!("Channel handshake; nothing to reconcile");
            return ReconcileReport::ignored();
        }

        match notification.resource() {
            Some(NotifiedResource::File(id)) => self.reconcile_file(&id).await,
            Some(NotifiedResource::Changes) => self.reconcile_folder().await,
            None => {
                debug!("Unrecognized resource reference; ignoring");
                ReconcileReport::ignored()
            }
        }
    }

    /// Checks one watched document and publishes it to its room if it changed
    #[instrument(skip(self), fields(document_id = %id))]
    pub async fn reconcile_file(&self, id: &DocumentId) -> ReconcileReport {
        if !self.registry.is_file_watched(id) {
            debug!("No file watch for document; ignoring");
            return ReconcileReport::ignored();
        }

        let mut report = ReconcileReport::default();
        let guard = self.document_locks.lock(id).await;
        if !self.registry.is_file_watched(id) {
            debug!("File watch stopped while waiting; ignoring");
            drop(guard);
            self.document_locks.prune();
            return ReconcileReport::ignored();
        }

        let outcome = match self.fetch_metadata(id).await {
            None => Outcome::Failed,
            Some(metadata) if metadata.trashed => {
                self.ledger.forget(id);
                Outcome::Removed
            }
            Some(metadata) => {
                match self
                    .ledger
                    .observe(id, &metadata.name, &metadata.modified)
                {
                    Observation::Unchanged => {
                        debug!(modified = %metadata.modified, "Modification marker unchanged");
                        Outcome::Unchanged
                    }
                    Observation::Changed => self.fetch_content(&metadata).await,
                }
            }
        };

        self.settle(outcome, Audience::DocumentRoom, &mut report)
            .await;
        drop(guard);
        self.document_locks.prune();
        report
    }

    /// Processes the change feed of the watched folder
    #[instrument(skip(self))]
    pub async fn reconcile_folder(&self) -> ReconcileReport {
        let _cycle = self.folder_cycle.lock().await;

        let Some(watch) = self.registry.folder() else {
            debug!("No folder watch; ignoring");
            return ReconcileReport::ignored();
        };

        let mut report = ReconcileReport::default();
        let mut cursor = watch.cursor.clone();
        for _ in 0..self.settings.max_change_pages.max(1) {
            let listed = self
                .remote
                .call("list_changes", |store, bearer| {
                    let cursor = &cursor;
                    async move { store.list_changes(&bearer, cursor).await }
                })
                .await;

            let mut page = match listed {
                Ok(page) => page,
                Err(e) if e.downcast_ref::<CursorInvalidated>().is_some() => {
                    warn!(
                        cursor = %cursor,
                        error = %MonitorError::CursorInvalidated(cursor.to_string()),
                        "Re-scanning folder"
                    );
                    self.recover_cursor(&watch.folder_id, &cursor, &mut report)
                        .await;
                    break;
                }
                Err(e) => {
                    warn!(cursor = %cursor, error = %format!("{e:#}"), "Listing changes failed; ending cycle");
                    report.aborted = true;
                    break;
                }
            };

            let changes = std::mem::take(&mut page.changes);
            self.process_changes(&watch.folder_id, changes, &mut report)
                .await;
            report.pages += 1;

            let Some(next) = page.next_cursor().cloned() else {
                break;
            };
            if !self
                .registry
                .advance_cursor(&watch.folder_id, &cursor, next.clone())
            {
                info!("Folder watch stopped during cycle; cursor left as is");
                break;
            }
            cursor = next;
            report.cursor = Some(cursor.clone());

            if page.is_caught_up() {
                break;
            }
        }

        self.document_locks.prune();
        info!(
            pages = report.pages,
            dispatched = report.dispatched,
            unchanged = report.unchanged,
            removed = report.removed,
            skipped = report.skipped,
            failed = report.failed,
            rescanned = report.rescanned,
            "Folder cycle complete"
        );
        report
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Derived state of a target
    pub fn state(&self, target: &WatchTarget) -> TargetState {
        if self.registry.channel_for(target).is_none() {
            return TargetState::Idle;
        }
        let busy = match target {
            WatchTarget::File(id) => self.document_locks.is_locked(id),
            WatchTarget::Folder(_) => self.folder_cycle.try_lock().is_err(),
        };
        if busy {
            TargetState::Reconciling
        } else {
            TargetState::Watching
        }
    }

    /// Last observed record of a document
    pub fn document(&self, id: &DocumentId) -> Option<DocumentRecord> {
        self.ledger.get(id)
    }

    /// Number of documents in the ledger
    pub fn tracked_documents(&self) -> usize {
        self.ledger.len()
    }

    /// Channel of a watched document
    pub fn file_channel(&self, id: &DocumentId) -> Option<WatchChannel> {
        self.registry.file(id)
    }

    /// Snapshot of the folder watch
    pub fn folder_watch(&self) -> Option<FolderWatch> {
        self.registry.folder()
    }

    /// Every active channel
    pub fn channels(&self) -> Vec<WatchChannel> {
        self.registry.channels()
    }

    /// Per-document locks currently allocated
    ///
    /// Idle locks are released at the end of every cycle, so outside a cycle
    /// this counts only documents still being worked on.
    pub fn lock_count(&self) -> usize {
        self.document_locks.len()
    }

    /// Sequence number of the last published event
    pub async fn last_sequence(&self) -> u64 {
        self.dispatcher.last_sequence().await
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    async fn open_channel(
        &self,
        target: &WatchTarget,
        cursor: Option<&ChangeCursor>,
    ) -> Result<WatchChannel, MonitorError> {
        let created_at = Utc::now();
        let request = &ChannelRequest {
            channel_id: ChannelId::derive(target.as_str(), created_at),
            address: self.settings.callback_address.clone(),
        };

        let info = match target {
            WatchTarget::File(id) => {
                self.remote
                    .call("watch_document", |store, bearer| async move {
                        store.watch_document(&bearer, id, request).await
                    })
                    .await
            }
            WatchTarget::Folder(_) => {
                let cursor = cursor.ok_or_else(|| MonitorError::Registration {
                    target: target.to_string(),
                    reason: "no change cursor to watch from".to_string(),
                })?;
                self.remote
                    .call("watch_changes", |store, bearer| async move {
                        store.watch_changes(&bearer, cursor, request).await
                    })
                    .await
            }
        }
        .map_err(|e| registration_error(target, e))?;

        Ok(WatchChannel {
            id: info.channel_id,
            resource_id: info.resource_id,
            target: target.clone(),
            created_at,
            expires_at: info.expires_at,
        })
    }

    async fn stop_remote(&self, channel: &WatchChannel) {
        let result = self
            .remote
            .call("stop_channel", |store, bearer| async move {
                store
                    .stop_channel(&bearer, &channel.id, channel.resource_id.as_deref())
                    .await
            })
            .await;
        if let Err(e) = result {
            warn!(channel_id = %channel.id, error = %format!("{e:#}"), "Failed to cancel channel");
        }
    }

    async fn start_cursor(&self) -> anyhow::Result<ChangeCursor> {
        self.remote
            .call("get_start_cursor", |store, bearer| async move {
                store.get_start_cursor(&bearer).await
            })
            .await
    }

    async fn fetch_metadata(&self, id: &DocumentId) -> Option<DocumentMetadata> {
        let fetched = self
            .remote
            .call("get_metadata", |store, bearer| async move {
                store.get_metadata(&bearer, id).await
            })
            .await;
        match fetched {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                let error = MonitorError::Fetch {
                    document_id: id.to_string(),
                    reason: format!("{e:#}"),
                };
                warn!(document_id = %id, error = %error, "Metadata fetch failed");
                None
            }
        }
    }

    async fn fetch_content(&self, metadata: &DocumentMetadata) -> Outcome {
        match self
            .normalizer
            .normalize(&metadata.id, &metadata.mime_type)
            .await
        {
            Some(text) => Outcome::Dispatch {
                id: metadata.id.clone(),
                name: metadata.name.clone(),
                text,
            },
            None => Outcome::NoContent,
        }
    }

    async fn settle(&self, outcome: Outcome, audience: Audience, report: &mut ReconcileReport) {
        match outcome {
            Outcome::Dispatch { id, name, text } => {
                let scope = match audience {
                    Audience::Everyone => SubscriberScope::Broadcast,
                    Audience::DocumentRoom => SubscriberScope::Room(id.clone()),
                };
                match self.dispatcher.publish(&id, &name, &text, scope).await {
                    Some(_) => report.dispatched += 1,
                    None => report.failed += 1,
                }
            }
            Outcome::Unchanged => report.unchanged += 1,
            Outcome::NoContent => report.no_content += 1,
            Outcome::Removed => report.removed += 1,
            Outcome::Skipped => report.skipped += 1,
            Outcome::Failed => report.failed += 1,
        }
    }

    /// Enumerates the folder and processes every child
    ///
    /// # Errors
    /// Only a failed enumeration; per-document failures are counted.
    async fn scan_folder(
        &self,
        folder_id: &FolderId,
        mode: ScanMode,
    ) -> anyhow::Result<ReconcileReport> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let current = page_token.as_deref();
            let page = self
                .remote
                .call("list_folder", |store, bearer| async move {
                    store.list_folder(&bearer, folder_id, current).await
                })
                .await?;
            items.extend(page.items);
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        debug!(documents = items.len(), ?mode, "Folder enumerated");

        let mut report = ReconcileReport::default();
        let mut units = std::pin::pin!(stream::iter(items)
            .map(|metadata| self.scan_unit(metadata, mode))
            .buffered(self.settings.fetch_concurrency.max(1)));

        while let Some((outcome, guard)) = units.next().await {
            self.settle(outcome, Audience::Everyone, &mut report).await;
            drop(guard);
        }
        Ok(report)
    }

    async fn scan_unit(
        &self,
        metadata: DocumentMetadata,
        mode: ScanMode,
    ) -> (Outcome, OwnedMutexGuard<()>) {
        let guard = self.document_locks.lock(&metadata.id).await;
        let outcome = match mode {
            ScanMode::Initial => {
                self.ledger
                    .record(&metadata.id, &metadata.name, &metadata.modified);
                self.fetch_content(&metadata).await
            }
            ScanMode::Rescan => match self.ledger.observe(
                &metadata.id,
                &metadata.name,
                &metadata.modified,
            ) {
                Observation::Unchanged => Outcome::Unchanged,
                Observation::Changed => self.fetch_content(&metadata).await,
            },
        };
        (outcome, guard)
    }

    /// Processes one page of change entries
    ///
    /// Entries are fetched concurrently; events are published in page order.
    async fn process_changes(
        &self,
        folder_id: &FolderId,
        changes: Vec<ChangeEntry>,
        report: &mut ReconcileReport,
    ) {
        // One unit per document; the last entry wins.
        let mut latest: HashMap<DocumentId, usize> = HashMap::new();
        for (index, entry) in changes.iter().enumerate() {
            latest.insert(entry.id.clone(), index);
        }
        let changes: Vec<ChangeEntry> = changes
            .into_iter()
            .enumerate()
            .filter(|(index, entry)| latest.get(&entry.id) == Some(index))
            .map(|(_, entry)| entry)
            .collect();

        let mut units = std::pin::pin!(stream::iter(changes)
            .map(|entry| self.change_unit(folder_id, entry))
            .buffered(self.settings.fetch_concurrency.max(1)));

        while let Some((outcome, guard)) = units.next().await {
            self.settle(outcome, Audience::Everyone, report).await;
            drop(guard);
        }
    }

    async fn change_unit(
        &self,
        folder_id: &FolderId,
        entry: ChangeEntry,
    ) -> (Outcome, OwnedMutexGuard<()>) {
        let guard = self.document_locks.lock(&entry.id).await;

        if entry.removed {
            self.ledger.forget(&entry.id);
            debug!(document_id = %entry.id, "Document removed");
            return (Outcome::Removed, guard);
        }

        let Some(metadata) = self.fetch_metadata(&entry.id).await else {
            return (Outcome::Failed, guard);
        };

        if metadata.trashed {
            self.ledger.forget(&entry.id);
            debug!(document_id = %entry.id, "Document trashed");
            return (Outcome::Removed, guard);
        }

        if !metadata.is_child_of(folder_id) {
            info!(
                document_id = %entry.id,
                folder_id = %folder_id,
                "Changed document is outside the monitored folder; not dispatching"
            );
            return (Outcome::Skipped, guard);
        }

        let outcome = match self
            .ledger
            .observe(&metadata.id, &metadata.name, &metadata.modified)
        {
            Observation::Unchanged => {
                debug!(document_id = %entry.id, "Modification marker unchanged");
                Outcome::Unchanged
            }
            Observation::Changed => self.fetch_content(&metadata).await,
        };
        (outcome, guard)
    }

    /// Re-scans the folder and installs a fresh cursor after invalidation
    async fn recover_cursor(
        &self,
        folder_id: &FolderId,
        stale: &ChangeCursor,
        report: &mut ReconcileReport,
    ) {
        report.rescanned = true;

        let fresh = match self.start_cursor().await {
            Ok(cursor) => cursor,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "Cannot acquire a fresh cursor; retrying next cycle");
                report.aborted = true;
                return;
            }
        };

        match self.scan_folder(folder_id, ScanMode::Rescan).await {
            Ok(scan) => report.absorb(&scan),
            Err(e) => {
                warn!(error = %format!("{e:#}"), "Re-scan failed; retrying next cycle");
                report.aborted = true;
                return;
            }
        }

        if self
            .registry
            .advance_cursor(folder_id, stale, fresh.clone())
        {
            info!(cursor = %fresh, "Installed fresh change cursor");
            report.cursor = Some(fresh);
        } else {
            info!("Folder watch stopped during re-scan; cursor left as is");
        }
    }
}
