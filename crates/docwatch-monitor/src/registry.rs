//! Watch registry
//!
//! Tracks the active push channels: any number of single-file channels (one
//! per document) and at most one folder channel together with its change
//! cursor.
//!
//! ## Design Notes
//!
//! - The single folder watch is an explicit `Option`; installing a second
//!   one returns the displaced registration so the caller must deal with it.
//! - Replacement and cursor advance are compare-and-swap operations. A
//!   renewal or reconciliation that raced with `stop` (or with another
//!   renewal) fails to apply instead of resurrecting or rewinding state.

use std::sync::{Mutex, MutexGuard};

use chrono::Duration;
use dashmap::DashMap;

use docwatch_core::domain::{ChangeCursor, ChannelId, DocumentId, FolderId, WatchChannel, WatchTarget};

/// The folder-level watch and its cursor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderWatch {
    /// Monitored folder
    pub folder_id: FolderId,
    /// Channel on the change feed
    pub channel: WatchChannel,
    /// Position in the change feed; everything before it has been processed
    pub cursor: ChangeCursor,
}

/// Registry of active watch channels
#[derive(Debug, Default)]
pub struct WatchRegistry {
    files: DashMap<DocumentId, WatchChannel>,
    folder: Mutex<Option<FolderWatch>>,
}

impl WatchRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn folder_slot(&self) -> MutexGuard<'_, Option<FolderWatch>> {
        // The slot holds plain data; a panic elsewhere cannot leave it torn.
        self.folder.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ------------------------------------------------------------------------
    // File channels
    // ------------------------------------------------------------------------

    /// Records the channel for `id`, returning the one it replaces
    pub fn insert_file(&self, id: &DocumentId, channel: WatchChannel) -> Option<WatchChannel> {
        self.files.insert(id.clone(), channel)
    }

    /// Returns the channel registered for `id`
    pub fn file(&self, id: &DocumentId) -> Option<WatchChannel> {
        self.files.get(id).map(|c| c.value().clone())
    }

    /// Returns true if `id` has an active file channel
    pub fn is_file_watched(&self, id: &DocumentId) -> bool {
        self.files.contains_key(id)
    }

    /// Removes the channel for `id`
    pub fn remove_file(&self, id: &DocumentId) -> Option<WatchChannel> {
        self.files.remove(id).map(|(_, c)| c)
    }

    /// Replaces the channel for `id` only if `expected` is still registered
    pub fn replace_file_if(
        &self,
        id: &DocumentId,
        expected: &ChannelId,
        channel: WatchChannel,
    ) -> bool {
        match self.files.get_mut(id) {
            Some(mut current) if current.id == *expected => {
                *current = channel;
                true
            }
            _ => false,
        }
    }

    /// Number of file channels
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    // ------------------------------------------------------------------------
    // Folder channel
    // ------------------------------------------------------------------------

    /// Installs the folder watch, returning the one it displaces
    pub fn install_folder(&self, watch: FolderWatch) -> Option<FolderWatch> {
        self.folder_slot().replace(watch)
    }

    /// Returns a snapshot of the folder watch
    pub fn folder(&self) -> Option<FolderWatch> {
        self.folder_slot().clone()
    }

    /// Returns the current folder cursor
    pub fn folder_cursor(&self) -> Option<ChangeCursor> {
        self.folder_slot().as_ref().map(|w| w.cursor.clone())
    }

    /// Removes the folder watch if it targets `folder_id`
    pub fn remove_folder(&self, folder_id: &FolderId) -> Option<FolderWatch> {
        let mut slot = self.folder_slot();
        if slot.as_ref().is_some_and(|w| w.folder_id == *folder_id) {
            slot.take()
        } else {
            None
        }
    }

    /// Moves the cursor of `folder_id` from `expected` to `next`
    ///
    /// Fails if the watch was stopped or replaced, or if another writer
    /// already moved the cursor away from `expected`.
    pub fn advance_cursor(
        &self,
        folder_id: &FolderId,
        expected: &ChangeCursor,
        next: ChangeCursor,
    ) -> bool {
        match self.folder_slot().as_mut() {
            Some(watch) if watch.folder_id == *folder_id && watch.cursor == *expected => {
                watch.cursor = next;
                true
            }
            _ => false,
        }
    }

    /// Replaces the folder channel only if `expected` is still registered
    pub fn replace_folder_channel_if(
        &self,
        folder_id: &FolderId,
        expected: &ChannelId,
        channel: WatchChannel,
    ) -> bool {
        match self.folder_slot().as_mut() {
            Some(watch) if watch.folder_id == *folder_id && watch.channel.id == *expected => {
                watch.channel = channel;
                true
            }
            _ => false,
        }
    }

    // ------------------------------------------------------------------------
    // Queries over both kinds
    // ------------------------------------------------------------------------

    /// Returns the channel registered for `target`
    pub fn channel_for(&self, target: &WatchTarget) -> Option<WatchChannel> {
        match target {
            WatchTarget::File(id) => self.file(id),
            WatchTarget::Folder(folder_id) => self
                .folder_slot()
                .as_ref()
                .filter(|w| w.folder_id == *folder_id)
                .map(|w| w.channel.clone()),
        }
    }

    /// Returns every registered channel
    pub fn channels(&self) -> Vec<WatchChannel> {
        let mut channels: Vec<WatchChannel> =
            self.files.iter().map(|c| c.value().clone()).collect();
        if let Some(watch) = self.folder_slot().as_ref() {
            channels.push(watch.channel.clone());
        }
        channels
    }

    /// Returns channels expiring within `margin`
    pub fn expiring_within(&self, margin: Duration) -> Vec<WatchChannel> {
        self.channels()
            .into_iter()
            .filter(|c| c.expires_within(margin))
            .collect()
    }
}
