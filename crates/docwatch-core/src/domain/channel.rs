//! Watch channel descriptors
//!
//! A [`WatchChannel`] describes one active push-notification subscription
//! registered with the remote store, scoped either to a single document or
//! to the folder-level change feed.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{ChannelId, DocumentId, FolderId};

/// What a watch channel is scoped to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum WatchTarget {
    /// A single document
    File(DocumentId),
    /// The change feed of the monitored folder
    Folder(FolderId),
}

impl WatchTarget {
    /// Returns the raw remote identifier of the target
    pub fn as_str(&self) -> &str {
        match self {
            WatchTarget::File(id) => id.as_str(),
            WatchTarget::Folder(id) => id.as_str(),
        }
    }
}

impl std::fmt::Display for WatchTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchTarget::File(id) => write!(f, "file:{id}"),
            WatchTarget::Folder(id) => write!(f, "folder:{id}"),
        }
    }
}

/// An active push-notification channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchChannel {
    /// Channel identifier chosen at registration time
    pub id: ChannelId,
    /// Opaque resource identifier assigned by the remote store
    /// (required to cancel the channel)
    pub resource_id: Option<String>,
    /// Target of the channel
    pub target: WatchTarget,
    /// When the channel was registered
    pub created_at: DateTime<Utc>,
    /// When the remote store will stop delivering notifications, if known
    pub expires_at: Option<DateTime<Utc>>,
}

impl WatchChannel {
    /// Returns true if the channel has already expired
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Utc::now() >= at)
    }

    /// Returns true if the channel expires within the given duration
    ///
    /// Channels without a known expiry never need renewal.
    pub fn expires_within(&self, duration: Duration) -> bool {
        self.expires_at
            .is_some_and(|at| Utc::now() + duration >= at)
    }
}
