//! Notification sink port (driven/secondary port)
//!
//! Receives the normalized content of changed documents and delivers it to
//! subscribers, either to everyone or to the subscribers of one document.

use serde::{Deserialize, Serialize};

use crate::domain::newtypes::DocumentId;

/// Audience of a dispatched event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriberScope {
    /// Every subscriber
    Broadcast,
    /// Only subscribers registered against the given document
    Room(DocumentId),
}

impl std::fmt::Display for SubscriberScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriberScope::Broadcast => write!(f, "broadcast"),
            SubscriberScope::Room(id) => write!(f, "room:{id}"),
        }
    }
}

/// Event delivered to subscribers when a document's content changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentEvent {
    /// Remote document identifier
    pub document_id: DocumentId,
    /// Display name of the document
    pub document_name: String,
    /// Short human-readable summary
    pub message: String,
    /// Process-wide, strictly increasing sequence number (starts at 1)
    pub sequence_number: u64,
    /// Normalized plain-text content
    pub full_text: String,
}

/// Port trait for event delivery
#[async_trait::async_trait]
pub trait INotificationSink: Send + Sync {
    /// Delivers an event to the subscribers in `scope`
    ///
    /// # Returns
    /// The number of subscribers the event was handed to
    async fn deliver(&self, event: &DocumentEvent, scope: &SubscriberScope)
        -> anyhow::Result<usize>;
}
