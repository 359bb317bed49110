//! Notification dispatcher
//!
//! Publishes normalized content to subscribers through an
//! [`INotificationSink`], stamping each event with a process-wide sequence
//! number so subscribers can detect gaps and ordering.
//!
//! The sequence lock is held across delivery: events reach the sink in
//! sequence order, and a failed delivery does not consume a number.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use docwatch_core::domain::DocumentId;
use docwatch_core::ports::{DocumentEvent, INotificationSink, SubscriberScope};

pub struct NotificationDispatcher {
    sink: Arc<dyn INotificationSink>,
    /// Last sequence number handed out
    sequence: Mutex<u64>,
}

impl NotificationDispatcher {
    pub fn new(sink: Arc<dyn INotificationSink>) -> Self {
        Self {
            sink,
            sequence: Mutex::new(0),
        }
    }

    /// Publishes `text` for a document to `scope`
    ///
    /// # Returns
    /// The sequence number of the event, or `None` when nothing was published
    /// (empty text, or the sink failed).
    pub async fn publish(
        &self,
        document_id: &DocumentId,
        name: &str,
        text: &str,
        scope: SubscriberScope,
    ) -> Option<u64> {
        if text.is_empty() {
            return None;
        }

        let mut sequence = self.sequence.lock().await;
        let next = *sequence + 1;
        let event = DocumentEvent {
            document_id: document_id.clone(),
            document_name: name.to_string(),
            message: format!("{name} was updated"),
            sequence_number: next,
            full_text: text.to_string(),
        };

        match self.sink.deliver(&event, &scope).await {
            Ok(recipients) => {
                *sequence = next;
                debug!(
                    document_id = %document_id,
                    sequence = next,
                    %scope,
                    recipients,
                    "Published document event"
                );
                Some(next)
            }
            Err(e) => {
                warn!(
                    document_id = %document_id,
                    %scope,
                    error = %format!("{e:#}"),
                    "Failed to publish document event"
                );
                None
            }
        }
    }

    /// The last sequence number handed out (0 before the first publish)
    pub async fn last_sequence(&self) -> u64 {
        *self.sequence.lock().await
    }
}
