//! In-process subscriber hub
//!
//! [`SubscriberHub`] implements [`INotificationSink`] for subscribers that
//! live in this process (the daemon's event stream connections). Each
//! subscriber owns a bounded queue and a set of document rooms.
//!
//! ## Design Notes
//!
//! - Delivery never waits on a subscriber: a full queue drops the event for
//!   that subscriber only, and the sequence gap tells it so.
//! - Subscribers whose receiver was dropped are pruned on the next delivery.

use std::collections::HashSet;

use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

use docwatch_core::domain::DocumentId;
use docwatch_core::ports::{DocumentEvent, INotificationSink, SubscriberScope};

/// Default capacity of a subscriber queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

struct Subscriber {
    tx: mpsc::Sender<DocumentEvent>,
    rooms: HashSet<DocumentId>,
}

/// Receiving half handed to a new subscriber
pub struct Subscription {
    /// Identifier used to join and leave rooms
    pub id: Uuid,
    /// Events delivered to this subscriber
    pub events: mpsc::Receiver<DocumentEvent>,
}

/// Fan-out of document events to in-process subscribers
pub struct SubscriberHub {
    subscribers: DashMap<Uuid, Subscriber>,
    capacity: usize,
}

impl SubscriberHub {
    /// Creates a hub whose subscriber queues hold `capacity` events
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Registers a new subscriber that receives broadcasts
    pub fn subscribe(&self) -> Subscription {
        let (tx, events) = mpsc::channel(self.capacity);
        let id = Uuid::new_v4();
        self.subscribers.insert(
            id,
            Subscriber {
                tx,
                rooms: HashSet::new(),
            },
        );
        debug!(subscriber = %id, "Subscriber registered");
        Subscription { id, events }
    }

    /// Adds the subscriber to the room of `document_id`
    ///
    /// Returns false if the subscriber is unknown.
    pub fn join(&self, subscriber: Uuid, document_id: DocumentId) -> bool {
        match self.subscribers.get_mut(&subscriber) {
            Some(mut entry) => {
                entry.rooms.insert(document_id);
                true
            }
            None => false,
        }
    }

    /// Removes the subscriber from the room of `document_id`
    pub fn leave(&self, subscriber: Uuid, document_id: &DocumentId) -> bool {
        self.subscribers
            .get_mut(&subscriber)
            .is_some_and(|mut entry| entry.rooms.remove(document_id))
    }

    /// Forgets a subscriber
    pub fn unsubscribe(&self, subscriber: Uuid) -> bool {
        self.subscribers.remove(&subscriber).is_some()
    }

    /// Number of registered subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl Default for SubscriberHub {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

#[async_trait::async_trait]
impl INotificationSink for SubscriberHub {
    async fn deliver(&self, event: &DocumentEvent, scope: &SubscriberScope) -> anyhow::Result<usize> {
        let mut delivered = 0;
        let mut closed = Vec::new();

        for entry in self.subscribers.iter() {
            let wanted = match scope {
                SubscriberScope::Broadcast => true,
                SubscriberScope::Room(document_id) => entry.rooms.contains(document_id),
            };
            if !wanted {
                continue;
            }

            match entry.tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        subscriber = %entry.key(),
                        sequence = event.sequence_number,
                        "Subscriber queue full; event dropped"
                    );
                }
                Err(TrySendError::Closed(_)) => closed.push(*entry.key()),
            }
        }

        for id in closed {
            self.subscribers.remove(&id);
            debug!(subscriber = %id, "Pruned closed subscriber");
        }

        Ok(delivered)
    }
}
